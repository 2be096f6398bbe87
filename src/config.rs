//! Configuration.
//!
//! Mirrors the enumerated `lsm.*`/`crc.*` options. Loads from a JSON file
//! with [`Config::load`], falling back to [`Config::default`], and
//! individual fields can be overridden from the environment via
//! [`Config::with_env_overrides`].

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompactionType {
    Size,
    Leveled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemtableVariantKind {
    Tree,
    SkipList,
    HashMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub max_levels: usize,
    pub max_tables_per_level: usize,
    pub max_memtables: usize,
    pub compaction_type: CompactionType,
    pub lsm_path: String,
    pub crc_size: usize,
    pub memtable_variant: MemtableVariantKind,
    pub memtable_capacity: usize,
    pub tree_order: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_levels: 7,
            max_tables_per_level: 4,
            max_memtables: 4,
            compaction_type: CompactionType::Size,
            lsm_path: "lsm-data".to_string(),
            crc_size: 4,
            memtable_variant: MemtableVariantKind::Tree,
            memtable_capacity: 1000,
            tree_order: 5,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&text)?;
        Ok(cfg)
    }

    /// Applies `LSM_*` environment overrides on top of an already-loaded
    /// configuration; unset variables leave the field untouched.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("LSM_MAX_LEVELS") {
            if let Ok(n) = v.parse() {
                self.max_levels = n;
            }
        }
        if let Ok(v) = std::env::var("LSM_MAX_TABLES_PER_LEVEL") {
            if let Ok(n) = v.parse() {
                self.max_tables_per_level = n;
            }
        }
        if let Ok(v) = std::env::var("LSM_MAX_MEMTABLES") {
            if let Ok(n) = v.parse() {
                self.max_memtables = n;
            }
        }
        if let Ok(v) = std::env::var("LSM_PATH") {
            self.lsm_path = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.max_levels, 7);
        assert_eq!(c.max_tables_per_level, 4);
        assert_eq!(c.max_memtables, 4);
        assert_eq!(c.compaction_type, CompactionType::Size);
        assert_eq!(c.memtable_variant, MemtableVariantKind::Tree);
        assert_eq!(c.tree_order, 5);
        assert_eq!(c.memtable_capacity, 1000);
    }

    #[test]
    fn json_round_trip() {
        let c = Config::default();
        let text = serde_json::to_string(&c).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back.max_levels, c.max_levels);
    }
}
