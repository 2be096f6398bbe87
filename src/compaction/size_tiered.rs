//! Size-tiered compaction: once a level holds more than
//! `max_tables_per_level` tables, the oldest group (up to that many) is
//! merged one level down.

use super::CompactionDriver;
use crate::config::Config;
use crate::error::Result;
use crate::sstable::SsTableStore;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct SizeTieredCompaction;

impl CompactionDriver for SizeTieredCompaction {
    fn maybe_compact(
        &self,
        levels: &mut Vec<Vec<u64>>,
        store: &dyn SsTableStore,
        config: &Config,
        next_id: &AtomicU64,
    ) -> Result<bool> {
        for level in 0..levels.len() {
            if levels[level].len() <= config.max_tables_per_level {
                continue;
            }
            let group_size = levels[level].len().min(config.max_tables_per_level);
            if group_size < 2 {
                continue;
            }
            let group: Vec<u64> = levels[level][..group_size].to_vec();
            let new_id = next_id.fetch_add(1, Ordering::SeqCst);
            store.compact(&group, new_id)?;

            levels[level].drain(..group_size);
            let target = (level + 1).min(config.max_levels.saturating_sub(1));
            levels[target].push(new_id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::sstable::FileSsTableStore;
    use tempfile::tempdir;

    fn config() -> Config {
        Config {
            max_levels: 3,
            max_tables_per_level: 2,
            ..Config::default()
        }
    }

    #[test]
    fn merges_oldest_group_down_one_level() {
        let dir = tempdir().unwrap();
        let store = FileSsTableStore::new(dir.path()).unwrap();
        store.persist_memtable(&[Record::new("a", b"1".to_vec(), 1)], 1).unwrap();
        store.persist_memtable(&[Record::new("b", b"2".to_vec(), 2)], 2).unwrap();
        store.persist_memtable(&[Record::new("c", b"3".to_vec(), 3)], 3).unwrap();

        let cfg = config();
        let mut levels = vec![vec![1, 2, 3], vec![], vec![]];
        let next_id = AtomicU64::new(4);
        let driver = SizeTieredCompaction;
        let did = driver
            .maybe_compact(&mut levels, &store, &cfg, &next_id)
            .unwrap();

        assert!(did);
        assert_eq!(levels[0], vec![3]);
        assert_eq!(levels[1], vec![4]);
        assert_eq!(next_id.load(Ordering::SeqCst), 5);
        assert_eq!(store.get("a", 4).unwrap().unwrap().value, b"1");
        assert_eq!(store.get("b", 4).unwrap().unwrap().value, b"2");
    }

    #[test]
    fn at_threshold_does_nothing() {
        let dir = tempdir().unwrap();
        let store = FileSsTableStore::new(dir.path()).unwrap();
        let cfg = config();
        let mut levels = vec![vec![1, 2], vec![], vec![]];
        let next_id = AtomicU64::new(3);
        let driver = SizeTieredCompaction;
        let did = driver
            .maybe_compact(&mut levels, &store, &cfg, &next_id)
            .unwrap();
        assert!(!did);
        assert_eq!(levels[0], vec![1, 2]);
    }
}
