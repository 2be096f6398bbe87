//! Compaction strategies. Selected once at controller
//! construction by [`crate::config::CompactionType`], not swapped at
//! runtime — a tagged dispatch over two drivers, the same shape as the
//! memtable variants.

mod leveled;
mod size_tiered;

pub use leveled::LeveledCompaction;
pub use size_tiered::SizeTieredCompaction;

use crate::config::{CompactionType, Config};
use crate::error::Result;
use crate::sstable::SsTableStore;
use std::sync::atomic::AtomicU64;

/// A compaction pass examines `levels` and performs at most one merge,
/// returning whether it did. On any collaborator error the level map is
/// left exactly as it was found — compaction failures are not allowed to
/// leave a level half-merged. New SSTable ids are drawn from the shared
/// `next_id` counter so they never collide with ids the flush pool hands
/// out concurrently.
pub trait CompactionDriver: Send + Sync {
    fn maybe_compact(
        &self,
        levels: &mut Vec<Vec<u64>>,
        store: &dyn SsTableStore,
        config: &Config,
        next_id: &AtomicU64,
    ) -> Result<bool>;
}

pub enum Compaction {
    SizeTiered(SizeTieredCompaction),
    Leveled(LeveledCompaction),
}

impl Compaction {
    pub fn for_config(config: &Config) -> Self {
        match config.compaction_type {
            CompactionType::Size => Compaction::SizeTiered(SizeTieredCompaction),
            CompactionType::Leveled => Compaction::Leveled(LeveledCompaction),
        }
    }
}

impl CompactionDriver for Compaction {
    fn maybe_compact(
        &self,
        levels: &mut Vec<Vec<u64>>,
        store: &dyn SsTableStore,
        config: &Config,
        next_id: &AtomicU64,
    ) -> Result<bool> {
        match self {
            Compaction::SizeTiered(d) => d.maybe_compact(levels, store, config, next_id),
            Compaction::Leveled(d) => d.maybe_compact(levels, store, config, next_id),
        }
    }
}
