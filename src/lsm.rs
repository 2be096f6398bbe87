//! The LSM controller: owns memtable generations, the level
//! map, the flush pool, and the compaction driver, and serves reads by
//! walking memtables newest-to-oldest and then levels 0..N, newest
//! table first within each level.

use crate::compaction::{Compaction, CompactionDriver};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::flush_pool::FlushPool;
use crate::manifest::Manifest;
use crate::memtable::MemtableHandle;
use crate::record::Record;
use crate::sstable::{FileSsTableStore, SsTableStore};
use crate::witness::WitnessSet;
use moka::sync::Cache;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub struct LsmController {
    config: Config,
    store: Arc<dyn SsTableStore>,
    manifest: Arc<Manifest>,
    compaction: Arc<Compaction>,
    memtables: RwLock<Vec<Arc<MemtableHandle>>>,
    levels: Arc<RwLock<Vec<Vec<u64>>>>,
    flush_pool: FlushPool,
    next_sstable_index: Arc<AtomicU64>,
    next_sequence: AtomicU64,
    data_lost: Arc<AtomicBool>,
    cache: Cache<String, Record>,
}

impl LsmController {
    pub fn open(config: Config) -> Result<Self> {
        let store: Arc<dyn SsTableStore> =
            Arc::new(FileSsTableStore::with_crc_size(&config.lsm_path, config.crc_size)?);
        let manifest_path = Path::new(&config.lsm_path).join("MANIFEST");
        let manifest = Arc::new(Manifest::new(&manifest_path));
        let (levels, data_lost) = Manifest::load(&manifest_path, config.max_levels);
        if data_lost {
            log::warn!(
                "manifest at {} present but unreadable; starting from an empty level map",
                manifest_path.display()
            );
        }

        let next_index = levels
            .iter()
            .flatten()
            .copied()
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        let next_sstable_index = Arc::new(AtomicU64::new(next_index));

        // Recompute the sequence counter's high-water mark from whatever was
        // persisted, the same way `next_sstable_index` is recomputed from
        // the manifest's ids — otherwise timestamps would restart at 0 on
        // every reopen and undermine compaction's newest-wins merge for a
        // key written both before and after a restart.
        let mut next_sequence_value = 0u64;
        for &id in levels.iter().flatten() {
            next_sequence_value = next_sequence_value.max(store.max_timestamp(id)? + 1);
        }

        let levels = Arc::new(RwLock::new(levels));
        let compaction = Arc::new(Compaction::for_config(&config));
        let data_lost_flag = Arc::new(AtomicBool::new(data_lost));

        let flush_pool = FlushPool::new(store.clone(), {
            let levels = levels.clone();
            let store = store.clone();
            let manifest = manifest.clone();
            let compaction = compaction.clone();
            let next_id = next_sstable_index.clone();
            let config = config.clone();
            let data_lost_flag = data_lost_flag.clone();
            move |assigned_id| {
                let mut guard = levels.write();
                guard[0].push(assigned_id);
                loop {
                    match compaction.maybe_compact(&mut guard, store.as_ref(), &config, &next_id) {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(err) => {
                            log::error!("compaction pass failed: {err}");
                            break;
                        }
                    }
                }
                if let Err(err) = manifest.persist(&guard) {
                    log::error!("failed to persist manifest after flush: {err}");
                    data_lost_flag.store(true, Ordering::SeqCst);
                }
            }
        });

        Ok(Self {
            memtables: RwLock::new(vec![Arc::new(MemtableHandle::new(&config))]),
            config,
            store,
            manifest,
            compaction,
            levels,
            flush_pool,
            next_sstable_index,
            next_sequence: AtomicU64::new(next_sequence_value),
            data_lost: data_lost_flag,
            cache: Cache::new(10_000),
        })
    }

    pub fn is_data_lost(&self) -> bool {
        self.data_lost.load(Ordering::SeqCst)
    }

    /// Runs a single compaction pass on demand (the CLI's `compact`
    /// command); returns whether anything was merged.
    pub fn compact_once(&self) -> Result<bool> {
        let mut guard = self.levels.write();
        let did = self
            .compaction
            .maybe_compact(&mut guard, self.store.as_ref(), &self.config, &self.next_sstable_index)?;
        drop(guard);
        if did {
            self.manifest.persist(&self.levels.read())?;
        }
        Ok(did)
    }

    pub fn levels_snapshot(&self) -> Vec<Vec<u64>> {
        self.levels.read().clone()
    }

    pub fn memtable_generation_count(&self) -> usize {
        self.memtables.read().len()
    }

    fn newest_memtable(&self) -> Arc<MemtableHandle> {
        self.memtables.read().last().unwrap().clone()
    }

    /// Adds a fresh memtable generation, or freezes the whole generation
    /// vector and hands it to the flush pool once it has grown to
    /// `max_memtables`. Called the moment the newest generation fills (not
    /// on the next rejected admission) so the freeze lands on the write
    /// that filled it. A no-op if another writer already rolled past
    /// `expected_newest`.
    fn roll_memtables(&self, expected_newest: &Arc<MemtableHandle>) -> Result<()> {
        let mut memtables = self.memtables.write();
        if !Arc::ptr_eq(memtables.last().unwrap(), expected_newest) {
            return Ok(());
        }
        if memtables.len() >= self.config.max_memtables {
            let frozen = std::mem::replace(
                &mut *memtables,
                vec![Arc::new(MemtableHandle::new(&self.config))],
            );
            drop(memtables);
            for mt in frozen {
                let id = self.next_sstable_index.fetch_add(1, Ordering::SeqCst);
                self.flush_pool.submit(mt, id)?;
            }
        } else {
            memtables.push(Arc::new(MemtableHandle::new(&self.config)));
        }
        Ok(())
    }

    pub fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty".into()));
        }
        let timestamp = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let record = Record::new(key, value, timestamp);
        loop {
            let newest = self.newest_memtable();
            match newest.put(record.clone()) {
                Ok(()) => {
                    self.cache.insert(record.key.clone(), record);
                    if newest.is_full() {
                        self.roll_memtables(&newest)?;
                    }
                    return Ok(());
                }
                Err(StoreError::CapacityExceeded) => self.roll_memtables(&newest)?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns whether the key held a live value anywhere in the store
    /// before this call.
    pub fn delete(&self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty".into()));
        }
        let existed = self.get(key)?.is_some();
        let timestamp = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let record = Record::tombstone(key, timestamp);
        self.cache.invalidate(key);
        loop {
            let newest = self.newest_memtable();
            match newest.put(record.clone()) {
                Ok(()) => {
                    if newest.is_full() {
                        self.roll_memtables(&newest)?;
                    }
                    return Ok(existed);
                }
                Err(StoreError::CapacityExceeded) => self.roll_memtables(&newest)?,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(if cached.tombstone { None } else { Some(cached) });
        }
        let memtables = self.memtables.read().clone();
        for mt in memtables.iter().rev() {
            if let Some(record) = mt.get_including_tombstone(key) {
                self.cache.insert(key.to_string(), record.clone());
                return Ok(if record.tombstone { None } else { Some(record) });
            }
        }
        let levels = self.levels.read().clone();
        for level in &levels {
            for &id in level.iter().rev() {
                if let Some(record) = self.store.get_including_tombstone(key, id)? {
                    self.cache.insert(key.to_string(), record.clone());
                    return Ok(if record.tombstone { None } else { Some(record) });
                }
            }
        }
        Ok(None)
    }

    /// Smallest live key greater than `after_key` with the given prefix,
    /// across every memtable generation and every SSTable, newest layer
    /// wins on ties.
    pub fn next_for_prefix(&self, prefix: &str, after_key: Option<&str>) -> Result<Option<Record>> {
        let mut witness = WitnessSet::new();
        let mut best: Option<Record> = None;

        let memtables = self.memtables.read().clone();
        for mt in memtables.iter().rev() {
            if let Some(candidate) = mt.next_for_prefix(prefix, after_key, &mut witness) {
                if best.as_ref().map_or(true, |cur| candidate.key < cur.key) {
                    best = Some(candidate);
                }
            }
        }
        let levels = self.levels.read().clone();
        for level in &levels {
            for &id in level.iter().rev() {
                if let Some(candidate) =
                    self.store
                        .next_for_prefix(prefix, after_key, &mut witness, id)?
                {
                    if best.as_ref().map_or(true, |cur| candidate.key < cur.key) {
                        best = Some(candidate);
                    }
                }
            }
        }
        Ok(best)
    }

    pub fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
    ) -> Result<Option<Record>> {
        let mut witness = WitnessSet::new();
        let mut best: Option<Record> = None;

        let memtables = self.memtables.read().clone();
        for mt in memtables.iter().rev() {
            if let Some(candidate) = mt.next_for_range(start, end, after_key, &mut witness) {
                if best.as_ref().map_or(true, |cur| candidate.key < cur.key) {
                    best = Some(candidate);
                }
            }
        }
        let levels = self.levels.read().clone();
        for level in &levels {
            for &id in level.iter().rev() {
                if let Some(candidate) =
                    self.store
                        .next_for_range(start, end, after_key, &mut witness, id)?
                {
                    if best.as_ref().map_or(true, |cur| candidate.key < cur.key) {
                        best = Some(candidate);
                    }
                }
            }
        }
        Ok(best)
    }

    fn paginate(&self, best_keys: Vec<String>, page_size: usize, page_number: usize) -> Result<Vec<Record>> {
        let start = page_number.saturating_mul(page_size);
        let mut out = Vec::new();
        for key in best_keys.into_iter().skip(start).take(page_size.max(1)) {
            if let Some(record) = self.get(&key)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn prefix_scan(&self, prefix: &str, page_size: usize, page_number: usize) -> Result<Vec<Record>> {
        let mut witness = WitnessSet::new();
        let mut best_keys = Vec::new();

        let memtables = self.memtables.read().clone();
        for mt in memtables.iter().rev() {
            mt.scan_for_prefix(prefix, &mut witness, &mut best_keys);
        }
        let levels = self.levels.read().clone();
        for level in &levels {
            for &id in level.iter().rev() {
                self.store
                    .scan_for_prefix(prefix, &mut witness, &mut best_keys, page_size, page_number, id)?;
            }
        }
        self.paginate(best_keys, page_size, page_number)
    }

    pub fn range_scan(
        &self,
        start: &str,
        end: &str,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Record>> {
        let mut witness = WitnessSet::new();
        let mut best_keys = Vec::new();

        let memtables = self.memtables.read().clone();
        for mt in memtables.iter().rev() {
            let mut local = Vec::new();
            mt.scan_for_prefix("", &mut witness, &mut local);
            for key in local {
                if key.as_str() >= start && key.as_str() <= end {
                    crate::memtable::insert_sorted_dedup(&mut best_keys, &key);
                }
            }
        }
        let levels = self.levels.read().clone();
        for level in &levels {
            for &id in level.iter().rev() {
                self.store
                    .scan_for_range(start, end, &mut witness, &mut best_keys, page_size, page_number, id)?;
            }
        }
        self.paginate(best_keys, page_size, page_number)
    }

    /// Drains every in-memory generation to disk, runs compaction to a
    /// fixed point, and writes the manifest — a clean checkpoint for
    /// shutdown, not part of the background flush path.
    pub fn persist(&self) -> Result<()> {
        let frozen = {
            let mut memtables = self.memtables.write();
            std::mem::replace(&mut *memtables, vec![Arc::new(MemtableHandle::new(&self.config))])
        };
        for mt in frozen {
            if mt.total_records() == 0 {
                continue;
            }
            let id = self.next_sstable_index.fetch_add(1, Ordering::SeqCst);
            mt.flush(id, self.store.as_ref())?;
            self.levels.write()[0].push(id);
        }
        loop {
            let mut guard = self.levels.write();
            let did = self
                .compaction
                .maybe_compact(&mut guard, self.store.as_ref(), &self.config, &self.next_sstable_index)?;
            drop(guard);
            if !did {
                break;
            }
        }
        self.manifest.persist(&self.levels.read())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn controller(dir: &std::path::Path) -> LsmController {
        let config = Config {
            lsm_path: dir.to_string_lossy().to_string(),
            memtable_capacity: 4,
            max_memtables: 2,
            max_tables_per_level: 2,
            ..Config::default()
        };
        LsmController::open(config).unwrap()
    }

    #[test]
    fn put_then_get_round_trip() {
        let dir = tempdir().unwrap();
        let lsm = controller(dir.path());
        lsm.put("a", b"1".to_vec()).unwrap();
        assert_eq!(lsm.get("a").unwrap().unwrap().value, b"1");
        assert!(lsm.get("missing").unwrap().is_none());
    }

    #[test]
    fn delete_shadows_flushed_value() {
        let dir = tempdir().unwrap();
        let lsm = controller(dir.path());
        lsm.put("a", b"1".to_vec()).unwrap();
        // force a flush by filling the memtable past capacity
        for i in 0..4u32 {
            lsm.put(&format!("pad{i}"), b"x".to_vec()).unwrap();
        }
        assert!(lsm.delete("a").unwrap());
        assert!(lsm.get("a").unwrap().is_none());
    }

    #[test]
    fn rolling_past_max_memtables_triggers_flush_and_compaction() {
        let dir = tempdir().unwrap();
        let lsm = controller(dir.path());
        for batch in 0..3u32 {
            for i in 0..4u32 {
                lsm.put(&format!("k{batch}-{i}"), b"v".to_vec()).unwrap();
            }
        }
        // give the background flush pool a moment to run
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(lsm.get("k0-0").unwrap().unwrap().value, b"v");
        assert_eq!(lsm.get("k2-3").unwrap().unwrap().value, b"v");
    }

    #[test]
    fn eight_puts_with_capacity_2_and_max_memtables_4_force_exactly_one_freeze() {
        let dir = tempdir().unwrap();
        let config = Config {
            lsm_path: dir.path().to_string_lossy().to_string(),
            memtable_capacity: 2,
            max_memtables: 4,
            max_tables_per_level: 8,
            ..Config::default()
        };
        let lsm = LsmController::open(config).unwrap();
        for i in 0..8u32 {
            lsm.put(&format!("k{i}"), b"v".to_vec()).unwrap();
        }
        // give the flush pool a moment to drain the frozen batch
        std::thread::sleep(std::time::Duration::from_millis(200));

        assert_eq!(lsm.memtable_generation_count(), 1);
        let levels = lsm.levels_snapshot();
        assert_eq!(levels[0].len(), 4);
        let mut sorted = levels[0].clone();
        sorted.sort();
        assert_eq!(levels[0], sorted, "level-0 ids must be in ascending submission order");
        for i in 0..8u32 {
            assert_eq!(lsm.get(&format!("k{i}")).unwrap().unwrap().value, b"v");
        }
    }

    #[test]
    fn persist_is_idempotent_on_an_empty_store() {
        let dir = tempdir().unwrap();
        let lsm = controller(dir.path());
        lsm.persist().unwrap();
        lsm.persist().unwrap();
        assert!(!lsm.is_data_lost());
    }

    #[test]
    fn reopen_recovers_persisted_state() {
        let dir = tempdir().unwrap();
        {
            let lsm = controller(dir.path());
            lsm.put("a", b"1".to_vec()).unwrap();
            lsm.put("b", b"2".to_vec()).unwrap();
            lsm.persist().unwrap();
        }
        let lsm = controller(dir.path());
        assert_eq!(lsm.get("a").unwrap().unwrap().value, b"1");
        assert_eq!(lsm.get("b").unwrap().unwrap().value, b"2");
        assert!(!lsm.is_data_lost());
    }

    #[test]
    fn prefix_scan_merges_across_layers() {
        let dir = tempdir().unwrap();
        let lsm = controller(dir.path());
        lsm.put("user1", b"a".to_vec()).unwrap();
        lsm.put("user2", b"b".to_vec()).unwrap();
        lsm.persist().unwrap();
        lsm.put("user3", b"c".to_vec()).unwrap();
        let page = lsm.prefix_scan("user", 10, 0).unwrap();
        let keys: Vec<_> = page.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec!["user1", "user2", "user3"]);
    }
}
