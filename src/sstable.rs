//! SSTable collaborator. The on-disk SSTable format, the block
//! manager's paging, and compression are genuinely external concerns;
//! this module defines the trait boundary the controller consumes and
//! ships one minimal, single-block-per-table implementation so the
//! crate runs end to end.

use crate::bloom::Bloom;
use crate::error::{Result, StoreError};
use crate::record::Record;
use crate::witness::WitnessSet;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Operations the LSM controller needs from the SSTable layer.
pub trait SsTableStore: Send + Sync {
    fn persist_memtable(&self, records: &[Record], id: u64) -> Result<()>;
    fn get(&self, key: &str, id: u64) -> Result<Option<Record>>;
    /// As `get`, but returns a tombstoned entry instead of treating it as
    /// absent — lets the controller stop descending into older levels
    /// once a table proves a key was deleted there.
    fn get_including_tombstone(&self, key: &str, id: u64) -> Result<Option<Record>>;
    fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
        id: u64,
    ) -> Result<Option<Record>>;
    fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
        id: u64,
    ) -> Result<Option<Record>>;
    /// `page_size`/`page_number` are accepted for interface parity with the
    /// memtable contract; pagination itself is applied by the controller.
    fn scan_for_prefix(
        &self,
        prefix: &str,
        witness: &mut WitnessSet,
        best_keys: &mut Vec<String>,
        _page_size: usize,
        _page_number: usize,
        id: u64,
    ) -> Result<()>;
    fn scan_for_range(
        &self,
        start: &str,
        end: &str,
        witness: &mut WitnessSet,
        best_keys: &mut Vec<String>,
        _page_size: usize,
        _page_number: usize,
        id: u64,
    ) -> Result<()>;
    fn get_boundaries(&self, id: u64) -> Result<(String, String)>;
    fn compact(&self, ids: &[u64], new_id: u64) -> Result<()>;
    /// Greatest embedded `timestamp` across every record in this table
    /// (tombstones included). Used to recompute the controller's sequence
    /// counter high-water mark on reopen, the same way `next_sstable_index`
    /// is recomputed from the manifest's ids.
    fn max_timestamp(&self, id: u64) -> Result<u64>;
}

#[derive(Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    tombstone: bool,
    offset: u64,
}

#[derive(Serialize, Deserialize)]
struct Footer {
    index: Vec<IndexEntry>,
    min_key: String,
    max_key: String,
    bloom: Vec<u8>,
}

/// A file-per-table store. Each file is `[record...][footer JSON][footer
/// len:8][footer crc32:4]`; the footer holds an exhaustive key index (no
/// block splitting — the block manager's paging is out of scope here),
/// a bloom filter, and the table's key boundaries.
pub struct FileSsTableStore {
    dir: PathBuf,
    /// Width in bytes of the footer checksum field.
    /// `crc32fast` always produces a 4-byte digest, so this only ever
    /// widens the trailer with leading zero padding — it exists so the
    /// on-disk trailer layout is controlled by config rather than baked
    /// into the code.
    crc_size: usize,
}

impl FileSsTableStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_crc_size(dir, 4)
    }

    pub fn with_crc_size(dir: impl AsRef<Path>, crc_size: usize) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            crc_size: crc_size.max(4),
        })
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id:020}.sst"))
    }

    fn trailer_size(&self) -> usize {
        8 + self.crc_size
    }

    fn read_footer(&self, id: u64) -> Result<Footer> {
        let mut file = File::open(self.path_for(id))?;
        let len = file.metadata()?.len();
        let trailer_size = self.trailer_size();
        if len < trailer_size as u64 {
            return Err(StoreError::CorruptRecord(format!(
                "sstable {id} too short to contain a footer"
            )));
        }
        file.seek(SeekFrom::End(-(trailer_size as i64)))?;
        let mut trailer = vec![0u8; trailer_size];
        file.read_exact(&mut trailer)?;
        let footer_len = u64::from_le_bytes(trailer[0..8].try_into().unwrap());
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&trailer[8..12]);
        let footer_crc = u32::from_le_bytes(crc_bytes);
        file.seek(SeekFrom::End(-(trailer_size as i64) - footer_len as i64))?;
        let mut footer_bytes = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer_bytes)?;
        if crc32fast::hash(&footer_bytes) != footer_crc {
            return Err(StoreError::CorruptRecord(format!(
                "sstable {id} footer checksum mismatch"
            )));
        }
        serde_json::from_slice(&footer_bytes)
            .map_err(|e| StoreError::CorruptRecord(format!("sstable {id} footer: {e}")))
    }

    fn read_record_at(&self, file: &mut File, offset: u64) -> Result<Record> {
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 26];
        file.read_exact(&mut header)?;
        let key_size = u64::from_le_bytes(header[10..18].try_into().unwrap()) as usize;
        let value_size = u64::from_le_bytes(header[18..26].try_into().unwrap()) as usize;
        let mut body = vec![0u8; key_size + value_size];
        file.read_exact(&mut body)?;
        let mut buf = header.to_vec();
        buf.extend_from_slice(&body);
        Record::deserialize_uncompressed(&buf)
    }

    fn read_all(&self, id: u64) -> Result<Vec<Record>> {
        let footer = self.read_footer(id)?;
        let mut file = File::open(self.path_for(id))?;
        footer
            .index
            .iter()
            .map(|e| self.read_record_at(&mut file, e.offset))
            .collect()
    }

    fn scan_index<'a>(
        &self,
        footer: &'a Footer,
        pred: impl Fn(&str) -> bool,
    ) -> impl Iterator<Item = &'a IndexEntry> {
        footer.index.iter().filter(move |e| pred(&e.key))
    }
}

impl SsTableStore for FileSsTableStore {
    fn persist_memtable(&self, records: &[Record], id: u64) -> Result<()> {
        let path = self.path_for(id);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let mut index = Vec::with_capacity(records.len());
        let mut offset = 0u64;
        for r in records {
            let buf = r.serialize_uncompressed();
            file.write_all(&buf)?;
            index.push(IndexEntry {
                key: r.key.clone(),
                tombstone: r.tombstone,
                offset,
            });
            offset += buf.len() as u64;
        }

        let keys: Vec<String> = records.iter().map(|r| r.key.clone()).collect();
        let bloom = Bloom::build(&keys);
        let mut bloom_buf = Vec::new();
        bloom.encode(&mut bloom_buf);

        let footer = Footer {
            index,
            min_key: records.first().map(|r| r.key.clone()).unwrap_or_default(),
            max_key: records.last().map(|r| r.key.clone()).unwrap_or_default(),
            bloom: bloom_buf,
        };
        let footer_bytes = serde_json::to_vec(&footer).map_err(anyhow::Error::from)?;
        let footer_crc = crc32fast::hash(&footer_bytes);
        let mut crc_field = vec![0u8; self.crc_size];
        crc_field[..4].copy_from_slice(&footer_crc.to_le_bytes());
        file.write_all(&footer_bytes)?;
        file.write_all(&(footer_bytes.len() as u64).to_le_bytes())?;
        file.write_all(&crc_field)?;
        file.sync_all()?;
        Ok(())
    }

    fn get(&self, key: &str, id: u64) -> Result<Option<Record>> {
        let footer = self.read_footer(id)?;
        let bloom = Bloom::decode(&footer.bloom).map_err(anyhow::Error::from)?;
        if !bloom.may_contain(key) {
            return Ok(None);
        }
        match footer.index.binary_search_by(|e| e.key.as_str().cmp(key)) {
            Ok(pos) if !footer.index[pos].tombstone => {
                let mut file = File::open(self.path_for(id))?;
                Ok(Some(self.read_record_at(&mut file, footer.index[pos].offset)?))
            }
            _ => Ok(None),
        }
    }

    fn get_including_tombstone(&self, key: &str, id: u64) -> Result<Option<Record>> {
        let footer = self.read_footer(id)?;
        let bloom = Bloom::decode(&footer.bloom).map_err(anyhow::Error::from)?;
        if !bloom.may_contain(key) {
            return Ok(None);
        }
        match footer.index.binary_search_by(|e| e.key.as_str().cmp(key)) {
            Ok(pos) => {
                let mut file = File::open(self.path_for(id))?;
                Ok(Some(self.read_record_at(&mut file, footer.index[pos].offset)?))
            }
            Err(_) => Ok(None),
        }
    }

    fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
        id: u64,
    ) -> Result<Option<Record>> {
        let footer = self.read_footer(id)?;
        let mut file = File::open(self.path_for(id))?;
        for entry in self.scan_index(&footer, |k| k.starts_with(prefix)) {
            if after_key.is_some_and(|a| entry.key.as_str() <= a) {
                continue;
            }
            if entry.tombstone {
                witness.witness(&entry.key);
                continue;
            }
            if witness.contains(&entry.key) {
                continue;
            }
            return Ok(Some(self.read_record_at(&mut file, entry.offset)?));
        }
        Ok(None)
    }

    fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
        id: u64,
    ) -> Result<Option<Record>> {
        let footer = self.read_footer(id)?;
        let mut file = File::open(self.path_for(id))?;
        for entry in self.scan_index(&footer, |k| k >= start && k <= end) {
            if after_key.is_some_and(|a| entry.key.as_str() <= a) {
                continue;
            }
            if entry.tombstone {
                witness.witness(&entry.key);
                continue;
            }
            if witness.contains(&entry.key) {
                continue;
            }
            return Ok(Some(self.read_record_at(&mut file, entry.offset)?));
        }
        Ok(None)
    }

    fn scan_for_prefix(
        &self,
        prefix: &str,
        witness: &mut WitnessSet,
        best_keys: &mut Vec<String>,
        _page_size: usize,
        _page_number: usize,
        id: u64,
    ) -> Result<()> {
        let footer = self.read_footer(id)?;
        for entry in self.scan_index(&footer, |k| k.starts_with(prefix)) {
            if entry.tombstone {
                witness.witness(&entry.key);
            } else if !witness.contains(&entry.key) {
                crate::memtable::insert_sorted_dedup(best_keys, &entry.key);
            }
        }
        Ok(())
    }

    fn scan_for_range(
        &self,
        start: &str,
        end: &str,
        witness: &mut WitnessSet,
        best_keys: &mut Vec<String>,
        _page_size: usize,
        _page_number: usize,
        id: u64,
    ) -> Result<()> {
        let footer = self.read_footer(id)?;
        for entry in self.scan_index(&footer, |k| k >= start && k <= end) {
            if entry.tombstone {
                witness.witness(&entry.key);
            } else if !witness.contains(&entry.key) {
                crate::memtable::insert_sorted_dedup(best_keys, &entry.key);
            }
        }
        Ok(())
    }

    fn get_boundaries(&self, id: u64) -> Result<(String, String)> {
        let footer = self.read_footer(id)?;
        Ok((footer.min_key, footer.max_key))
    }

    fn max_timestamp(&self, id: u64) -> Result<u64> {
        Ok(self
            .read_all(id)?
            .iter()
            .map(|r| r.timestamp)
            .max()
            .unwrap_or(0))
    }

    fn compact(&self, ids: &[u64], new_id: u64) -> Result<()> {
        use std::collections::HashMap;
        let mut latest: HashMap<String, Record> = HashMap::new();
        for &id in ids {
            for record in self.read_all(id)? {
                match latest.get(&record.key) {
                    Some(existing) if existing.timestamp >= record.timestamp => {}
                    _ => {
                        latest.insert(record.key.clone(), record);
                    }
                }
            }
        }
        let mut merged: Vec<Record> = latest.into_values().collect();
        merged.sort_by(|a, b| a.key.cmp(&b.key));
        self.persist_memtable(&merged, new_id)?;
        for &id in ids {
            let _ = fs::remove_file(self.path_for(id));
        }
        Ok(())
    }
}
