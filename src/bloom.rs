//! Bloom filter auxiliary structure used by the SSTable collaborator to
//! skip tables that cannot contain a key.

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub struct Bloom {
    filter: Bytes,
    hash_count: u8,
}

trait BitSlice {
    fn get_bit(&self, idx: usize) -> bool;
    fn bit_len(&self) -> usize;
}

trait BitSliceMut {
    fn set_bit(&mut self, idx: usize, val: bool);
}

impl<T: AsRef<[u8]>> BitSlice for T {
    fn get_bit(&self, idx: usize) -> bool {
        let pos = idx / 8;
        let offset = idx % 8;
        (self.as_ref()[pos] & (1 << offset)) != 0
    }

    fn bit_len(&self) -> usize {
        self.as_ref().len() * 8
    }
}

impl<T: AsMut<[u8]>> BitSliceMut for T {
    fn set_bit(&mut self, idx: usize, val: bool) {
        let pos = idx / 8;
        let offset = idx % 8;
        if val {
            self.as_mut()[pos] |= 1 << offset;
        } else {
            self.as_mut()[pos] &= !(1 << offset);
        }
    }
}

impl Bloom {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 5 {
            bail!("bloom filter buffer too short");
        }
        let checksum = (&buf[buf.len() - 4..]).get_u32();
        if checksum != crc32fast::hash(&buf[..buf.len() - 4]) {
            bail!("checksum mismatched for bloom filter");
        }
        let hash_count = buf[buf.len() - 5];
        let filter = &buf[..buf.len() - 5];
        Ok(Self {
            filter: filter.to_vec().into(),
            hash_count,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let offset = buf.len();
        buf.extend(&self.filter);
        buf.put_u8(self.hash_count);
        let checksum = crc32fast::hash(&buf[offset..]);
        buf.put_u32(checksum);
    }

    fn bits_per_key(entries: usize, false_positive_rate: f64) -> usize {
        let entries = entries.max(1);
        let size =
            -1.0 * (entries as f64) * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2);
        (size / (entries as f64)).ceil() as usize
    }

    /// Builds a bloom filter sized for `keys.len()` entries at roughly 1%
    /// false-positive rate.
    pub fn build(keys: &[String]) -> Self {
        let hashes: Vec<u32> = keys
            .iter()
            .map(|k| farmhash::fingerprint32(k.as_bytes()))
            .collect();
        let bits_per_key = Self::bits_per_key(hashes.len().max(1), 0.01);
        let hash_count = ((bits_per_key as f64 * 0.69) as u32).clamp(1, 30);
        let nbits = (hashes.len() * bits_per_key).max(64);
        let nbytes = nbits.div_ceil(8);
        let nbits = nbytes * 8;
        let mut filter = BytesMut::with_capacity(nbytes);
        filter.resize(nbytes, 0);
        for h in &hashes {
            let mut h = *h;
            let delta = (h >> 17) | (h << 15);
            for _ in 0..hash_count {
                let bit_pos = (h as usize) % nbits;
                filter.set_bit(bit_pos, true);
                h = h.wrapping_add(delta);
            }
        }
        Self {
            filter: filter.freeze(),
            hash_count: hash_count as u8,
        }
    }

    pub fn may_contain(&self, key: &str) -> bool {
        if self.hash_count > 30 {
            return true;
        }
        let mut h = farmhash::fingerprint32(key.as_bytes());
        let nbits = self.filter.bit_len();
        let delta = (h >> 17) | (h << 15);
        for _ in 0..self.hash_count {
            let bit_pos = h % (nbits as u32);
            if !self.filter.get_bit(bit_pos as usize) {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}
