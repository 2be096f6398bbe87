//! On-disk manifest: a single `[length:8][payload]` file holding the
//! level→SSTable-id map. The payload is `L[i0,i1,…]` repeated
//! for each level with no separator, parsed with `nom`.
//!
//! The block manager's paged read/write, needed only for manifest
//! persistence here, is folded in as [`ManifestBlockIo`] rather than
//! given its own module.

use nom::character::complete::{char, digit1};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, tuple};
use nom::IResult;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Paged read/write over the manifest file. A real block manager pages
/// arbitrary offsets across many files; the manifest only ever has one
/// file and one record, so this trait exists purely to keep that
/// dependency explicit rather than calling `std::fs` directly from
/// [`Manifest`].
pub trait ManifestBlockIo: Send + Sync {
    fn read_all(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    fn write_all(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()>;
}

pub struct FileBlockIo;

impl ManifestBlockIo for FileBlockIo {
    fn read_all(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write_all(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

fn level_entry(input: &str) -> IResult<&str, Vec<u64>> {
    let (input, (_level, ids)) = tuple((
        digit1,
        delimited(
            char('['),
            separated_list0(char(','), digit1),
            char(']'),
        ),
    ))(input)?;
    let ids = ids.iter().map(|s| s.parse::<u64>().unwrap()).collect();
    Ok((input, ids))
}

fn parse_payload(input: &str) -> IResult<&str, Vec<Vec<u64>>> {
    many0(level_entry)(input)
}

pub fn encode_payload(levels: &[Vec<u64>]) -> String {
    let mut out = String::new();
    for (level, ids) in levels.iter().enumerate() {
        out.push_str(&level.to_string());
        out.push('[');
        let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        out.push_str(&rendered.join(","));
        out.push(']');
    }
    out
}

pub struct Manifest {
    path: PathBuf,
    io: Box<dyn ManifestBlockIo>,
}

impl Manifest {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            io: Box::new(FileBlockIo),
        }
    }

    /// Loads the manifest, returning `(levels, data_lost)`. A missing
    /// file is a fresh initialization, not data loss; a present-but-
    /// unreadable or unparsable file sets `data_lost = true` and still
    /// returns an empty, usable level map.
    pub fn load(path: impl AsRef<Path>, max_levels: usize) -> (Vec<Vec<u64>>, bool) {
        let path = path.as_ref();
        if !path.exists() {
            return (vec![Vec::new(); max_levels], false);
        }
        let manifest = Self::new(path);
        match manifest.io.read_all(&manifest.path) {
            Ok(bytes) => {
                if bytes.len() < 8 {
                    return (vec![Vec::new(); max_levels], true);
                }
                let declared_len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
                if bytes.len() != 8 + declared_len {
                    return (vec![Vec::new(); max_levels], true);
                }
                match std::str::from_utf8(&bytes[8..]).ok().and_then(|payload| {
                    parse_payload(payload).ok().map(|(_, levels)| levels)
                }) {
                    Some(mut levels) => {
                        if levels.len() < max_levels {
                            levels.resize(max_levels, Vec::new());
                        }
                        (levels, false)
                    }
                    None => (vec![Vec::new(); max_levels], true),
                }
            }
            Err(_) => (vec![Vec::new(); max_levels], true),
        }
    }

    pub fn persist(&self, levels: &[Vec<u64>]) -> anyhow::Result<()> {
        let payload = encode_payload(levels);
        let mut bytes = Vec::with_capacity(8 + payload.len());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(payload.as_bytes());
        self.io.write_all(&self.path, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn encode_then_parse_round_trip() {
        let levels = vec![vec![1, 2, 3], vec![], vec![7]];
        let payload = encode_payload(&levels);
        assert_eq!(payload, "0[1,2,3]1[]2[7]");
        let (_, parsed) = parse_payload(&payload).unwrap();
        assert_eq!(parsed, levels);
    }

    #[test]
    fn missing_file_is_fresh_not_data_lost() {
        let dir = tempdir().unwrap();
        let (levels, data_lost) = Manifest::load(dir.path().join("absent"), 3);
        assert!(!data_lost);
        assert_eq!(levels, vec![Vec::<u64>::new(); 3]);
    }

    #[test]
    fn persist_then_load_preserves_levels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST");
        let manifest = Manifest::new(&path);
        let levels = vec![vec![10, 11], vec![20]];
        manifest.persist(&levels).unwrap();
        let (loaded, data_lost) = Manifest::load(&path, 2);
        assert!(!data_lost);
        assert_eq!(loaded, levels);
    }

    #[test]
    fn corrupt_file_sets_data_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST");
        fs::write(&path, b"\xff\xff\xff").unwrap();
        let (levels, data_lost) = Manifest::load(&path, 2);
        assert!(data_lost);
        assert_eq!(levels, vec![Vec::<u64>::new(); 2]);
    }
}
