use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::digest::Fingerprint;
use crate::error::{Error, IoContext, Result};
use crate::scan::FileRecord;
use crate::sidecar::write_atomic;

/// File framing: magic (8) + schema (u32 LE) + crc32 of compressed body (u32 LE) + body.
const CACHE_MAGIC: &[u8; 8] = b"THOLHC\0\x01";
const CACHE_SCHEMA: u32 = 1;
const PREFIX_LEN: usize = 8 + 4 + 4;
const MAX_UNCOMPRESSED: usize = 512 * 1024 * 1024;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub size: u64,
    pub ctime_ns: u64,
    pub mtime_ns: u64,
    pub inode: u64,
    pub blake3: Fingerprint,
}

impl CacheEntry {
    pub fn new(rec: &FileRecord, blake3: Fingerprint) -> Self {
        Self { size: rec.size, ctime_ns: rec.ctime_ns, mtime_ns: rec.mtime_ns, inode: rec.inode, blake3 }
    }
}

/// Path string -> last known fingerprint.
///
/// Pure memoization: a hit is trusted by path alone, entries are never
/// invalidated by stat changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashCache {
    entries: BTreeMap<String, CacheEntry>,
    dirty: bool,
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, path: &Path) -> Option<&CacheEntry> {
        self.entries.get(&key(path))
    }

    pub fn insert(&mut self, path: &Path, entry: CacheEntry) {
        self.entries.insert(key(path), entry);
        self.dirty = true;
    }

    /// A directory at `path` is a precondition failure.
    pub fn check_target(path: &Path) -> Result<()> {
        match fs::metadata(path) {
            Ok(md) if !md.is_file() => Err(Error::Precondition(format!(
                "hash cache path {} exists and is not a regular file",
                path.display()
            ))),
            _ => Ok(()),
        }
    }

    /// Load from disk. A missing file gives an empty cache; a corrupt one is
    /// logged and discarded.
    pub fn load(path: &Path) -> Result<Self> {
        Self::check_target(path)?;
        let buf = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(Error::io(path, e)),
        };
        match Self::decode(&buf) {
            Ok(entries) => {
                tracing::debug!("hash cache {}: {} entries", path.display(), entries.len());
                Ok(Self { entries, dirty: false })
            }
            Err(e) => {
                tracing::warn!("ignoring unreadable hash cache {}: {e}", path.display());
                Ok(Self::new())
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<BTreeMap<String, CacheEntry>> {
        if buf.len() < PREFIX_LEN || &buf[..8] != CACHE_MAGIC {
            return Err(Error::Integrity("bad hash cache magic".into()));
        }
        let mut schema = [0u8; 4];
        schema.copy_from_slice(&buf[8..12]);
        if u32::from_le_bytes(schema) != CACHE_SCHEMA {
            return Err(Error::Integrity("unsupported hash cache schema".into()));
        }
        let mut crc4 = [0u8; 4];
        crc4.copy_from_slice(&buf[12..16]);
        let body = &buf[PREFIX_LEN..];
        let mut h = Crc32::new();
        h.update(body);
        if h.finalize() != u32::from_le_bytes(crc4) {
            return Err(Error::Integrity("hash cache CRC mismatch".into()));
        }
        let raw = zstd::stream::decode_all(body)
            .map_err(|e| Error::Serialization(format!("zstd decompress hash cache: {e}")))?;
        if raw.len() > MAX_UNCOMPRESSED {
            return Err(Error::Integrity(format!("hash cache too large: {} bytes", raw.len())));
        }
        Ok(bincode::deserialize(&raw)?)
    }

    /// Write atomically (hidden temporary + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        Self::check_target(path)?;
        let raw = bincode::serialize(&self.entries)?;
        let body = zstd::stream::encode_all(&raw[..], 0)
            .map_err(|e| Error::Serialization(format!("zstd compress hash cache: {e}")))?;
        let mut h = Crc32::new();
        h.update(&body);
        let crc = h.finalize();

        write_atomic(path, &[CACHE_MAGIC, &CACHE_SCHEMA.to_le_bytes(), &crc.to_le_bytes(), &body])?;
        Ok(())
    }
}
