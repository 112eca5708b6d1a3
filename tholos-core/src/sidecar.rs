//! RSCF sidecar container.
//!
//! Layout (all offsets fixed):
//!
//! ```text
//! 0   MAGIC      5   b"RSCF\x01"
//! 5   VERSION    4   b"\x00\x00\x00\x01"
//! 9   GS         1   0x1D
//! 10  DIGEST    64   lowercase hex SHA-256 of PAYLOAD
//! 74  SEP        4   1E 02 02 02
//! 78  PAYLOAD    n   bincode(SidecarRecord)
//! -4  FOOTER     4   03 03 03 04
//! ```
//!
//! The header is parsed by position, so separator bytes occurring inside the
//! payload are harmless.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::digest::{FileDigests, Fingerprint};
use crate::error::{Error, IoContext, Result};
use crate::scan::FileRecord;

pub const MAGIC: &[u8; 5] = b"RSCF\x01";
pub const CONTAINER_VERSION: &[u8; 4] = b"\x00\x00\x00\x01";
const GROUP_SEP: u8 = 0x1D;
const RECORD_SEP: &[u8; 4] = b"\x1e\x02\x02\x02";
const FOOTER: &[u8; 4] = b"\x03\x03\x03\x04";
const DIGEST_LEN: usize = 64;
const DIGEST_OFF: usize = MAGIC.len() + CONTAINER_VERSION.len() + 1;
const SEP_OFF: usize = DIGEST_OFF + DIGEST_LEN;
pub const HEADER_LEN: usize = SEP_OFF + RECORD_SEP.len();

/// Schema version of the payload record.
pub const RECORD_VERSION: u32 = 1;

/// How the top-level file was packed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Renderer {
    #[serde(rename = "none")]
    None,
    #[default]
    #[serde(rename = "main.7z-lzma")]
    Main7zLzma,
    #[serde(rename = "main.7z-zstd")]
    Main7zZstd,
}

/// Metadata of one file extracted from the container.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MemberMeta {
    #[serde(rename = "path")]
    pub relative_path: String,
    pub size: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub crc32: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub blake3: Fingerprint,
}

impl MemberMeta {
    /// Build from a stat record plus a full digest set.
    pub fn from_digests(relative_path: String, rec: &FileRecord, d: FileDigests) -> Result<Self> {
        let missing = |name: &str| Error::Integrity(format!("{name} digest missing for {relative_path}"));
        Ok(Self {
            size: rec.size,
            ctime: rec.ctime_ns,
            mtime: rec.mtime_ns,
            crc32: d.crc32.ok_or_else(|| missing("crc32"))?,
            md5: d.md5.ok_or_else(|| missing("md5"))?,
            sha1: d.sha1.ok_or_else(|| missing("sha1"))?,
            sha256: d.sha256.ok_or_else(|| missing("sha256"))?,
            blake3: d.blake3.ok_or_else(|| missing("blake3"))?,
            relative_path,
        })
    }
}

/// Index -> member map that keeps insertion order through (de)serialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberMap(Vec<(u32, MemberMeta)>);

impl MemberMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace in place; replacing keeps the original position.
    pub fn insert(&mut self, idx: u32, meta: MemberMeta) -> Option<MemberMeta> {
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == idx) {
            return Some(std::mem::replace(&mut slot.1, meta));
        }
        self.0.push((idx, meta));
        None
    }

    /// Append under the next free index and return it.
    pub fn push(&mut self, meta: MemberMeta) -> u32 {
        let idx = self.0.iter().map(|(k, _)| k + 1).max().unwrap_or(0);
        self.0.push((idx, meta));
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&MemberMeta> {
        self.0.iter().find(|(k, _)| *k == idx).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &MemberMeta)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

impl Serialize for MemberMap {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut m = s.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            m.serialize_entry(k, v)?;
        }
        m.end()
    }
}

impl<'de> Deserialize<'de> for MemberMap {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        struct MapVisitor;
        impl<'de> Visitor<'de> for MapVisitor {
            type Value = MemberMap;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of member index to member metadata")
            }
            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<MemberMap, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0).min(4096));
                while let Some((k, v)) = access.next_entry::<u32, MemberMeta>()? {
                    if out.iter().any(|(e, _)| *e == k) {
                        return Err(serde::de::Error::custom(format!("duplicate member index {k}")));
                    }
                    out.push((k, v));
                }
                Ok(MemberMap(out))
            }
        }
        d.deserialize_map(MapVisitor)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SidecarRecord {
    pub version: u32,
    pub renderer: Renderer,
    pub file_blake3: Fingerprint,
    pub file_size: u64,
    pub file_ctime_ns: u64,
    pub file_mtime_ns: u64,
    pub file_inode: u64,
    pub files: MemberMap,
}

impl SidecarRecord {
    /// Fresh record for `rec`; members are added by the caller.
    pub fn new(rec: &FileRecord, blake3: Fingerprint, renderer: Renderer) -> Self {
        Self {
            version: RECORD_VERSION,
            renderer,
            file_blake3: blake3,
            file_size: rec.size,
            file_ctime_ns: rec.ctime_ns,
            file_mtime_ns: rec.mtime_ns,
            file_inode: rec.inode,
            files: MemberMap::new(),
        }
    }

    /// Replace the top-level fields, keeping members and renderer.
    pub fn refresh_header(&mut self, rec: &FileRecord, blake3: Fingerprint) {
        self.file_blake3 = blake3;
        self.file_size = rec.size;
        self.file_ctime_ns = rec.ctime_ns;
        self.file_mtime_ns = rec.mtime_ns;
        self.file_inode = rec.inode;
    }
}

/// Why a byte blob is not a valid sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalid {
    TooShort(usize),
    BadMagic,
    UnsupportedVersion([u8; 4]),
    BadFraming,
    DigestMismatch,
    Payload(String),
}

impl fmt::Display for Invalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invalid::TooShort(n) => write!(f, "too short ({n} bytes)"),
            Invalid::BadMagic => f.write_str("bad magic"),
            Invalid::UnsupportedVersion(v) => write!(f, "unsupported container version {v:02x?}"),
            Invalid::BadFraming => f.write_str("bad separator or footer"),
            Invalid::DigestMismatch => f.write_str("payload digest mismatch"),
            Invalid::Payload(e) => write!(f, "payload decode: {e}"),
        }
    }
}

impl From<Invalid> for Error {
    fn from(i: Invalid) -> Self {
        Error::Integrity(i.to_string())
    }
}

pub fn encode(rec: &SidecarRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(rec)?;
    let digest = format!("{:x}", Sha256::digest(&payload));
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + FOOTER.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(CONTAINER_VERSION);
    out.push(GROUP_SEP);
    out.extend_from_slice(digest.as_bytes());
    out.extend_from_slice(RECORD_SEP);
    out.extend_from_slice(&payload);
    out.extend_from_slice(FOOTER);
    Ok(out)
}

pub fn decode(buf: &[u8]) -> std::result::Result<SidecarRecord, Invalid> {
    if buf.len() < HEADER_LEN + FOOTER.len() {
        return Err(Invalid::TooShort(buf.len()));
    }
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(Invalid::BadMagic);
    }
    let ver = &buf[MAGIC.len()..MAGIC.len() + 4];
    if ver != CONTAINER_VERSION {
        let mut v = [0u8; 4];
        v.copy_from_slice(ver);
        return Err(Invalid::UnsupportedVersion(v));
    }
    if buf[DIGEST_OFF - 1] != GROUP_SEP
        || &buf[SEP_OFF..HEADER_LEN] != RECORD_SEP
        || &buf[buf.len() - FOOTER.len()..] != FOOTER
    {
        return Err(Invalid::BadFraming);
    }
    let stored = &buf[DIGEST_OFF..SEP_OFF];
    let payload = &buf[HEADER_LEN..buf.len() - FOOTER.len()];
    let actual = format!("{:x}", Sha256::digest(payload));
    if actual.as_bytes() != stored {
        return Err(Invalid::DigestMismatch);
    }
    bincode::deserialize(payload).map_err(|e| Invalid::Payload(e.to_string()))
}

/// Outcome of looking for a sidecar on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarRead {
    Missing,
    Invalid(Invalid),
    Valid(SidecarRecord),
}

pub fn read(path: &Path) -> Result<SidecarRead> {
    let buf = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SidecarRead::Missing),
        Err(e) => return Err(Error::io(path, e)),
    };
    Ok(match decode(&buf) {
        Ok(rec) => SidecarRead::Valid(rec),
        Err(why) => SidecarRead::Invalid(why),
    })
}

/// Something other than a regular file sits where a sidecar belongs.
pub fn check_target(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(md) if !md.is_file() => Err(Error::Precondition(format!(
            "sidecar path {} exists and is not a regular file",
            path.display()
        ))),
        _ => Ok(()),
    }
}

/// Write via a temporary sibling and rename over the target.
pub fn write(rec: &SidecarRecord, path: &Path) -> Result<()> {
    check_target(path)?;
    let bytes = encode(rec)?;
    write_atomic(path, &[&bytes])
}

/// Write `parts` to a hidden temporary in the target's directory, then
/// persist it over `path`. The temporary is removed on every error path, and
/// its name keeps the target's extension so a crash leftover is never listed
/// as data.
pub(crate) fn write_atomic(path: &Path, parts: &[&[u8]]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let suffix = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(&suffix)
        .tempfile_in(dir)
        .at(dir)?;
    for part in parts {
        tmp.write_all(part).at(tmp.path())?;
    }
    tmp.as_file().sync_all().at(tmp.path())?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
