//! Single-pass multi-digest fingerprinting.
//!
//! Every requested digest is fed from the same sequence of 64 KiB reads, so a
//! file is read once no matter how many algorithms are asked for. BLAKE3 is
//! either taken from an external `b3sum`-compatible tool or computed in the
//! same pass, depending on [`Blake3Backend`].

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::Command;

use crate::config::{Blake3Backend, Config};
use crate::error::{Error, IoContext, Result};

pub const READ_CHUNK: usize = 64 * 1024;

/// Uppercase hex BLAKE3 digest; the content identity of a file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accepts 64 hex digits in either case.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Fingerprint(s.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Fingerprint(hex_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn hex_upper(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789ABCDEF";
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push(LUT[(b >> 4) as usize] as char);
        s.push(LUT[(b & 0xF) as usize] as char);
    }
    s
}

/// Which digests to compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Algorithms {
    pub crc32: bool,
    pub md5: bool,
    pub sha1: bool,
    pub sha256: bool,
    pub blake3: bool,
}

impl Algorithms {
    pub const ALL: Algorithms =
        Algorithms { crc32: true, md5: true, sha1: true, sha256: true, blake3: true };
    pub const BLAKE3: Algorithms =
        Algorithms { crc32: false, md5: false, sha1: false, sha256: false, blake3: true };

    fn needs_read(&self, native_blake3: bool) -> bool {
        self.crc32 || self.md5 || self.sha1 || self.sha256 || (self.blake3 && native_blake3)
    }
}

/// Digests of one file; `None` for algorithms that were not requested.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileDigests {
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub blake3: Option<Fingerprint>,
}

#[derive(Clone, Debug)]
pub struct DigestEngine {
    backend: Blake3Backend,
}

impl DigestEngine {
    pub fn new(cfg: &Config) -> Self {
        Self { backend: cfg.blake3.clone() }
    }

    pub fn with_backend(backend: Blake3Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Blake3Backend {
        &self.backend
    }

    pub fn blake3(&self, path: &Path) -> Result<Fingerprint> {
        let d = self.fingerprint(path, Algorithms::BLAKE3)?;
        d.blake3.ok_or_else(|| Error::Integrity("blake3 digest missing".into()))
    }

    pub fn fingerprint(&self, path: &Path, algos: Algorithms) -> Result<FileDigests> {
        let native = matches!(self.backend, Blake3Backend::Native);
        let mut out = FileDigests::default();

        if algos.needs_read(native) {
            let mut crc = algos.crc32.then(crc32fast::Hasher::new);
            let mut md5 = algos.md5.then(Md5::new);
            let mut sha1 = algos.sha1.then(Sha1::new);
            let mut sha256 = algos.sha256.then(Sha256::new);
            let mut b3 = (algos.blake3 && native).then(blake3::Hasher::new);

            let mut f = File::open(path).at(path)?;
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = match f.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::io(path, e)),
                };
                let chunk = &buf[..n];
                if let Some(h) = crc.as_mut() {
                    h.update(chunk);
                }
                if let Some(h) = md5.as_mut() {
                    h.update(chunk);
                }
                if let Some(h) = sha1.as_mut() {
                    h.update(chunk);
                }
                if let Some(h) = sha256.as_mut() {
                    h.update(chunk);
                }
                if let Some(h) = b3.as_mut() {
                    h.update(chunk);
                }
            }
            out.crc32 = crc.map(|h| format!("{:08X}", h.finalize()));
            out.md5 = md5.map(|h| hex_upper(&h.finalize()));
            out.sha1 = sha1.map(|h| hex_upper(&h.finalize()));
            out.sha256 = sha256.map(|h| hex_upper(&h.finalize()));
            out.blake3 = b3.map(|h| Fingerprint::from_bytes(h.finalize().as_bytes()));
        }

        if algos.blake3 {
            if let Blake3Backend::External { program } = &self.backend {
                out.blake3 = Some(external_b3sum(program, path)?);
            }
        }
        Ok(out)
    }
}

/// Run `<program> --no-names <path>` and parse the digest from stdout.
pub fn external_b3sum(program: &Path, path: &Path) -> Result<Fingerprint> {
    // Surface a vanished file as I/O, not as a tool failure.
    std::fs::metadata(path).at(path)?;
    let tool = program.display().to_string();
    let output = Command::new(program)
        .arg("--no-names")
        .arg(path)
        .output()
        .map_err(|e| Error::ExternalTool { tool: tool.clone(), status: "spawn".into(), stderr: e.to_string() })?;
    if !output.status.success() {
        return Err(Error::tool(tool, output.status, &output.stderr));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let token = stdout.split_whitespace().next().unwrap_or("");
    Fingerprint::parse(token).ok_or_else(|| Error::ExternalTool {
        tool,
        status: output.status.to_string(),
        stderr: format!("unparseable digest {token:?}"),
    })
}
