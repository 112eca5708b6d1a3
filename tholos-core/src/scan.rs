use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, IoContext, Result};

/// One file as seen by a directory scan.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub ctime_ns: u64,
    pub mtime_ns: u64,
    pub inode: u64,
}

impl FileRecord {
    /// Stat `path` now.
    pub fn stat(path: &Path) -> Result<Self> {
        let md = std::fs::metadata(path).at(path)?;
        Ok(Self::from_metadata(path.to_path_buf(), &md))
    }

    #[cfg(unix)]
    fn from_metadata(path: PathBuf, md: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            path,
            size: md.len(),
            ctime_ns: timestamp_ns(md.ctime(), md.ctime_nsec()),
            mtime_ns: timestamp_ns(md.mtime(), md.mtime_nsec()),
            inode: md.ino(),
        }
    }

    #[cfg(not(unix))]
    fn from_metadata(path: PathBuf, md: &Metadata) -> Self {
        fn ns(t: std::io::Result<std::time::SystemTime>) -> u64 {
            t.ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0)
        }
        Self {
            path,
            size: md.len(),
            ctime_ns: ns(md.created()),
            mtime_ns: ns(md.modified()),
            inode: 0,
        }
    }
}

#[cfg(unix)]
fn timestamp_ns(secs: i64, nsec: i64) -> u64 {
    (secs.max(0) as u64).saturating_mul(1_000_000_000).saturating_add(nsec.max(0) as u64)
}

#[derive(Clone, Debug)]
pub struct ListOptions {
    pub recursive: bool,
    pub include_glob: String,
    pub exclude_extensions: Vec<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        let cfg = Config::default();
        Self::from(&cfg)
    }
}

impl From<&Config> for ListOptions {
    /// Sidecars are never data, whatever extension they use.
    fn from(cfg: &Config) -> Self {
        let mut exclude_extensions = cfg.exclude_extensions.clone();
        if !exclude_extensions.iter().any(|e| e.eq_ignore_ascii_case(&cfg.sidecar_extension)) {
            exclude_extensions.push(cfg.sidecar_extension.clone());
        }
        Self { recursive: cfg.recursive, include_glob: cfg.include_glob.clone(), exclude_extensions }
    }
}

fn build_globset(pattern: &str) -> Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    b.add(Glob::new(pattern)?);
    Ok(b.build()?)
}

fn excluded(path: &Path, exts: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Regular files under `root`, sorted by path.
///
/// The include glob is matched against the `/`-separated path relative to
/// `root`; entries that vanish between listing and stat are skipped.
pub fn list_files(root: &Path, opts: &ListOptions) -> Result<Vec<FileRecord>> {
    let md = std::fs::metadata(root).at(root)?;
    if !md.is_dir() {
        return Err(Error::Precondition(format!("{} is not a directory", root.display())));
    }
    let inc = build_globset(&opts.include_glob)?;
    let mut walk = WalkDir::new(root).min_depth(1);
    if !opts.recursive {
        walk = walk.max_depth(1);
    }
    let mut out = Vec::new();
    for ent in walk.into_iter() {
        let ent = match ent {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("scan: {e}");
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        let path = ent.path();
        let rel = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
        let rel = rel.to_string_lossy().replace('\\', "/");
        if !inc.is_match(&rel) || excluded(path, &opts.exclude_extensions) {
            continue;
        }
        match ent.metadata() {
            Ok(md) => out.push(FileRecord::from_metadata(path.to_path_buf(), &md)),
            Err(e) => tracing::warn!("scan: stat {}: {e}", path.display()),
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}
