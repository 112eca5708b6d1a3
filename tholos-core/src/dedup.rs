//! Content deduplication by BLAKE3 fingerprint.

use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cache::{CacheEntry, HashCache};
use crate::config::{Config, MasterPolicy};
use crate::digest::{DigestEngine, Fingerprint};
use crate::error::Result;
use crate::executor::HashExecutor;
use crate::progress::Progress;
use crate::scan::FileRecord;

#[derive(Clone, Debug, Default)]
pub struct DedupOptions {
    pub policy: MasterPolicy,
    /// Paths under these roots win mastership over unprotected paths.
    pub protected_roots: Vec<PathBuf>,
}

impl DedupOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self { policy: cfg.master_policy, protected_roots: Vec::new() }
    }

    fn is_protected(&self, p: &Path) -> bool {
        self.protected_roots.iter().any(|r| p.starts_with(r))
    }

    /// `Less` when `a` should be master over `b`.
    pub fn rank(&self, a: &Path, b: &Path) -> Ordering {
        let by_protection = self.is_protected(b).cmp(&self.is_protected(a));
        if by_protection != Ordering::Equal {
            return by_protection;
        }
        let (sa, sb) = (a.to_string_lossy(), b.to_string_lossy());
        match self.policy {
            MasterPolicy::ShortestPath => sa.len().cmp(&sb.len()).then_with(|| sa.cmp(&sb)),
            MasterPolicy::Lexicographic => sa.cmp(&sb),
        }
    }
}

/// One representative per fingerprint plus every other path sharing it.
#[derive(Clone, Debug, Default)]
pub struct DedupIndex {
    pub master: HashMap<Fingerprint, PathBuf>,
    pub duplicate: HashMap<PathBuf, Fingerprint>,
    opts: DedupOptions,
}

impl DedupIndex {
    pub fn new(opts: DedupOptions) -> Self {
        Self { master: HashMap::new(), duplicate: HashMap::new(), opts }
    }

    pub fn insert(&mut self, path: PathBuf, fp: Fingerprint) {
        let Some(current) = self.master.get_mut(&fp) else {
            self.master.insert(fp, path);
            return;
        };
        if *current == path {
            return;
        }
        if self.opts.rank(&path, current) == Ordering::Less {
            let demoted = std::mem::replace(current, path);
            self.duplicate.insert(demoted, fp);
        } else {
            self.duplicate.insert(path, fp);
        }
    }

    /// Groups with at least one duplicate, sorted by master path.
    pub fn report(&self) -> DuplicateReport {
        let mut by_fp: HashMap<&Fingerprint, Vec<PathBuf>> = HashMap::new();
        for (p, fp) in &self.duplicate {
            by_fp.entry(fp).or_default().push(p.clone());
        }
        let mut groups: Vec<DuplicateGroup> = by_fp
            .into_iter()
            .filter_map(|(fp, mut dups)| {
                let master = self.master.get(fp)?.clone();
                dups.sort();
                Some(DuplicateGroup { fingerprint: fp.clone(), master, duplicates: dups })
            })
            .collect();
        groups.sort_by(|a, b| a.master.cmp(&b.master));
        DuplicateReport {
            generated_utc: Utc::now().to_rfc3339(),
            files_indexed: self.master.len() + self.duplicate.len(),
            groups,
            failed: Vec::new(),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    pub master: PathBuf,
    pub duplicates: Vec<PathBuf>,
}

#[derive(Serialize, Clone, Debug)]
pub struct DuplicateReport {
    pub generated_utc: String,
    pub files_indexed: usize,
    pub groups: Vec<DuplicateGroup>,
    /// Files that could not be hashed this run.
    pub failed: Vec<PathBuf>,
}

impl DuplicateReport {
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(|g| g.duplicates.len()).sum()
    }

    pub fn write_text<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        write!(w, "{self}")
    }
}

impl fmt::Display for DuplicateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File duplication list:")?;
        for g in &self.groups {
            writeln!(f, "------------------------------------------------------------------")?;
            writeln!(f, "Master file: {}", g.master.display())?;
            for d in &g.duplicates {
                writeln!(f, "  * Duplicate: {}", d.display())?;
            }
        }
        Ok(())
    }
}

/// Fingerprint `files` (cache first, then the worker pool) and group them.
///
/// Newly computed fingerprints are added to `cache`; the caller decides
/// whether to save it.
pub fn build_index(
    cfg: &Config,
    opts: DedupOptions,
    files: &[FileRecord],
    cache: &mut HashCache,
    progress: &Progress,
) -> Result<(DedupIndex, Vec<PathBuf>)> {
    let mut index = DedupIndex::new(opts);
    let mut to_hash = Vec::new();
    for rec in files {
        match cache.get(&rec.path) {
            Some(hit) => index.insert(rec.path.clone(), hit.blake3.clone()),
            None => to_hash.push(rec.clone()),
        }
    }
    tracing::info!(
        "dedup: {} cached, {} to hash with {} worker(s)",
        files.len() - to_hash.len(),
        to_hash.len(),
        cfg.workers
    );

    let engine = DigestEngine::new(cfg);
    let exec = HashExecutor::new(cfg.workers);
    let mut failed = Vec::new();
    progress.set_stage("Hashing");
    exec.run(&to_hash, progress, |rec| engine.blake3(&rec.path), |done| {
        tracing::trace!("Progress: {}/{}", done.tick.done, done.tick.total);
        match done.result {
            Ok(fp) => {
                cache.insert(&done.record.path, CacheEntry::new(&done.record, fp.clone()));
                index.insert(done.record.path, fp);
            }
            Err(e) => {
                tracing::warn!("{}: {e}", done.record.path.display());
                failed.push(done.record.path);
            }
        }
    })?;
    failed.sort();
    Ok((index, failed))
}

/// Full dedup run: load the optional cache, index, save the cache, report.
pub fn dedup_tree(
    cfg: &Config,
    opts: DedupOptions,
    files: &[FileRecord],
    cache_path: Option<&Path>,
    progress: &Progress,
) -> Result<DuplicateReport> {
    let mut cache = match cache_path {
        Some(p) => HashCache::load(p)?,
        None => HashCache::new(),
    };
    let (index, failed) = build_index(cfg, opts, files, &mut cache, progress)?;
    if let Some(p) = cache_path {
        if cache.is_dirty() {
            cache.save(p)?;
        }
    }
    let mut report = index.report();
    report.failed = failed;
    tracing::info!(
        "Hash comparison complete: {} group(s), {} duplicate(s)",
        report.groups.len(),
        report.duplicate_count()
    );
    Ok(report)
}
