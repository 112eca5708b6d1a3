//! Per-file sidecar verification.
//!
//! ```text
//! NoSidecar ──create──────────────────────────────▶ Verified
//! FastCheckPending ──metadata equal──▶ FastCheckPassed ──▶ Verified
//! FastCheckPending ──any field differs──▶ HashCheckPending
//! HashCheckPending ──blake3 equal──▶ Verified (header rewritten)
//! HashCheckPending ──blake3 differs──▶ Broken (sidecar untouched)
//! ```
//!
//! An unreadable or invalid sidecar enters at `NoSidecar`.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::digest::{Algorithms, DigestEngine, Fingerprint};
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::scan::FileRecord;
use crate::scratch::{ContainerKind, ScratchCache};
use crate::sidecar::{self, MemberMeta, SidecarRead, SidecarRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyState {
    NoSidecar,
    FastCheckPending,
    FastCheckPassed,
    HashCheckPending,
    Verified,
    Broken,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No usable sidecar existed; one was written.
    Created { members: usize },
    Verified { rewritten: bool },
    Broken { expected: Fingerprint, actual: Fingerprint },
}

/// Names of the stat fields that differ between `rec` and the sidecar.
/// Inode only takes part when `use_inode` is set.
pub fn fast_check(rec: &FileRecord, sc: &SidecarRecord, use_inode: bool) -> Vec<&'static str> {
    let mut diff = Vec::new();
    if rec.size != sc.file_size {
        diff.push("size");
    }
    if rec.ctime_ns != sc.file_ctime_ns {
        diff.push("ctime");
    }
    if rec.mtime_ns != sc.file_mtime_ns {
        diff.push("mtime");
    }
    if use_inode && rec.inode != sc.file_inode {
        diff.push("inode");
    }
    diff
}

pub struct Verifier {
    engine: DigestEngine,
    scratch: ScratchCache,
    cfg: Config,
}

impl Verifier {
    /// Claims the configured scratch directory and checks that it is empty.
    pub fn new(cfg: &Config) -> Result<Self> {
        let dir = cfg
            .scratch_dir
            .as_deref()
            .ok_or_else(|| Error::Precondition("a scratch directory must be specified".into()))?;
        let scratch = ScratchCache::open(dir, &cfg.extractor)?;
        scratch.ensure_empty()?;
        Ok(Self { engine: DigestEngine::new(cfg), scratch, cfg: cfg.clone() })
    }

    fn step(&self, path: &Path, from: VerifyState, to: VerifyState) {
        tracing::debug!("{}: {:?} -> {:?}", path.display(), from, to);
    }

    pub fn process(&mut self, rec: &FileRecord) -> Result<Outcome> {
        let sc_path = self.cfg.sidecar_path(&rec.path);
        let mut stored = match sidecar::read(&sc_path)? {
            SidecarRead::Valid(r) => r,
            SidecarRead::Missing => return self.create(rec, &sc_path),
            SidecarRead::Invalid(why) => {
                tracing::warn!("{}: invalid sidecar ({why}), recreating", sc_path.display());
                return self.create(rec, &sc_path);
            }
        };

        let diff = fast_check(rec, &stored, self.cfg.use_inode);
        if diff.is_empty() {
            self.step(&rec.path, VerifyState::FastCheckPending, VerifyState::FastCheckPassed);
            self.step(&rec.path, VerifyState::FastCheckPassed, VerifyState::Verified);
            return Ok(Outcome::Verified { rewritten: false });
        }
        tracing::debug!("{}: metadata changed: {}", rec.path.display(), diff.join(", "));
        self.step(&rec.path, VerifyState::FastCheckPending, VerifyState::HashCheckPending);

        let actual = self.engine.blake3(&rec.path)?;
        if actual != stored.file_blake3 {
            self.step(&rec.path, VerifyState::HashCheckPending, VerifyState::Broken);
            return Ok(Outcome::Broken { expected: stored.file_blake3, actual });
        }
        stored.refresh_header(rec, actual);
        sidecar::write(&stored, &sc_path)?;
        self.step(&rec.path, VerifyState::HashCheckPending, VerifyState::Verified);
        Ok(Outcome::Verified { rewritten: true })
    }

    fn create(&mut self, rec: &FileRecord, sc_path: &Path) -> Result<Outcome> {
        let blake3 = self.engine.blake3(&rec.path)?;
        let kind = ContainerKind::for_path(&rec.path);
        let mut record = SidecarRecord::new(rec, blake3, kind.renderer());

        let unpacked = self.scratch.unpack(&rec.path)?;
        for member in unpacked.members() {
            let mrec = FileRecord::stat(member)?;
            let digests = self.engine.fingerprint(member, Algorithms::ALL)?;
            let meta = MemberMeta::from_digests(unpacked.relative(member), &mrec, digests)?;
            tracing::debug!("{}: member {} {}", rec.path.display(), meta.relative_path, meta.blake3);
            record.files.push(meta);
        }
        unpacked.finish()?;

        sidecar::write(&record, sc_path)?;
        self.step(&rec.path, VerifyState::NoSidecar, VerifyState::Verified);
        Ok(Outcome::Created { members: record.files.len() })
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub verified: usize,
    pub created: usize,
    pub rewritten: usize,
    pub broken: usize,
    pub failed: usize,
    pub broken_paths: Vec<PathBuf>,
    pub failed_paths: Vec<PathBuf>,
}

impl RunSummary {
    fn record(&mut self, path: &Path, outcome: &Outcome) {
        match outcome {
            Outcome::Created { .. } => {
                self.created += 1;
                self.verified += 1;
            }
            Outcome::Verified { rewritten } => {
                self.verified += 1;
                if *rewritten {
                    self.rewritten += 1;
                }
            }
            Outcome::Broken { .. } => {
                self.broken += 1;
                self.broken_paths.push(path.to_path_buf());
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "From {} files,", self.total)?;
        writeln!(f, "\t{} are OK ({} new, {} refreshed)", self.verified, self.created, self.rewritten)?;
        writeln!(f, "\t{} are BAD", self.broken)?;
        write!(f, "\t{} could not be processed", self.failed)
    }
}

/// Verify or create sidecars for every file, one at a time.
///
/// Environment problems are checked before the first file is touched and
/// abort the run; per-file failures are logged and counted.
pub fn verify_tree(cfg: &Config, files: &[FileRecord], progress: &Progress) -> Result<RunSummary> {
    for rec in files {
        sidecar::check_target(&cfg.sidecar_path(&rec.path))?;
    }
    let mut verifier = Verifier::new(cfg)?;
    let mut summary = RunSummary { total: files.len(), ..RunSummary::default() };

    progress.set_stage("Verifying");
    progress.reset(files.len());
    for rec in files {
        match verifier.process(rec) {
            Ok(outcome) => {
                if let Outcome::Broken { expected, actual } = &outcome {
                    tracing::warn!(
                        "File does not match: {} (sidecar {expected}, file {actual})",
                        rec.path.display()
                    );
                }
                summary.record(&rec.path, &outcome);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("{}: {e}", rec.path.display());
                progress.inc_failure();
                summary.failed += 1;
                summary.failed_paths.push(rec.path.clone());
            }
        }
        progress.inc();
    }
    tracing::info!(
        "verified {} / broken {} / failed {} of {}",
        summary.verified,
        summary.broken,
        summary.failed,
        summary.total
    );
    Ok(summary)
}
