//! Recovery archives through an external `par2`-compatible tool.
//!
//! Each data file gets exactly one recovery file, `<file>.par2`, created with
//! a single volume at a fixed redundancy percentage.

use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::config::Config;
use crate::error::{Error, IoContext, Result};
use crate::progress::Progress;
use crate::scan::FileRecord;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Creation {
    Created,
    AlreadyPresent,
    /// The tool refused or failed; verification still runs.
    Failed,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Failed,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedundancyStatus {
    pub creation: Creation,
    pub verification: Verification,
}

#[derive(Clone, Debug)]
pub struct Redundancy {
    program: PathBuf,
    percent: u32,
    recreate: bool,
}

/// `<file>.par2`
pub fn recovery_path(file: &Path) -> PathBuf {
    let mut s = file.as_os_str().to_os_string();
    s.push(".par2");
    PathBuf::from(s)
}

impl Redundancy {
    pub fn new(cfg: &Config) -> Self {
        Self { program: cfg.par2.clone(), percent: cfg.redundancy_percent, recreate: cfg.recreate_redundancy }
    }

    fn run(&self, args: &[OsString]) -> Result<Output> {
        Command::new(&self.program).args(args).output().map_err(|e| Error::ExternalTool {
            tool: self.program.display().to_string(),
            status: "spawn".into(),
            stderr: e.to_string(),
        })
    }

    /// Recovery files belonging to `file`: `<name>.par2` and `<name>.vol*.par2`.
    /// `<name>.001.par2` and the like belong to other files and are left alone.
    fn existing(&self, file: &Path) -> Result<Vec<PathBuf>> {
        let (Some(dir), Some(name)) = (file.parent(), file.file_name()) else {
            return Ok(Vec::new());
        };
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        let name = name.to_string_lossy();
        let mut out = Vec::new();
        for ent in fs::read_dir(dir).at(dir)? {
            let ent = ent.at(dir)?;
            let n = ent.file_name().to_string_lossy().into_owned();
            let Some(rest) = n.strip_prefix(name.as_ref()) else { continue };
            if rest == ".par2" || (rest.starts_with(".vol") && rest.ends_with(".par2")) {
                out.push(ent.path());
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn create(&self, file: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "create".into(),
            format!("-r{}", self.percent).into(),
            "-n1".into(),
            "-q".into(),
            "-q".into(),
            file.as_os_str().to_os_string(),
        ];
        let out = self.run(&args)?;
        if !out.status.success() {
            return Err(Error::tool(self.program.display().to_string(), out.status, &out.stderr));
        }
        // Fold the single generated volume into <file>.par2.
        let target = recovery_path(file);
        for p in self.existing(file)? {
            if p != target {
                fs::rename(&p, &target).at(&p)?;
            }
        }
        Ok(())
    }

    pub fn verify(&self, file: &Path) -> Result<bool> {
        let args: Vec<OsString> =
            vec!["verify".into(), "-q".into(), "-q".into(), recovery_path(file).into_os_string()];
        Ok(self.run(&args)?.status.success())
    }

    pub fn ensure(&self, file: &Path) -> Result<RedundancyStatus> {
        if self.recreate {
            for p in self.existing(file)? {
                fs::remove_file(&p).at(&p)?;
            }
        }
        let creation = if recovery_path(file).is_file() {
            Creation::AlreadyPresent
        } else {
            match self.create(file) {
                Ok(()) => Creation::Created,
                Err(e) => {
                    tracing::warn!("{}: could not create recovery file ({e}); already there?", file.display());
                    Creation::Failed
                }
            }
        };
        let verification = match self.verify(file) {
            Ok(true) => Verification::Verified,
            Ok(false) => Verification::Failed,
            Err(e) => {
                tracing::warn!("{}: verify: {e}", file.display());
                Verification::Failed
            }
        };
        Ok(RedundancyStatus { creation, verification })
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RedundancySummary {
    pub total: usize,
    pub created: usize,
    pub already_present: usize,
    pub create_failed: usize,
    pub verified: usize,
    pub failed: usize,
    pub failed_paths: Vec<PathBuf>,
}

/// Post-pass over a file list; never aborts on a single file.
pub fn ensure_all(cfg: &Config, files: &[FileRecord], progress: &Progress) -> Result<RedundancySummary> {
    let r = Redundancy::new(cfg);
    let mut s = RedundancySummary { total: files.len(), ..Default::default() };
    progress.set_stage("Recovery");
    progress.reset(files.len());
    for rec in files {
        match r.ensure(&rec.path) {
            Ok(st) => {
                match st.creation {
                    Creation::Created => s.created += 1,
                    Creation::AlreadyPresent => s.already_present += 1,
                    Creation::Failed => s.create_failed += 1,
                }
                match st.verification {
                    Verification::Verified => s.verified += 1,
                    Verification::Failed => {
                        s.failed += 1;
                        s.failed_paths.push(rec.path.clone());
                    }
                }
            }
            Err(e) => {
                tracing::warn!("{}: {e}", rec.path.display());
                progress.inc_failure();
                s.failed += 1;
                s.failed_paths.push(rec.path.clone());
            }
        }
        progress.inc();
    }
    Ok(s)
}
