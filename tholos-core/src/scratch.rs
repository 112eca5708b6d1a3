//! Exclusive extraction directory.
//!
//! The scratch root must be empty whenever an extraction starts. A sibling
//! `<root>.lock` file is held with an exclusive advisory lock for the life of
//! the [`ScratchCache`], so two processes cannot share one root.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};
use crate::sidecar::Renderer;

/// Container formats with an unpacker. Unknown kinds pass through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    SevenZip,
    Passthrough,
}

/// Extension capability table.
const CAPABILITIES: &[(&str, ContainerKind)] = &[("7z", ContainerKind::SevenZip)];

impl ContainerKind {
    pub fn for_path(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        CAPABILITIES
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(ext))
            .map(|(_, k)| *k)
            .unwrap_or(ContainerKind::Passthrough)
    }

    pub fn renderer(self) -> Renderer {
        match self {
            ContainerKind::SevenZip => Renderer::Main7zLzma,
            ContainerKind::Passthrough => Renderer::None,
        }
    }
}

#[derive(Debug)]
pub struct ScratchCache {
    root: PathBuf,
    extractor: PathBuf,
    _lock: File,
}

impl ScratchCache {
    /// Claim `root` for this process. The directory is created if missing.
    pub fn open(root: &Path, extractor: &Path) -> Result<Self> {
        fs::create_dir_all(root).at(root)?;
        let lock_path = lock_path(root);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .at(&lock_path)?;
        if lock.try_lock_exclusive().is_err() {
            return Err(Error::Precondition(format!(
                "scratch directory {} is in use by another process",
                root.display()
            )));
        }
        Ok(Self { root: root.to_path_buf(), extractor: extractor.to_path_buf(), _lock: lock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_empty(&self) -> Result<()> {
        let mut it = fs::read_dir(&self.root).at(&self.root)?;
        if let Some(first) = it.next() {
            let first = first.at(&self.root)?;
            return Err(Error::Precondition(format!(
                "scratch directory {} is not empty (found {:?})",
                self.root.display(),
                first.file_name()
            )));
        }
        Ok(())
    }

    /// Extract `archive` and return the guard holding its member paths.
    ///
    /// A non-empty scratch root is refused before the archive is opened. The
    /// root is purged again on every exit path, including a failed extract.
    pub fn unpack(&mut self, archive: &Path) -> Result<Unpacked<'_>> {
        self.ensure_empty()?;
        let kind = ContainerKind::for_path(archive);
        let mut guard = Unpacked { cache: self, kind, members: Vec::new(), purged: false };
        match kind {
            ContainerKind::SevenZip => {
                guard.cache.extract_7z(archive)?;
                guard.members = guard.cache.members()?;
            }
            ContainerKind::Passthrough => {}
        }
        tracing::debug!("unpacked {} member(s) from {}", guard.members.len(), archive.display());
        Ok(guard)
    }

    fn extract_7z(&self, archive: &Path) -> Result<()> {
        let tool = self.extractor.display().to_string();
        let mut out_flag = std::ffi::OsString::from("-o");
        out_flag.push(&self.root);
        let output = Command::new(&self.extractor)
            .arg("x")
            .arg("-y")
            .arg(out_flag)
            .arg(archive)
            .output()
            .map_err(|e| Error::ExternalTool {
                tool: tool.clone(),
                status: "spawn".into(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::tool(tool, output.status, &output.stderr));
        }
        Ok(())
    }

    /// Extracted regular files, sorted.
    fn members(&self) -> Result<Vec<PathBuf>> {
        let mut v = Vec::new();
        for ent in WalkDir::new(&self.root).min_depth(1) {
            let ent = ent.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                Error::io(path, e.into())
            })?;
            if ent.file_type().is_file() {
                v.push(ent.into_path());
            }
        }
        v.sort();
        Ok(v)
    }

    /// Remove every file, then every directory, below the root.
    pub fn purge(&self) -> Result<()> {
        for ent in WalkDir::new(&self.root).min_depth(1).contents_first(true) {
            let ent = ent.map_err(|e| Error::io(&self.root, e.into()))?;
            let p = ent.path();
            if ent.file_type().is_dir() {
                fs::remove_dir(p).at(p)?;
            } else {
                fs::remove_file(p).at(p)?;
            }
        }
        Ok(())
    }
}

/// Advisory lock file guarding `root`: `<root>.lock`.
pub fn lock_path(root: &Path) -> PathBuf {
    let mut s = root.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

/// Members of one extraction. Purges the scratch root when finished or dropped.
#[derive(Debug)]
pub struct Unpacked<'a> {
    cache: &'a ScratchCache,
    kind: ContainerKind,
    members: Vec<PathBuf>,
    purged: bool,
}

impl Unpacked<'_> {
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn members(&self) -> &[PathBuf] {
        &self.members
    }

    /// Member path relative to the scratch root, `/`-separated.
    pub fn relative(&self, member: &Path) -> String {
        pathdiff::diff_paths(member, self.cache.root())
            .unwrap_or_else(|| member.to_path_buf())
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub fn finish(mut self) -> Result<()> {
        self.purged = true;
        self.cache.purge()
    }
}

impl Drop for Unpacked<'_> {
    fn drop(&mut self) {
        if !self.purged {
            if let Err(e) = self.cache.purge() {
                tracing::warn!("scratch purge failed: {e}");
            }
        }
    }
}
