use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// Where the top-level BLAKE3 digest comes from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Blake3Backend {
    /// Spawn an external `b3sum`-compatible program once per file.
    External { program: PathBuf },
    /// Hash in-process during the shared read pass.
    Native,
}

impl Default for Blake3Backend {
    fn default() -> Self {
        Blake3Backend::External { program: PathBuf::from("b3sum") }
    }
}

/// Which of two byte-identical paths becomes the master of its group.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MasterPolicy {
    /// Shorter path string wins; equal lengths fall back to byte order.
    #[default]
    ShortestPath,
    /// Smallest path string in byte order wins.
    Lexicographic,
}

/// Run configuration. Built once, then passed by reference to each component.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scratch_dir: Option<PathBuf>,
    pub workers: usize,
    pub use_inode: bool,
    pub blake3: Blake3Backend,
    pub extractor: PathBuf,
    pub par2: PathBuf,
    pub redundancy_percent: u32,
    pub recreate_redundancy: bool,
    pub sidecar_extension: String,
    pub master_policy: MasterPolicy,
    pub include_glob: String,
    pub exclude_extensions: Vec<String>,
    pub recursive: bool,
    pub progress_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            workers: 4,
            use_inode: false,
            blake3: Blake3Backend::default(),
            extractor: PathBuf::from("7z"),
            par2: PathBuf::from("par2"),
            redundancy_percent: 5,
            recreate_redundancy: false,
            sidecar_extension: "rscf".to_string(),
            master_policy: MasterPolicy::default(),
            include_glob: "**/*".to_string(),
            exclude_extensions: vec!["rscf".to_string(), "par2".to_string()],
            recursive: true,
            progress_interval_secs: 5,
        }
    }
}

impl Config {
    /// Load a JSON config file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let f = File::open(path).at(path)?;
        let cfg: Config = serde_json::from_reader(f)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.sidecar_extension.is_empty() || self.sidecar_extension.contains('/') {
            return Err(Error::Config(format!(
                "bad sidecar extension {:?}",
                self.sidecar_extension
            )));
        }
        if !(1..=100).contains(&self.redundancy_percent) {
            return Err(Error::Config(format!(
                "redundancy percent {} outside 1..=100",
                self.redundancy_percent
            )));
        }
        Ok(())
    }

    /// Sidecar location for a top-level file: the extension is appended,
    /// `game.7z` -> `game.7z.rscf`.
    pub fn sidecar_path(&self, file: &Path) -> PathBuf {
        let mut s = file.as_os_str().to_os_string();
        s.push(".");
        s.push(&self.sidecar_extension);
        PathBuf::from(s)
    }
}
