use std::path::PathBuf;

/// Failure taxonomy shared by every component.
///
/// Per-file problems (`Io`, `Integrity`, `ExternalTool`) are counted and the
/// batch continues. `Precondition` means the environment is not in the state
/// the engine requires and the whole run stops before touching more files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("{tool} failed ({status}): {stderr}")]
    ExternalTool { tool: String, status: String, stderr: String },
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub fn tool(tool: impl Into<String>, status: impl ToString, stderr: &[u8]) -> Self {
        Error::ExternalTool {
            tool: tool.into(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// Errors that abort a run instead of being attributed to one file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Precondition(_) | Error::Pool(_) | Error::Config(_) | Error::Glob(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Attach a path to a bare `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
