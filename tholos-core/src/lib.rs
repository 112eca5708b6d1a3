pub mod cache;
pub mod config;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod executor;
pub mod progress;
pub mod redundancy;
pub mod scan;
pub mod scratch;
pub mod sidecar;
pub mod verify;

pub use config::{Blake3Backend, Config, MasterPolicy};
pub use error::{Error, Result};
pub use scan::FileRecord;
