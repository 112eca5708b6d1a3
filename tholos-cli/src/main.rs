use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tholos_core::dedup::{self, DedupOptions};
use tholos_core::progress::Progress;
use tholos_core::scan::{list_files, ListOptions};
use tholos_core::sidecar::{self, SidecarRead};
use tholos_core::{redundancy, scratch, verify, Blake3Backend, Config, MasterPolicy};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Shortest,
    Lexicographic,
}

impl From<Policy> for MasterPolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Shortest => MasterPolicy::ShortestPath,
            Policy::Lexicographic => MasterPolicy::Lexicographic,
        }
    }
}

#[derive(Parser)]
#[command(name = "tholos", version, about = "Sidecar integrity, deduplication and recovery for file collections")]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Hash BLAKE3 in-process instead of spawning b3sum
    #[arg(long, global = true)]
    native_blake3: bool,
    /// Periodic progress lines on stderr
    #[arg(long, global = true)]
    progress: bool,
    /// Include glob, relative to the root
    #[arg(long, global = true)]
    include: Option<String>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create missing sidecars and verify existing ones
    Hashes {
        root: PathBuf,
        /// Exclusive extraction directory (must be empty)
        #[arg(long)]
        scratch: Option<PathBuf>,
        /// Also compare inode numbers on the fast path
        #[arg(long)]
        use_inode: bool,
        #[arg(long)]
        json: bool,
    },
    /// Find byte-identical files
    Dedup {
        root: PathBuf,
        /// Persistent hash cache file
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Paths under this root always stay masters
        #[arg(long)]
        protected: Vec<PathBuf>,
        #[arg(long, value_enum)]
        policy: Option<Policy>,
        #[arg(long)]
        workers: Option<usize>,
        /// Also write the report to this file
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Create and verify one recovery file per data file
    Redundancy {
        root: PathBuf,
        #[arg(long)]
        recreate: bool,
        #[arg(long)]
        json: bool,
    },
    /// Decode a sidecar and print it
    Inspect { sidecar: PathBuf },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(p) => Config::from_file(p).with_context(|| format!("load config {}", p.display()))?,
        None => Config::default(),
    };
    if cli.native_blake3 {
        cfg.blake3 = Blake3Backend::Native;
    }
    if let Some(g) = &cli.include {
        cfg.include_glob = g.clone();
    }
    Ok(cfg)
}

fn progress_for(cli: &Cli, cfg: &Config) -> Progress {
    Progress::with_interval(cli.progress, Duration::from_secs(cfg.progress_interval_secs.max(1)))
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut cfg = load_config(&cli)?;
    let progress = progress_for(&cli, &cfg);
    match cli.cmd {
        Cmd::Hashes { root, scratch: scratch_dir, use_inode, json } => {
            if scratch_dir.is_some() {
                cfg.scratch_dir = scratch_dir;
            }
            cfg.use_inode |= use_inode;
            cfg.validate()?;
            cfg.scratch_dir = cfg.scratch_dir.as_deref().map(resolve);
            let mut files = scan(&resolve(&root), &cfg)?;
            if let Some(s) = &cfg.scratch_dir {
                let lock = scratch::lock_path(s);
                files.retain(|f| !f.path.starts_with(s) && f.path != lock);
            }
            progress.start();
            let summary = verify::verify_tree(&cfg, &files, &progress);
            progress.stop();
            let summary = summary.context("verification aborted")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
            }
            Ok(if summary.broken == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Cmd::Dedup { root, cache, protected, policy, workers, output, json } => {
            if let Some(p) = policy {
                cfg.master_policy = p.into();
            }
            if let Some(w) = workers {
                cfg.workers = w;
            }
            cfg.validate()?;
            let files = scan(&root, &cfg)?;
            let opts = DedupOptions { protected_roots: protected, ..DedupOptions::from_config(&cfg) };
            progress.start();
            let report = dedup::dedup_tree(&cfg, opts, &files, cache.as_deref(), &progress);
            progress.stop();
            let report = report.context("deduplication aborted")?;
            let text = if json { serde_json::to_string_pretty(&report)? } else { report.to_string() };
            println!("{text}");
            if let Some(out) = output {
                std::fs::write(&out, &text).with_context(|| format!("write {}", out.display()))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Redundancy { root, recreate, json } => {
            cfg.recreate_redundancy |= recreate;
            cfg.validate()?;
            let files = scan(&root, &cfg)?;
            progress.start();
            let summary = redundancy::ensure_all(&cfg, &files, &progress);
            progress.stop();
            let summary = summary?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Recovery files: {} created, {} present, {} not created; {} verified, {} failed",
                    summary.created,
                    summary.already_present,
                    summary.create_failed,
                    summary.verified,
                    summary.failed
                );
            }
            Ok(if summary.failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Cmd::Inspect { sidecar: path } => match sidecar::read(&path)? {
            SidecarRead::Valid(rec) => {
                println!("{}", serde_json::to_string_pretty(&rec)?);
                Ok(ExitCode::SUCCESS)
            }
            SidecarRead::Invalid(why) => {
                println!("INVALID: {why}");
                Ok(ExitCode::FAILURE)
            }
            SidecarRead::Missing => {
                println!("MISSING: {}", path.display());
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

/// Absolute form of `path` for prefix comparisons. The path itself may not
/// exist yet, in which case its parent is resolved instead.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            parent.canonicalize().map(|p| p.join(name)).unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

fn scan(root: &Path, cfg: &Config) -> Result<Vec<tholos_core::FileRecord>> {
    tracing::info!("Get file list from path '{}'", root.display());
    let files = list_files(root, &ListOptions::from(cfg)).with_context(|| format!("scan {}", root.display()))?;
    tracing::info!("{} file(s)", files.len());
    Ok(files)
}
