//! Bounded parallel fan-out of per-file work.
//!
//! Workers share nothing: each gets one [`FileRecord`] and sends one result
//! back over a channel. The calling thread drains the channel, so whatever it
//! builds from the results needs no locking.

use rayon::prelude::*;
use std::sync::mpsc;

use crate::error::Result;
use crate::progress::{Progress, Tick};
use crate::scan::FileRecord;

/// One finished item, success or per-item failure.
#[derive(Debug)]
pub struct Completed<T> {
    pub record: FileRecord,
    pub result: Result<T>,
    pub tick: Tick,
}

#[derive(Clone, Debug)]
pub struct HashExecutor {
    workers: usize,
}

impl HashExecutor {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over every file and hand each completion to `sink` on the
    /// calling thread, in completion order. Every input yields exactly one
    /// [`Completed`]. Returns the number of items processed.
    pub fn run<T, W, S>(
        &self,
        files: &[FileRecord],
        progress: &Progress,
        work: W,
        mut sink: S,
    ) -> Result<usize>
    where
        T: Send,
        W: Fn(&FileRecord) -> Result<T> + Sync,
        S: FnMut(Completed<T>),
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("tholos-hash-{i}"))
            .build()?;
        progress.reset(files.len());
        let (tx, rx) = mpsc::channel::<(usize, Result<T>)>();
        let work = &work;

        let mut seen = 0usize;
        std::thread::scope(|s| {
            s.spawn(move || {
                pool.install(|| {
                    files.par_iter().enumerate().for_each_with(tx, |tx, (i, rec)| {
                        let _ = tx.send((i, work(rec)));
                    });
                });
            });
            for (i, result) in rx {
                if result.is_err() {
                    progress.inc_failure();
                }
                let tick = progress.inc();
                seen += 1;
                sink(Completed { record: files[i].clone(), result, tick });
            }
        });
        Ok(seen)
    }
}
