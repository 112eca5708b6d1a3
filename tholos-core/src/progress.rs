use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Snapshot emitted after each completed item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub done: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    interval: Duration,
    pub stage: Arc<Mutex<String>>,
    pub items_done: Arc<AtomicUsize>,
    pub items_total: Arc<AtomicUsize>,
    pub failures: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self::with_interval(enabled, Duration::from_secs(5))
    }

    pub fn with_interval(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            stage: Arc::new(Mutex::new(String::new())),
            items_done: Arc::new(AtomicUsize::new(0)),
            items_total: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stage(&self, s: &str) {
        *self.stage.lock().unwrap() = s.to_string();
    }

    /// Start a new batch of `n` items.
    pub fn reset(&self, n: usize) {
        self.items_total.store(n, Ordering::Relaxed);
        self.items_done.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn inc(&self) -> Tick {
        let done = self.items_done.fetch_add(1, Ordering::Relaxed) + 1;
        Tick { done, total: self.items_total.load(Ordering::Relaxed) }
    }

    pub fn inc_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Tick {
        Tick {
            done: self.items_done.load(Ordering::Relaxed),
            total: self.items_total.load(Ordering::Relaxed),
        }
    }

    /// Log a status line every interval until [`Progress::stop`].
    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(this.interval);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let s = this.stage.lock().unwrap().clone();
                let Tick { done, total } = this.snapshot();
                let pct = if total > 0 { (done as f64 / total as f64) * 100.0 } else { 0.0 };
                tracing::info!(
                    "[{:>4}s] {} | files {}/{} ({}%) | failed {}",
                    t0.elapsed().as_secs(),
                    s,
                    done,
                    total,
                    pct as i32,
                    this.failures.load(Ordering::Relaxed)
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
