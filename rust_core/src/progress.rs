use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

const BAR_WIDTH: usize = 30;

/// Shared progress counters updated by every Metropolis chain.
///
/// A dedicated thread reads the counters and renders a live progress bar to
/// stderr; chains never block on it.
pub struct ProgressState {
    pub num_chains: usize,
    pub iters_per_chain: usize,
    pub warmup_per_chain: usize,
    pub completed: AtomicUsize,
    pub accepted: AtomicUsize,
    pub proposed: AtomicUsize,
    pub done: AtomicBool,
    pub start_time: Instant,
}

impl ProgressState {
    pub fn new(num_chains: usize, num_draws: usize, num_warmup: usize) -> Self {
        Self {
            num_chains,
            iters_per_chain: num_warmup + num_draws,
            warmup_per_chain: num_warmup,
            completed: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            proposed: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    pub fn total_iters(&self) -> usize {
        self.num_chains * self.iters_per_chain
    }

    /// Record one full sweep over the variables.
    pub fn increment(&self, accepted: usize, proposed: usize) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.accepted.fetch_add(accepted, Ordering::Relaxed);
        self.proposed.fetch_add(proposed, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            completed: self.completed.load(Ordering::Relaxed),
            total: self.total_iters(),
            warmup: self.num_chains * self.warmup_per_chain,
            accepted: self.accepted.load(Ordering::Relaxed),
            proposed: self.proposed.load(Ordering::Relaxed),
            elapsed: self.start_time.elapsed().as_secs_f64(),
            num_chains: self.num_chains,
            done: self.done.load(Ordering::Relaxed),
        }
    }
}

/// A consistent-enough reading of the counters for one redraw.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub completed: usize,
    pub total: usize,
    /// Warmup sweeps across all chains.
    pub warmup: usize,
    pub accepted: usize,
    pub proposed: usize,
    pub elapsed: f64,
    pub num_chains: usize,
    pub done: bool,
}

impl Snapshot {
    pub fn accept_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }

    /// Chains run at similar speeds, so the pooled count stands in for
    /// each chain's phase.
    fn phase(&self) -> &'static str {
        if self.done {
            "done"
        } else if self.completed < self.warmup {
            "warmup"
        } else {
            "sampling"
        }
    }

    pub fn line(&self) -> String {
        let completed = self.completed.min(self.total);
        let pct = if self.total > 0 {
            completed * 100 / self.total
        } else {
            100
        };
        let filled = if self.total > 0 {
            BAR_WIDTH * completed / self.total
        } else {
            BAR_WIDTH
        };
        let bar = "━".repeat(filled) + &"╌".repeat(BAR_WIDTH - filled);
        let head = format!(
            "{} chains {:<8} {} {:>3}% │ {}/{} │ {:.0}% acc",
            self.num_chains,
            self.phase(),
            bar,
            pct,
            fmt_count(completed),
            fmt_count(self.total),
            self.accept_rate() * 100.0,
        );

        if self.done {
            return format!("{} │ {}", head, fmt_time(self.elapsed));
        }
        let speed = if self.elapsed > 0.05 {
            completed as f64 / self.elapsed
        } else {
            0.0
        };
        let eta = if speed > 0.0 {
            (self.total - completed) as f64 / speed
        } else {
            0.0
        };
        format!(
            "{} │ {} it/s │ {} < ~{}",
            head,
            fmt_count(speed as usize),
            fmt_time(self.elapsed),
            fmt_time(eta)
        )
    }
}

fn fmt_count(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1e6)
    } else if n >= 10_000 {
        format!("{:.1}k", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

fn fmt_time(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let whole = secs as usize;
        format!("{}:{:02}", whole / 60, whole % 60)
    }
}

fn draw(state: &ProgressState) {
    let snap = state.snapshot();
    let mut err = std::io::stderr().lock();
    let end = if snap.done { "\n" } else { "" };
    let _ = write!(err, "\rSampling {}\x1b[K{}", snap.line(), end);
    let _ = err.flush();
}

/// Spawn a background thread that redraws the progress bar at ~10 Hz.
/// Call `state.finish()` then join the handle once sampling returns.
pub fn spawn_progress_thread(state: Arc<ProgressState>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !state.done.load(Ordering::Relaxed) {
            draw(&state);
            std::thread::sleep(Duration::from_millis(100));
        }
        draw(&state);
    })
}

/// Wait for the progress thread. A panic while rendering is logged and does
/// not fail the run; returns whether the thread exited cleanly.
pub fn join_progress_thread(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            warn!("progress thread panicked; sampling results are unaffected");
            false
        }
    }
}
