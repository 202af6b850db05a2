use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::info;

use crate::basics::region::GenomicRegion;

/// Thread-shared progress meter over the search regions: workers report
/// completed blocks under a mutex, and the estimated time to completion is a
/// trimmed mean of recent block durations scaled by the remaining work.
pub struct ProgressMeter {
    inner: Mutex<Inner>,
}

struct Inner {
    num_bp_to_search: u64,
    num_bp_completed: u64,
    percent_until_tick: f64,
    tick_size: f64,
    start: Instant,
    last_block: Instant,
    block_compute_times: Vec<Duration>,
    done: bool,
}

impl ProgressMeter {
    pub fn new(regions: &[GenomicRegion]) -> Self {
        let now = Instant::now();
        ProgressMeter {
            inner: Mutex::new(Inner {
                num_bp_to_search: regions.iter().map(|r| r.size()).sum(),
                num_bp_completed: 0,
                percent_until_tick: 1.0,
                tick_size: 1.0,
                start: now,
                last_block: now,
                block_compute_times: Vec::new(),
                done: false,
            }),
        }
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.start = now;
        inner.last_block = now;
        info!("Starting search of {} bp", inner.num_bp_to_search);
    }

    /// Report a completed region.
    pub fn notify_completed(&self, region: &GenomicRegion) {
        let mut inner = self.inner.lock().unwrap();
        if inner.done {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_block);
        inner.last_block = now;
        inner.block_compute_times.push(elapsed);
        inner.num_bp_completed =
            (inner.num_bp_completed + region.size()).min(inner.num_bp_to_search);
        let percent = inner.percent_completed();
        let tick_step = region.size() as f64 / inner.num_bp_to_search.max(1) as f64 * 100.0;
        inner.percent_until_tick -= tick_step;
        if inner.percent_until_tick <= 0.0 {
            inner.percent_until_tick = inner.tick_size;
            let ttc = inner.estimate_ttc();
            info!(
                "{:>12} {:>7.1}% {:>12} {:>12}",
                region.to_string(),
                percent,
                format_duration(now.duration_since(inner.start)),
                ttc.map(format_duration)
                    .unwrap_or_else(|| "-".to_owned()),
            );
        }
    }

    pub fn done(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.done {
            return;
        }
        inner.done = true;
        info!(
            "Finished: 100% in {}",
            format_duration(inner.start.elapsed())
        );
    }
}

impl Inner {
    fn percent_completed(&self) -> f64 {
        if self.num_bp_to_search == 0 {
            100.0
        } else {
            100.0 * self.num_bp_completed as f64 / self.num_bp_to_search as f64
        }
    }

    fn estimate_ttc(&self) -> Option<Duration> {
        if self.block_compute_times.is_empty() || self.num_bp_completed == 0 {
            return None;
        }
        let mut durations = self.block_compute_times.clone();
        remove_outliers(&mut durations);
        if durations.is_empty() {
            return None;
        }
        let mean = durations.iter().map(Duration::as_secs_f64).sum::<f64>()
            / durations.len() as f64;
        let remaining_fraction = 1.0 - self.num_bp_completed as f64 / self.num_bp_to_search as f64;
        let blocks_done = self.block_compute_times.len() as f64;
        let remaining_blocks =
            blocks_done * remaining_fraction / (1.0 - remaining_fraction).max(1e-9);
        Some(Duration::from_secs_f64(mean * remaining_blocks))
    }
}

/// Drop a leading global minimum, then everything outside two standard
/// deviations of the remainder.
fn remove_outliers(durations: &mut Vec<Duration>) {
    if durations.len() < 2 {
        return;
    }
    let all_equal = durations.windows(2).all(|w| w[0] == w[1]);
    if all_equal {
        return;
    }
    let min = *durations.iter().min().expect("non-empty durations");
    if durations.first() == Some(&min) {
        durations.retain(|&d| d != min);
    }
    if durations.len() < 2 {
        return;
    }
    let secs: Vec<f64> = durations.iter().map(Duration::as_secs_f64).collect();
    let mean = secs.iter().sum::<f64>() / secs.len() as f64;
    let var = secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / secs.len() as f64;
    let stdev = var.sqrt();
    let low = (mean - 2.0 * stdev).max(0.0);
    let high = mean + 2.0 * stdev;
    durations.retain(|d| {
        let s = d.as_secs_f64();
        s >= low && s <= high
    });
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
