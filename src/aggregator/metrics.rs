//! Per-process traffic telemetry (§3 `RequestSample`, §4.2 "Metrics
//! subsystem"), in the style of `performance/memory.rs`'s cached-`System`
//! snapshot and `performance/queues.rs`'s atomics-plus-snapshot registry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, System};

struct RequestSample {
    at: Instant,
    latency_ms: u64,
    success: bool,
}

/// Rolling window bounded by age (default 60s) AND count (default 1000),
/// evicting under either bound (§3, §4.2).
pub struct RequestWindow {
    samples: Mutex<VecDeque<RequestSample>>,
    window: Duration,
    cap: usize,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
}

impl RequestWindow {
    pub fn new(window: Duration, cap: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(cap)),
            window,
            cap,
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency_ms: u64, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut samples = self.samples.lock();
        let now = Instant::now();
        samples.push_back(RequestSample { at: now, latency_ms, success });
        while samples.len() > self.cap {
            samples.pop_front();
        }
        while samples.front().is_some_and(|s| now.duration_since(s.at) > self.window) {
            samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.samples.lock();
        let now = Instant::now();
        let live: Vec<&RequestSample> = samples
            .iter()
            .filter(|s| now.duration_since(s.at) <= self.window)
            .collect();

        let count = live.len();
        let failures = live.iter().filter(|s| !s.success).count();
        let t_secs = self.window.as_secs_f64().max(1e-9);

        let mut sorted: Vec<u64> = live.iter().map(|s| s.latency_ms).collect();
        sorted.sort_unstable();
        let pct = |p: f64| -> f64 {
            if sorted.is_empty() {
                return 0.0;
            }
            let idx = (((p / 100.0) * sorted.len() as f64).ceil() as usize)
                .saturating_sub(1)
                .min(sorted.len() - 1);
            sorted[idx] as f64
        };

        let sys = system_snapshot();

        MetricsSnapshot {
            rps: count as f64 / t_secs,
            error_rate: if count > 0 { failures as f64 / count as f64 * 100.0 } else { 0.0 },
            p50_latency: pct(50.0),
            p95_latency: pct(95.0),
            p99_latency: pct(99.0),
            cpu_usage: sys.cpu_fraction,
            memory_usage: sys.memory_fraction,
            load_average: sys.load_average,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
        }
    }
}

struct SystemSnapshot {
    cpu_fraction: f64,
    memory_fraction: f64,
    load_average: f64,
}

/// Cached `System` handle (creating one is expensive); refreshed on each
/// query, matching the teacher's memory profiler pattern.
fn system_snapshot() -> SystemSnapshot {
    static CACHED: OnceLock<Mutex<System>> = OnceLock::new();
    let sys_mutex = CACHED.get_or_init(|| Mutex::new(System::new()));
    let mut sys = sys_mutex.lock();

    sys.refresh_memory();
    let total_mem = sys.total_memory().max(1);
    let used_mem = sys.used_memory();

    let pid = Pid::from_u32(std::process::id());
    sys.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::Some(&[pid]),
        ProcessRefreshKind::new().with_cpu(),
    );
    let cpu_fraction = sys
        .process(pid)
        .map(|p| (p.cpu_usage() / 100.0) as f64)
        .unwrap_or(0.0);

    let load_average = System::load_average().one;

    SystemSnapshot {
        cpu_fraction,
        memory_fraction: used_mem as f64 / total_mem as f64,
        load_average,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub rps: f64,
    pub error_rate: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub load_average: f64,
    pub total_requests: u64,
    pub total_errors: u64,
}
