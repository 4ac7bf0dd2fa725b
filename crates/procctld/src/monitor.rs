//! Self monitoring for procctld.
//!
//! Samples the daemon's own memory and CPU usage with `sysinfo` and logs them
//! next to the number of open sessions, warning when a threshold is crossed.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.
//! A process missing from the sysinfo table reads as zero usage.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Memory usage warning threshold in MB.
pub const HIGH_MEMORY_THRESHOLD_MB: u64 = 100;

/// CPU usage warning threshold (percentage).
pub const HIGH_CPU_THRESHOLD_PERCENT: f32 = 80.0;

/// How often to sample.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Shared count of open client sessions.
pub type SessionCounter = Arc<AtomicUsize>;

/// One sample of daemon resource usage.
#[derive(Debug, Clone, Default)]
pub struct DaemonMetrics {
    pub memory_bytes: u64,
    pub memory_mb: u64,
    pub cpu_percent: f32,
    pub active_sessions: usize,
    pub memory_high: bool,
    pub cpu_high: bool,
}

impl DaemonMetrics {
    /// Returns true if any metric is above its threshold.
    pub fn is_any_high(&self) -> bool {
        self.memory_high || self.cpu_high
    }
}

/// Samples the current process through sysinfo.
pub struct DaemonMonitor {
    system: System,
    pid: Pid,
    sessions: SessionCounter,
    memory_threshold_mb: u64,
    cpu_threshold_percent: f32,
}

impl DaemonMonitor {
    pub fn new(sessions: SessionCounter) -> Self {
        Self::with_thresholds(sessions, HIGH_MEMORY_THRESHOLD_MB, HIGH_CPU_THRESHOLD_PERCENT)
    }

    pub fn with_thresholds(
        sessions: SessionCounter,
        memory_threshold_mb: u64,
        cpu_threshold_percent: f32,
    ) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
            sessions,
            memory_threshold_mb,
            cpu_threshold_percent,
        }
    }

    /// Refreshes and returns a sample.
    ///
    /// CPU usage is relative to the previous refresh, so the first sample
    /// reads close to zero.
    pub fn sample(&mut self) -> DaemonMetrics {
        // refresh_all() is needed for the CPU delta to be computed
        self.system.refresh_all();

        let (memory_bytes, cpu_percent) = self
            .system
            .process(self.pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or((0, 0.0));

        let memory_mb = memory_bytes / 1024 / 1024;

        DaemonMetrics {
            memory_bytes,
            memory_mb,
            cpu_percent,
            active_sessions: self.sessions.load(Ordering::Relaxed),
            memory_high: memory_mb > self.memory_threshold_mb,
            cpu_high: cpu_percent > self.cpu_threshold_percent,
        }
    }

    pub fn memory_threshold_mb(&self) -> u64 {
        self.memory_threshold_mb
    }

    pub fn cpu_threshold_percent(&self) -> f32 {
        self.cpu_threshold_percent
    }
}

/// Spawns the periodic sampling task. Stops when `cancel_token` fires.
pub fn spawn_monitor_task(
    cancel_token: CancellationToken,
    sessions: SessionCounter,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = DaemonMonitor::new(sessions);
        let mut tick = interval(METRICS_INTERVAL);

        // Baseline for the CPU delta
        let _ = monitor.sample();

        info!(
            memory_threshold_mb = monitor.memory_threshold_mb(),
            cpu_threshold_percent = monitor.cpu_threshold_percent(),
            interval_secs = METRICS_INTERVAL.as_secs(),
            "Self monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Self monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let metrics = monitor.sample();
                    log_metrics(&metrics, &monitor);
                }
            }
        }

        debug!("Self monitor task completed");
    })
}

fn log_metrics(metrics: &DaemonMetrics, monitor: &DaemonMonitor) {
    let cpu_percent = format!("{:.1}", metrics.cpu_percent);
    if metrics.memory_high {
        warn!(
            memory_mb = metrics.memory_mb,
            threshold_mb = monitor.memory_threshold_mb(),
            cpu_percent,
            sessions = metrics.active_sessions,
            "Daemon memory usage above threshold"
        );
    } else if metrics.cpu_high {
        warn!(
            memory_mb = metrics.memory_mb,
            cpu_percent,
            threshold_percent = monitor.cpu_threshold_percent(),
            sessions = metrics.active_sessions,
            "Daemon CPU usage above threshold"
        );
    } else {
        info!(
            memory_mb = metrics.memory_mb,
            cpu_percent,
            sessions = metrics.active_sessions,
            "Daemon resource usage"
        );
    }
}
