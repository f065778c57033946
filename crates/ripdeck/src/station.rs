//! Shared station state: configuration, activity gauges, and shutdown
//! signalling.
//!
//! One `Station` exists per process. Control sessions and the operator HTTP
//! surface both hold an `Arc<Station>`; sessions bump the activity gauges,
//! the HTTP surface reads them back as a health snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::StationConfig;
use crate::storage;
use crate::wire::protocol::FsUsage;

/// Ripdeck version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Coarse station state as reported by `/health-check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationStatus {
    /// Accepting commands, no rip running.
    Ready,
    /// At least one rip job in flight.
    Ripping,
    /// Shutdown has been requested; existing sessions are draining.
    ShuttingDown,
}

/// Snapshot of station health for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: StationStatus,
    pub version: &'static str,
    pub started_at: String,
    pub uptime_seconds: i64,
    pub active_sessions: usize,
    pub active_rips: usize,
    /// Free space on the output volume; absent when the sample fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<FsUsage>,
}

pub struct Station {
    pub config: StationConfig,
    started_at: DateTime<Utc>,
    active_sessions: AtomicUsize,
    active_rips: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Decrements the owning gauge when the tracked session or rip ends.
pub struct GaugeGuard<'a> {
    gauge: &'a AtomicUsize,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Station {
    pub fn new(config: StationConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            started_at: Utc::now(),
            active_sessions: AtomicUsize::new(0),
            active_rips: AtomicUsize::new(0),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Count a connected panel until the returned guard drops.
    pub fn track_session(&self) -> GaugeGuard<'_> {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        GaugeGuard {
            gauge: &self.active_sessions,
        }
    }

    /// Count a running rip until the returned guard drops.
    pub fn track_rip(&self) -> GaugeGuard<'_> {
        self.active_rips.fetch_add(1, Ordering::SeqCst);
        GaugeGuard {
            gauge: &self.active_rips,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub fn active_rips(&self) -> usize {
        self.active_rips.load(Ordering::SeqCst)
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub fn health(&self) -> HealthSnapshot {
        let status = if self.is_shutting_down() {
            StationStatus::ShuttingDown
        } else if self.active_rips() > 0 {
            StationStatus::Ripping
        } else {
            StationStatus::Ready
        };

        HealthSnapshot {
            status,
            version: VERSION,
            started_at: self.started_at.to_rfc3339(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            active_sessions: self.active_sessions(),
            active_rips: self.active_rips(),
            disk: storage::free_space(&self.config.output_dir).ok(),
        }
    }
}
