//! Ingestion transparency log.
//!
//! Counts what the engine accepted, dropped and ignored, so that every score can
//! be put in context. Counters only; no event content is kept here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running ingestion counters.
#[derive(Debug)]
pub struct TransparencyLog {
    reports_received: AtomicU64,
    /// Reports that arrived after their session was finalized
    late_reports: AtomicU64,
    events_accepted: AtomicU64,
    events_duplicate: AtomicU64,
    events_malformed: AtomicU64,
    events_over_capacity: AtomicU64,
    sessions_created: AtomicU64,
    sessions_finalized: AtomicU64,
    sessions_evicted: AtomicU64,
    results_written: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            reports_received: AtomicU64::new(0),
            late_reports: AtomicU64::new(0),
            events_accepted: AtomicU64::new(0),
            events_duplicate: AtomicU64::new(0),
            events_malformed: AtomicU64::new(0),
            events_over_capacity: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_finalized: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            results_written: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that resumes from, and saves to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous ingestion stats: {e}");
        }

        log
    }

    pub fn record_report(&self) {
        self.reports_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_report(&self) {
        self.late_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events(&self, accepted: usize, duplicate: usize, over_capacity: usize) {
        self.events_accepted
            .fetch_add(accepted as u64, Ordering::Relaxed);
        self.events_duplicate
            .fetch_add(duplicate as u64, Ordering::Relaxed);
        self.events_over_capacity
            .fetch_add(over_capacity as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, count: usize) {
        self.events_malformed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_finalized(&self) {
        self.sessions_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_evicted(&self, count: usize) {
        self.sessions_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_result_written(&self) {
        self.results_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            reports_received: self.reports_received.load(Ordering::Relaxed),
            late_reports: self.late_reports.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            events_over_capacity: self.events_over_capacity.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_finalized: self.sessions_finalized.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            results_written: self.results_written.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Ingestion Statistics:\n\
             - Reports received: {}\n\
             - Late reports ignored: {}\n\
             - Events accepted: {}\n\
             - Duplicate events dropped: {}\n\
             - Malformed events dropped: {}\n\
             - Events over capacity: {}\n\
             - Sessions created / finalized / evicted: {} / {} / {}\n\
             - Results written: {}\n\
             - Uptime: {} seconds",
            stats.reports_received,
            stats.late_reports,
            stats.events_accepted,
            stats.events_duplicate,
            stats.events_malformed,
            stats.events_over_capacity,
            stats.sessions_created,
            stats.sessions_finalized,
            stats.sessions_evicted,
            stats.results_written,
            stats.uptime_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats::from_stats(&self.stats());
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let persisted = PersistedStats::read(path)?;

                let counters = [
                    (&self.reports_received, persisted.reports_received),
                    (&self.late_reports, persisted.late_reports),
                    (&self.events_accepted, persisted.events_accepted),
                    (&self.events_duplicate, persisted.events_duplicate),
                    (&self.events_malformed, persisted.events_malformed),
                    (&self.events_over_capacity, persisted.events_over_capacity),
                    (&self.sessions_created, persisted.sessions_created),
                    (&self.sessions_finalized, persisted.sessions_finalized),
                    (&self.sessions_evicted, persisted.sessions_evicted),
                    (&self.results_written, persisted.results_written),
                ];
                for (counter, value) in counters {
                    counter.store(value, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransparencyStats {
    pub reports_received: u64,
    pub late_reports: u64,
    pub events_accepted: u64,
    pub events_duplicate: u64,
    pub events_malformed: u64,
    pub events_over_capacity: u64,
    pub sessions_created: u64,
    pub sessions_finalized: u64,
    pub sessions_evicted: u64,
    pub results_written: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// On-disk counter format.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStats {
    pub reports_received: u64,
    pub late_reports: u64,
    pub events_accepted: u64,
    pub events_duplicate: u64,
    pub events_malformed: u64,
    pub events_over_capacity: u64,
    pub sessions_created: u64,
    pub sessions_finalized: u64,
    pub sessions_evicted: u64,
    pub results_written: u64,
    pub last_updated: DateTime<Utc>,
}

impl PersistedStats {
    fn from_stats(stats: &TransparencyStats) -> Self {
        Self {
            reports_received: stats.reports_received,
            late_reports: stats.late_reports,
            events_accepted: stats.events_accepted,
            events_duplicate: stats.events_duplicate,
            events_malformed: stats.events_malformed,
            events_over_capacity: stats.events_over_capacity,
            sessions_created: stats.sessions_created,
            sessions_finalized: stats.sessions_finalized,
            sessions_evicted: stats.sessions_evicted,
            results_written: stats.results_written,
            last_updated: Utc::now(),
        }
    }

    /// Read persisted counters from a file.
    pub fn read(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
