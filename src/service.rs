//! Ingestion service: routes reports to sessions and keeps results current.
//!
//! A report is processed entirely under its session's lock: append, finalize,
//! recompute and store write. Reports for different sessions never share a
//! lock beyond the brief arena lookup.

use crate::config::Config;
use crate::core::{
    Assessor, Scorer, ScoringResult, Session, SessionAggregator, SessionKey, SessionSnapshot,
};
use crate::error::{IngestError, SessionError, StoreError};
use crate::events::TelemetryReport;
use crate::store::{EngineInfo, ResultStore, SubmissionRecord};
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives telemetry reports and maintains the latest result per submission.
#[derive(Debug)]
pub struct IngestionService {
    aggregator: SessionAggregator,
    store: Arc<dyn ResultStore>,
    assessor: Assessor,
    stats: SharedTransparencyLog,
    engine: EngineInfo,
}

impl IngestionService {
    pub fn new(
        aggregator: SessionAggregator,
        store: Arc<dyn ResultStore>,
        assessor: Assessor,
        stats: SharedTransparencyLog,
    ) -> Self {
        Self {
            aggregator,
            store,
            assessor,
            stats,
            engine: EngineInfo::current(),
        }
    }

    /// Build a service with the configured policies.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ResultStore>,
        stats: SharedTransparencyLog,
    ) -> Self {
        let scorer = Scorer::new(config.weights.clone(), config.confidence.clone());
        Self::new(
            SessionAggregator::new(config.max_events_per_session),
            store,
            Assessor::new(config.thresholds.clone(), scorer),
            stats,
        )
    }

    pub fn engine(&self) -> &EngineInfo {
        &self.engine
    }

    pub fn stats(&self) -> &SharedTransparencyLog {
        &self.stats
    }

    /// Number of sessions currently held in memory.
    pub fn session_count(&self) -> usize {
        self.aggregator.len()
    }

    /// Process one report and return the recomputed result.
    ///
    /// A report for a finalized session changes nothing and returns the stored
    /// result. A report with a negative timestamp is rejected. Otherwise only
    /// storage failures are surfaced; the client retries the same report.
    pub fn ingest(&self, report: TelemetryReport) -> Result<ScoringResult, IngestError> {
        self.stats.record_report();
        if let Err(e) = report.validate() {
            warn!(session = %report.key(), "Rejecting report: {e}");
            return Err(e);
        }
        if report.session_start_ms.is_some() && report.declared_start().is_none() {
            warn!(
                session = %report.key(),
                session_start_ms = ?report.session_start_ms,
                "Ignoring declared session start outside the report timeline"
            );
        }

        let key = report.key();
        let session_start_ms = report.declared_start();
        let TelemetryReport {
            timestamp_ms,
            is_final,
            code,
            raw_events,
            ..
        } = report;

        let decoded = raw_events.decode();
        if !decoded.rejected.is_empty() {
            for error in &decoded.rejected {
                warn!(session = %key, "Dropping event: {error}");
            }
            self.stats.record_malformed(decoded.rejected.len());
        }

        self.aggregator
            .with_session(key, timestamp_ms, |session, created| -> Result<_, IngestError> {
                if created {
                    self.stats.record_session_created();
                    debug!(session = %key, "Session created");
                }

                // A fresh session may belong to a submission finalized or
                // partially scored before eviction or restart.
                if session.report_count() == 0 && !session.is_finalized() {
                    match self.store.get(key)? {
                        Some(record) if record.finalized => {
                            session.finalize(record.code);
                        }
                        Some(record) => warn!(
                            session = %key,
                            previous_reports = record.report_count,
                            "Session history was evicted; rescoring from new reports only"
                        ),
                        None => {}
                    }
                }

                if session.is_finalized() {
                    return self.late_report(session);
                }

                if let Some(start) = session_start_ms {
                    session.declare_start(start);
                }

                let summary = match session.append(decoded.batch, timestamp_ms) {
                    Ok(summary) => summary,
                    Err(SessionError::Finalized { .. }) => return self.late_report(session),
                };
                self.stats
                    .record_events(summary.accepted, summary.duplicates, summary.over_capacity);
                if summary.over_capacity > 0 {
                    warn!(
                        session = %key,
                        dropped = summary.over_capacity,
                        "Session event capacity reached"
                    );
                }

                if is_final {
                    session.finalize(code);
                    self.stats.record_session_finalized();
                    info!(session = %key, "Session finalized");
                } else if let Some(code) = code {
                    if !session.update_code(code, timestamp_ms) {
                        debug!(
                            session = %key,
                            timestamp_ms,
                            "Ignoring code from an older report"
                        );
                    }
                }

                let snapshot = session.snapshot();
                let result = self.persist(&snapshot)?;

                debug!(
                    session = %key,
                    accepted = summary.accepted,
                    duplicates = summary.duplicates,
                    dwell_updates = summary.dwell_updates,
                    score = result.authorship_score,
                    confidence = %result.confidence,
                    "Report processed"
                );

                Ok(result)
            })
    }

    /// Answer a report that arrived after finalization.
    fn late_report(&self, session: &Session) -> Result<ScoringResult, IngestError> {
        let key = session.key();
        self.stats.record_late_report();
        warn!(session = %key, "Ignoring report for finalized session");

        match self.store.get(key)? {
            Some(record) if record.finalized => Ok(record.result()),
            // The final write failed earlier; write it now.
            _ => Ok(self.persist(&session.snapshot())?),
        }
    }

    /// Score a snapshot and replace the stored record.
    fn persist(&self, snapshot: &SessionSnapshot) -> Result<ScoringResult, StoreError> {
        let assessment = self.assessor.assess(snapshot);
        let result = assessment.result.clone();
        let record = SubmissionRecord::new(snapshot, assessment, &self.engine);

        self.store.put(record)?;
        self.stats.record_result_written();
        Ok(result)
    }

    /// The stored record of a submission.
    pub fn submission_result(
        &self,
        key: SessionKey,
    ) -> Result<Option<SubmissionRecord>, StoreError> {
        self.store.get(key)
    }

    pub fn list_activity(&self, activity_id: u64) -> Result<Vec<SubmissionRecord>, StoreError> {
        self.store.list_activity(activity_id)
    }

    /// Drop sessions idle for longer than `max_idle`. Returns how many were dropped.
    pub fn evict_idle(&self, now: DateTime<Utc>, max_idle: chrono::Duration) -> usize {
        let evicted = self.aggregator.evict_idle(now, max_idle);
        if !evicted.is_empty() {
            self.stats.record_sessions_evicted(evicted.len());
            info!(count = evicted.len(), "Evicted idle sessions");
        }
        evicted.len()
    }
}
