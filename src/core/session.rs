//! Per-session event aggregation.
//!
//! One [`Session`] exists per (activity, student) pair. It keeps append-only
//! logs of every interaction kind, drops re-delivered events by identity and
//! hands out immutable snapshots for feature extraction.
//!
//! Sessions live in a [`SessionAggregator`], an arena keyed by [`SessionKey`]
//! where each session sits behind its own mutex. The arena lock is only held
//! long enough to look up or insert a handle, so work on different sessions
//! never contends.

use crate::error::SessionError;
use crate::events::{
    EditEvent, EventBatch, EventId, ExecutionEvent, FocusEvent, KeystrokeEvent, PasteEvent,
    TelemetryEvent,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};

/// Identifies a session: one student working on one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub activity_id: u64,
    pub student_id: u64,
}

impl SessionKey {
    pub fn new(activity_id: u64, student_id: u64) -> Self {
        Self {
            activity_id,
            student_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.activity_id, self.student_id)
    }
}

/// What happened to the events of one appended batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub accepted: usize,
    pub duplicates: usize,
    /// Re-delivered keystrokes that brought a previously unknown dwell time.
    pub dwell_updates: usize,
    pub over_capacity: usize,
}

/// Result of a finalize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Finalized,
    /// The session was already finalized; stored code is unchanged.
    AlreadyFinalized,
}

/// Mutable state of one session.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    session_start_ms: i64,
    last_activity_ms: i64,
    last_report_at: DateTime<Utc>,
    keystrokes: Vec<KeystrokeEvent>,
    pastes: Vec<PasteEvent>,
    focus: Vec<FocusEvent>,
    edits: Vec<EditEvent>,
    executions: Vec<ExecutionEvent>,
    /// Identity -> index into the log of the event's kind.
    seen: HashMap<EventId, usize>,
    code: Option<String>,
    code_timestamp_ms: i64,
    finalized: bool,
    /// Set once the arena has dropped this session; the handle is stale.
    evicted: bool,
    report_count: u64,
    max_events: usize,
}

impl Session {
    /// Create an empty session first observed at `started_ms`.
    pub fn new(key: SessionKey, started_ms: i64, max_events: usize) -> Self {
        Self {
            key,
            session_start_ms: started_ms,
            last_activity_ms: started_ms,
            last_report_at: Utc::now(),
            keystrokes: Vec::new(),
            pastes: Vec::new(),
            focus: Vec::new(),
            edits: Vec::new(),
            executions: Vec::new(),
            seen: HashMap::new(),
            code: None,
            code_timestamp_ms: i64::MIN,
            finalized: false,
            evicted: false,
            report_count: 0,
            max_events,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn report_count(&self) -> u64 {
        self.report_count
    }

    pub fn last_report_at(&self) -> DateTime<Utc> {
        self.last_report_at
    }

    /// Total number of retained events across all kinds.
    pub fn event_count(&self) -> usize {
        self.keystrokes.len()
            + self.pastes.len()
            + self.focus.len()
            + self.edits.len()
            + self.executions.len()
    }

    /// Widen the session's time span to include `timestamp_ms`.
    fn observe(&mut self, timestamp_ms: i64) {
        self.session_start_ms = self.session_start_ms.min(timestamp_ms);
        self.last_activity_ms = self.last_activity_ms.max(timestamp_ms);
    }

    /// Record a client-declared session start.
    pub fn declare_start(&mut self, started_ms: i64) {
        if !self.finalized {
            self.observe(started_ms);
        }
    }

    /// Append a report's events in arrival order.
    ///
    /// Events already seen are dropped, except that a keystroke whose dwell time
    /// was still unknown adopts the newly reported one.
    pub fn append(
        &mut self,
        batch: EventBatch,
        report_timestamp_ms: i64,
    ) -> Result<AppendSummary, SessionError> {
        if self.finalized {
            return Err(SessionError::Finalized { key: self.key });
        }

        self.report_count += 1;
        self.last_report_at = Utc::now();
        self.observe(report_timestamp_ms);

        let mut summary = AppendSummary::default();
        for event in batch.into_events() {
            let id = event.id();
            if let Some(&index) = self.seen.get(&id) {
                match event {
                    TelemetryEvent::Keystroke(ks)
                        if self.keystrokes[index].dwell_time_ms == 0 && ks.dwell_time_ms > 0 =>
                    {
                        self.keystrokes[index].dwell_time_ms = ks.dwell_time_ms;
                        summary.dwell_updates += 1;
                    }
                    _ => summary.duplicates += 1,
                }
                continue;
            }

            if self.event_count() >= self.max_events {
                summary.over_capacity += 1;
                continue;
            }

            self.observe(event.timestamp_ms());
            let index = match event {
                TelemetryEvent::Keystroke(e) => push_index(&mut self.keystrokes, e),
                TelemetryEvent::Paste(e) => push_index(&mut self.pastes, e),
                TelemetryEvent::Focus(e) => push_index(&mut self.focus, e),
                TelemetryEvent::Edit(e) => push_index(&mut self.edits, e),
                TelemetryEvent::Execution(e) => push_index(&mut self.executions, e),
            };
            self.seen.insert(id, index);
            summary.accepted += 1;
        }

        Ok(summary)
    }

    /// Replace the known code text unless a newer report already set it.
    ///
    /// Returns whether the code was updated.
    pub fn update_code(&mut self, code: String, report_timestamp_ms: i64) -> bool {
        if self.finalized || report_timestamp_ms < self.code_timestamp_ms {
            return false;
        }
        self.code = Some(code);
        self.code_timestamp_ms = report_timestamp_ms;
        true
    }

    /// Seal the session with its final code. Idempotent.
    pub fn finalize(&mut self, final_code: Option<String>) -> FinalizeOutcome {
        if self.finalized {
            return FinalizeOutcome::AlreadyFinalized;
        }
        if let Some(code) = final_code {
            self.code = Some(code);
        }
        self.finalized = true;
        FinalizeOutcome::Finalized
    }

    /// The latest known code: last reported text, else the newest run snapshot.
    pub fn current_code(&self) -> &str {
        if let Some(code) = &self.code {
            return code;
        }
        self.executions
            .iter()
            .max_by_key(|e| e.timestamp_ms)
            .map(|e| e.code_snapshot.as_str())
            .unwrap_or("")
    }

    /// Immutable copy of everything received so far.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key,
            session_start_ms: self.session_start_ms,
            last_activity_ms: self.last_activity_ms,
            keystrokes: self.keystrokes.clone(),
            pastes: self.pastes.clone(),
            focus: self.focus.clone(),
            edits: self.edits.clone(),
            executions: self.executions.clone(),
            code: self.current_code().to_string(),
            finalized: self.finalized,
            report_count: self.report_count,
        }
    }
}

fn push_index<T>(log: &mut Vec<T>, event: T) -> usize {
    log.push(event);
    log.len() - 1
}

/// Point-in-time view of a session, sufficient for feature extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub session_start_ms: i64,
    pub last_activity_ms: i64,
    pub keystrokes: Vec<KeystrokeEvent>,
    pub pastes: Vec<PasteEvent>,
    pub focus: Vec<FocusEvent>,
    pub edits: Vec<EditEvent>,
    pub executions: Vec<ExecutionEvent>,
    pub code: String,
    pub finalized: bool,
    pub report_count: u64,
}

impl SessionSnapshot {
    /// Elapsed session time in milliseconds, never negative.
    pub fn elapsed_ms(&self) -> i64 {
        self.last_activity_ms
            .saturating_sub(self.session_start_ms)
            .max(0)
    }
}

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Lock a session, recovering the state if a previous holder panicked.
///
/// A panic mid-report leaves at worst a partially appended batch, which the
/// next full recompute absorbs.
pub fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, Session> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Arena of sessions keyed by (activity, student).
#[derive(Debug)]
pub struct SessionAggregator {
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
    max_events_per_session: usize,
}

impl SessionAggregator {
    pub fn new(max_events_per_session: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_events_per_session,
        }
    }

    /// Look up a session, creating it if absent. The flag reports creation.
    ///
    /// The handle may be evicted before the caller locks it; prefer
    /// [`SessionAggregator::with_session`].
    pub fn entry(&self, key: SessionKey, observed_ms: i64) -> (SessionHandle, bool) {
        if let Some(handle) = self.get(key) {
            return (handle, false);
        }

        let mut sessions = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Another report may have created it between the two locks.
        if let Some(handle) = sessions.get(&key) {
            return (Arc::clone(handle), false);
        }
        let handle = Arc::new(Mutex::new(Session::new(
            key,
            observed_ms,
            self.max_events_per_session,
        )));
        sessions.insert(key, Arc::clone(&handle));
        (handle, true)
    }

    fn get(&self, key: SessionKey) -> Option<SessionHandle> {
        let sessions = match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.get(&key).map(Arc::clone)
    }

    /// Run `f` on the live session for `key`, creating it if absent.
    ///
    /// The session stays locked for the whole call. The flag passed to `f`
    /// reports whether the session was created for this call.
    pub fn with_session<R>(
        &self,
        key: SessionKey,
        observed_ms: i64,
        f: impl FnOnce(&mut Session, bool) -> R,
    ) -> R {
        let mut created = false;
        loop {
            let (handle, fresh) = self.entry(key, observed_ms);
            created |= fresh;
            let mut session = lock_session(&handle);
            // Evicted between lookup and lock: the arena holds a newer handle.
            if session.is_evicted() {
                continue;
            }
            return f(&mut *session, created);
        }
    }

    pub fn len(&self) -> usize {
        match self.sessions.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions with no report since `now - max_idle`.
    ///
    /// Sessions currently locked by an in-flight report are kept.
    pub fn evict_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> Vec<SessionKey> {
        let cutoff = now - max_idle;
        let mut sessions = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut evicted = Vec::new();
        sessions.retain(|key, handle| {
            let mut session = match handle.try_lock() {
                Ok(session) => session,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return true,
            };
            if session.last_report_at() >= cutoff {
                return true;
            }
            session.evicted = true;
            evicted.push(*key);
            false
        });
        evicted
    }
}
