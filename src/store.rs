//! Latest scoring result per submission.
//!
//! Every report supersedes the previous record for its session; there is no
//! merge. Entries are locked individually so readers of one submission never
//! wait on writers of another.

use crate::core::{
    Assessment, Confidence, FeatureVector, ScoringResult, SessionKey, SessionSnapshot, SignalSet,
    SuspicionBand,
};
use crate::error::StoreError;
use crate::events::PasteEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// The name of this producer.
pub const ENGINE_NAME: &str = "dalivim-authorship";

/// Which engine instance computed a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

impl EngineInfo {
    /// Describe this process with a fresh instance id.
    pub fn current() -> Self {
        Self {
            name: ENGINE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Everything a reviewer sees for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub activity_id: u64,
    pub student_id: u64,
    pub authorship_score: f64,
    pub confidence: Confidence,
    pub signals: SignalSet,
    pub band: SuspicionBand,
    pub feature_vector: FeatureVector,
    /// Submitted code; present once the final report arrived
    pub code: Option<String>,
    pub finalized: bool,
    pub paste_events: Vec<PasteEvent>,
    pub report_count: u64,
    pub updated_at: DateTime<Utc>,
    pub engine: EngineInfo,
}

impl SubmissionRecord {
    pub fn new(snapshot: &SessionSnapshot, assessment: Assessment, engine: &EngineInfo) -> Self {
        let Assessment { features, result } = assessment;
        Self {
            activity_id: snapshot.key.activity_id,
            student_id: snapshot.key.student_id,
            authorship_score: result.authorship_score,
            confidence: result.confidence,
            band: result.band(),
            signals: result.signals,
            feature_vector: features,
            code: snapshot.finalized.then(|| snapshot.code.clone()),
            finalized: snapshot.finalized,
            paste_events: snapshot.pastes.clone(),
            report_count: snapshot.report_count,
            updated_at: Utc::now(),
            engine: engine.clone(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.activity_id, self.student_id)
    }

    pub fn result(&self) -> ScoringResult {
        ScoringResult {
            authorship_score: self.authorship_score,
            confidence: self.confidence,
            signals: self.signals.clone(),
        }
    }
}

/// Storage for the latest record of each submission.
pub trait ResultStore: fmt::Debug + Send + Sync {
    /// Replace the record for the submission.
    fn put(&self, record: SubmissionRecord) -> Result<(), StoreError>;

    fn get(&self, key: SessionKey) -> Result<Option<SubmissionRecord>, StoreError>;

    /// All records of an activity, ordered by student id.
    fn list_activity(&self, activity_id: u64) -> Result<Vec<SubmissionRecord>, StoreError>;
}

type Entry = Arc<RwLock<SubmissionRecord>>;

/// In-memory store with one lock per submission.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    entries: RwLock<HashMap<SessionKey, Entry>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: SessionKey) -> Result<Option<Entry>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(&key).map(Arc::clone))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable("result store lock poisoned".to_string())
}

impl ResultStore for MemoryResultStore {
    fn put(&self, record: SubmissionRecord) -> Result<(), StoreError> {
        let key = record.key();
        if let Some(entry) = self.entry(key)? {
            *entry.write().map_err(poisoned)? = record;
            return Ok(());
        }

        // Another writer may have inserted it between the two locks.
        let mut entries = self.entries.write().map_err(poisoned)?;
        match entries.entry(key) {
            MapEntry::Occupied(slot) => *slot.get().write().map_err(poisoned)? = record,
            MapEntry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(record)));
            }
        }
        Ok(())
    }

    fn get(&self, key: SessionKey) -> Result<Option<SubmissionRecord>, StoreError> {
        match self.entry(key)? {
            Some(entry) => Ok(Some(entry.read().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    fn list_activity(&self, activity_id: u64) -> Result<Vec<SubmissionRecord>, StoreError> {
        let handles: Vec<Entry> = {
            let entries = self.entries.read().map_err(poisoned)?;
            entries
                .iter()
                .filter(|(key, _)| key.activity_id == activity_id)
                .map(|(_, entry)| Arc::clone(entry))
                .collect()
        };

        let mut records = handles
            .iter()
            .map(|entry| entry.read().map(|r| r.clone()).map_err(poisoned))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| r.student_id);
        Ok(records)
    }
}

/// JSON file per submission under `<root>/<activity>/<student>.json`,
/// fronted by an in-memory copy for reads.
#[derive(Debug)]
pub struct FileResultStore {
    root: PathBuf,
    cache: MemoryResultStore,
}

impl FileResultStore {
    /// Open (or create) a store rooted at `root`, loading existing records.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let cache = MemoryResultStore::new();
        let mut loaded = 0usize;
        for activity_dir in std::fs::read_dir(&root)? {
            let activity_dir = activity_dir?.path();
            if !activity_dir.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(&activity_dir)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match read_record(&path) {
                    Ok(record) => {
                        cache.put(record)?;
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "Skipping unreadable result: {e}")
                    }
                }
            }
        }

        tracing::info!(root = %root.display(), loaded, "Opened result store");
        Ok(Self { root, cache })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: SessionKey) -> PathBuf {
        self.root
            .join(key.activity_id.to_string())
            .join(format!("{}.json", key.student_id))
    }
}

fn read_record(path: &Path) -> Result<SubmissionRecord, StoreError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

impl ResultStore for FileResultStore {
    fn put(&self, record: SubmissionRecord) -> Result<(), StoreError> {
        let path = self.record_path(record.key());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&record)?;
        // Write then rename so readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;

        self.cache.put(record)
    }

    fn get(&self, key: SessionKey) -> Result<Option<SubmissionRecord>, StoreError> {
        self.cache.get(key)
    }

    fn list_activity(&self, activity_id: u64) -> Result<Vec<SubmissionRecord>, StoreError> {
        self.cache.list_activity(activity_id)
    }
}
