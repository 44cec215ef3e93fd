//! Core scoring pipeline.
//!
//! This module contains:
//! - Session aggregation of raw interaction events
//! - Feature extraction from a session snapshot
//! - Threshold classification into named signals
//! - Authorship scoring with a confidence level
//!
//! Everything after aggregation is pure.

pub mod classifier;
pub mod features;
pub mod scorer;
pub mod session;

// Re-export commonly used types
pub use classifier::{classify, Signal, SignalSet, SignalThresholds};
pub use features::{extract_features, FeatureVector};
pub use scorer::{
    Confidence, ConfidenceThresholds, Scorer, ScoringPolicy, ScoringResult, ScoringWeights,
    SuspicionBand, WeightedPenalty,
};
pub use session::{
    lock_session, AppendSummary, FinalizeOutcome, Session, SessionAggregator, SessionHandle,
    SessionKey, SessionSnapshot,
};

/// Features and score computed for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub features: FeatureVector,
    pub result: ScoringResult,
}

/// Runs extraction, classification and scoring with one set of policies.
#[derive(Debug, Default)]
pub struct Assessor {
    thresholds: SignalThresholds,
    scorer: Scorer,
}

impl Assessor {
    pub fn new(thresholds: SignalThresholds, scorer: Scorer) -> Self {
        Self { thresholds, scorer }
    }

    pub fn thresholds(&self) -> &SignalThresholds {
        &self.thresholds
    }

    pub fn assess(&self, snapshot: &SessionSnapshot) -> Assessment {
        let features = extract_features(snapshot, &self.thresholds);
        let signals = classify(&features, &self.thresholds);
        let result = self.scorer.score(&features, &signals);
        Assessment { features, result }
    }
}
