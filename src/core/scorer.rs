//! Authorship scoring.
//!
//! The scalar formula is a pluggable [`ScoringPolicy`]. Whatever the policy,
//! [`Scorer::score`] clamps the result to `[0, 1]` and derives confidence from
//! the amount of evidence, independently of the formula.

use crate::core::classifier::{Signal, SignalSet};
use crate::core::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How much evidence backs a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence levels for [`Confidence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    /// Below this many keystrokes confidence is always low
    pub min_keystrokes: u32,
    /// At or above this many keystrokes (and enough runs) confidence is high
    pub high_keystrokes: u32,
    pub high_min_executions: u32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            min_keystrokes: 20,
            high_keystrokes: 100,
            high_min_executions: 1,
        }
    }
}

impl ConfidenceThresholds {
    pub fn evaluate(&self, features: &FeatureVector) -> Confidence {
        if features.total_keystrokes < self.min_keystrokes {
            Confidence::Low
        } else if features.total_keystrokes >= self.high_keystrokes
            && features.execution_count >= self.high_min_executions
        {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

/// Outcome of scoring a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringResult {
    /// Likelihood the work is the student's own, in `[0, 1]`
    pub authorship_score: f64,
    pub confidence: Confidence,
    pub signals: SignalSet,
}

impl ScoringResult {
    pub fn band(&self) -> SuspicionBand {
        SuspicionBand::from_score(self.authorship_score)
    }
}

/// Maps features and raised signals to an unclamped authorship score.
///
/// Implementations must never raise the score when paste ratio, linear
/// editing or focus loss increase.
pub trait ScoringPolicy: fmt::Debug + Send + Sync {
    fn authorship_score(&self, features: &FeatureVector, signals: &SignalSet) -> f64;
}

/// Penalty per raised signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub linear_editing: f64,
    pub high_paste_ratio: f64,
    pub excessive_focus_loss: f64,
    pub never_executed: f64,
    pub multiple_paste_events: f64,
    pub low_revision: f64,
    pub low_typing_variance: f64,
    pub no_typing_activity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            linear_editing: 0.2,
            high_paste_ratio: 0.3,
            excessive_focus_loss: 0.1,
            never_executed: 0.2,
            multiple_paste_events: 0.15,
            low_revision: 0.25,
            low_typing_variance: 0.15,
            no_typing_activity: 0.2,
        }
    }
}

impl ScoringWeights {
    /// Penalty for a signal. Negative weights are treated as zero.
    pub fn weight(&self, signal: Signal) -> f64 {
        let w = match signal {
            Signal::LinearEditing => self.linear_editing,
            Signal::HighPasteRatio => self.high_paste_ratio,
            Signal::ExcessiveFocusLoss => self.excessive_focus_loss,
            Signal::NeverExecuted => self.never_executed,
            Signal::MultiplePasteEvents => self.multiple_paste_events,
            Signal::LowRevision => self.low_revision,
            Signal::LowTypingVariance => self.low_typing_variance,
            Signal::NoTypingActivity => self.no_typing_activity,
        };
        w.max(0.0)
    }
}

/// `1 - sum(weight of each raised signal)`.
#[derive(Debug, Clone, Default)]
pub struct WeightedPenalty {
    pub weights: ScoringWeights,
}

impl ScoringPolicy for WeightedPenalty {
    fn authorship_score(&self, _features: &FeatureVector, signals: &SignalSet) -> f64 {
        let penalty: f64 = signals.iter().map(|&s| self.weights.weight(s)).sum();
        1.0 - penalty
    }
}

/// Combines a scoring policy with the confidence rules.
#[derive(Debug)]
pub struct Scorer {
    policy: Box<dyn ScoringPolicy>,
    confidence: ConfidenceThresholds,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default(), ConfidenceThresholds::default())
    }
}

impl Scorer {
    pub fn new(weights: ScoringWeights, confidence: ConfidenceThresholds) -> Self {
        Self::with_policy(Box::new(WeightedPenalty { weights }), confidence)
    }

    pub fn with_policy(policy: Box<dyn ScoringPolicy>, confidence: ConfidenceThresholds) -> Self {
        Self { policy, confidence }
    }

    pub fn score(&self, features: &FeatureVector, signals: &SignalSet) -> ScoringResult {
        let raw = self.policy.authorship_score(features, signals);
        let authorship_score = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        };

        ScoringResult {
            authorship_score,
            confidence: self.confidence.evaluate(features),
            signals: signals.clone(),
        }
    }
}

/// Presentation band for an authorship score. Breakpoints are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionBand {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl SuspicionBand {
    /// Lower bounds (exclusive) of each band, highest first.
    pub const BREAKPOINTS: [(f64, SuspicionBand); 4] = [
        (0.8, SuspicionBand::VeryLow),
        (0.6, SuspicionBand::Low),
        (0.4, SuspicionBand::Medium),
        (0.2, SuspicionBand::High),
    ];

    pub fn from_score(score: f64) -> Self {
        Self::BREAKPOINTS
            .iter()
            .find(|(bound, _)| score > *bound)
            .map(|&(_, band)| band)
            .unwrap_or(SuspicionBand::VeryHigh)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SuspicionBand::VeryLow => "Very Low",
            SuspicionBand::Low => "Low",
            SuspicionBand::Medium => "Medium",
            SuspicionBand::High => "High",
            SuspicionBand::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for SuspicionBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
