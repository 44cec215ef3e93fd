//! Threshold rules that turn a feature vector into warning signals.
//!
//! Each rule is evaluated independently and raises at most one signal. The set
//! is ordered by [`Signal`] declaration order, which is the display order.

use crate::core::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Flight times at or above this are idle gaps, not typing.
pub const DEFAULT_FLIGHT_OUTLIER_MS: i64 = 5_000;

/// An absence longer than this makes a blur/focus pair suspicious.
pub const DEFAULT_FOCUS_AWAY_MS: i64 = 10_000;

/// Policy constants used by feature extraction and classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalThresholds {
    pub flight_outlier_ms: i64,
    pub focus_away_ms: i64,
    /// `linear_editing_score` strictly above this raises `linear-editing`
    pub linear_editing: f64,
    /// `paste_char_ratio` strictly above this raises `high-paste-ratio`
    pub paste_char_ratio: f64,
    /// `focus_loss_count` strictly above this raises `excessive-focus-loss`
    pub focus_loss_count: u32,
    /// `paste_count` strictly above this raises `multiple-paste-events`
    pub multiple_paste_count: u32,
    /// `delete_ratio` below this raises `low-revision`...
    pub low_delete_ratio: f64,
    /// ...once at least this many edits were seen
    pub min_edits_for_revision: u32,
    /// `burstiness` below this raises `low-typing-variance`...
    pub low_burstiness: f64,
    /// ...once at least this many flight times were kept
    pub min_flights_for_variance: u32,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            flight_outlier_ms: DEFAULT_FLIGHT_OUTLIER_MS,
            focus_away_ms: DEFAULT_FOCUS_AWAY_MS,
            linear_editing: 0.8,
            paste_char_ratio: 0.3,
            focus_loss_count: 5,
            multiple_paste_count: 3,
            low_delete_ratio: 0.02,
            min_edits_for_revision: 20,
            low_burstiness: 0.3,
            min_flights_for_variance: 20,
        }
    }
}

/// A named warning raised by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    LinearEditing,
    HighPasteRatio,
    ExcessiveFocusLoss,
    NeverExecuted,
    MultiplePasteEvents,
    LowRevision,
    LowTypingVariance,
    NoTypingActivity,
}

impl Signal {
    /// Every signal, in display order.
    pub const ALL: [Signal; 8] = [
        Signal::LinearEditing,
        Signal::HighPasteRatio,
        Signal::ExcessiveFocusLoss,
        Signal::NeverExecuted,
        Signal::MultiplePasteEvents,
        Signal::LowRevision,
        Signal::LowTypingVariance,
        Signal::NoTypingActivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::LinearEditing => "linear-editing",
            Signal::HighPasteRatio => "high-paste-ratio",
            Signal::ExcessiveFocusLoss => "excessive-focus-loss",
            Signal::NeverExecuted => "never-executed",
            Signal::MultiplePasteEvents => "multiple-paste-events",
            Signal::LowRevision => "low-revision",
            Signal::LowTypingVariance => "low-typing-variance",
            Signal::NoTypingActivity => "no-typing-activity",
        }
    }

    /// Human-readable explanation for reviewers.
    pub fn description(&self) -> &'static str {
        match self {
            Signal::LinearEditing => "Code was written almost entirely top to bottom",
            Signal::HighPasteRatio => "A large share of the code was pasted",
            Signal::ExcessiveFocusLoss => "The editor lost focus for long periods many times",
            Signal::NeverExecuted => "The code was never run",
            Signal::MultiplePasteEvents => "Many separate pastes",
            Signal::LowRevision => "Almost no text was deleted or revised",
            Signal::LowTypingVariance => "Typing rhythm is unusually regular",
            Signal::NoTypingActivity => "No keystrokes were recorded",
        }
    }

    /// Whether the rule for this signal fires.
    fn fires(&self, f: &FeatureVector, t: &SignalThresholds) -> bool {
        match self {
            Signal::LinearEditing => f.linear_editing_score > t.linear_editing,
            Signal::HighPasteRatio => f.paste_char_ratio > t.paste_char_ratio,
            Signal::ExcessiveFocusLoss => f.focus_loss_count > t.focus_loss_count,
            Signal::NeverExecuted => f.execution_count == 0,
            Signal::MultiplePasteEvents => f.paste_count > t.multiple_paste_count,
            Signal::LowRevision => {
                f.total_edits >= t.min_edits_for_revision && f.delete_ratio < t.low_delete_ratio
            }
            Signal::LowTypingVariance => {
                f.flight_sample_count >= t.min_flights_for_variance
                    && f.burstiness < t.low_burstiness
            }
            Signal::NoTypingActivity => f.total_keystrokes == 0,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of raised signals, iterated in display order.
pub type SignalSet = BTreeSet<Signal>;

/// Evaluate every rule against a feature vector.
pub fn classify(features: &FeatureVector, thresholds: &SignalThresholds) -> SignalSet {
    Signal::ALL
        .iter()
        .copied()
        .filter(|signal| signal.fires(features, thresholds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_features() -> FeatureVector {
        FeatureVector {
            avg_keystroke_interval_ms: 180.0,
            std_keystroke_interval_ms: 120.0,
            burstiness: 0.66,
            delete_ratio: 0.15,
            linear_editing_score: 0.4,
            execution_count: 3,
            total_keystrokes: 400,
            total_edits: 350,
            flight_sample_count: 380,
            code_length: 900,
            ..FeatureVector::default()
        }
    }

    fn signals(features: &FeatureVector) -> Vec<&'static str> {
        classify(features, &SignalThresholds::default())
            .iter()
            .map(Signal::as_str)
            .collect()
    }

    #[test]
    fn test_genuine_session_raises_nothing() {
        assert!(signals(&active_features()).is_empty());
    }

    #[test]
    fn test_empty_session_signals() {
        let raised = signals(&FeatureVector::default());
        assert!(raised.contains(&"never-executed"));
        assert!(raised.contains(&"no-typing-activity"));
        assert!(!raised.contains(&"low-revision"));
        assert!(!raised.contains(&"low-typing-variance"));
    }

    #[test]
    fn test_paste_ratio_boundary_is_strict() {
        let mut features = active_features();
        features.paste_char_ratio = 300.0 / 1000.0;
        assert!(!signals(&features).contains(&"high-paste-ratio"));

        features.paste_char_ratio = 301.0 / 1000.0;
        assert!(signals(&features).contains(&"high-paste-ratio"));
    }

    #[test]
    fn test_linear_and_focus_thresholds() {
        let mut features = active_features();
        features.linear_editing_score = 0.8;
        features.focus_loss_count = 5;
        assert!(signals(&features).is_empty());

        features.linear_editing_score = 0.81;
        features.focus_loss_count = 6;
        assert_eq!(signals(&features), vec!["linear-editing", "excessive-focus-loss"]);
    }

    #[test]
    fn test_display_order_follows_rule_list() {
        let features = FeatureVector {
            linear_editing_score: 1.0,
            paste_char_ratio: 0.9,
            focus_loss_count: 9,
            paste_count: 4,
            ..FeatureVector::default()
        };
        assert_eq!(
            signals(&features),
            vec![
                "linear-editing",
                "high-paste-ratio",
                "excessive-focus-loss",
                "never-executed",
                "multiple-paste-events",
                "no-typing-activity",
            ]
        );
    }

    #[test]
    fn test_supplemental_rules_need_enough_evidence() {
        let mut features = active_features();
        features.delete_ratio = 0.0;
        features.burstiness = 0.1;
        let raised = signals(&features);
        assert!(raised.contains(&"low-revision"));
        assert!(raised.contains(&"low-typing-variance"));

        features.total_edits = 5;
        features.flight_sample_count = 5;
        assert!(signals(&features).is_empty());
    }

    #[test]
    fn test_signal_serializes_as_name() {
        let json = serde_json::to_string(&Signal::HighPasteRatio).unwrap();
        assert_eq!(json, "\"high-paste-ratio\"");
        for signal in Signal::ALL {
            let json = serde_json::to_value(signal).unwrap();
            assert_eq!(json.as_str(), Some(signal.as_str()));
        }
    }
}
