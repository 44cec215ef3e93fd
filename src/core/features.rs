//! Feature extraction from a session snapshot.
//!
//! Extraction is a pure function of the event history. Nothing incremental is
//! trusted: every report recomputes the whole vector, so retried or reordered
//! batches converge on the same result.

use crate::core::classifier::SignalThresholds;
use crate::core::session::SessionSnapshot;
use crate::events::{FocusEvent, FocusKind};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Behavioral features of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    /// Mean keystroke flight time, outliers excluded
    pub avg_keystroke_interval_ms: f64,
    /// Population standard deviation of the same flight times
    pub std_keystroke_interval_ms: f64,
    /// Number of paste events
    pub paste_count: u32,
    /// Pasted characters over code length (0-1)
    pub paste_char_ratio: f64,
    /// Share of edits that only delete text (0-1)
    pub delete_ratio: f64,
    /// Share of edits appended at the end of the document (0-1)
    pub linear_editing_score: f64,
    /// Blur/focus pairs with a long absence
    pub focus_loss_count: u32,
    /// Coefficient of variation of flight times
    pub burstiness: f64,
    /// Seconds from session start to the first run (or total time if never run)
    pub time_to_first_run_sec: f64,
    pub execution_count: u32,
    pub total_time_sec: f64,
    pub total_keystrokes: u32,
    pub code_length: u32,
    pub total_edits: u32,
    /// Flight times that survived outlier filtering
    pub flight_sample_count: u32,
    /// Mean key hold time over keystrokes whose release was observed
    pub avg_dwell_time_ms: f64,
}

/// Compute the feature vector for a session snapshot.
pub fn extract_features(
    snapshot: &SessionSnapshot,
    thresholds: &SignalThresholds,
) -> FeatureVector {
    let flights = flight_times(snapshot, thresholds.flight_outlier_ms);
    let avg_keystroke_interval_ms = mean(&flights);
    let std_keystroke_interval_ms = population_std_dev(&flights);
    let burstiness = std_keystroke_interval_ms / avg_keystroke_interval_ms.max(1.0);

    let code_length = snapshot.code.chars().count();
    let pasted_chars: usize = snapshot.pastes.iter().map(|p| p.length).sum();
    let paste_char_ratio = ratio(pasted_chars, code_length).min(1.0);

    let total_edits = snapshot.edits.len();
    let deletes = snapshot.edits.iter().filter(|e| e.is_delete).count();
    let linear = snapshot.edits.iter().filter(|e| e.is_linear).count();

    let total_time_sec = snapshot.elapsed_ms() as f64 / 1000.0;
    let time_to_first_run_sec = snapshot
        .executions
        .iter()
        .map(|e| e.timestamp_ms)
        .min()
        .map(|first| first.saturating_sub(snapshot.session_start_ms).max(0) as f64 / 1000.0)
        .unwrap_or(total_time_sec);

    let dwell_times: Vec<f64> = snapshot
        .keystrokes
        .iter()
        .filter(|k| k.dwell_time_ms > 0)
        .map(|k| k.dwell_time_ms as f64)
        .collect();

    FeatureVector {
        avg_keystroke_interval_ms,
        std_keystroke_interval_ms,
        paste_count: snapshot.pastes.len() as u32,
        paste_char_ratio,
        delete_ratio: ratio(deletes, total_edits),
        linear_editing_score: ratio(linear, total_edits),
        focus_loss_count: count_focus_losses(&snapshot.focus, thresholds.focus_away_ms),
        burstiness,
        time_to_first_run_sec,
        execution_count: snapshot.executions.len() as u32,
        total_time_sec,
        total_keystrokes: snapshot.keystrokes.len() as u32,
        code_length: code_length as u32,
        total_edits: total_edits as u32,
        flight_sample_count: flights.len() as u32,
        avg_dwell_time_ms: mean(&dwell_times),
    }
}

/// Flight times inside `(0, outlier_ms)`; idle gaps and clock noise are dropped.
fn flight_times(snapshot: &SessionSnapshot, outlier_ms: i64) -> Vec<f64> {
    snapshot
        .keystrokes
        .iter()
        .map(|k| k.flight_time_ms)
        .filter(|&t| t > 0 && t < outlier_ms)
        .map(|t| t as f64)
        .collect()
}

/// Count blurs whose next focus came back after more than `away_threshold_ms`.
fn count_focus_losses(events: &[FocusEvent], away_threshold_ms: i64) -> u32 {
    let mut ordered: Vec<&FocusEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp_ms);

    let mut count = 0;
    for (i, blur) in ordered.iter().enumerate() {
        if blur.kind != FocusKind::Blur {
            continue;
        }
        let next_focus = ordered[i + 1..]
            .iter()
            .find(|e| e.kind == FocusKind::Focus && e.timestamp_ms > blur.timestamp_ms);
        if let Some(focus) = next_focus {
            if focus.away_duration_ms.unwrap_or(0) > away_threshold_ms {
                count += 1;
            }
        }
    }
    count
}

/// `part / max(whole, 1)`.
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole.max(1) as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().population_std_dev()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionKey;
    use crate::events::{
        CursorPosition, EditEvent, ExecutionEvent, KeystrokeEvent, PasteEvent, TextRange,
    };

    fn empty_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            key: SessionKey::new(1, 1),
            session_start_ms: 0,
            last_activity_ms: 0,
            keystrokes: Vec::new(),
            pastes: Vec::new(),
            focus: Vec::new(),
            edits: Vec::new(),
            executions: Vec::new(),
            code: String::new(),
            finalized: false,
            report_count: 1,
        }
    }

    fn keystroke(timestamp_ms: i64, flight_time_ms: i64) -> KeystrokeEvent {
        KeystrokeEvent {
            key: "k".to_string(),
            timestamp_ms,
            dwell_time_ms: 0,
            flight_time_ms,
            cursor_line: 1,
            cursor_column: 1,
        }
    }

    fn edit(timestamp_ms: i64, text: &str, is_linear: bool) -> EditEvent {
        EditEvent::new(
            timestamp_ms,
            TextRange::at(CursorPosition::new(1, 1)),
            text,
            0,
            is_linear,
        )
    }

    fn paste(length: usize) -> PasteEvent {
        PasteEvent::new(10, TextRange::default(), length, "", 1)
    }

    fn extract(snapshot: &SessionSnapshot) -> FeatureVector {
        extract_features(snapshot, &SignalThresholds::default())
    }

    #[test]
    fn test_empty_session_is_all_zero() {
        let features = extract(&empty_snapshot());
        assert_eq!(features.avg_keystroke_interval_ms, 0.0);
        assert_eq!(features.std_keystroke_interval_ms, 0.0);
        assert_eq!(features.burstiness, 0.0);
        assert_eq!(features.delete_ratio, 0.0);
        assert_eq!(features.linear_editing_score, 0.0);
        assert_eq!(features.paste_char_ratio, 0.0);
        assert_eq!(features.total_keystrokes, 0);
        assert_eq!(features.execution_count, 0);
    }

    #[test]
    fn test_flight_time_statistics() {
        let mut snapshot = empty_snapshot();
        snapshot.keystrokes = vec![keystroke(1, 100), keystroke(2, 200), keystroke(3, 300)];

        let features = extract(&snapshot);
        assert!((features.avg_keystroke_interval_ms - 200.0).abs() < 1e-9);
        // Population std dev of {100, 200, 300}.
        assert!((features.std_keystroke_interval_ms - 81.649_658).abs() < 1e-4);
        assert!((features.burstiness - 81.649_658 / 200.0).abs() < 1e-4);
    }

    #[test]
    fn test_outlier_flight_times_excluded() {
        let mut snapshot = empty_snapshot();
        snapshot.keystrokes = vec![
            keystroke(1, 100),
            keystroke(2, 300),
            keystroke(3, 6000),
            keystroke(4, 0),
            keystroke(5, 5000),
        ];

        let features = extract(&snapshot);
        assert_eq!(features.flight_sample_count, 2);
        assert!((features.avg_keystroke_interval_ms - 200.0).abs() < 1e-9);
        assert!((features.std_keystroke_interval_ms - 100.0).abs() < 1e-9);
        assert_eq!(features.total_keystrokes, 5);
    }

    #[test]
    fn test_single_keystroke_has_no_deviation() {
        let mut snapshot = empty_snapshot();
        snapshot.keystrokes = vec![keystroke(1, 250)];
        let features = extract(&snapshot);
        assert_eq!(features.avg_keystroke_interval_ms, 250.0);
        assert_eq!(features.std_keystroke_interval_ms, 0.0);
    }

    #[test]
    fn test_delete_ratio() {
        let mut snapshot = empty_snapshot();
        snapshot.edits = (0..50)
            .map(|i| edit(i, if i < 40 { "" } else { "x" }, false))
            .collect();

        let features = extract(&snapshot);
        assert!((features.delete_ratio - 0.8).abs() < 1e-9);
        assert_eq!(features.total_edits, 50);
    }

    #[test]
    fn test_linear_editing_score() {
        let mut snapshot = empty_snapshot();
        snapshot.edits = vec![
            edit(1, "a", true),
            edit(2, "b", true),
            edit(3, "c", false),
            edit(4, "d", true),
        ];
        assert!((extract(&snapshot).linear_editing_score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_paste_char_ratio() {
        let mut snapshot = empty_snapshot();
        snapshot.code = "x".repeat(1000);
        snapshot.pastes = vec![paste(300)];
        assert!((extract(&snapshot).paste_char_ratio - 0.3).abs() < 1e-12);

        snapshot.pastes = vec![paste(301)];
        assert!((extract(&snapshot).paste_char_ratio - 0.301).abs() < 1e-12);
    }

    #[test]
    fn test_paste_ratio_with_no_code_is_bounded() {
        let mut snapshot = empty_snapshot();
        snapshot.pastes = vec![paste(50)];
        assert_eq!(extract(&snapshot).paste_char_ratio, 1.0);
    }

    #[test]
    fn test_long_absence_counts_as_focus_loss() {
        let mut snapshot = empty_snapshot();
        snapshot.focus = vec![FocusEvent::blur(0), FocusEvent::focus(15_000, 15_000)];
        assert_eq!(extract(&snapshot).focus_loss_count, 1);

        snapshot.focus = vec![FocusEvent::blur(0), FocusEvent::focus(5_000, 5_000)];
        assert_eq!(extract(&snapshot).focus_loss_count, 0);
    }

    #[test]
    fn test_focus_loss_ignores_arrival_order() {
        let mut snapshot = empty_snapshot();
        snapshot.focus = vec![
            FocusEvent::focus(40_000, 20_000),
            FocusEvent::blur(20_000),
            FocusEvent::focus(12_000, 12_000),
            FocusEvent::blur(0),
        ];
        assert_eq!(extract(&snapshot).focus_loss_count, 2);
    }

    #[test]
    fn test_blur_without_return_not_counted() {
        let mut snapshot = empty_snapshot();
        snapshot.focus = vec![FocusEvent::blur(1_000)];
        assert_eq!(extract(&snapshot).focus_loss_count, 0);
    }

    #[test]
    fn test_time_to_first_run() {
        let mut snapshot = empty_snapshot();
        snapshot.session_start_ms = 1_000;
        snapshot.last_activity_ms = 61_000;
        assert_eq!(extract(&snapshot).time_to_first_run_sec, 60.0);

        snapshot.executions = vec![
            ExecutionEvent {
                timestamp_ms: 31_000,
                code_snapshot: String::new(),
            },
            ExecutionEvent {
                timestamp_ms: 11_000,
                code_snapshot: String::new(),
            },
        ];
        let features = extract(&snapshot);
        assert_eq!(features.time_to_first_run_sec, 10.0);
        assert_eq!(features.execution_count, 2);
        assert_eq!(features.total_time_sec, 60.0);
    }

    #[test]
    fn test_dwell_time_mean_skips_unreleased_keys() {
        let mut snapshot = empty_snapshot();
        let mut a = keystroke(1, 100);
        a.dwell_time_ms = 90;
        let mut b = keystroke(2, 100);
        b.dwell_time_ms = 110;
        snapshot.keystrokes = vec![a, b, keystroke(3, 100)];
        assert_eq!(extract(&snapshot).avg_dwell_time_ms, 100.0);
    }
}
