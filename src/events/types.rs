//! Interaction events captured by the editing surface.
//!
//! These are pure data. Each event carries enough fields to compute an identity,
//! which the aggregator uses to drop re-delivered events.

use serde::{Deserialize, Serialize};

/// Maximum number of pasted characters retained for review.
pub const PASTE_PREFIX_CHARS: usize = 200;

/// Columns of slack allowed when deciding whether an edit is an append.
pub const LINEAR_EDIT_SLACK_COLUMNS: u32 = 2;

/// A 1-based line/column position in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A span of the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    pub start: CursorPosition,
    pub end: CursorPosition,
}

impl TextRange {
    pub fn new(start: CursorPosition, end: CursorPosition) -> Self {
        Self { start, end }
    }

    /// A zero-width range at `pos`.
    pub fn at(pos: CursorPosition) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }
}

/// A key press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystrokeEvent {
    pub key: String,
    pub timestamp_ms: i64,
    /// Press-to-release duration; 0 until the release is observed.
    pub dwell_time_ms: i64,
    /// Gap since the previous keystroke in the same session.
    pub flight_time_ms: i64,
    pub cursor_line: u32,
    pub cursor_column: u32,
}

/// Text pasted into the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteEvent {
    pub timestamp_ms: i64,
    pub range: TextRange,
    pub length: usize,
    pub content_prefix: String,
    pub line_count: u32,
}

impl PasteEvent {
    /// Build a paste event, keeping at most [`PASTE_PREFIX_CHARS`] of content.
    pub fn new(
        timestamp_ms: i64,
        range: TextRange,
        length: usize,
        content: &str,
        line_count: u32,
    ) -> Self {
        Self {
            timestamp_ms,
            range,
            length,
            content_prefix: content.chars().take(PASTE_PREFIX_CHARS).collect(),
            line_count,
        }
    }
}

/// Window focus transition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusKind {
    Focus,
    Blur,
}

impl FocusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusKind::Focus => "focus",
            FocusKind::Blur => "blur",
        }
    }
}

/// The editor window gained or lost focus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusEvent {
    pub kind: FocusKind,
    pub timestamp_ms: i64,
    /// Time since the matching blur. Only present on `Focus`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub away_duration_ms: Option<i64>,
}

impl FocusEvent {
    pub fn blur(timestamp_ms: i64) -> Self {
        Self {
            kind: FocusKind::Blur,
            timestamp_ms,
            away_duration_ms: None,
        }
    }

    pub fn focus(timestamp_ms: i64, away_duration_ms: i64) -> Self {
        Self {
            kind: FocusKind::Focus,
            timestamp_ms,
            away_duration_ms: Some(away_duration_ms),
        }
    }
}

/// A content change in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditEvent {
    pub timestamp_ms: i64,
    pub range: TextRange,
    pub inserted_text: String,
    pub range_length: usize,
    pub is_delete: bool,
    pub is_linear: bool,
}

impl EditEvent {
    /// Build an edit. `is_delete` is derived from the inserted text.
    pub fn new(
        timestamp_ms: i64,
        range: TextRange,
        inserted_text: impl Into<String>,
        range_length: usize,
        is_linear: bool,
    ) -> Self {
        let inserted_text = inserted_text.into();
        Self {
            timestamp_ms,
            range,
            is_delete: inserted_text.is_empty(),
            inserted_text,
            range_length,
            is_linear,
        }
    }

    /// Whether an edit starting at `start` appends to a document whose last line
    /// is `last_line` with `last_line_length` columns.
    pub fn is_append(start: CursorPosition, last_line: u32, last_line_length: u32) -> bool {
        start.line == last_line
            && start.column >= last_line_length.saturating_sub(LINEAR_EDIT_SLACK_COLUMNS)
    }
}

/// The student ran their code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub timestamp_ms: i64,
    pub code_snapshot: String,
}

/// Any one of the observable interaction kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Keystroke(KeystrokeEvent),
    Paste(PasteEvent),
    Focus(FocusEvent),
    Edit(EditEvent),
    Execution(ExecutionEvent),
}

impl TelemetryEvent {
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            TelemetryEvent::Keystroke(e) => e.timestamp_ms,
            TelemetryEvent::Paste(e) => e.timestamp_ms,
            TelemetryEvent::Focus(e) => e.timestamp_ms,
            TelemetryEvent::Edit(e) => e.timestamp_ms,
            TelemetryEvent::Execution(e) => e.timestamp_ms,
        }
    }

    /// Identity used for deduplication across report batches.
    pub fn id(&self) -> EventId {
        match self {
            TelemetryEvent::Keystroke(e) => EventId::Keystroke {
                timestamp_ms: e.timestamp_ms,
                key: e.key.clone(),
                line: e.cursor_line,
                column: e.cursor_column,
            },
            TelemetryEvent::Paste(e) => EventId::Paste {
                timestamp_ms: e.timestamp_ms,
                range: e.range,
                length: e.length,
            },
            TelemetryEvent::Focus(e) => EventId::Focus {
                kind: e.kind,
                timestamp_ms: e.timestamp_ms,
            },
            TelemetryEvent::Edit(e) => EventId::Edit {
                timestamp_ms: e.timestamp_ms,
                range: e.range,
                text: e.inserted_text.clone(),
                range_length: e.range_length,
            },
            TelemetryEvent::Execution(e) => EventId::Execution {
                timestamp_ms: e.timestamp_ms,
            },
        }
    }
}

/// Identity of an event: same kind, same timestamp, same distinguishing fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventId {
    Keystroke {
        timestamp_ms: i64,
        key: String,
        line: u32,
        column: u32,
    },
    Paste {
        timestamp_ms: i64,
        range: TextRange,
        length: usize,
    },
    Focus {
        kind: FocusKind,
        timestamp_ms: i64,
    },
    Edit {
        timestamp_ms: i64,
        range: TextRange,
        text: String,
        range_length: usize,
    },
    Execution {
        timestamp_ms: i64,
    },
}

/// Events from one report, grouped by kind in arrival order.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub keystrokes: Vec<KeystrokeEvent>,
    pub pastes: Vec<PasteEvent>,
    pub focus: Vec<FocusEvent>,
    pub edits: Vec<EditEvent>,
    pub executions: Vec<ExecutionEvent>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.keystrokes.len()
            + self.pastes.len()
            + self.focus.len()
            + self.edits.len()
            + self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Keystroke(e) => self.keystrokes.push(e),
            TelemetryEvent::Paste(e) => self.pastes.push(e),
            TelemetryEvent::Focus(e) => self.focus.push(e),
            TelemetryEvent::Edit(e) => self.edits.push(e),
            TelemetryEvent::Execution(e) => self.executions.push(e),
        }
    }

    /// Flatten into a single sequence, kind by kind.
    pub fn into_events(self) -> impl Iterator<Item = TelemetryEvent> {
        self.keystrokes
            .into_iter()
            .map(TelemetryEvent::Keystroke)
            .chain(self.pastes.into_iter().map(TelemetryEvent::Paste))
            .chain(self.focus.into_iter().map(TelemetryEvent::Focus))
            .chain(self.edits.into_iter().map(TelemetryEvent::Edit))
            .chain(self.executions.into_iter().map(TelemetryEvent::Execution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_delete_derived_from_text() {
        let range = TextRange::at(CursorPosition::new(1, 1));
        assert!(EditEvent::new(0, range, "", 3, false).is_delete);
        assert!(!EditEvent::new(0, range, "x", 0, true).is_delete);
    }

    #[test]
    fn test_append_detection() {
        // Last line has 10 columns; within 2 columns of the end counts as an append.
        assert!(EditEvent::is_append(CursorPosition::new(5, 8), 5, 10));
        assert!(EditEvent::is_append(CursorPosition::new(5, 11), 5, 10));
        assert!(!EditEvent::is_append(CursorPosition::new(5, 7), 5, 10));
        assert!(!EditEvent::is_append(CursorPosition::new(4, 10), 5, 10));
        // Short last line must not underflow.
        assert!(EditEvent::is_append(CursorPosition::new(1, 1), 1, 1));
    }

    #[test]
    fn test_paste_prefix_truncated() {
        let content = "é".repeat(300);
        let paste = PasteEvent::new(0, TextRange::default(), 300, &content, 1);
        assert_eq!(paste.content_prefix.chars().count(), PASTE_PREFIX_CHARS);
    }

    #[test]
    fn test_identity_ignores_dwell_time() {
        let mut a = KeystrokeEvent {
            key: "a".to_string(),
            timestamp_ms: 100,
            dwell_time_ms: 0,
            flight_time_ms: 120,
            cursor_line: 1,
            cursor_column: 2,
        };
        let first = TelemetryEvent::Keystroke(a.clone()).id();
        a.dwell_time_ms = 80;
        assert_eq!(first, TelemetryEvent::Keystroke(a).id());
    }

    #[test]
    fn test_batch_len() {
        let mut batch = EventBatch::default();
        assert!(batch.is_empty());
        batch.push(TelemetryEvent::Focus(FocusEvent::blur(0)));
        batch.push(TelemetryEvent::Execution(ExecutionEvent {
            timestamp_ms: 5,
            code_snapshot: String::new(),
        }));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.into_events().count(), 2);
    }
}
