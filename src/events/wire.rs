//! Wire format of telemetry reports sent by the editor.
//!
//! Raw events arrive as loosely typed JSON. Each one is decoded on its own so
//! that a single malformed event is dropped without losing the rest of the
//! batch.

use crate::core::SessionKey;
use crate::error::{EventError, IngestError};
use crate::events::types::{
    CursorPosition, EditEvent, EventBatch, ExecutionEvent, FocusEvent, FocusKind, KeystrokeEvent,
    PasteEvent, TelemetryEvent, TextRange,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A periodic or final telemetry report for one (activity, student) session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    pub activity_id: u64,
    pub student_id: u64,
    #[serde(alias = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub code: Option<String>,
    /// Client-declared session start, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_start_ms: Option<i64>,
    /// Client-computed features. Advisory only, never used for scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Value>,
    #[serde(default)]
    pub raw_events: RawEvents,
}

impl TelemetryReport {
    pub fn new(activity_id: u64, student_id: u64, timestamp_ms: i64) -> Self {
        Self {
            activity_id,
            student_id,
            timestamp_ms,
            is_final: false,
            code: None,
            session_start_ms: None,
            features: None,
            raw_events: RawEvents::default(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.activity_id, self.student_id)
    }

    /// Reject a report whose own timestamp cannot be placed on the session timeline.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.timestamp_ms < 0 {
            return Err(IngestError::InvalidReport(format!(
                "negative report timestamp {}",
                self.timestamp_ms
            )));
        }
        Ok(())
    }

    /// The declared session start, if it is usable.
    ///
    /// A start that is negative or later than the report itself is dropped.
    pub fn declared_start(&self) -> Option<i64> {
        self.session_start_ms
            .filter(|&start| (0..=self.timestamp_ms).contains(&start))
    }

    pub fn with_events(mut self, batch: &EventBatch) -> Self {
        self.raw_events = RawEvents::from_batch(batch);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn finalized(mut self, code: impl Into<String>) -> Self {
        self.is_final = true;
        self.code = Some(code.into());
        self
    }
}

/// Parse a recorded session: either a JSON array of reports or one report per line.
pub fn parse_report_log(content: &str) -> Result<Vec<TelemetryReport>, serde_json::Error> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// Raw event arrays as the editor sends them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvents {
    #[serde(default)]
    pub paste_events: Vec<Value>,
    #[serde(default)]
    pub focus_events: Vec<Value>,
    #[serde(default)]
    pub keystroke_sample: Vec<Value>,
    #[serde(default)]
    pub edits: Vec<Value>,
    #[serde(default)]
    pub executions: Vec<Value>,
}

/// Outcome of decoding a report's raw events.
#[derive(Debug, Default)]
pub struct DecodedEvents {
    pub batch: EventBatch,
    pub rejected: Vec<EventError>,
}

impl RawEvents {
    pub fn len(&self) -> usize {
        self.paste_events.len()
            + self.focus_events.len()
            + self.keystroke_sample.len()
            + self.edits.len()
            + self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode every raw event, collecting the ones that fail.
    pub fn decode(self) -> DecodedEvents {
        let mut out = DecodedEvents::default();

        let groups: [(Vec<Value>, fn(Value) -> Result<TelemetryEvent, EventError>); 5] = [
            (self.keystroke_sample, decode_keystroke),
            (self.paste_events, decode_paste),
            (self.focus_events, decode_focus),
            (self.edits, decode_edit),
            (self.executions, decode_execution),
        ];

        for (values, decode) in groups {
            for value in values {
                match decode(value) {
                    Ok(event) => out.batch.push(event),
                    Err(e) => out.rejected.push(e),
                }
            }
        }

        out
    }

    /// Encode a batch in the editor's wire format.
    pub fn from_batch(batch: &EventBatch) -> Self {
        Self {
            keystroke_sample: batch.keystrokes.iter().map(encode_keystroke).collect(),
            paste_events: batch.pastes.iter().map(encode_paste).collect(),
            focus_events: batch.focus.iter().map(encode_focus).collect(),
            edits: batch.edits.iter().map(encode_edit).collect(),
            executions: batch.executions.iter().map(encode_execution).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    line_number: u32,
    column: u32,
}

impl From<RawPosition> for CursorPosition {
    fn from(p: RawPosition) -> Self {
        CursorPosition::new(p.line_number, p.column)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRange {
    start_line_number: u32,
    start_column: u32,
    end_line_number: u32,
    end_column: u32,
}

impl From<RawRange> for TextRange {
    fn from(r: RawRange) -> Self {
        TextRange::new(
            CursorPosition::new(r.start_line_number, r.start_column),
            CursorPosition::new(r.end_line_number, r.end_column),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKeystroke {
    key: String,
    timestamp: i64,
    #[serde(default)]
    dwell_time: i64,
    flight_time: i64,
    #[serde(default)]
    position: Option<RawPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPaste {
    timestamp: i64,
    #[serde(default)]
    range: Option<RawRange>,
    length: usize,
    #[serde(default)]
    content: String,
    #[serde(default)]
    lines_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFocus {
    #[serde(rename = "type")]
    kind: FocusKind,
    timestamp: i64,
    #[serde(default)]
    away_duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEdit {
    timestamp: i64,
    range: RawRange,
    text: String,
    #[serde(default)]
    range_length: usize,
    #[serde(default)]
    is_linear: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExecution {
    timestamp: i64,
    #[serde(default)]
    code_snapshot: String,
}

fn parse<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, EventError> {
    serde_json::from_value(value).map_err(|e| EventError::malformed(kind, e.to_string()))
}

fn check_timestamp(kind: &'static str, timestamp: i64) -> Result<i64, EventError> {
    if timestamp < 0 {
        return Err(EventError::malformed(
            kind,
            format!("negative timestamp {timestamp}"),
        ));
    }
    Ok(timestamp)
}

fn decode_keystroke(value: Value) -> Result<TelemetryEvent, EventError> {
    let raw: RawKeystroke = parse("keystroke", value)?;
    let position: CursorPosition = raw.position.unwrap_or_default().into();
    Ok(TelemetryEvent::Keystroke(KeystrokeEvent {
        key: raw.key,
        timestamp_ms: check_timestamp("keystroke", raw.timestamp)?,
        dwell_time_ms: raw.dwell_time.max(0),
        flight_time_ms: raw.flight_time,
        cursor_line: position.line,
        cursor_column: position.column,
    }))
}

fn decode_paste(value: Value) -> Result<TelemetryEvent, EventError> {
    let raw: RawPaste = parse("paste", value)?;
    let line_count = raw
        .lines_count
        .unwrap_or_else(|| raw.content.split('\n').count() as u32);
    Ok(TelemetryEvent::Paste(PasteEvent::new(
        check_timestamp("paste", raw.timestamp)?,
        raw.range.unwrap_or_default().into(),
        raw.length,
        &raw.content,
        line_count,
    )))
}

fn decode_focus(value: Value) -> Result<TelemetryEvent, EventError> {
    let raw: RawFocus = parse("focus", value)?;
    let timestamp_ms = check_timestamp("focus", raw.timestamp)?;
    let event = match raw.kind {
        FocusKind::Blur => FocusEvent::blur(timestamp_ms),
        FocusKind::Focus => {
            let away = raw
                .away_duration
                .ok_or_else(|| EventError::malformed("focus", "missing awayDuration"))?;
            FocusEvent::focus(timestamp_ms, away.max(0))
        }
    };
    Ok(TelemetryEvent::Focus(event))
}

fn decode_edit(value: Value) -> Result<TelemetryEvent, EventError> {
    let raw: RawEdit = parse("edit", value)?;
    Ok(TelemetryEvent::Edit(EditEvent::new(
        check_timestamp("edit", raw.timestamp)?,
        raw.range.into(),
        raw.text,
        raw.range_length,
        raw.is_linear,
    )))
}

fn decode_execution(value: Value) -> Result<TelemetryEvent, EventError> {
    let raw: RawExecution = parse("execution", value)?;
    Ok(TelemetryEvent::Execution(ExecutionEvent {
        timestamp_ms: check_timestamp("execution", raw.timestamp)?,
        code_snapshot: raw.code_snapshot,
    }))
}

fn encode_range(range: &TextRange) -> Value {
    json!({
        "startLineNumber": range.start.line,
        "startColumn": range.start.column,
        "endLineNumber": range.end.line,
        "endColumn": range.end.column,
    })
}

fn encode_keystroke(e: &KeystrokeEvent) -> Value {
    json!({
        "key": e.key,
        "timestamp": e.timestamp_ms,
        "dwellTime": e.dwell_time_ms,
        "flightTime": e.flight_time_ms,
        "position": { "lineNumber": e.cursor_line, "column": e.cursor_column },
    })
}

fn encode_paste(e: &PasteEvent) -> Value {
    json!({
        "timestamp": e.timestamp_ms,
        "range": encode_range(&e.range),
        "length": e.length,
        "content": e.content_prefix,
        "linesCount": e.line_count,
    })
}

fn encode_focus(e: &FocusEvent) -> Value {
    match e.away_duration_ms {
        Some(away) => json!({ "type": e.kind, "timestamp": e.timestamp_ms, "awayDuration": away }),
        None => json!({ "type": e.kind, "timestamp": e.timestamp_ms }),
    }
}

fn encode_edit(e: &EditEvent) -> Value {
    json!({
        "timestamp": e.timestamp_ms,
        "range": encode_range(&e.range),
        "text": e.inserted_text,
        "rangeLength": e.range_length,
        "isDelete": e.is_delete,
        "isLinear": e.is_linear,
    })
}

fn encode_execution(e: &ExecutionEvent) -> Value {
    json!({ "timestamp": e.timestamp_ms, "codeSnapshot": e.code_snapshot })
}
