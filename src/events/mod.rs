//! Interaction events and the report wire format.

pub mod types;
pub mod wire;

pub use types::{
    CursorPosition, EditEvent, EventBatch, EventId, ExecutionEvent, FocusEvent, FocusKind,
    KeystrokeEvent, PasteEvent, TelemetryEvent, TextRange, PASTE_PREFIX_CHARS,
};
pub use wire::{parse_report_log, DecodedEvents, RawEvents, TelemetryReport};
