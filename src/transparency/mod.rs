//! Transparency module for the authorship engine.
//!
//! Tracks what the engine did with the telemetry it received, so reviewers can
//! see how much of a session's input was accepted, deduplicated or dropped.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, PersistedStats, SharedTransparencyLog,
    TransparencyLog, TransparencyStats,
};
