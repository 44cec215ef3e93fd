//! Dalivim Authorship - behavioral telemetry aggregation and authorship scoring.
//!
//! The browser editor streams interaction telemetry (keystrokes, pastes, focus
//! changes, edits and code runs) while a student works on a timed coding
//! activity. This library aggregates that telemetry per (activity, student)
//! session and estimates how likely the submission is the student's own
//! real-time work.
//!
//! # Guarantees
//!
//! - **Full recompute**: every report rescores the whole session history, so
//!   retried or duplicated batches never double-count
//! - **Server-side features**: client-computed features are ignored
//! - **Finalization is final**: reports after the final one change nothing
//! - **Transparency**: accepted, dropped and late input is counted
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Dalivim Authorship                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌────────┐  │
//! │  │  Events   │──▶│  Session  │──▶│ Features  │──▶│ Scorer │  │
//! │  │  (wire)   │   │ Aggregator│   │ + Signals │   │        │  │
//! │  └───────────┘   └───────────┘   └───────────┘   └────────┘  │
//! │        │                                             │       │
//! │        ▼                                             ▼       │
//! │  ┌─────────────┐                             ┌─────────────┐ │
//! │  │Transparency │                             │   Result    │ │
//! │  │    Log      │                             │   Store     │ │
//! │  └─────────────┘                             └─────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dalivim_authorship::{
//!     config::Config, events::TelemetryReport, service::IngestionService,
//!     store::MemoryResultStore, transparency::create_shared_log,
//! };
//!
//! let service = IngestionService::from_config(
//!     &Config::default(),
//!     Arc::new(MemoryResultStore::new()),
//!     create_shared_log(),
//! );
//!
//! let result = service
//!     .ingest(TelemetryReport::new(1, 42, 1_700_000_000_000).finalized("print('hi')"))
//!     .unwrap();
//! assert!((0.0..=1.0).contains(&result.authorship_score));
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod service;
pub mod store;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

// Re-export key types at crate root for convenience
pub use config::{Config, ServerConfig};
pub use core::{
    Assessor, Confidence, FeatureVector, ScoringResult, SessionAggregator, SessionKey, Signal,
    SignalSet, SuspicionBand,
};
pub use error::{EventError, IngestError, SessionError, StoreError};
pub use events::{EventBatch, TelemetryEvent, TelemetryReport};
pub use service::IngestionService;
pub use store::{FileResultStore, MemoryResultStore, ResultStore, SubmissionRecord};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

// Client re-exports (when enabled)
#[cfg(feature = "client")]
pub use client::{BlockingReportClient, ClientConfig, ClientError, ReportClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
