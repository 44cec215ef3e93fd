//! End-to-end tests of the ingestion service without the HTTP layer

use dalivim_authorship::config::Config;
use dalivim_authorship::core::{Confidence, SessionKey};
use dalivim_authorship::events::{
    CursorPosition, EditEvent, EventBatch, ExecutionEvent, FocusEvent, KeystrokeEvent, PasteEvent,
    TelemetryReport, TextRange,
};
use dalivim_authorship::service::IngestionService;
use dalivim_authorship::store::{MemoryResultStore, SubmissionRecord};
use dalivim_authorship::transparency::create_shared_log;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn service() -> IngestionService {
    IngestionService::from_config(
        &Config::default(),
        Arc::new(MemoryResultStore::new()),
        create_shared_log(),
    )
}

fn record(service: &IngestionService, key: SessionKey) -> SubmissionRecord {
    service
        .submission_result(key)
        .expect("store available")
        .expect("record stored")
}

/// A realistic session: typing, edits, a paste, a focus round trip and runs.
fn full_history() -> EventBatch {
    let mut batch = EventBatch::default();
    for i in 0..150i64 {
        batch.keystrokes.push(KeystrokeEvent {
            key: ((b'a' + (i % 26) as u8) as char).to_string(),
            timestamp_ms: 1_000 + i * 180,
            dwell_time_ms: 60 + i % 30,
            flight_time_ms: if i == 75 { 6_000 } else { 90 + (i * 37) % 250 },
            cursor_line: 1 + (i / 30) as u32,
            cursor_column: 1 + (i % 30) as u32,
        });
    }
    for i in 0..40i64 {
        let text = if i % 8 == 0 { "" } else { "x" };
        let start = CursorPosition::new(1 + (i / 10) as u32, 1 + (i % 10) as u32);
        batch
            .edits
            .push(EditEvent::new(1_100 + i * 600, TextRange::at(start), text, 0, i % 3 != 0));
    }
    batch.pastes.push(PasteEvent::new(
        20_000,
        TextRange::new(CursorPosition::new(5, 1), CursorPosition::new(6, 10)),
        40,
        "for i in range(10):\n    print(i)",
        2,
    ));
    batch.focus.push(FocusEvent::blur(12_000));
    batch.focus.push(FocusEvent::focus(24_500, 12_500));
    batch.executions.push(ExecutionEvent {
        timestamp_ms: 26_000,
        code_snapshot: "print('draft')".to_string(),
    });
    batch
}

/// Split a batch into `parts` interleaved chunks.
fn split(batch: &EventBatch, parts: usize) -> Vec<EventBatch> {
    let mut chunks = vec![EventBatch::default(); parts];
    for (i, e) in batch.keystrokes.iter().enumerate() {
        chunks[i % parts].keystrokes.push(e.clone());
    }
    for (i, e) in batch.edits.iter().enumerate() {
        chunks[i % parts].edits.push(e.clone());
    }
    for (i, e) in batch.pastes.iter().enumerate() {
        chunks[i % parts].pastes.push(e.clone());
    }
    for (i, e) in batch.focus.iter().enumerate() {
        chunks[i % parts].focus.push(e.clone());
    }
    for (i, e) in batch.executions.iter().enumerate() {
        chunks[i % parts].executions.push(e.clone());
    }
    chunks
}

const CODE: &str = "for i in range(10):\n    print(i)\nprint('done')\n";

#[test]
fn test_result_independent_of_batching() {
    let history = full_history();

    let single = service();
    single
        .ingest(
            TelemetryReport::new(1, 1, 40_000)
                .with_events(&history)
                .finalized(CODE),
        )
        .unwrap();

    // Same history in four reports, with the second one delivered twice.
    let batched = service();
    let chunks = split(&history, 4);
    let mut reports: Vec<TelemetryReport> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| TelemetryReport::new(1, 1, 10_000 * (i as i64 + 1)).with_events(chunk))
        .collect();
    reports.insert(2, reports[1].clone());
    if let Some(last) = reports.last_mut() {
        last.is_final = true;
        last.code = Some(CODE.to_string());
    }
    for report in reports {
        batched.ingest(report).unwrap();
    }

    let key = SessionKey::new(1, 1);
    let a = record(&single, key);
    let b = record(&batched, key);
    assert_eq!(a.feature_vector, b.feature_vector);
    assert_eq!(a.result(), b.result());
    assert_eq!(a.code, b.code);
    assert_eq!(
        batched.stats().stats().events_duplicate,
        chunks[1].len() as u64
    );
}

#[test]
fn test_outlier_flight_excluded_end_to_end() {
    let service = service();
    let mut report = TelemetryReport::new(2, 2, 5_000);
    report.raw_events.keystroke_sample = vec![
        json!({ "key": "a", "timestamp": 100, "dwellTime": 50, "flightTime": 100 }),
        json!({ "key": "b", "timestamp": 300, "dwellTime": 50, "flightTime": 300 }),
        json!({ "key": "c", "timestamp": 6_300, "dwellTime": 50, "flightTime": 6_000 }),
    ];
    service.ingest(report).unwrap();

    let features = record(&service, SessionKey::new(2, 2)).feature_vector;
    assert_eq!(features.avg_keystroke_interval_ms, 200.0);
    assert_eq!(features.std_keystroke_interval_ms, 100.0);
    assert_eq!(features.total_keystrokes, 3);
}

#[test]
fn test_focus_loss_scenarios_end_to_end() {
    let service = service();

    let mut long_absence = TelemetryReport::new(3, 1, 20_000);
    long_absence.raw_events.focus_events = vec![
        json!({ "type": "blur", "timestamp": 0 }),
        json!({ "type": "focus", "timestamp": 15_000, "awayDuration": 15_000 }),
    ];
    service.ingest(long_absence).unwrap();

    let mut short_absence = TelemetryReport::new(3, 2, 20_000);
    short_absence.raw_events.focus_events = vec![
        json!({ "type": "blur", "timestamp": 0 }),
        json!({ "type": "focus", "timestamp": 5_000, "awayDuration": 5_000 }),
    ];
    service.ingest(short_absence).unwrap();

    assert_eq!(record(&service, SessionKey::new(3, 1)).feature_vector.focus_loss_count, 1);
    assert_eq!(record(&service, SessionKey::new(3, 2)).feature_vector.focus_loss_count, 0);
}

#[test]
fn test_empty_session_scenario() {
    let service = service();
    let result = service.ingest(TelemetryReport::new(4, 1, 1_000)).unwrap();

    let features = record(&service, SessionKey::new(4, 1)).feature_vector;
    assert_eq!(features.avg_keystroke_interval_ms, 0.0);
    assert_eq!(features.delete_ratio, 0.0);
    assert_eq!(features.linear_editing_score, 0.0);
    assert_eq!(result.confidence, Confidence::Low);
    assert!(result.signals.iter().any(|s| s.as_str() == "never-executed"));
}

#[test]
fn test_finalize_twice_keeps_first_code() {
    let service = service();
    let key = SessionKey::new(5, 1);

    let first = service
        .ingest(TelemetryReport::new(5, 1, 10_000).finalized("answer = 1"))
        .unwrap();
    let second = service
        .ingest(TelemetryReport::new(5, 1, 11_000).finalized("answer = 2"))
        .unwrap();

    assert_eq!(first, second);
    let stored = record(&service, key);
    assert!(stored.finalized);
    assert_eq!(stored.code.as_deref(), Some("answer = 1"));
    assert_eq!(service.stats().stats().sessions_finalized, 1);
}

#[test]
fn test_out_of_order_reports_do_not_regress_code() {
    let service = service();
    let key = SessionKey::new(6, 1);

    service
        .ingest(TelemetryReport::new(6, 1, 20_000).with_code("x = 1\ny = 2\n"))
        .unwrap();
    service
        .ingest(TelemetryReport::new(6, 1, 10_000).with_code("x = 1\n"))
        .unwrap();

    let stored = record(&service, key);
    assert_eq!(stored.feature_vector.code_length, 12);
    assert_eq!(stored.report_count, 2);
}

#[test]
fn test_concurrent_reports_serialize_per_session() {
    let service = Arc::new(service());
    let threads = 8;
    let per_thread = 25;

    std::thread::scope(|scope| {
        for t in 0..threads {
            let service = Arc::clone(&service);
            scope.spawn(move || {
                for r in 0..per_thread {
                    let n = (t * per_thread + r) as i64;
                    let batch = EventBatch {
                        keystrokes: vec![KeystrokeEvent {
                            key: "k".to_string(),
                            timestamp_ms: n * 100,
                            dwell_time_ms: 50,
                            flight_time_ms: 100,
                            cursor_line: 1,
                            cursor_column: 1,
                        }],
                        ..EventBatch::default()
                    };
                    // One shared session plus one private session per thread.
                    service
                        .ingest(TelemetryReport::new(7, 1, n * 100 + 50).with_events(&batch))
                        .unwrap();
                    let private = TelemetryReport::new(7, 100 + t as u64, n * 100 + 50);
                    service.ingest(private.with_events(&batch)).unwrap();
                }
            });
        }
    });

    let shared = record(&service, SessionKey::new(7, 1));
    assert_eq!(shared.feature_vector.total_keystrokes, (threads * per_thread) as u32);
    assert_eq!(shared.report_count, (threads * per_thread) as u64);

    for t in 0..threads {
        let private = record(&service, SessionKey::new(7, 100 + t as u64));
        assert_eq!(private.feature_vector.total_keystrokes, per_thread as u32);
    }
    assert_eq!(service.list_activity(7).unwrap().len(), threads + 1);
}

#[test]
fn test_one_bad_session_does_not_affect_another() {
    let service = service();

    let mut bad = TelemetryReport::new(8, 1, 1_000);
    bad.raw_events.paste_events = vec![json!({ "nonsense": true }), json!(42)];
    bad.raw_events.keystroke_sample = vec![json!("not an object")];
    service.ingest(bad).unwrap();

    let good = TelemetryReport::new(8, 2, 1_000).with_events(&full_history());
    service.ingest(good).unwrap();

    assert_eq!(record(&service, SessionKey::new(8, 1)).feature_vector.total_keystrokes, 0);
    assert_eq!(record(&service, SessionKey::new(8, 2)).feature_vector.total_keystrokes, 150);
    assert_eq!(service.stats().stats().events_malformed, 3);
}
