// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! `metrics` facade recording for source diagnostics.
//!
//! No recorder is installed by this crate; without one these calls are no-ops.

use metrics::{counter, gauge};

pub fn record_open_connections(source: &str, value: i64) {
    gauge!("msg_source_open_connections", "source" => source.to_string()).set(value as f64);
}

pub fn record_open_sessions(source: &str, value: i64) {
    gauge!("msg_source_open_sessions", "source" => source.to_string()).set(value as f64);
}

pub fn record_references(source: &str, value: i64) {
    gauge!("msg_source_references", "source" => source.to_string()).set(value as f64);
}

/// Count a completed teardown, tagged with its outcome.
pub fn record_teardown(source: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        "msg_source_teardowns_total",
        "source" => source.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
