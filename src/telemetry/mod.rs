// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Telemetry for shared messaging sources.
//!
//! Provides structured logging, teardown spans, and `metrics` facade gauges
//! for open connections, open sessions and reference counts.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_open_connections, record_open_sessions, record_references, record_teardown,
};
pub use spans::{SourceSpan, SpanExt};
