// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Span utilities and extension traits for source tracing.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for standardized source spans.
pub struct SourceSpan;

impl SourceSpan {
    /// Span covering a full teardown of one source.
    ///
    /// `status` and `error.message` are filled in by `SpanExt::record_result`;
    /// the leak fields by the teardown itself.
    pub fn teardown(source_id: &str, references: i64) -> Span {
        info_span!(
            "source_teardown",
            source = %source_id,
            references,
            leaked_sessions = tracing::field::Empty,
            leaked_connections = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
