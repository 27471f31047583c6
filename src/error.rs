// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Error types for shared messaging sources.
//!
//! Creation paths surface these to the caller. Release paths log and swallow
//! provider failures instead.

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::provider::ProviderError;

/// Errors surfaced by a [`MessagingSource`](crate::source::MessagingSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// The broker call itself failed.
    #[error("[{id}] {context}: {source}")]
    Provider {
        id: String,
        context: &'static str,
        #[source]
        source: ProviderError,
    },

    /// A destination scheduled for deletion was not broker-allocated.
    #[error("Queue [{name}] is not a temporary queue")]
    NotTemporary { name: String },

    #[error("[{id}] could not resolve credentials: {source}")]
    Credentials {
        id: String,
        #[source]
        source: CredentialError,
    },

    /// First failure of a best-effort teardown; every step was still attempted.
    #[error("[{id}] exception closing source: {source}")]
    Teardown {
        id: String,
        #[source]
        source: Box<SourceError>,
    },

    #[error("[{id}] source is closed")]
    Closed { id: String },

    #[error("Blocking worker failed: {0}")]
    Worker(String),
}

impl SourceError {
    pub(crate) fn provider(id: &str, context: &'static str, source: ProviderError) -> Self {
        Self::Provider {
            id: id.to_string(),
            context,
            source,
        }
    }

    /// Returns true if the broker itself reported the failure.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }

    /// Returns true for misconfiguration rather than broker I/O.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, Self::NotTemporary { .. } | Self::Closed { .. })
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
