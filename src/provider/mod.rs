// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Broker provider seam.
//!
//! The manager treats every broker call as opaque and fallible. Concrete
//! client libraries implement these traits; `memory` is an in-process
//! implementation for tests, benches and the CLI demo.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Which session-creation call a connection expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionFlavor {
    /// Queue-based (point-to-point) connections.
    PointToPoint,
    /// Topic-based (publish/subscribe) connections.
    PublishSubscribe,
}

impl fmt::Display for ConnectionFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PointToPoint => write!(f, "point-to-point"),
            Self::PublishSubscribe => write!(f, "publish-subscribe"),
        }
    }
}

/// Message acknowledgement mode for non-transacted sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AcknowledgeMode {
    #[default]
    Auto,
    Client,
    DupsOk,
}

/// Broad category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Connection,
    Session,
    Destination,
    Authentication,
    Closed,
}

/// Failure reported by the broker client.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Username/password pair handed to the factory.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Mints broker connections.
pub trait ConnectionFactory: Send + Sync {
    /// Flavor of every connection this factory creates.
    fn flavor(&self) -> ConnectionFlavor;

    fn create_connection(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn Connection>, ProviderError>;

    /// Human-readable description used for diagnostics.
    fn describe(&self) -> String;
}

/// A live network link to the broker.
pub trait Connection: Send + Sync {
    fn start(&self) -> Result<(), ProviderError>;

    fn create_queue_session(
        &self,
        transacted: bool,
        ack_mode: AcknowledgeMode,
    ) -> Result<Arc<dyn Session>, ProviderError>;

    fn create_topic_session(
        &self,
        transacted: bool,
        ack_mode: AcknowledgeMode,
    ) -> Result<Arc<dyn Session>, ProviderError>;

    fn close(&self) -> Result<(), ProviderError>;
}

/// Unit-of-work handle created from a connection.
pub trait Session: Send + Sync {
    fn create_temporary_queue(&self) -> Result<Arc<dyn Destination>, ProviderError>;

    fn close(&self) -> Result<(), ProviderError>;
}

/// A named broker destination.
pub trait Destination: Send + Sync + fmt::Debug {
    fn name(&self) -> String;

    /// Whether the broker allocated this destination for a single connection.
    fn is_temporary(&self) -> bool;

    /// Delete a temporary destination on the broker.
    fn delete(&self) -> Result<(), ProviderError>;
}

/// Naming/lookup context owned alongside the factory.
pub trait DirectoryContext: Send + Sync {
    fn close(&self) -> Result<(), ProviderError>;
}
