// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! MSG-SOURCE
//!
//! Shared connection and session management for message broker endpoints.
//! Many independent pipeline stages reuse a small number of expensive broker
//! connections while each stage works on its own isolated session.
//!
//! # Pooling strategies
//!
//! - **Singleton** (default): one connection per endpoint, created on first
//!   use and shared by every session until the source closes.
//! - **Pooled**: every session gets a private connection that is closed when
//!   the session is released.
//!
//! # Lifecycle
//!
//! Callers resolve a [`MessagingSource`] through a [`SourceRegistry`] by
//! endpoint id, take a reference, and acquire/release sessions and reply
//! queues. When the last reference is closed the source unregisters itself
//! and releases its connection, shared reply queue and directory context.
//!
//! Broker access goes through the traits in [`provider`]; the manager treats
//! every broker call as opaque and fallible.

pub mod cli;
pub mod config;
pub mod counter;
pub mod credentials;
pub mod error;
pub mod provider;
pub mod registry;
pub mod source;
pub mod telemetry;

pub use config::ProcessConfig;
pub use counter::Counter;
pub use credentials::{CredentialResolver, Credentials, EnvCredentialResolver, StaticCredentialResolver};
pub use error::{Result, SourceError};
pub use provider::{AcknowledgeMode, ConnectionFactory, ConnectionFlavor, Destination, DirectoryContext};
pub use registry::SourceRegistry;
pub use source::{LeakReport, MessagingSource, SessionHandle, SessionId, SourceOptions, SourceStats};
