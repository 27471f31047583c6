// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Shared messaging source: construction, reference counting and teardown.
//!
//! Session and reply-queue operations live in `sessions.rs` and `reply.rs`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::sessions::SessionId;
use crate::config::ProcessConfig;
use crate::counter::Counter;
use crate::credentials::{CredentialResolver, EnvCredentialResolver};
use crate::error::{Result, SourceError};
use crate::provider::{Connection, ConnectionFactory, ConnectionFlavor, Destination, DirectoryContext};
use crate::registry::SourceRegistry;
use crate::telemetry::{self, SourceSpan, SpanExt};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process configuration and credential resolver injected into sources.
#[derive(Clone)]
pub struct SourceOptions {
    pub config: Arc<ProcessConfig>,
    pub credentials: Arc<dyn CredentialResolver>,
}

impl SourceOptions {
    /// Explicit configuration with env-based credential resolution.
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config: Arc::new(config),
            credentials: Arc::new(EnvCredentialResolver),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            config: ProcessConfig::global(),
            credentials: Arc::new(EnvCredentialResolver),
        }
    }
}

/// Point-in-time diagnostics for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub id: String,
    pub flavor: ConnectionFlavor,
    pub references: i64,
    pub open_connections: i64,
    pub open_sessions: i64,
    pub pooled_entries: usize,
    pub has_global_connection: bool,
    pub has_global_reply_queue: bool,
    pub closed: bool,
    /// Counters still open when teardown ran, if it has run.
    pub leaks_at_teardown: Option<LeakReport>,
}

/// Resources still accounted as open when a source was torn down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    pub pooled_connections: usize,
    pub open_sessions: i64,
    pub open_connections: i64,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.pooled_connections == 0 && self.open_sessions == 0 && self.open_connections == 0
    }
}

/// Connection and session manager shared by every caller of one endpoint.
///
/// In singleton mode one lazily created connection serves every session. In
/// pooled mode each session gets a private connection that is closed with it.
pub struct MessagingSource {
    pub(super) id: String,
    pub(super) instance: u64,
    pub(super) factory: Arc<dyn ConnectionFactory>,
    pub(super) flavor: ConnectionFlavor,
    context: Mutex<Option<Arc<dyn DirectoryContext>>>,
    auth_alias: RwLock<Option<String>>,
    registry: Arc<SourceRegistry>,
    pub(super) config: Arc<ProcessConfig>,
    pub(super) credentials: Arc<dyn CredentialResolver>,
    references: AtomicI64,
    closed: AtomicBool,
    /// Guards lazy creation of the global connection and reply queue
    pub(super) init_lock: Mutex<()>,
    pub(super) global_connection: RwLock<Option<Arc<dyn Connection>>>,
    pub(super) global_reply_queue: RwLock<Option<Arc<dyn Destination>>>,
    pub(super) pooled_connections: DashMap<SessionId, Arc<dyn Connection>>,
    pub(super) next_session_id: AtomicU64,
    pub(super) open_connections: Counter,
    pub(super) open_sessions: Counter,
    leaks: Mutex<Option<LeakReport>>,
}

impl MessagingSource {
    /// Create a source and register it under `id`.
    ///
    /// The connection flavor is captured from the factory once, here.
    pub fn new(
        id: impl Into<String>,
        context: Option<Arc<dyn DirectoryContext>>,
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<SourceRegistry>,
        auth_alias: Option<String>,
    ) -> Arc<Self> {
        let id = id.into();
        let options = registry.options().clone();
        let flavor = factory.flavor();
        let source = Arc::new(Self {
            id: id.clone(),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            factory,
            flavor,
            context: Mutex::new(context),
            auth_alias: RwLock::new(auth_alias),
            registry: Arc::clone(&registry),
            config: options.config,
            credentials: options.credentials,
            references: AtomicI64::new(0),
            closed: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            global_connection: RwLock::new(None),
            global_reply_queue: RwLock::new(None),
            pooled_connections: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            open_connections: Counter::new(0),
            open_sessions: Counter::new(0),
            leaks: Mutex::new(None),
        });
        registry.register(id.clone(), Arc::clone(&source));
        tracing::debug!(
            source = %id,
            %flavor,
            factory = %source.factory.describe(),
            auth_alias = ?source.auth_alias(),
            pooled = source.config.connections_are_pooled,
            "created messaging source"
        );
        source
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flavor(&self) -> ConnectionFlavor {
        self.flavor
    }

    pub fn connection_factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.factory
    }

    /// Diagnostic description of the underlying factory.
    pub fn physical_name(&self) -> String {
        format!("factory [{}]", self.factory.describe())
    }

    pub fn auth_alias(&self) -> Option<String> {
        self.auth_alias.read().clone()
    }

    /// Change the alias used for connections created from now on.
    pub fn set_auth_alias(&self, alias: Option<String>) {
        *self.auth_alias.write() = alias;
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn connections_are_pooled(&self) -> bool {
        self.config.connections_are_pooled
    }

    pub fn sessions_are_pooled(&self) -> bool {
        self.config.sessions_are_pooled
    }

    pub fn use_single_dynamic_reply_queue(&self) -> bool {
        self.config.effective_use_single_dynamic_reply_queue()
    }

    pub fn references(&self) -> i64 {
        self.references.load(Ordering::SeqCst)
    }

    pub fn open_connection_count(&self) -> i64 {
        self.open_connections.value()
    }

    pub fn open_session_count(&self) -> i64 {
        self.open_sessions.value()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn increase_references(&self) {
        let references = self.references.fetch_add(1, Ordering::SeqCst) + 1;
        telemetry::record_references(&self.id, references);
    }

    pub fn decrease_references(&self) {
        let references = self.references.fetch_sub(1, Ordering::SeqCst) - 1;
        telemetry::record_references(&self.id, references);
    }

    /// Drop one connection from the open count.
    pub(super) fn connection_closed(&self) {
        match self.open_connections.decrease() {
            Some(open) => telemetry::record_open_connections(&self.id, open),
            None => {
                tracing::warn!(source = %self.id, "open connection count already zero, connection closed twice");
            }
        }
    }

    /// Drop one session from the open count.
    pub(super) fn session_closed(&self) {
        match self.open_sessions.decrease() {
            Some(open) => telemetry::record_open_sessions(&self.id, open),
            None => {
                tracing::warn!(source = %self.id, "open session count already zero, session closed twice");
            }
        }
    }

    pub(super) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SourceError::Closed {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Drop one reference and tear down if the count reaches the threshold.
    ///
    /// Returns whether this call performed the teardown. Teardown runs at most
    /// once per source no matter how far the count drifts afterwards.
    pub fn close(&self) -> Result<bool> {
        let references = self.references.fetch_sub(1, Ordering::SeqCst) - 1;
        telemetry::record_references(&self.id, references);

        if references > self.config.cleanup_threshold || !self.config.cleanup_on_close {
            tracing::debug!(source = %self.id, references, "no cleanup");
            return Ok(false);
        }
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(source = %self.id, references, "already torn down");
            return Ok(false);
        }

        let span = SourceSpan::teardown(&self.id, references);
        let _entered = span.enter();
        let result = self.teardown();
        span.record_result(&result);
        telemetry::record_teardown(&self.id, result.is_ok());
        result.map(|()| true)
    }

    /// Release every global resource. All steps run even if one fails.
    fn teardown(&self) -> Result<()> {
        tracing::debug!(source = %self.id, "cleaning up global objects");
        // No new caller may resolve this source while it is being released
        self.registry.unregister_source(&self.id, self);

        let mut first_error: Option<SourceError> = None;
        {
            let _guard = self.init_lock.lock();
            // Handles are dropped whether or not releasing them succeeds
            let queue = self.global_reply_queue.write().take();
            let connection = self.global_connection.write().take();

            if let Some(queue) = queue {
                if let Err(e) = self.delete_temporary_queue(&queue) {
                    tracing::warn!(source = %self.id, error = %e, "could not delete dynamic reply queue");
                    first_error.get_or_insert(e);
                }
            }

            if let Some(connection) = connection {
                tracing::debug!(source = %self.id, "closing global connection");
                match connection.close() {
                    Ok(()) => self.connection_closed(),
                    Err(e) => {
                        tracing::warn!(source = %self.id, error = %e, "could not close global connection");
                        first_error.get_or_insert(SourceError::provider(
                            &self.id,
                            "could not close global connection",
                            e,
                        ));
                    }
                }
            }
        }

        let leaks = self.report_leaks();
        *self.leaks.lock() = Some(leaks);

        let context = self.context.lock().take();
        if let Some(context) = context {
            if let Err(e) = context.close() {
                tracing::warn!(source = %self.id, error = %e, "could not close directory context");
                first_error.get_or_insert(SourceError::provider(
                    &self.id,
                    "could not close directory context",
                    e,
                ));
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(SourceError::Teardown {
                id: self.id.clone(),
                source: Box::new(e),
            }),
        }
    }

    /// Warn about anything still accounted as open and record it on the span.
    fn report_leaks(&self) -> LeakReport {
        let report = LeakReport {
            pooled_connections: self.pooled_connections.len(),
            open_sessions: self.open_sessions.value(),
            open_connections: self.open_connections.value(),
        };
        if report.pooled_connections != 0 {
            tracing::warn!(source = %self.id, pooled = report.pooled_connections, "pooled connections still held by sessions after closing");
        }
        if report.open_sessions != 0 {
            tracing::warn!(source = %self.id, sessions = report.open_sessions, "open session count after closing");
        }
        if report.open_connections != 0 {
            tracing::warn!(source = %self.id, connections = report.open_connections, "open connection count after closing");
        }
        let span = tracing::Span::current();
        span.record("leaked_sessions", report.open_sessions);
        span.record("leaked_connections", report.open_connections);
        report
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            id: self.id.clone(),
            flavor: self.flavor,
            references: self.references(),
            open_connections: self.open_connections.value(),
            open_sessions: self.open_sessions.value(),
            pooled_entries: self.pooled_connections.len(),
            has_global_connection: self.global_connection.read().is_some(),
            has_global_reply_queue: self.global_reply_queue.read().is_some(),
            closed: self.is_closed(),
            leaks_at_teardown: *self.leaks.lock(),
        }
    }
}

impl std::fmt::Debug for MessagingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingSource")
            .field("id", &self.id)
            .field("flavor", &self.flavor)
            .field("references", &self.references())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
