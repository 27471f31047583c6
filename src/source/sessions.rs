// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Session acquire/release and the connections behind them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::manager::MessagingSource;
use crate::error::{Result, SourceError};
use crate::provider::{AcknowledgeMode, Connection, ConnectionFlavor, Session};
use crate::telemetry;

/// Identity of a session within the source that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

struct SessionInner {
    id: SessionId,
    owner: u64,
    session: Arc<dyn Session>,
    released: AtomicBool,
}

/// A provider session handed out by [`MessagingSource::create_session`].
///
/// Clones refer to the same session; releasing any clone releases it once.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    fn new(id: SessionId, owner: u64, session: Arc<dyn Session>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                owner,
                session,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// The provider session, for producing and consuming messages.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.inner.session
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("released", &self.is_released())
            .finish()
    }
}

impl MessagingSource {
    fn create_connection(&self) -> Result<Arc<dyn Connection>> {
        // Resolved per connection so a rotated secret is picked up
        let credentials = match self.auth_alias() {
            Some(alias) if !alias.is_empty() => {
                let credentials = self
                    .credentials
                    .resolve(&alias)
                    .map_err(|source| SourceError::Credentials {
                        id: self.id.clone(),
                        source,
                    })?;
                tracing::debug!(source = %self.id, user = %credentials.username, "using credentials to create connection");
                Some(credentials)
            }
            _ => None,
        };

        self.factory
            .create_connection(credentials.as_ref())
            .map_err(|e| SourceError::provider(&self.id, "could not obtain connection", e))
    }

    fn create_and_start_connection(&self) -> Result<Arc<dyn Connection>> {
        let connection = self.create_connection()?;
        let open = self.open_connections.increase();
        telemetry::record_open_connections(&self.id, open);

        if let Err(e) = connection.start() {
            self.discard_connection(&connection);
            return Err(SourceError::provider(&self.id, "could not start connection", e));
        }
        Ok(connection)
    }

    /// A private connection in pooled mode, otherwise the shared one.
    fn obtain_connection(&self) -> Result<Arc<dyn Connection>> {
        if self.config.connections_are_pooled {
            return self.create_and_start_connection();
        }

        let existing = self.global_connection.read().clone();
        if let Some(connection) = existing {
            return Ok(connection);
        }

        let _guard = self.init_lock.lock();
        self.ensure_open()?;
        let existing = self.global_connection.read().clone();
        if let Some(connection) = existing {
            return Ok(connection);
        }
        let connection = self.create_and_start_connection()?;
        *self.global_connection.write() = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Close a connection and drop it from the open count. Failures are logged.
    pub(super) fn discard_connection(&self, connection: &Arc<dyn Connection>) {
        match connection.close() {
            Ok(()) => self.connection_closed(),
            Err(e) => {
                tracing::error!(source = %self.id, error = %e, "exception closing connection");
            }
        }
    }

    /// Create a session on a pooled or the shared connection.
    ///
    /// In pooled mode a failed session creation closes the connection that
    /// was started for it before the error is returned. A source torn down
    /// while the session was being created reports `Closed`.
    pub fn create_session(&self, transacted: bool, ack_mode: AcknowledgeMode) -> Result<SessionHandle> {
        self.ensure_open()?;
        let connection = self.obtain_connection()?;

        let created = match self.flavor {
            ConnectionFlavor::PointToPoint => connection.create_queue_session(transacted, ack_mode),
            ConnectionFlavor::PublishSubscribe => connection.create_topic_session(transacted, ack_mode),
        };
        let session = match created {
            Ok(session) => session,
            Err(e) => {
                if self.config.connections_are_pooled {
                    self.discard_connection(&connection);
                }
                // The shared connection may have been closed by a concurrent teardown
                self.ensure_open()?;
                return Err(SourceError::provider(&self.id, "could not create session", e));
            }
        };
        if let Err(closed) = self.ensure_open() {
            if let Err(e) = session.close() {
                tracing::error!(source = %self.id, error = %e, "exception closing session");
            }
            if self.config.connections_are_pooled {
                self.discard_connection(&connection);
            }
            return Err(closed);
        }

        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        if self.config.connections_are_pooled {
            self.pooled_connections.insert(id, connection);
        }
        let open = self.open_sessions.increase();
        telemetry::record_open_sessions(&self.id, open);

        Ok(SessionHandle::new(id, self.instance, session))
    }

    /// Close a session, and in pooled mode the connection it owns.
    ///
    /// Provider failures are logged. Releasing a handle twice, or a handle
    /// from another source, does nothing.
    pub fn release_session(&self, handle: &SessionHandle) {
        if handle.inner.owner != self.instance {
            tracing::debug!(source = %self.id, session = handle.id().get(), "session not created by this source, ignoring");
            return;
        }
        if handle.inner.released.swap(true, Ordering::SeqCst) {
            tracing::debug!(source = %self.id, session = handle.id().get(), "session already released");
            return;
        }

        if self.config.connections_are_pooled {
            let connection = self
                .pooled_connections
                .remove(&handle.id())
                .map(|(_, connection)| connection);
            self.close_session(handle);
            match connection {
                Some(connection) => self.discard_connection(&connection),
                None => {
                    tracing::warn!(source = %self.id, session = handle.id().get(), "no pooled connection recorded for session");
                }
            }
        } else {
            self.close_session(handle);
        }
    }

    fn close_session(&self, handle: &SessionHandle) {
        if let Err(e) = handle.session().close() {
            tracing::error!(source = %self.id, session = handle.id().get(), error = %e, "exception closing session");
        }
        self.session_closed();
    }
}
