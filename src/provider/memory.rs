// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! In-process broker implementing the provider traits.
//!
//! Every broker-side object is tracked so callers can check for leaks.
//! Failures can be injected per call site.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::{
    AcknowledgeMode, Connection, ConnectionFactory, ConnectionFlavor, Credentials, Destination,
    DirectoryContext, ProviderError, ProviderErrorKind, Session,
};

/// Call sites where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    CreateConnection,
    StartConnection,
    CreateSession,
    CreateTemporaryQueue,
    CloseSession,
    CloseConnection,
    DeleteQueue,
    CloseContext,
}

#[derive(Default)]
struct Failures {
    create_connection: AtomicBool,
    start_connection: AtomicBool,
    create_session: AtomicBool,
    create_temporary_queue: AtomicBool,
    close_session: AtomicBool,
    close_connection: AtomicBool,
    delete_queue: AtomicBool,
    close_context: AtomicBool,
}

impl Failures {
    fn flag(&self, point: FailurePoint) -> &AtomicBool {
        match point {
            FailurePoint::CreateConnection => &self.create_connection,
            FailurePoint::StartConnection => &self.start_connection,
            FailurePoint::CreateSession => &self.create_session,
            FailurePoint::CreateTemporaryQueue => &self.create_temporary_queue,
            FailurePoint::CloseSession => &self.close_session,
            FailurePoint::CloseConnection => &self.close_connection,
            FailurePoint::DeleteQueue => &self.delete_queue,
            FailurePoint::CloseContext => &self.close_context,
        }
    }
}

#[derive(Default)]
struct Tally {
    connections_created: AtomicUsize,
    connections_started: AtomicUsize,
    connections_closed: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
    queues_created: AtomicUsize,
    queues_deleted: AtomicUsize,
}

/// Point-in-time counts of broker-side objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub connections_created: usize,
    pub connections_started: usize,
    pub connections_closed: usize,
    pub sessions_created: usize,
    pub sessions_closed: usize,
    pub queues_created: usize,
    pub queues_deleted: usize,
}

impl BrokerStats {
    pub fn open_connections(&self) -> usize {
        self.connections_created - self.connections_closed
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions_created - self.sessions_closed
    }
}

struct BrokerInner {
    name: String,
    tally: Tally,
    failures: Failures,
    latency: Mutex<Option<Duration>>,
    credentials_seen: Mutex<Vec<Option<Credentials>>>,
    next_id: AtomicU64,
}

/// Shared in-process broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                name: name.into(),
                tally: Tally::default(),
                failures: Failures::default(),
                latency: Mutex::new(None),
                credentials_seen: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// A factory producing connections of the given flavor.
    pub fn factory(&self, flavor: ConnectionFlavor) -> Arc<InMemoryConnectionFactory> {
        Arc::new(InMemoryConnectionFactory {
            broker: self.clone(),
            flavor,
        })
    }

    /// Make every later call at `point` fail until cleared.
    pub fn fail_at(&self, point: FailurePoint, fail: bool) {
        self.inner.failures.flag(point).store(fail, Ordering::SeqCst);
    }

    /// Delay applied to connection creation, to widen race windows.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    pub fn stats(&self) -> BrokerStats {
        let t = &self.inner.tally;
        BrokerStats {
            connections_created: t.connections_created.load(Ordering::SeqCst),
            connections_started: t.connections_started.load(Ordering::SeqCst),
            connections_closed: t.connections_closed.load(Ordering::SeqCst),
            sessions_created: t.sessions_created.load(Ordering::SeqCst),
            sessions_closed: t.sessions_closed.load(Ordering::SeqCst),
            queues_created: t.queues_created.load(Ordering::SeqCst),
            queues_deleted: t.queues_deleted.load(Ordering::SeqCst),
        }
    }

    /// Credentials passed to each connection creation, in order.
    pub fn credentials_seen(&self) -> Vec<Option<Credentials>> {
        self.inner.credentials_seen.lock().clone()
    }

    fn check(&self, point: FailurePoint, kind: ProviderErrorKind) -> Result<(), ProviderError> {
        if self.inner.failures.flag(point).load(Ordering::SeqCst) {
            return Err(ProviderError::new(kind, format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Factory bound to an [`InMemoryBroker`].
pub struct InMemoryConnectionFactory {
    broker: InMemoryBroker,
    flavor: ConnectionFlavor,
}

impl ConnectionFactory for InMemoryConnectionFactory {
    fn flavor(&self) -> ConnectionFlavor {
        self.flavor
    }

    fn create_connection(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn Connection>, ProviderError> {
        let latency = *self.broker.inner.latency.lock();
        if let Some(delay) = latency {
            std::thread::sleep(delay);
        }
        self.broker
            .check(FailurePoint::CreateConnection, ProviderErrorKind::Connection)?;
        self.broker.inner.credentials_seen.lock().push(credentials.cloned());
        self.broker
            .inner
            .tally
            .connections_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryConnection {
            broker: self.broker.clone(),
            flavor: self.flavor,
            id: self.broker.next_id(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    fn describe(&self) -> String {
        format!("in-memory broker [{}] flavor [{}]", self.broker.inner.name, self.flavor)
    }
}

/// Connection to an [`InMemoryBroker`].
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    flavor: ConnectionFlavor,
    id: u64,
    started: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), ProviderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::new(
                ProviderErrorKind::Closed,
                format!("connection {} is closed", self.id),
            ));
        }
        Ok(())
    }

    fn create_session(&self, expected: ConnectionFlavor) -> Result<Arc<dyn Session>, ProviderError> {
        self.ensure_open()?;
        if self.flavor != expected {
            return Err(ProviderError::new(
                ProviderErrorKind::Session,
                format!("{} session requested on {} connection", expected, self.flavor),
            ));
        }
        self.broker
            .check(FailurePoint::CreateSession, ProviderErrorKind::Session)?;
        self.broker
            .inner
            .tally
            .sessions_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemorySession {
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

impl Connection for InMemoryConnection {
    fn start(&self) -> Result<(), ProviderError> {
        self.ensure_open()?;
        self.broker
            .check(FailurePoint::StartConnection, ProviderErrorKind::Connection)?;
        if !self.started.swap(true, Ordering::SeqCst) {
            self.broker
                .inner
                .tally
                .connections_started
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn create_queue_session(
        &self,
        _transacted: bool,
        _ack_mode: AcknowledgeMode,
    ) -> Result<Arc<dyn Session>, ProviderError> {
        self.create_session(ConnectionFlavor::PointToPoint)
    }

    fn create_topic_session(
        &self,
        _transacted: bool,
        _ack_mode: AcknowledgeMode,
    ) -> Result<Arc<dyn Session>, ProviderError> {
        self.create_session(ConnectionFlavor::PublishSubscribe)
    }

    fn close(&self) -> Result<(), ProviderError> {
        self.broker
            .check(FailurePoint::CloseConnection, ProviderErrorKind::Connection)?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker
                .inner
                .tally
                .connections_closed
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Session on an [`InMemoryConnection`].
pub struct InMemorySession {
    broker: InMemoryBroker,
    closed: AtomicBool,
}

impl Session for InMemorySession {
    fn create_temporary_queue(&self) -> Result<Arc<dyn Destination>, ProviderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::new(ProviderErrorKind::Closed, "session is closed"));
        }
        self.broker
            .check(FailurePoint::CreateTemporaryQueue, ProviderErrorKind::Destination)?;
        self.broker
            .inner
            .tally
            .queues_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TemporaryQueue {
            broker: self.broker.clone(),
            name: format!("TMP.{}", uuid::Uuid::new_v4()),
            deleted: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<(), ProviderError> {
        self.broker
            .check(FailurePoint::CloseSession, ProviderErrorKind::Session)?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker
                .inner
                .tally
                .sessions_closed
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Broker-allocated temporary queue.
pub struct TemporaryQueue {
    broker: InMemoryBroker,
    name: String,
    deleted: AtomicBool,
}

impl std::fmt::Debug for TemporaryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryQueue")
            .field("name", &self.name)
            .field("deleted", &self.deleted.load(Ordering::Relaxed))
            .finish()
    }
}

impl Destination for TemporaryQueue {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_temporary(&self) -> bool {
        true
    }

    fn delete(&self) -> Result<(), ProviderError> {
        self.broker
            .check(FailurePoint::DeleteQueue, ProviderErrorKind::Destination)?;
        if !self.deleted.swap(true, Ordering::SeqCst) {
            self.broker
                .inner
                .tally
                .queues_deleted
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A configured, permanent queue. Never deletable.
#[derive(Debug)]
pub struct StaticQueue {
    name: String,
}

impl StaticQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Destination for StaticQueue {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_temporary(&self) -> bool {
        false
    }

    fn delete(&self) -> Result<(), ProviderError> {
        Err(ProviderError::new(
            ProviderErrorKind::Destination,
            format!("queue [{}] is permanent", self.name),
        ))
    }
}

/// Directory context that records whether it was closed.
#[derive(Default)]
pub struct InMemoryContext {
    closed: AtomicUsize,
    fail_close: AtomicBool,
}

impl InMemoryContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

impl DirectoryContext for InMemoryContext {
    fn close(&self) -> Result<(), ProviderError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ProviderError::new(
                ProviderErrorKind::Connection,
                "injected failure closing context",
            ));
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
