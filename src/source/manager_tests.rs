// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Tests for MessagingSource lifecycle, sessions and reply queues.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::config::ProcessConfig;
use crate::credentials::StaticCredentialResolver;
use crate::error::SourceError;
use crate::provider::memory::{FailurePoint, InMemoryBroker, InMemoryContext, StaticQueue};
use crate::provider::{AcknowledgeMode, ConnectionFlavor, Credentials, Destination};
use crate::registry::SourceRegistry;
use crate::source::{LeakReport, MessagingSource, SourceOptions};

/// Collects the messages of WARN events emitted while it is the default subscriber.
#[derive(Clone, Default)]
struct WarnCapture {
    messages: Arc<Mutex<Vec<String>>>,
}

impl WarnCapture {
    fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::with_default(subscriber, f)
    }

    fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for WarnCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.messages.lock().push(message);
        }
    }
}

fn singleton() -> ProcessConfig {
    ProcessConfig::default()
}

fn pooled() -> ProcessConfig {
    ProcessConfig {
        connections_are_pooled: true,
        ..Default::default()
    }
}

fn setup(config: ProcessConfig) -> (InMemoryBroker, Arc<SourceRegistry>, Arc<MessagingSource>) {
    let broker = InMemoryBroker::new("unit");
    let registry = SourceRegistry::new(SourceOptions::new(config));
    let source = registry.resolve_or_create("Q1", None, broker.factory(ConnectionFlavor::PointToPoint), None);
    (broker, registry, source)
}

#[test]
fn new_source_registers_with_zero_references() {
    let (_broker, registry, source) = setup(singleton());
    assert_eq!(source.references(), 0);
    assert!(Arc::ptr_eq(&registry.resolve("Q1").unwrap(), &source));
}

#[test]
fn singleton_sessions_share_one_connection() {
    let (broker, _registry, source) = setup(singleton());

    let s1 = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    let s2 = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    assert_ne!(s1.id(), s2.id());

    let stats = broker.stats();
    assert_eq!(stats.connections_created, 1);
    assert_eq!(stats.connections_started, 1);
    assert_eq!(stats.sessions_created, 2);
    assert_eq!(source.open_connection_count(), 1);
    assert_eq!(source.open_session_count(), 2);

    source.release_session(&s1);
    source.release_session(&s2);
    assert_eq!(source.open_session_count(), 0);
    assert_eq!(broker.stats().connections_closed, 0);
    assert_eq!(source.open_connection_count(), 1);
}

#[test]
fn pooled_session_owns_private_connection() {
    let (broker, _registry, source) = setup(pooled());

    let s1 = source.create_session(true, AcknowledgeMode::Client).unwrap();
    let s2 = source.create_session(true, AcknowledgeMode::Client).unwrap();
    assert_eq!(broker.stats().connections_created, 2);
    assert_eq!(source.stats().pooled_entries, 2);

    source.release_session(&s1);
    assert_eq!(source.stats().pooled_entries, 1);
    assert_eq!(source.open_connection_count(), 1);
    assert_eq!(broker.stats().connections_closed, 1);

    source.release_session(&s2);
    assert_eq!(source.stats().pooled_entries, 0);
    assert_eq!(source.open_connection_count(), 0);
    assert_eq!(source.open_session_count(), 0);
}

#[test]
fn release_twice_is_noop() {
    let (broker, _registry, source) = setup(pooled());
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    let other = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    source.release_session(&session);
    source.release_session(&session.clone());
    assert!(session.is_released());
    assert_eq!(source.open_session_count(), 1);
    assert_eq!(source.open_connection_count(), 1);
    assert_eq!(broker.stats().sessions_closed, 1);

    source.release_session(&other);
    assert_eq!(source.open_session_count(), 0);
}

#[test]
fn release_foreign_session_is_ignored() {
    let broker = InMemoryBroker::new("foreign");
    let registry = SourceRegistry::new(SourceOptions::new(singleton()));
    let a = registry.resolve_or_create("A", None, broker.factory(ConnectionFlavor::PointToPoint), None);
    let b = registry.resolve_or_create("B", None, broker.factory(ConnectionFlavor::PointToPoint), None);

    let session = a.create_session(false, AcknowledgeMode::Auto).unwrap();
    b.release_session(&session);
    assert!(!session.is_released());
    assert_eq!(a.open_session_count(), 1);

    a.release_session(&session);
    assert_eq!(a.open_session_count(), 0);
}

#[test]
fn pooled_session_failure_releases_connection() {
    let (broker, _registry, source) = setup(pooled());
    broker.fail_at(FailurePoint::CreateSession, true);

    let result = source.create_session(false, AcknowledgeMode::Auto);
    assert!(matches!(result, Err(SourceError::Provider { context: "could not create session", .. })));
    assert_eq!(broker.stats().connections_created, 1);
    assert_eq!(broker.stats().connections_closed, 1);
    assert_eq!(source.open_connection_count(), 0);
    assert_eq!(source.stats().pooled_entries, 0);
}

#[test]
fn singleton_session_failure_keeps_shared_connection() {
    let (broker, _registry, source) = setup(singleton());
    broker.fail_at(FailurePoint::CreateSession, true);

    assert!(source.create_session(false, AcknowledgeMode::Auto).is_err());
    assert_eq!(broker.stats().connections_closed, 0);
    assert!(source.stats().has_global_connection);

    broker.fail_at(FailurePoint::CreateSession, false);
    source.create_session(false, AcknowledgeMode::Auto).unwrap();
    assert_eq!(broker.stats().connections_created, 1);
}

#[test]
fn connection_failure_is_wrapped() {
    let (broker, _registry, source) = setup(singleton());
    broker.fail_at(FailurePoint::CreateConnection, true);

    let err = source.create_session(false, AcknowledgeMode::Auto).unwrap_err();
    assert!(err.is_provider_failure());
    assert!(!source.stats().has_global_connection);
    assert_eq!(source.open_connection_count(), 0);
}

#[test]
fn start_failure_closes_connection() {
    let (broker, _registry, source) = setup(singleton());
    broker.fail_at(FailurePoint::StartConnection, true);

    let result = source.create_session(false, AcknowledgeMode::Auto);
    assert!(matches!(result, Err(SourceError::Provider { context: "could not start connection", .. })));
    assert_eq!(broker.stats().connections_closed, 1);
    assert_eq!(source.open_connection_count(), 0);
    assert!(!source.stats().has_global_connection);
}

#[test]
fn session_close_failure_still_completes_accounting() {
    let (broker, _registry, source) = setup(pooled());
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    broker.fail_at(FailurePoint::CloseSession, true);
    source.release_session(&session);
    assert_eq!(source.open_session_count(), 0);
    assert_eq!(source.open_connection_count(), 0);
    assert_eq!(source.stats().pooled_entries, 0);
}

#[test]
fn connection_close_failure_is_swallowed() {
    let (broker, _registry, source) = setup(pooled());
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    broker.fail_at(FailurePoint::CloseConnection, true);
    source.release_session(&session);
    assert_eq!(source.open_session_count(), 0);
    assert_eq!(source.stats().pooled_entries, 0);
    // The connection could not be closed, so it is still counted open
    assert_eq!(source.open_connection_count(), 1);
}

#[test]
fn topic_factory_creates_topic_sessions() {
    let broker = InMemoryBroker::new("topics");
    let registry = SourceRegistry::new(SourceOptions::new(singleton()));
    let source = registry.resolve_or_create("T1", None, broker.factory(ConnectionFlavor::PublishSubscribe), None);

    assert_eq!(source.flavor(), ConnectionFlavor::PublishSubscribe);
    assert!(source.create_session(false, AcknowledgeMode::DupsOk).is_ok());
}

#[test]
fn close_tears_down_once_at_threshold() {
    let context = InMemoryContext::new();
    let broker = InMemoryBroker::new("close");
    let registry = SourceRegistry::new(SourceOptions::new(singleton()));
    let source = registry.resolve_or_create(
        "Q1",
        Some(context.clone()),
        broker.factory(ConnectionFlavor::PointToPoint),
        None,
    );

    source.increase_references();
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    source.release_session(&session);

    assert!(!source.close().unwrap());
    assert!(registry.resolve("Q1").is_some());
    assert_eq!(context.close_count(), 0);

    assert!(source.close().unwrap());
    assert!(source.is_closed());
    assert!(registry.resolve("Q1").is_none());
    assert_eq!(context.close_count(), 1);
    assert_eq!(broker.stats().connections_closed, 1);
    assert_eq!(source.open_connection_count(), 0);

    // Count drifts below the threshold; teardown must not repeat
    assert!(!source.close().unwrap());
    assert!(!source.close().unwrap());
    assert_eq!(context.close_count(), 1);
    assert_eq!(source.references(), -2);
}

#[test]
fn close_without_cleanup_on_close_keeps_resources() {
    let config = ProcessConfig {
        cleanup_on_close: false,
        ..Default::default()
    };
    let (broker, registry, source) = setup(config);
    source.increase_references();
    source.create_session(false, AcknowledgeMode::Auto).unwrap();

    assert!(!source.close().unwrap());
    assert!(!source.is_closed());
    assert!(registry.resolve("Q1").is_some());
    assert_eq!(broker.stats().connections_closed, 0);
}

#[test]
fn custom_cleanup_threshold() {
    let config = ProcessConfig {
        cleanup_threshold: 1,
        ..Default::default()
    };
    let (_broker, _registry, source) = setup(config);
    source.increase_references();
    source.increase_references();
    source.increase_references();

    assert!(!source.close().unwrap());
    assert!(source.close().unwrap());
    assert_eq!(source.references(), 1);
}

#[test]
fn decrease_references_has_no_side_effects() {
    let (_broker, registry, source) = setup(singleton());
    source.increase_references();
    source.decrease_references();
    source.decrease_references();
    assert_eq!(source.references(), -1);
    assert!(!source.is_closed());
    assert!(registry.resolve("Q1").is_some());
}

#[test]
fn operations_after_close_fail() {
    let (_broker, _registry, source) = setup(singleton());
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    source.release_session(&session);
    assert!(source.close().unwrap());

    let err = source.create_session(false, AcknowledgeMode::Auto).unwrap_err();
    assert!(matches!(err, SourceError::Closed { .. }));
    assert!(err.is_precondition_failure());
}

#[test]
fn teardown_attempts_every_step_and_reports_first_error() {
    let context = InMemoryContext::new();
    let broker = InMemoryBroker::new("teardown");
    let registry = SourceRegistry::new(SourceOptions::new(singleton()));
    let source = registry.resolve_or_create(
        "Q1",
        Some(context.clone()),
        broker.factory(ConnectionFlavor::PointToPoint),
        None,
    );
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    source.get_dynamic_reply_queue(&session).unwrap();
    source.release_session(&session);

    broker.fail_at(FailurePoint::DeleteQueue, true);
    let err = source.close().unwrap_err();
    match err {
        SourceError::Teardown { source: cause, .. } => {
            assert!(matches!(*cause, SourceError::Provider { context: "cannot delete temporary queue", .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Later steps still ran
    assert_eq!(broker.stats().connections_closed, 1);
    assert_eq!(context.close_count(), 1);
    assert!(registry.resolve("Q1").is_none());
    assert!(source.is_closed());

    // The failed queue is dropped all the same
    let stats = source.stats();
    assert!(!stats.has_global_reply_queue);
    assert!(!stats.has_global_connection);
}

#[test]
fn teardown_drops_global_handles() {
    let (_broker, _registry, source) = setup(singleton());
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    source.get_dynamic_reply_queue(&session).unwrap();
    source.release_session(&session);

    let before = source.stats();
    assert!(before.has_global_connection);
    assert!(before.has_global_reply_queue);
    assert!(before.leaks_at_teardown.is_none());

    assert!(source.close().unwrap());
    let after = source.stats();
    assert!(!after.has_global_connection);
    assert!(!after.has_global_reply_queue);
    assert_eq!(after.leaks_at_teardown, Some(LeakReport::default()));
    assert!(source.global_connection.read().is_none());
    assert!(source.global_reply_queue.read().is_none());
}

#[test]
fn teardown_drops_connection_even_when_close_fails() {
    let (broker, _registry, source) = setup(singleton());
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    source.release_session(&session);

    broker.fail_at(FailurePoint::CloseConnection, true);
    assert!(source.close().is_err());
    assert!(!source.stats().has_global_connection);
}

#[test]
fn reply_queue_after_close_is_refused() {
    let (_broker, _registry, source) = setup(singleton());
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    source.get_dynamic_reply_queue(&session).unwrap();
    source.release_session(&session);
    assert!(source.close().unwrap());

    let err = source.get_dynamic_reply_queue(&session).unwrap_err();
    assert!(matches!(err, SourceError::Closed { .. }));
}

#[test]
fn outstanding_session_is_reported_at_teardown() {
    let (_broker, _registry, source) = setup(singleton());
    source.increase_references();
    let _session = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    let capture = WarnCapture::default();
    assert!(capture.run(|| source.close()).unwrap());

    assert!(capture.contains("open session count after closing"));
    assert!(!capture.contains("pooled connections still held"));
    let leaks = source.stats().leaks_at_teardown.unwrap();
    assert_eq!(
        leaks,
        LeakReport {
            pooled_connections: 0,
            open_sessions: 1,
            open_connections: 0,
        }
    );
    assert!(!leaks.is_clean());
}

#[test]
fn outstanding_pooled_session_is_reported_at_teardown() {
    let (broker, _registry, source) = setup(pooled());
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    let capture = WarnCapture::default();
    assert!(capture.run(|| source.close()).unwrap());

    assert!(capture.contains("pooled connections still held by sessions after closing"));
    assert!(capture.contains("open session count after closing"));
    assert!(capture.contains("open connection count after closing"));
    assert_eq!(
        source.stats().leaks_at_teardown,
        Some(LeakReport {
            pooled_connections: 1,
            open_sessions: 1,
            open_connections: 1,
        })
    );

    // Releasing late still returns the private connection
    source.release_session(&session);
    assert_eq!(broker.stats().open_connections(), 0);
    assert_eq!(source.open_connection_count(), 0);
}

#[test]
fn clean_teardown_emits_no_leak_warning() {
    let (_broker, _registry, source) = setup(pooled());
    source.increase_references();
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    source.release_session(&session);

    let capture = WarnCapture::default();
    assert!(capture.run(|| source.close()).unwrap());
    assert!(!capture.contains("after closing"));
    assert!(source.stats().leaks_at_teardown.unwrap().is_clean());
}

#[test]
fn refused_decrement_is_reported() {
    let (_broker, _registry, source) = setup(singleton());
    let capture = WarnCapture::default();
    capture.run(|| {
        source.connection_closed();
        source.session_closed();
    });

    assert!(capture.contains("open connection count already zero"));
    assert!(capture.contains("open session count already zero"));
    assert_eq!(source.open_connection_count(), 0);
    assert_eq!(source.open_session_count(), 0);
}

#[test]
fn single_reply_queue_is_shared() {
    let (broker, _registry, source) = setup(singleton());
    let s1 = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    let s2 = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    let q1 = source.get_dynamic_reply_queue(&s1).unwrap();
    let q2 = source.get_dynamic_reply_queue(&s2).unwrap();
    assert!(Arc::ptr_eq(&q1, &q2));
    assert_eq!(broker.stats().queues_created, 1);

    // Released only at close
    source.release_dynamic_reply_queue(&q1).unwrap();
    assert_eq!(broker.stats().queues_deleted, 0);
}

#[test]
fn per_call_reply_queues_when_single_disabled() {
    let config = ProcessConfig {
        use_single_dynamic_reply_queue: false,
        ..Default::default()
    };
    let (broker, _registry, source) = setup(config);
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    let q1 = source.get_dynamic_reply_queue(&session).unwrap();
    let q2 = source.get_dynamic_reply_queue(&session).unwrap();
    assert!(!Arc::ptr_eq(&q1, &q2));

    source.release_dynamic_reply_queue(&q1).unwrap();
    source.release_dynamic_reply_queue(&q2).unwrap();
    assert_eq!(broker.stats().queues_deleted, 2);
}

#[test]
fn pooled_mode_never_shares_reply_queue() {
    let config = ProcessConfig {
        connections_are_pooled: true,
        use_single_dynamic_reply_queue: true,
        ..Default::default()
    };
    let (_broker, _registry, source) = setup(config);
    assert!(!source.use_single_dynamic_reply_queue());

    let s1 = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    let s2 = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    let q1 = source.get_dynamic_reply_queue(&s1).unwrap();
    let q2 = source.get_dynamic_reply_queue(&s2).unwrap();
    assert!(!Arc::ptr_eq(&q1, &q2));
    assert!(!source.stats().has_global_reply_queue);
}

#[test]
fn releasing_permanent_queue_is_precondition_error() {
    let config = ProcessConfig {
        use_single_dynamic_reply_queue: false,
        ..Default::default()
    };
    let (_broker, _registry, source) = setup(config);
    let queue: Arc<dyn Destination> = Arc::new(StaticQueue::new("ORDERS"));

    let err = source.release_dynamic_reply_queue(&queue).unwrap_err();
    assert!(matches!(err, SourceError::NotTemporary { ref name } if name == "ORDERS"));
}

#[test]
fn reply_queue_delete_failure_is_swallowed_on_release() {
    let config = ProcessConfig {
        use_single_dynamic_reply_queue: false,
        ..Default::default()
    };
    let (broker, _registry, source) = setup(config);
    let session = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    let queue = source.get_dynamic_reply_queue(&session).unwrap();

    broker.fail_at(FailurePoint::DeleteQueue, true);
    assert!(source.release_dynamic_reply_queue(&queue).is_ok());
}

#[test]
fn credentials_resolved_per_connection() {
    let broker = InMemoryBroker::new("creds");
    let resolver = Arc::new(StaticCredentialResolver::new());
    resolver.set("ops", "alice", "one");
    let options = SourceOptions::new(pooled()).with_credentials(resolver.clone());
    let registry = SourceRegistry::new(options);
    let source = registry.resolve_or_create(
        "Q1",
        None,
        broker.factory(ConnectionFlavor::PointToPoint),
        Some("ops".to_string()),
    );

    let s1 = source.create_session(false, AcknowledgeMode::Auto).unwrap();
    resolver.set("ops", "alice", "two");
    let s2 = source.create_session(false, AcknowledgeMode::Auto).unwrap();

    let seen = broker.credentials_seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0],
        Some(Credentials { username: "alice".to_string(), password: "one".to_string() })
    );
    assert_eq!(seen[1].as_ref().map(|c| c.password.as_str()), Some("two"));

    source.release_session(&s1);
    source.release_session(&s2);
}

#[test]
fn unknown_alias_fails_connection() {
    let broker = InMemoryBroker::new("alias");
    let options = SourceOptions::new(singleton()).with_credentials(Arc::new(StaticCredentialResolver::new()));
    let registry = SourceRegistry::new(options);
    let source = registry.resolve_or_create(
        "Q1",
        None,
        broker.factory(ConnectionFlavor::PointToPoint),
        Some("missing".to_string()),
    );

    let err = source.create_session(false, AcknowledgeMode::Auto).unwrap_err();
    assert!(matches!(err, SourceError::Credentials { .. }));
    assert_eq!(broker.stats().connections_created, 0);

    source.set_auth_alias(None);
    assert!(source.create_session(false, AcknowledgeMode::Auto).is_ok());
    assert_eq!(broker.credentials_seen(), vec![None]);
}

#[test]
fn physical_name_describes_factory() {
    let (_broker, _registry, source) = setup(singleton());
    let name = source.physical_name();
    assert!(name.starts_with("factory ["));
    assert!(name.contains("in-memory broker [unit]"));
}

#[test]
fn stats_snapshot_serializes() {
    let (_broker, _registry, source) = setup(singleton());
    source.increase_references();
    let json = serde_json::to_value(source.stats()).unwrap();
    assert_eq!(json["id"], "Q1");
    assert_eq!(json["references"], 1);
    assert_eq!(json["flavor"], "point_to_point");
    assert_eq!(json["closed"], false);
}
