// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! `demo` subcommand: concurrent workers sharing one source.
//!
//! Every worker resolves the same endpoint id, takes a reference, runs
//! request/reply cycles and closes its reference. The report shows whether
//! the broker ended with every connection, session and queue released.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::ProcessConfig;
use crate::error::Result;
use crate::provider::memory::{BrokerStats, InMemoryBroker};
use crate::provider::{AcknowledgeMode, ConnectionFlavor};
use crate::registry::SourceRegistry;
use crate::source::SourceOptions;

pub const DEMO_SOURCE_ID: &str = "DEMO";

/// Demo parameters.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub workers: usize,
    pub iterations: usize,
    pub config: ProcessConfig,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            iterations: 10,
            config: ProcessConfig::global().as_ref().clone(),
        }
    }
}

/// Outcome of a demo run.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub workers: usize,
    pub iterations: usize,
    pub connections_are_pooled: bool,
    pub teardowns: usize,
    pub registered_after: usize,
    pub broker: BrokerStats,
    pub leaked_connections: usize,
    pub leaked_sessions: usize,
    pub elapsed_ms: u128,
}

async fn run_worker(
    registry: Arc<SourceRegistry>,
    broker: InMemoryBroker,
    iterations: usize,
) -> Result<bool> {
    let source = registry.resolve_or_create(
        DEMO_SOURCE_ID,
        None,
        broker.factory(ConnectionFlavor::PointToPoint),
        None,
    );
    source.increase_references();

    for _ in 0..iterations {
        let session = source.create_session_async(false, AcknowledgeMode::Auto).await?;
        let queue = source.get_dynamic_reply_queue_async(session.clone()).await?;
        source.release_dynamic_reply_queue_async(queue).await?;
        source.release_session_async(session).await?;
    }

    source.close_async().await
}

/// Run the demo against a fresh in-memory broker.
pub async fn run_demo(options: DemoOptions) -> Result<DemoReport> {
    let broker = InMemoryBroker::new("demo");
    let registry = SourceRegistry::new(SourceOptions::new(options.config.clone()));
    let started = Instant::now();

    // Every worker holds its reference before any worker can close
    let anchor = registry.resolve_or_create(
        DEMO_SOURCE_ID,
        None,
        broker.factory(ConnectionFlavor::PointToPoint),
        None,
    );
    anchor.increase_references();

    let handles: Vec<_> = (0..options.workers)
        .map(|_| tokio::spawn(run_worker(Arc::clone(&registry), broker.clone(), options.iterations)))
        .collect();

    let mut teardowns = 0;
    for handle in handles {
        let closed = handle
            .await
            .map_err(|e| crate::error::SourceError::Worker(e.to_string()))??;
        if closed {
            teardowns += 1;
        }
    }
    if anchor.close_async().await? {
        teardowns += 1;
    }

    let stats = broker.stats();
    tracing::info!(teardowns, ?stats, "demo finished");
    Ok(DemoReport {
        workers: options.workers,
        iterations: options.iterations,
        connections_are_pooled: options.config.connections_are_pooled,
        teardowns,
        registered_after: registry.len(),
        broker: stats,
        leaked_connections: stats.open_connections(),
        leaked_sessions: stats.open_sessions(),
        elapsed_ms: started.elapsed().as_millis(),
    })
}
