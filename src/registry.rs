// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Process-wide registry of shared messaging sources.
//!
//! Maps an endpoint id to the [`MessagingSource`] serving it, so independent
//! callers naming the same physical endpoint share one set of connections.
//! Uses DashMap so lookups never wait on a source's internals.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::provider::{ConnectionFactory, DirectoryContext};
use crate::source::{MessagingSource, SourceOptions};

static GLOBAL: OnceLock<Arc<SourceRegistry>> = OnceLock::new();

/// Thread-safe id -> source mapping.
pub struct SourceRegistry {
    sources: DashMap<String, Arc<MessagingSource>>,
    options: SourceOptions,
    /// Serializes resolve-or-create so concurrent first callers share one source
    create_lock: Mutex<()>,
}

impl SourceRegistry {
    pub fn new(options: SourceOptions) -> Arc<Self> {
        Arc::new(Self {
            sources: DashMap::new(),
            options,
            create_lock: Mutex::new(()),
        })
    }

    /// The process-wide registry, using the process-wide configuration.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| Self::new(SourceOptions::default()))
            .clone()
    }

    /// Configuration and credential resolver handed to every source created here.
    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<MessagingSource>> {
        self.sources.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert unconditionally. The last registration for an id wins.
    pub fn register(&self, id: impl Into<String>, source: Arc<MessagingSource>) {
        let id = id.into();
        if self.sources.insert(id.clone(), source).is_some() {
            tracing::debug!(source = %id, "replaced registered source");
        }
    }

    /// Remove the entry for `id`. Removing an absent id is a no-op.
    pub fn unregister(&self, id: &str) -> Option<Arc<MessagingSource>> {
        self.sources.remove(id).map(|(_, source)| source)
    }

    /// Remove `id` only while it still maps to `source`.
    ///
    /// A torn-down source must not evict a newer source registered under the
    /// same id.
    pub(crate) fn unregister_source(&self, id: &str, source: &MessagingSource) -> bool {
        self.sources
            .remove_if(id, |_, registered| std::ptr::eq(Arc::as_ptr(registered), source))
            .is_some()
    }

    /// Return the source registered for `id`, creating and registering one if absent.
    ///
    /// When a source already exists the supplied context and factory are dropped.
    pub fn resolve_or_create(
        self: &Arc<Self>,
        id: &str,
        context: Option<Arc<dyn DirectoryContext>>,
        factory: Arc<dyn ConnectionFactory>,
        auth_alias: Option<String>,
    ) -> Arc<MessagingSource> {
        if let Some(existing) = self.resolve(id) {
            return existing;
        }

        let _guard = self.create_lock.lock();
        if let Some(existing) = self.resolve(id) {
            return existing;
        }
        MessagingSource::new(id, context, factory, Arc::clone(self), auth_alias)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Ids currently registered, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
