// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Async wrappers that run blocking broker calls on tokio's blocking pool.

use std::sync::Arc;

use super::manager::MessagingSource;
use super::sessions::SessionHandle;
use crate::error::{Result, SourceError};
use crate::provider::{AcknowledgeMode, Destination};

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SourceError::Worker(e.to_string()))?
}

impl MessagingSource {
    pub async fn create_session_async(
        self: &Arc<Self>,
        transacted: bool,
        ack_mode: AcknowledgeMode,
    ) -> Result<SessionHandle> {
        let source = Arc::clone(self);
        run_blocking(move || source.create_session(transacted, ack_mode)).await
    }

    pub async fn release_session_async(self: &Arc<Self>, handle: SessionHandle) -> Result<()> {
        let source = Arc::clone(self);
        run_blocking(move || {
            source.release_session(&handle);
            Ok(())
        })
        .await
    }

    pub async fn get_dynamic_reply_queue_async(
        self: &Arc<Self>,
        handle: SessionHandle,
    ) -> Result<Arc<dyn Destination>> {
        let source = Arc::clone(self);
        run_blocking(move || source.get_dynamic_reply_queue(&handle)).await
    }

    pub async fn release_dynamic_reply_queue_async(
        self: &Arc<Self>,
        queue: Arc<dyn Destination>,
    ) -> Result<()> {
        let source = Arc::clone(self);
        run_blocking(move || source.release_dynamic_reply_queue(&queue)).await
    }

    pub async fn close_async(self: &Arc<Self>) -> Result<bool> {
        let source = Arc::clone(self);
        run_blocking(move || source.close()).await
    }
}
