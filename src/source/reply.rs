// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Dynamic (temporary) reply queues for request/reply exchanges.

use std::sync::Arc;

use super::manager::MessagingSource;
use super::sessions::SessionHandle;
use crate::error::{Result, SourceError};
use crate::provider::Destination;

impl MessagingSource {
    /// A temporary queue to receive replies on.
    ///
    /// With a shared connection and single-queue mode the first caller creates
    /// the queue and every later caller gets the same one. Otherwise each call
    /// creates a fresh queue on the caller's session.
    pub fn get_dynamic_reply_queue(&self, handle: &SessionHandle) -> Result<Arc<dyn Destination>> {
        self.ensure_open()?;
        if !self.use_single_dynamic_reply_queue() {
            return self.create_temporary_queue(handle);
        }

        let existing = self.global_reply_queue.read().clone();
        if let Some(queue) = existing {
            // Teardown marks the source closed before deleting the queue
            self.ensure_open()?;
            return Ok(queue);
        }

        let _guard = self.init_lock.lock();
        self.ensure_open()?;
        let existing = self.global_reply_queue.read().clone();
        if let Some(queue) = existing {
            return Ok(queue);
        }
        let queue = self.create_temporary_queue(handle)?;
        tracing::info!(source = %self.id, queue = %queue.name(), "created dynamic reply queue");
        *self.global_reply_queue.write() = Some(Arc::clone(&queue));
        Ok(queue)
    }

    /// Give back a queue from [`get_dynamic_reply_queue`](Self::get_dynamic_reply_queue).
    ///
    /// The shared queue lives until the source closes, so this is a no-op in
    /// single-queue mode. Otherwise the queue is deleted; broker failures are
    /// logged, but a queue that is not temporary is an error.
    pub fn release_dynamic_reply_queue(&self, queue: &Arc<dyn Destination>) -> Result<()> {
        if self.use_single_dynamic_reply_queue() {
            return Ok(());
        }
        match self.delete_temporary_queue(queue) {
            Err(SourceError::Provider { source, .. }) => {
                tracing::error!(source = %self.id, queue = %queue.name(), error = %source, "exception deleting dynamic reply queue");
                Ok(())
            }
            other => other,
        }
    }

    fn create_temporary_queue(&self, handle: &SessionHandle) -> Result<Arc<dyn Destination>> {
        handle.session().create_temporary_queue().map_err(|e| {
            if self.is_closed() {
                SourceError::Closed { id: self.id.clone() }
            } else {
                SourceError::provider(&self.id, "could not create temporary queue", e)
            }
        })
    }

    pub(super) fn delete_temporary_queue(&self, queue: &Arc<dyn Destination>) -> Result<()> {
        if !queue.is_temporary() {
            return Err(SourceError::NotTemporary { name: queue.name() });
        }
        queue
            .delete()
            .map_err(|e| SourceError::provider(&self.id, "cannot delete temporary queue", e))
    }
}
