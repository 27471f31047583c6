// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Shared messaging sources.
//!
//! A [`MessagingSource`] owns the connections for one endpoint and hands out
//! sessions and temporary reply queues to any number of concurrent callers.

mod async_ops;
mod manager;
mod reply;
mod sessions;

pub use manager::{LeakReport, MessagingSource, SourceOptions, SourceStats};
pub use sessions::{SessionHandle, SessionId};
