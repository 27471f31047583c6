// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Thread-safe diagnostic tally.
//!
//! Used for open-connection and open-session counts. The value never drops
//! below zero: a decrement at zero is refused and reported to the caller.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic increment/decrement cell with a zero floor.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial.max(0)),
        }
    }

    /// Increment and return the new value.
    pub fn increase(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement and return the new value, or `None` if already at zero.
    pub fn decrease(&self) -> Option<i64> {
        loop {
            let current = self.value.load(Ordering::Relaxed);
            if current <= 0 {
                return None;
            }

            // CAS so a racing decrement cannot take the value negative
            if self
                .value
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}
