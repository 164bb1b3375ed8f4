// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cancelable handle for live snapshot subscriptions.

use std::future::Future;
use tokio::task::JoinHandle;

/// A running subscription. Each delivery is a full snapshot of the current
/// state, never a delta.
///
/// Cancelling is idempotent and also happens on drop, so every exit path
/// (explicit stop, error, teardown) releases the listener.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Run `feed` as the subscription's delivery loop.
    pub fn spawn<F>(feed: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(feed)),
        }
    }

    /// Stop delivering snapshots. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
