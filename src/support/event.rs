//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Polliwog.
//
// Polliwog is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Polliwog is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Polliwog. If not, see <http://www.gnu.org/licenses/>.

//! The mailbox-change notification primitive.
//!
//! Backends set the event whenever a mailbox changes; the connection task
//! waits on it during `IDLE` and clears it before polling. Delivery is
//! at-least-once: a spurious wake-up just results in an empty poll, which is
//! harmless since the diff engine is idempotent given equal snapshots.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// An async event with set/clear/wait semantics.
///
/// Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct Event {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    notify: Notify,
    set: AtomicBool,
}

impl Event {
    pub fn new() -> Self {
        Event::default()
    }

    /// Set the event, waking all current and future waiters.
    pub fn set(&self) {
        self.inner.set.store(true, SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Clear the event.
    pub fn clear(&self) {
        self.inner.set.store(false, SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(SeqCst)
    }

    /// Wait until the event is set.
    ///
    /// Returns immediately if it is already set.
    pub async fn wait(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        loop {
            // Register interest before re-checking the flag so a concurrent
            // set() between the check and the await is not lost.
            notified.as_mut().enable();
            if self.inner.set.load(SeqCst) {
                return;
            }
            notified.as_mut().await;
            notified.set(self.inner.notify.notified());
        }
    }

    /// Wait until the event is set or `timeout` elapses.
    ///
    /// Returns whether the event was set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn set_before_wait_completes_immediately() {
        let event = Event::new();
        event.set();
        event.wait().await;
        assert!(event.is_set());

        event.clear();
        assert!(!event.is_set());
        assert!(!event.wait_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn set_wakes_concurrent_waiter() {
        let event = Event::new();
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move { event.wait().await })
        };

        tokio::task::yield_now().await;
        event.set();
        waiter.await.unwrap();
    }
}
