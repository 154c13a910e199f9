//! Test dispatchers: `EventDispatcher` implementations for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tasktrail_core::error::DomainError;
use tasktrail_core::event::{EventDispatcher, PendingEvent};

/// A dispatcher that records every event it is given.
#[derive(Debug, Default)]
pub struct RecordingEventDispatcher {
    events: Mutex<Vec<PendingEvent>>,
}

impl RecordingEventDispatcher {
    /// Returns a snapshot of all dispatched events, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<PendingEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventDispatcher for RecordingEventDispatcher {
    async fn dispatch(&self, event: &PendingEvent) -> Result<(), DomainError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A dispatcher that always returns an infrastructure error and counts
/// attempts. Useful for testing that dispatch failures are retried and never
/// fail a commit.
#[derive(Debug, Default)]
pub struct FailingEventDispatcher {
    attempts: AtomicUsize,
}

impl FailingEventDispatcher {
    /// Number of dispatch attempts so far, including retries.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventDispatcher for FailingEventDispatcher {
    async fn dispatch(&self, _event: &PendingEvent) -> Result<(), DomainError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DomainError::Infrastructure("broker unavailable".into()))
    }
}
