//! Close state machine shared by producers and consumers.
//!
//! An entity is `Active` until the first close trigger arrives. Whoever moves it to `Closing` runs
//! the transition actions (trigger specific event, `close` event, worker request if any) and then
//! marks it `Closed`. Any later trigger finds the entity no longer `Active` and does nothing, so
//! each event fires at most once no matter how many triggers race.


use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of an entity.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EntityState {
    /// Entity is usable.
    Active,
    /// Close transition is in progress.
    Closing,
    /// Entity is closed for good.
    Closed,
}

/// What caused an entity to close.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CloseTrigger {
    /// Explicit close by the application (or last handle dropped). The worker is told about it.
    LocalClose,
    /// The producer a consumer is bound to was closed. The worker already closed the consumer.
    ProducerClosed,
    /// The owning transport was closed. The worker already closed the entity.
    TransportClosed,
}

impl CloseTrigger {
    /// Whether the worker needs to be asked to close the entity.
    #[must_use]
    pub fn needs_close_request(self) -> bool {
        matches!(self, CloseTrigger::LocalClose)
    }
}

const ACTIVE: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.state(), f)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
        }
    }
}

impl Lifecycle {
    pub(crate) fn state(&self) -> EntityState {
        match self.state.load(Ordering::SeqCst) {
            ACTIVE => EntityState::Active,
            CLOSING => EntityState::Closing,
            _ => EntityState::Closed,
        }
    }

    /// `true` once closing has started.
    pub(crate) fn closed(&self) -> bool {
        self.state() != EntityState::Active
    }

    /// Start closing. Returns a guard for the caller that won the transition, the guard marks the
    /// entity `Closed` when dropped.
    pub(crate) fn begin_close(&self) -> Option<ClosingGuard<'_>> {
        self.state
            .compare_exchange(ACTIVE, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ClosingGuard { lifecycle: self })
    }
}

pub(crate) struct ClosingGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.state.store(CLOSED, Ordering::SeqCst);
    }
}
