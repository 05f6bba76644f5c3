//! Connection to the worker process.
//!
//! The worker itself (spawning, supervision, native media engine) lives outside of this crate.
//! Whoever starts it hands an ordered byte stream to [`Channel::new`], everything else in the crate
//! talks to the worker through the resulting [`Channel`].

mod channel;
mod common;

pub use channel::{Channel, RequestError};
pub(crate) use common::SubscriptionHandler;
pub use common::SubscriptionTarget;
use std::time::Duration;

/// Settings of the [`Channel`] to the worker.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ChannelSettings {
    /// Base time to wait for a response before failing a request with
    /// [`RequestError::TimedOut`].
    ///
    /// Default 15 seconds.
    pub request_timeout: Duration,
    /// Extra time added to `request_timeout` for every request still waiting for its response at
    /// the moment a new request is sent.
    ///
    /// Default 100 milliseconds.
    pub request_timeout_per_pending: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            request_timeout_per_pending: Duration::from_millis(100),
        }
    }
}

impl ChannelSettings {
    /// Timeout of a request sent while `pending` other requests are waiting for responses.
    #[must_use]
    pub fn timeout_for(&self, pending: usize) -> Duration {
        let pending = u32::try_from(pending).unwrap_or(u32::MAX);
        self.request_timeout
            .saturating_add(self.request_timeout_per_pending.saturating_mul(pending))
    }
}
