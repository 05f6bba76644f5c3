//! Entities living inside a router of the worker: transports, producers and consumers.
//!
//! Routers themselves are created and owned by the worker management layer, this crate only
//! needs their identifier and a shared [`ProducerRegistry`](registry::ProducerRegistry) to look up
//! producers across transports of the same router.

pub mod consumer;
pub mod lifecycle;
pub mod pipe_transport;
pub mod producer;
pub mod registry;
pub mod transport;

use crate::uuid_based_wrapper_type;

uuid_based_wrapper_type!(
    /// Router identifier.
    RouterId
);
