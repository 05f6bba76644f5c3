//! Control plane client for pipe transports of a media routing worker.
//!
//! The worker runs as a separate process and owns all media state. This crate mirrors the
//! entities created in it (transports, producers, consumers) as local handles and keeps them in
//! sync by exchanging JSON requests, responses and notifications over a [`worker::Channel`].
//!
//! The central operation is [`Transport::consume`](transport::Transport::consume) on a
//! [`PipeTransport`](pipe_transport::PipeTransport): it derives consumer RTP parameters from the
//! producer, asks the worker to create the consumer and registers the resulting
//! [`Consumer`](consumer::Consumer) so that it is removed again no matter how it gets closed.
//!
//! All I/O is asynchronous and runtime agnostic, entities spawn their fire-and-forget close
//! requests on an [`async_executor::Executor`] supplied at construction.

#![warn(rust_2018_idioms, missing_debug_implementations, missing_docs)]

pub mod data_structures;
mod macros;
mod messages;
pub mod ortc;
pub mod prelude;
pub mod router;
pub mod rtp_parameters;
pub mod worker;

pub use router::{consumer, pipe_transport, producer, transport};
