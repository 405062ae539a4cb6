//! callguard-core — client-side resilience for remote procedure calls.
//!
//! # Overview
//!
//! A [`Client`] wraps any [`Transport`] in an ordered chain of interceptors
//! and, optionally, a circuit breaker. The core crate defines:
//!
//! - [`Transport`] — the async trait every transport implements
//! - [`CallContext`] — per-call deadline, cancellation and metadata
//! - [`interceptor`] module — logging, credential and timeout interceptors
//! - [`policy`] module — the circuit breaker
//! - [`stream`] module — duplex stream coordination
//! - [`CallError`] — structured error type

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod policy;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, InterceptorKind};
pub use context::{CallContext, DoneReason, Metadata, MethodId};
pub use error::{CallError, Code, Direction, TransportError};
pub use interceptor::{Interceptor, InterceptorChain};
pub use policy::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use stream::{DuplexCall, StreamSession, StreamSummary};
pub use transport::{Payload, StreamReceiver, StreamSender, Transport, TransportStream};
