//! callguard-sim — an in-process resiliency service for exercising clients.
//!
//! [`SimTransport`] implements [`callguard_core::Transport`] and answers each
//! request after a random delay with a random status code, both drawn from
//! the request itself. It covers every call shape: unary, server streaming,
//! client streaming and bidirectional.
//!
//! # Quick start
//! ```rust,no_run
//! use std::sync::Arc;
//! use callguard_core::{CallContext, Client};
//! use callguard_sim::{request::ResiliencyRequest, service::UNARY, SimTransport};
//!
//! # async fn run() -> Result<(), callguard_core::CallError> {
//! let client = Client::builder(Arc::new(SimTransport::new())).build();
//! let req = ResiliencyRequest::new(0, 1, vec![0, 2]);
//! let _reply = client.invoke(CallContext::new(), UNARY, req.to_payload()).await?;
//! # Ok(())
//! # }
//! ```

pub mod request;
pub mod service;

pub use request::{ResiliencyRequest, ResiliencyResponse};
pub use service::{SimTransport, SimTransportBuilder};
