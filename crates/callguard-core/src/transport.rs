//! The `Transport` trait — the remote call capability the client wraps.

use async_trait::async_trait;

use crate::context::{CallContext, MethodId};
use crate::error::TransportError;

/// Opaque message exchanged with the remote side. The core never inspects it.
pub type Payload = serde_json::Value;

/// Outbound half of an open stream.
#[async_trait]
pub trait StreamSender: Send + 'static {
    /// Send one message. Messages reach the remote in call order.
    async fn send(&mut self, message: Payload) -> Result<(), TransportError>;

    /// Signal that no further messages will be sent.
    async fn close_send(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of an open stream.
#[async_trait]
pub trait StreamReceiver: Send + 'static {
    /// Receive the next message. `Ok(None)` marks the end of the stream.
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError>;
}

/// A freshly opened transport stream, already split into its two halves.
pub struct TransportStream {
    pub sender: Box<dyn StreamSender>,
    pub receiver: Box<dyn StreamReceiver>,
}

impl TransportStream {
    pub fn new(sender: impl StreamSender, receiver: impl StreamReceiver) -> Self {
        Self {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
        }
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStream").finish_non_exhaustive()
    }
}

/// The remote call capability every transport implements.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform a single request/response call.
    async fn invoke_unary(
        &self,
        ctx: &CallContext,
        method: &MethodId,
        request: Payload,
    ) -> Result<Payload, TransportError>;

    /// Open a stream for `method`. The context bounds the whole session.
    async fn open_stream(
        &self,
        ctx: &CallContext,
        method: &MethodId,
    ) -> Result<TransportStream, TransportError>;

    /// Return the transport's identifier (endpoint or name).
    fn name(&self) -> &str;
}
