//! An opened stream, before the coordinator takes ownership of it.

use crate::context::{CallContext, MethodId};
use crate::error::CallError;
use crate::transport::TransportStream;

/// Message counts of a completed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub sent: u64,
    pub received: u64,
}

/// Callback run exactly once with the combined outcome when the session is joined.
pub type FinishHook = Box<dyn FnOnce(&Result<StreamSummary, CallError>) + Send + 'static>;

/// One open stream together with the context it was opened under.
///
/// Interceptors receive the session on its way back from the transport and may
/// register finish hooks to observe the outcome. Hooks run in registration
/// order, innermost interceptor first. Dropping a session without starting it
/// drops its hooks unrun.
pub struct StreamSession {
    ctx: CallContext,
    method: MethodId,
    stream: TransportStream,
    hooks: Vec<FinishHook>,
}

impl StreamSession {
    pub fn new(ctx: CallContext, method: MethodId, stream: TransportStream) -> Self {
        Self {
            ctx,
            method,
            stream,
            hooks: Vec::new(),
        }
    }

    /// The effective context: deadline and metadata after every interceptor ran.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    pub fn method(&self) -> &MethodId {
        &self.method
    }

    pub fn on_finish<F>(&mut self, hook: F)
    where
        F: FnOnce(&Result<StreamSummary, CallError>) + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    pub(crate) fn into_parts(self) -> (CallContext, MethodId, TransportStream, Vec<FinishHook>) {
        (self.ctx, self.method, self.stream, self.hooks)
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("method", &self.method)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
