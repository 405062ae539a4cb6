//! Duplex coordinator: one send task, one receive task, one join point.
//!
//! Each task ends in a [`PathOutcome`]. The first genuine failure cancels the
//! session-local abort token so the sibling unwinds instead of doing wasted work.
//! `join` waits for both outcomes and folds them into one result:
//!
//! - both completed → `Ok(StreamSummary)`
//! - receive failed → `StreamAborted { direction: Receive, .. }`, send failure attached as secondary
//! - send failed    → `StreamAborted { direction: Send, message: Some(n), .. }`
//! - session context ended → `DeadlineExceeded` / `Canceled`, even when the
//!   transport reported the failure before the task saw the context end

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::{CallContext, DoneReason, MethodId};
use crate::error::{CallError, Code, Direction, TransportError};
use crate::stream::session::{FinishHook, StreamSession, StreamSummary};
use crate::transport::{Payload, StreamReceiver, StreamSender};

/// Terminal state of one direction.
#[derive(Debug)]
enum PathOutcome {
    /// Direction finished normally after handling this many messages.
    Completed(u64),
    /// Direction hit an error; `message` is the 1-based outbound index for send failures.
    Failed {
        error: CallError,
        message: Option<u64>,
    },
    /// Session context was cancelled or timed out.
    Interrupted(DoneReason),
    /// Unwound because the sibling direction failed or the caller aborted.
    Stopped,
}

/// Starts the two tasks of a stream session.
pub struct DuplexCoordinator;

impl DuplexCoordinator {
    /// Take ownership of `session` and start sending `outbound` while receiving replies.
    ///
    /// Received messages are buffered in a channel of `buffer` slots.
    pub fn start(
        session: StreamSession,
        outbound: BoxStream<'static, Payload>,
        buffer: usize,
    ) -> DuplexCall {
        let (ctx, method, stream, hooks) = session.into_parts();
        let abort = CancellationToken::new();
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let send_task = tokio::spawn(send_path(
            stream.sender,
            outbound,
            ctx.clone(),
            abort.clone(),
        ));
        let recv_task = tokio::spawn(receive_path(
            stream.receiver,
            tx,
            ctx,
            abort.clone(),
        ));

        tracing::debug!(method = %method, "stream session started");

        DuplexCall {
            method,
            messages: rx,
            send_task: Some(send_task),
            recv_task: Some(recv_task),
            hooks,
            abort,
            started: Instant::now(),
        }
    }
}

/// Caller's handle on a running stream session.
///
/// Read replies with [`next`](Self::next) or [`messages`](Self::messages), then
/// [`join`](Self::join) for the combined outcome. Dropping the handle aborts both tasks.
pub struct DuplexCall {
    method: MethodId,
    messages: mpsc::Receiver<Payload>,
    send_task: Option<JoinHandle<PathOutcome>>,
    recv_task: Option<JoinHandle<PathOutcome>>,
    hooks: Vec<FinishHook>,
    abort: CancellationToken,
    started: Instant,
}

impl DuplexCall {
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// Next received message, `None` once the receive path has ended.
    pub async fn next(&mut self) -> Option<Payload> {
        self.messages.recv().await
    }

    /// Received messages as a finite stream.
    pub fn messages(&mut self) -> impl Stream<Item = Payload> + '_ {
        futures::stream::poll_fn(move |cx| self.messages.poll_recv(cx))
    }

    /// Abort both directions. `join` then reports `Canceled`.
    pub fn cancel(&self) {
        self.abort.cancel();
    }

    /// Wait for both directions and return the combined outcome.
    ///
    /// Messages not yet read are discarded.
    pub async fn join(mut self) -> Result<StreamSummary, CallError> {
        self.messages.close();
        let send = wait_path(self.send_task.take(), Direction::Send).await;
        let recv = wait_path(self.recv_task.take(), Direction::Receive).await;
        let result = combine(send, recv);

        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match &result {
            Ok(summary) => tracing::debug!(
                method = %self.method,
                sent = summary.sent,
                received = summary.received,
                elapsed_ms,
                "stream session completed"
            ),
            Err(e) => tracing::debug!(
                method = %self.method,
                error = %e,
                elapsed_ms,
                "stream session failed"
            ),
        }

        for hook in std::mem::take(&mut self.hooks) {
            hook(&result);
        }
        result
    }

    /// Read every reply, then join.
    pub async fn collect(mut self) -> Result<Vec<Payload>, CallError> {
        let mut replies = Vec::new();
        while let Some(message) = self.next().await {
            replies.push(message);
        }
        self.join().await?;
        Ok(replies)
    }
}

impl Drop for DuplexCall {
    fn drop(&mut self) {
        self.abort.cancel();
    }
}

impl std::fmt::Debug for DuplexCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexCall")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

async fn send_path(
    mut sender: Box<dyn StreamSender>,
    mut outbound: BoxStream<'static, Payload>,
    ctx: CallContext,
    abort: CancellationToken,
) -> PathOutcome {
    let mut sent = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            reason = ctx.done() => return PathOutcome::Interrupted(reason),
            _ = abort.cancelled() => return PathOutcome::Stopped,
            next = outbound.next() => next,
        };
        let Some(message) = next else { break };

        let index = sent + 1;
        let res = tokio::select! {
            biased;
            reason = ctx.done() => return PathOutcome::Interrupted(reason),
            _ = abort.cancelled() => return PathOutcome::Stopped,
            res = sender.send(message) => res,
        };
        if let Err(e) = res {
            if let Some(reason) = ctx.err() {
                return PathOutcome::Interrupted(reason);
            }
            tracing::warn!(message = index, error = %e, "stream send failed");
            abort.cancel();
            return PathOutcome::Failed {
                error: e.into(),
                message: Some(index),
            };
        }
        sent = index;
    }

    let res = tokio::select! {
        biased;
        reason = ctx.done() => return PathOutcome::Interrupted(reason),
        _ = abort.cancelled() => return PathOutcome::Stopped,
        res = sender.close_send() => res,
    };
    match res {
        Ok(()) => PathOutcome::Completed(sent),
        Err(e) => {
            tracing::warn!(error = %e, "stream close-send failed");
            abort.cancel();
            PathOutcome::Failed {
                error: e.into(),
                message: None,
            }
        }
    }
}

async fn receive_path(
    mut receiver: Box<dyn StreamReceiver>,
    replies: mpsc::Sender<Payload>,
    ctx: CallContext,
    abort: CancellationToken,
) -> PathOutcome {
    let mut received = 0u64;
    // Turned off once the caller stops listening; we keep draining to observe the outcome.
    let mut forward = true;
    loop {
        let next = tokio::select! {
            biased;
            reason = ctx.done() => return PathOutcome::Interrupted(reason),
            _ = abort.cancelled() => return PathOutcome::Stopped,
            next = receiver.recv() => next,
        };
        match next {
            Ok(Some(message)) => {
                received += 1;
                if forward {
                    let delivered = tokio::select! {
                        biased;
                        reason = ctx.done() => return PathOutcome::Interrupted(reason),
                        _ = abort.cancelled() => return PathOutcome::Stopped,
                        res = replies.send(message) => res.is_ok(),
                    };
                    forward = delivered;
                }
            }
            Ok(None) => return PathOutcome::Completed(received),
            Err(e) => {
                if let Some(reason) = ctx.err() {
                    return PathOutcome::Interrupted(reason);
                }
                tracing::warn!(received, error = %e, "stream receive failed");
                abort.cancel();
                return PathOutcome::Failed {
                    error: e.into(),
                    message: None,
                };
            }
        }
    }
}

async fn wait_path(task: Option<JoinHandle<PathOutcome>>, direction: Direction) -> PathOutcome {
    let Some(task) = task else {
        return PathOutcome::Stopped;
    };
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => PathOutcome::Failed {
            error: TransportError::new(Code::Internal, format!("{direction} task failed: {e}"))
                .into(),
            message: None,
        },
    }
}

fn combine(send: PathOutcome, recv: PathOutcome) -> Result<StreamSummary, CallError> {
    match (send, recv) {
        (PathOutcome::Completed(sent), PathOutcome::Completed(received)) => {
            Ok(StreamSummary { sent, received })
        }
        (send, PathOutcome::Failed { error, .. }) => Err(CallError::StreamAborted {
            direction: Direction::Receive,
            message: None,
            cause: Box::new(error),
            secondary: match send {
                PathOutcome::Failed { error, .. } => Some(Box::new(error)),
                _ => None,
            },
        }),
        (PathOutcome::Failed { error, message }, _) => Err(CallError::StreamAborted {
            direction: Direction::Send,
            message,
            cause: Box::new(error),
            secondary: None,
        }),
        (PathOutcome::Interrupted(reason), _) | (_, PathOutcome::Interrupted(reason)) => {
            Err(reason.into())
        }
        _ => Err(CallError::Canceled),
    }
}
