//! In-process resiliency service implementing [`Transport`].
//!
//! Every reply is produced the same way: wait a random number of delay units
//! drawn from the request's range, then pick a status code from its list.
//! `OK` yields a `{ "dummy_string": .. }` reply, any other code fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use callguard_core::context::DoneReason;
use callguard_core::{
    CallContext, Code, MethodId, Payload, StreamReceiver, StreamSender, Transport,
    TransportError, TransportStream,
};

use crate::request::{ResiliencyRequest, OK};

pub const UNARY: &str = "/resiliency.ResiliencyService/UnaryResiliency";
pub const SERVER_STREAMING: &str = "/resiliency.ResiliencyService/ServerStreamingResiliency";
pub const CLIENT_STREAMING: &str = "/resiliency.ResiliencyService/ClientStreamingResiliency";
pub const BIDI_STREAMING: &str = "/resiliency.ResiliencyService/BiDirectionalResiliency";

/// Shape of a streaming method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    /// One request, several replies.
    Server,
    /// Many requests, one reply after the client closes.
    Client,
    /// One reply per request.
    Bidi,
}

impl StreamKind {
    fn of(method: &MethodId) -> Option<Self> {
        match method.as_str() {
            SERVER_STREAMING => Some(Self::Server),
            CLIENT_STREAMING => Some(Self::Client),
            BIDI_STREAMING => Some(Self::Bidi),
            _ => None,
        }
    }
}

/// Fault-injecting stand-in for a remote resiliency service.
pub struct SimTransport {
    inner: Arc<Inner>,
}

struct Inner {
    rng: Mutex<fastrand::Rng>,
    delay_unit: Duration,
    server_replies: u32,
    required_authorization: Option<String>,
    fail_send_at: Option<u64>,
    unary_calls: AtomicU64,
    stream_opens: AtomicU64,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SimTransportBuilder {
        SimTransportBuilder {
            seed: None,
            delay_unit: Duration::from_secs(1),
            server_replies: 3,
            required_authorization: None,
            fail_send_at: None,
        }
    }

    /// Unary invocations that reached the service.
    pub fn unary_calls(&self) -> u64 {
        self.inner.unary_calls.load(Ordering::SeqCst)
    }

    /// Stream opens that reached the service.
    pub fn stream_opens(&self) -> u64 {
        self.inner.stream_opens.load(Ordering::SeqCst)
    }

    fn check_authorization(&self, ctx: &CallContext) -> Result<(), TransportError> {
        let Some(expected) = &self.inner.required_authorization else {
            return Ok(());
        };
        match ctx.metadata().get("authorization") {
            Some(value) if value == expected.as_str() => Ok(()),
            Some(_) => Err(TransportError::new(
                Code::Unauthenticated,
                "invalid credentials",
            )),
            None => Err(TransportError::new(
                Code::Unauthenticated,
                "missing authorization metadata",
            )),
        }
    }
}

impl std::fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTransport")
            .field("delay_unit", &self.inner.delay_unit)
            .field("unary_calls", &self.unary_calls())
            .field("stream_opens", &self.stream_opens())
            .finish()
    }
}

pub struct SimTransportBuilder {
    seed: Option<u64>,
    delay_unit: Duration,
    server_replies: u32,
    required_authorization: Option<String>,
    fail_send_at: Option<u64>,
}

impl SimTransportBuilder {
    /// Make delays and status codes reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Length of one delay unit. Defaults to one second.
    pub fn delay_unit(mut self, unit: Duration) -> Self {
        self.delay_unit = unit;
        self
    }

    /// Replies per request on the server-streaming method.
    pub fn server_replies(mut self, n: u32) -> Self {
        self.server_replies = n;
        self
    }

    /// Reject calls whose `authorization` metadata differs from `value`.
    pub fn require_authorization(mut self, value: impl Into<String>) -> Self {
        self.required_authorization = Some(value.into());
        self
    }

    /// Break the stream when the client sends its `n`-th message (1-based).
    pub fn fail_send_at(mut self, n: u64) -> Self {
        self.fail_send_at = Some(n);
        self
    }

    pub fn build(self) -> SimTransport {
        let rng = match self.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        SimTransport {
            inner: Arc::new(Inner {
                rng: Mutex::new(rng),
                delay_unit: self.delay_unit,
                server_replies: self.server_replies,
                required_authorization: self.required_authorization,
                fail_send_at: self.fail_send_at,
                unary_calls: AtomicU64::new(0),
                stream_opens: AtomicU64::new(0),
            }),
        }
    }
}

impl Inner {
    /// Draw the delay and status code for one reply.
    fn draw(&self, request: &ResiliencyRequest) -> (Duration, u32) {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let units = rng.i32(request.min_delay_second..=request.max_delay_second);
        let code = if request.status_codes.is_empty() {
            OK
        } else {
            request.status_codes[rng.usize(..request.status_codes.len())]
        };
        let delay = self.delay_unit.saturating_mul(units.max(0) as u32);
        (delay, code)
    }

    fn dummy_string(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        std::iter::repeat_with(|| rng.alphanumeric()).take(12).collect()
    }

    /// Produce one reply for `request`, honouring the call context.
    async fn respond(
        &self,
        ctx: &CallContext,
        request: &ResiliencyRequest,
    ) -> Result<Payload, TransportError> {
        let (delay, code) = self.draw(request);
        tokio::select! {
            biased;
            reason = ctx.done() => return Err(done_error(reason)),
            _ = tokio::time::sleep(delay) => {}
        }
        if code == OK {
            Ok(json!({ "dummy_string": self.dummy_string() }))
        } else {
            Err(TransportError::new(
                Code::from_u32(code),
                format!("simulated status {code}"),
            ))
        }
    }
}

fn done_error(reason: DoneReason) -> TransportError {
    match reason {
        DoneReason::Canceled => TransportError::new(Code::Canceled, "context canceled"),
        DoneReason::DeadlineExceeded => {
            TransportError::new(Code::DeadlineExceeded, "context deadline exceeded")
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn invoke_unary(
        &self,
        ctx: &CallContext,
        method: &MethodId,
        request: Payload,
    ) -> Result<Payload, TransportError> {
        self.inner.unary_calls.fetch_add(1, Ordering::SeqCst);
        self.check_authorization(ctx)?;
        if method.as_str() != UNARY {
            return Err(TransportError::new(
                Code::Unimplemented,
                format!("unknown unary method {method}"),
            ));
        }
        let request = ResiliencyRequest::from_payload(&request)?;
        self.inner.respond(ctx, &request).await
    }

    async fn open_stream(
        &self,
        ctx: &CallContext,
        method: &MethodId,
    ) -> Result<TransportStream, TransportError> {
        self.inner.stream_opens.fetch_add(1, Ordering::SeqCst);
        self.check_authorization(ctx)?;
        let kind = StreamKind::of(method).ok_or_else(|| {
            TransportError::new(
                Code::Unimplemented,
                format!("unknown streaming method {method}"),
            )
        })?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(
            kind,
            self.inner.clone(),
            ctx.clone(),
            request_rx,
            reply_tx,
        ));

        tracing::debug!(method = %method, ?kind, "sim stream opened");
        Ok(TransportStream::new(
            SimSender {
                requests: Some(request_tx),
                sent: 0,
                fail_at: self.inner.fail_send_at,
            },
            SimReceiver { replies: reply_rx },
        ))
    }

    fn name(&self) -> &str {
        "sim"
    }
}

type Reply = Result<Payload, TransportError>;

/// Server side of one stream. Dropping `replies` ends the client's receive path.
async fn serve(
    kind: StreamKind,
    inner: Arc<Inner>,
    ctx: CallContext,
    mut requests: mpsc::UnboundedReceiver<Payload>,
    replies: mpsc::UnboundedSender<Reply>,
) {
    let result = match kind {
        StreamKind::Server => serve_server(&inner, &ctx, &mut requests, &replies).await,
        StreamKind::Client => serve_client(&inner, &ctx, &mut requests, &replies).await,
        StreamKind::Bidi => serve_bidi(&inner, &ctx, &mut requests, &replies).await,
    };
    if let Err(e) = result {
        tracing::debug!(?kind, error = %e, "sim stream ended with error");
        let _ = replies.send(Err(e));
    }
}

async fn next_request(
    ctx: &CallContext,
    requests: &mut mpsc::UnboundedReceiver<Payload>,
) -> Result<Option<ResiliencyRequest>, TransportError> {
    let next = tokio::select! {
        biased;
        reason = ctx.done() => return Err(done_error(reason)),
        next = requests.recv() => next,
    };
    next.map(|p| ResiliencyRequest::from_payload(&p)).transpose()
}

async fn serve_server(
    inner: &Inner,
    ctx: &CallContext,
    requests: &mut mpsc::UnboundedReceiver<Payload>,
    replies: &mpsc::UnboundedSender<Reply>,
) -> Result<(), TransportError> {
    let request = next_request(ctx, requests).await?.ok_or_else(|| {
        TransportError::new(Code::InvalidArgument, "server stream needs one request")
    })?;
    for _ in 0..inner.server_replies {
        let reply = inner.respond(ctx, &request).await?;
        if replies.send(Ok(reply)).is_err() {
            break;
        }
    }
    Ok(())
}

async fn serve_client(
    inner: &Inner,
    ctx: &CallContext,
    requests: &mut mpsc::UnboundedReceiver<Payload>,
    replies: &mpsc::UnboundedSender<Reply>,
) -> Result<(), TransportError> {
    let mut last = None;
    let mut count = 0u64;
    while let Some(request) = next_request(ctx, requests).await? {
        count += 1;
        last = Some(request);
    }
    let request = last.ok_or_else(|| {
        TransportError::new(Code::InvalidArgument, "client stream closed without requests")
    })?;
    tracing::trace!(count, "sim client stream drained");
    let reply = inner.respond(ctx, &request).await?;
    let _ = replies.send(Ok(reply));
    Ok(())
}

async fn serve_bidi(
    inner: &Inner,
    ctx: &CallContext,
    requests: &mut mpsc::UnboundedReceiver<Payload>,
    replies: &mpsc::UnboundedSender<Reply>,
) -> Result<(), TransportError> {
    while let Some(request) = next_request(ctx, requests).await? {
        let reply = inner.respond(ctx, &request).await?;
        if replies.send(Ok(reply)).is_err() {
            break;
        }
    }
    Ok(())
}

struct SimSender {
    requests: Option<mpsc::UnboundedSender<Payload>>,
    sent: u64,
    fail_at: Option<u64>,
}

#[async_trait]
impl StreamSender for SimSender {
    async fn send(&mut self, message: Payload) -> Result<(), TransportError> {
        let index = self.sent + 1;
        if self.fail_at == Some(index) {
            self.requests = None;
            return Err(TransportError::new(
                Code::Unavailable,
                format!("connection reset at message {index}"),
            ));
        }
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| TransportError::new(Code::FailedPrecondition, "send after close"))?;
        requests
            .send(message)
            .map_err(|_| TransportError::new(Code::Unavailable, "stream closed by server"))?;
        self.sent = index;
        Ok(())
    }

    async fn close_send(&mut self) -> Result<(), TransportError> {
        self.requests = None;
        Ok(())
    }
}

struct SimReceiver {
    replies: mpsc::UnboundedReceiver<Reply>,
}

#[async_trait]
impl StreamReceiver for SimReceiver {
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError> {
        self.replies.recv().await.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::request::UNKNOWN;

    fn sim() -> SimTransport {
        SimTransport::builder().seed(7).build()
    }

    #[tokio::test(start_paused = true)]
    async fn unary_ok_replies_with_dummy_string() {
        let sim = sim();
        let reply = sim
            .invoke_unary(
                &CallContext::new(),
                &UNARY.into(),
                ResiliencyRequest::immediate(vec![OK]).to_payload(),
            )
            .await
            .unwrap();
        assert_eq!(reply["dummy_string"].as_str().map(str::len), Some(12));
        assert_eq!(sim.unary_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unary_failure_uses_requested_code() {
        let err = sim()
            .invoke_unary(
                &CallContext::new(),
                &UNARY.into(),
                ResiliencyRequest::immediate(vec![UNKNOWN]).to_payload(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn unary_waits_for_delay() {
        let start = tokio::time::Instant::now();
        sim()
            .invoke_unary(
                &CallContext::new(),
                &UNARY.into(),
                ResiliencyRequest::new(3, 3, vec![OK]).to_payload(),
            )
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn unary_honours_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
        let err = sim()
            .invoke_unary(
                &ctx,
                &UNARY.into(),
                ResiliencyRequest::new(5, 5, vec![OK]).to_payload(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn requires_authorization_when_configured() {
        let sim = SimTransport::builder()
            .require_authorization("Basic abc")
            .build();
        let req = ResiliencyRequest::immediate(vec![OK]).to_payload();

        let err = sim
            .invoke_unary(&CallContext::new(), &UNARY.into(), req.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);

        let ctx = CallContext::new().with_metadata("authorization", "Basic abc");
        assert!(sim.invoke_unary(&ctx, &UNARY.into(), req).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_methods_are_unimplemented() {
        let sim = sim();
        let err = sim
            .invoke_unary(&CallContext::new(), &"/nope/Nope".into(), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unimplemented);
        let err = sim
            .open_stream(&CallContext::new(), &"/nope/Nope".into())
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unimplemented);
    }

    #[tokio::test]
    async fn bidi_replies_once_per_request() {
        let sim = sim();
        let mut stream = sim
            .open_stream(&CallContext::new(), &BIDI_STREAMING.into())
            .await
            .unwrap();
        for _ in 0..3 {
            stream
                .sender
                .send(ResiliencyRequest::immediate(vec![OK]).to_payload())
                .await
                .unwrap();
        }
        stream.sender.close_send().await.unwrap();

        let mut replies = 0;
        while let Some(reply) = stream.receiver.recv().await.unwrap() {
            assert!(reply["dummy_string"].is_string());
            replies += 1;
        }
        assert_eq!(replies, 3);
        assert_eq!(sim.stream_opens(), 1);
    }

    #[tokio::test]
    async fn injected_send_failure() {
        let sim = SimTransport::builder().fail_send_at(2).build();
        let mut stream = sim
            .open_stream(&CallContext::new(), &BIDI_STREAMING.into())
            .await
            .unwrap();
        let req = ResiliencyRequest::immediate(vec![OK]).to_payload();
        stream.sender.send(req.clone()).await.unwrap();
        let err = stream.sender.send(req).await.unwrap_err();
        assert_eq!(err.code, Code::Unavailable);
    }
}
