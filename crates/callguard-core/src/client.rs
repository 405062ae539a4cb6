//! The client façade: a transport wrapped in an interceptor chain.

use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::config::{ClientConfig, InterceptorKind};
use crate::context::{CallContext, MethodId};
use crate::error::{CallError, Code, TransportError};
use crate::interceptor::{
    stream_fn, unary_fn, BasicAuthInterceptor, CircuitBreakerInterceptor, CredentialSource,
    Interceptor, InterceptorChain, LoggingInterceptor, StreamOpenFn, TimeoutInterceptor,
    UnaryCallFn,
};
use crate::policy::CircuitBreaker;
use crate::stream::{DuplexCall, DuplexCoordinator, StreamSession};
use crate::transport::{Payload, Transport};

const DEFAULT_STREAM_BUFFER: usize = 32;

/// Issues unary and streaming calls through a fixed interceptor chain.
///
/// Cloning is cheap; clones share the chain, the breaker and the transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    chain: InterceptorChain,
    breaker: Option<CircuitBreaker>,
    unary: UnaryCallFn,
    open: StreamOpenFn,
    stream_buffer: usize,
}

impl Client {
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder {
            transport,
            interceptors: Vec::new(),
            breaker: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Assemble a client from configuration.
    pub fn from_config(
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> Result<Self, CallError> {
        config.validate()?;
        let mut builder = Self::builder(transport).stream_buffer(config.stream_buffer);
        for kind in &config.interceptors {
            builder = match kind {
                InterceptorKind::Logging => builder.interceptor(LoggingInterceptor::new()),
                InterceptorKind::BasicAuth => {
                    let source = config
                        .resolve_credentials()
                        .map(|c| Arc::new(c) as Arc<dyn CredentialSource>);
                    if source.is_none() {
                        tracing::warn!("basic_auth configured without credentials");
                    }
                    builder.interceptor(BasicAuthInterceptor::from_source(source))
                }
                InterceptorKind::Timeout => builder.interceptor(
                    TimeoutInterceptor::new(config.unary_timeout())
                        .with_stream_budget(config.stream_timeout()),
                ),
            };
        }
        if let Some(breaker) = &config.circuit_breaker {
            builder = builder.circuit_breaker(CircuitBreaker::new(breaker.clone())?);
        }
        Ok(builder.build())
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The effective chain, breaker first when one is installed.
    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Issue a unary call.
    pub async fn invoke(
        &self,
        ctx: CallContext,
        method: impl Into<MethodId>,
        request: Payload,
    ) -> Result<Payload, CallError> {
        (self.unary)(ctx, method.into(), request).await
    }

    /// Open a stream and start sending `outbound` while receiving replies.
    ///
    /// Failures to open, including breaker rejection, are returned here and
    /// no session is started.
    pub async fn open_duplex_stream<S>(
        &self,
        ctx: CallContext,
        method: impl Into<MethodId>,
        outbound: S,
    ) -> Result<DuplexCall, CallError>
    where
        S: Stream<Item = Payload> + Send + 'static,
    {
        let session = (self.open)(ctx, method.into()).await?;
        Ok(DuplexCoordinator::start(
            session,
            outbound.boxed(),
            self.stream_buffer,
        ))
    }

    /// Send one request and read any number of replies.
    pub async fn server_stream(
        &self,
        ctx: CallContext,
        method: impl Into<MethodId>,
        request: Payload,
    ) -> Result<DuplexCall, CallError> {
        self.open_duplex_stream(ctx, method, futures::stream::iter([request]))
            .await
    }

    /// Send every message of `outbound` and wait for the single reply.
    pub async fn client_stream<S>(
        &self,
        ctx: CallContext,
        method: impl Into<MethodId>,
        outbound: S,
    ) -> Result<Payload, CallError>
    where
        S: Stream<Item = Payload> + Send + 'static,
    {
        let call = self.open_duplex_stream(ctx, method, outbound).await?;
        let mut replies = call.collect().await?;
        match replies.len() {
            1 => Ok(replies.remove(0)),
            n => Err(TransportError::new(
                Code::Internal,
                format!("expected exactly one reply, got {n}"),
            )
            .into()),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport.name())
            .field("chain", &self.chain)
            .field("stream_buffer", &self.stream_buffer)
            .finish()
    }
}

/// Builder for [`Client`]. Interceptors run in the order they are added.
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    breaker: Option<CircuitBreaker>,
    stream_buffer: usize,
}

impl ClientBuilder {
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Gate every call on `breaker`. It always runs before the other interceptors.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn stream_buffer(mut self, slots: usize) -> Self {
        self.stream_buffer = slots.max(1);
        self
    }

    pub fn build(self) -> Client {
        let mut chain = InterceptorChain::new(self.interceptors);
        if let Some(breaker) = &self.breaker {
            chain = chain.with_outer(Arc::new(CircuitBreakerInterceptor::new(breaker.clone())));
        }

        let unary = chain.wrap_unary(unary_terminal(self.transport.clone()));
        let open = chain.wrap_stream(stream_terminal(self.transport.clone()));

        tracing::debug!(
            transport = self.transport.name(),
            interceptors = ?chain.names(),
            "client built"
        );

        Client {
            transport: self.transport,
            chain,
            breaker: self.breaker,
            unary,
            open,
            stream_buffer: self.stream_buffer,
        }
    }
}

fn unary_terminal(transport: Arc<dyn Transport>) -> UnaryCallFn {
    unary_fn(move |ctx, method, request| {
        let transport = transport.clone();
        async move {
            ctx.run(async { Ok(transport.invoke_unary(&ctx, &method, request).await?) })
                .await
        }
    })
}

fn stream_terminal(transport: Arc<dyn Transport>) -> StreamOpenFn {
    stream_fn(move |ctx, method| {
        let transport = transport.clone();
        async move {
            let stream = ctx
                .run(async { Ok(transport.open_stream(&ctx, &method).await?) })
                .await?;
            Ok(StreamSession::new(ctx, method, stream))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::config::CredentialsConfig;
    use crate::policy::{CircuitBreakerConfig, CircuitState};
    use crate::testing::{Behavior, FakeTransport};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            name: "client".into(),
            min_request_threshold: 3,
            failure_ratio_threshold: 0.6,
            open_timeout: Duration::from_secs(4),
            max_probe_requests: 3,
            window: None,
            event_capacity: 8,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn invoke_reaches_transport() {
        let transport = FakeTransport::new(Behavior::Echo);
        let client = Client::builder(transport.clone())
            .interceptor(LoggingInterceptor::new())
            .build();
        let reply = client
            .invoke(CallContext::new(), "/t/Unary", json!("hi"))
            .await
            .unwrap();
        assert_eq!(reply, json!({ "echo": "hi" }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn breaker_is_outermost() {
        let client = Client::builder(FakeTransport::new(Behavior::Echo))
            .interceptor(LoggingInterceptor::new())
            .interceptor(TimeoutInterceptor::new(Duration::from_secs(1)))
            .circuit_breaker(breaker())
            .build();
        assert_eq!(
            client.chain().names(),
            vec!["circuit_breaker", "logging", "timeout"]
        );
    }

    #[tokio::test]
    async fn open_breaker_never_touches_transport() {
        let transport = FakeTransport::new(Behavior::Fail(Code::Unavailable));
        let client = Client::builder(transport.clone())
            .circuit_breaker(breaker())
            .build();

        for _ in 0..3 {
            let err = client
                .invoke(CallContext::new(), "/t/Unary", json!(null))
                .await
                .unwrap_err();
            assert!(!err.is_circuit_open());
        }
        assert_eq!(client.breaker().unwrap().state(), CircuitState::Open);

        let err = client
            .invoke(CallContext::new(), "/t/Unary", json!(null))
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        let err = client
            .open_duplex_stream(CallContext::new(), "/t/Bidi", futures::stream::empty())
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());

        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn from_config_attaches_credentials() {
        let transport = FakeTransport::new(Behavior::Echo);
        let config = ClientConfig {
            credentials: Some(CredentialsConfig {
                username: "admin".into(),
                password: "secret".into(),
            }),
            ..ClientConfig::default()
        };
        let client = Client::from_config(transport.clone(), &config).unwrap();
        assert_eq!(client.chain().names(), vec!["logging", "basic_auth", "timeout"]);

        client
            .invoke(CallContext::new(), "/t/Unary", json!(1))
            .await
            .unwrap();
        let md = transport.last_metadata().unwrap();
        assert_eq!(md.get("authorization"), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[tokio::test]
    async fn unconfigured_auth_fails_before_transport() {
        let transport = FakeTransport::new(Behavior::Echo);
        let client = Client::builder(transport.clone())
            .interceptor(BasicAuthInterceptor::unconfigured())
            .build();
        let err = client
            .invoke(CallContext::new(), "/t/Unary", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Unauthenticated(_)));
        let err = client
            .server_stream(CallContext::new(), "/t/Server", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Unauthenticated(_)));
        assert_eq!(transport.calls(), 0);
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn missing_credentials_do_not_trip_breaker() {
        let transport = FakeTransport::new(Behavior::Echo);
        let client = Client::builder(transport.clone())
            .interceptor(BasicAuthInterceptor::unconfigured())
            .circuit_breaker(breaker())
            .build();
        for _ in 0..5 {
            let err = client
                .invoke(CallContext::new(), "/t/Unary", json!(1))
                .await
                .unwrap_err();
            assert!(matches!(err, CallError::Unauthenticated(_)));
        }
        assert_eq!(client.breaker().unwrap().state(), CircuitState::Closed);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn duplex_stream_echoes_in_order() {
        let client = Client::builder(FakeTransport::new(Behavior::Echo)).build();
        let outbound = futures::stream::iter((1..=5).map(|i| json!(i)));
        let replies = client
            .open_duplex_stream(CallContext::new(), "/t/Bidi", outbound)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(replies, (1..=5).map(|i| json!(i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn server_stream_sends_single_request() {
        let client = Client::builder(FakeTransport::new(Behavior::Echo)).build();
        let mut call = client
            .server_stream(CallContext::new(), "/t/Server", json!("req"))
            .await
            .unwrap();
        assert_eq!(call.next().await, Some(json!("req")));
        assert_eq!(call.next().await, None);
        let summary = call.join().await.unwrap();
        assert_eq!((summary.sent, summary.received), (1, 1));
    }

    #[tokio::test]
    async fn client_stream_requires_exactly_one_reply() {
        let client = Client::builder(FakeTransport::new(Behavior::Echo)).build();
        let reply = client
            .client_stream(CallContext::new(), "/t/Client", futures::stream::iter([json!(9)]))
            .await
            .unwrap();
        assert_eq!(reply, json!(9));

        let err = client
            .client_stream(
                CallContext::new(),
                "/t/Client",
                futures::stream::iter([json!(1), json!(2)]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn open_failure_is_returned_directly() {
        let client = Client::builder(FakeTransport::new(Behavior::Fail(Code::Unavailable))).build();
        let err = client
            .open_duplex_stream(CallContext::new(), "/t/Bidi", futures::stream::empty())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn cancelled_context_stops_unary_call() {
        let client = Client::builder(FakeTransport::new(Behavior::Delay(Duration::from_secs(30))))
            .build();
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            client.invoke(ctx, "/t/Unary", json!(1)),
        )
        .await
        .expect("cancel must unblock the call")
        .unwrap_err();
        assert!(matches!(err, CallError::Canceled));
    }
}
