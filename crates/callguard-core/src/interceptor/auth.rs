//! Credential injection into call metadata.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::context::CallContext;
use crate::error::CallError;
use crate::interceptor::{stream_fn, unary_fn, Interceptor, StreamOpenFn, UnaryCallFn};

/// Metadata key carrying the credential.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Produces the `authorization` value for a call.
pub trait CredentialSource: Send + Sync + 'static {
    fn authorization(&self) -> Result<String, CallError>;
}

/// Username/password sent as `Basic base64(user:password)`.
#[derive(Clone)]
pub struct BasicCredentials {
    username: String,
    password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read credentials from the given environment variables.
    pub fn from_env(user_var: &str, password_var: &str) -> Option<Self> {
        let username = std::env::var(user_var).ok()?;
        let password = std::env::var(password_var).ok()?;
        Some(Self::new(username, password))
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CredentialSource for BasicCredentials {
    fn authorization(&self) -> Result<String, CallError> {
        if self.username.is_empty() {
            return Err(CallError::Unauthenticated("empty username".into()));
        }
        let raw = format!("{}:{}", self.username, self.password);
        Ok(format!("Basic {}", STANDARD.encode(raw)))
    }
}

/// A pre-issued token sent as `Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

impl CredentialSource for BearerToken {
    fn authorization(&self) -> Result<String, CallError> {
        if self.0.is_empty() {
            return Err(CallError::Unauthenticated("empty bearer token".into()));
        }
        Ok(format!("Bearer {}", self.0))
    }
}

/// Attaches credentials to every call before delegating.
///
/// Without a source every call fails with `Unauthenticated` before reaching the transport.
#[derive(Clone)]
pub struct BasicAuthInterceptor {
    source: Option<Arc<dyn CredentialSource>>,
}

impl BasicAuthInterceptor {
    pub fn new(source: impl CredentialSource) -> Self {
        Self {
            source: Some(Arc::new(source)),
        }
    }

    pub fn from_source(source: Option<Arc<dyn CredentialSource>>) -> Self {
        Self { source }
    }

    /// An interceptor with no credential source configured.
    pub fn unconfigured() -> Self {
        Self { source: None }
    }
}

impl std::fmt::Debug for BasicAuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthInterceptor")
            .field("configured", &self.source.is_some())
            .finish()
    }
}

fn authorize(
    source: &Option<Arc<dyn CredentialSource>>,
    mut ctx: CallContext,
) -> Result<CallContext, CallError> {
    let source = source
        .as_ref()
        .ok_or_else(|| CallError::Unauthenticated("no credential source configured".into()))?;
    let value = source.authorization()?;
    ctx.metadata_mut().insert(AUTHORIZATION_KEY, value);
    Ok(ctx)
}

impl Interceptor for BasicAuthInterceptor {
    fn name(&self) -> &'static str {
        "basic_auth"
    }

    fn wrap_unary(&self, next: UnaryCallFn) -> UnaryCallFn {
        let source = self.source.clone();
        unary_fn(move |ctx, method, request| {
            let next = next.clone();
            let ctx = authorize(&source, ctx);
            async move { next(ctx?, method, request).await }
        })
    }

    fn wrap_stream(&self, next: StreamOpenFn) -> StreamOpenFn {
        let source = self.source.clone();
        stream_fn(move |ctx, method| {
            let next = next.clone();
            let ctx = authorize(&source, ctx);
            async move { next(ctx?, method).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::testing::{Behavior, FakeTransport};
    use crate::transport::Transport;

    fn terminal(transport: Arc<FakeTransport>) -> UnaryCallFn {
        unary_fn(move |ctx, method, req| {
            let transport = transport.clone();
            async move { Ok(transport.invoke_unary(&ctx, &method, req).await?) }
        })
    }

    #[test]
    fn basic_credentials_encode_user_and_password() {
        let creds = BasicCredentials::new("aladdin", "opensesame");
        assert_eq!(
            creds.authorization().unwrap(),
            "Basic YWxhZGRpbjpvcGVuc2VzYW1l"
        );
        assert!(!format!("{creds:?}").contains("opensesame"));
    }

    #[tokio::test]
    async fn injects_authorization_metadata() {
        let transport = FakeTransport::new(Behavior::Echo);
        let call = BasicAuthInterceptor::new(BearerToken::new("t0k3n"))
            .wrap_unary(terminal(transport.clone()));
        call(CallContext::new(), "/t/Auth".into(), json!(1)).await.unwrap();

        let md = transport.last_metadata().unwrap();
        assert_eq!(md.get(AUTHORIZATION_KEY), Some("Bearer t0k3n"));
    }

    #[tokio::test]
    async fn missing_source_fails_fast() {
        let transport = FakeTransport::new(Behavior::Echo);
        let call = BasicAuthInterceptor::unconfigured().wrap_unary(terminal(transport.clone()));
        let err = call(CallContext::new(), "/t/Auth".into(), json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Unauthenticated(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let transport = FakeTransport::new(Behavior::Echo);
        let call = BasicAuthInterceptor::new(BearerToken::new(""))
            .wrap_unary(terminal(transport.clone()));
        let err = call(CallContext::new(), "/t/Auth".into(), json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Unauthenticated(_)));
        assert_eq!(transport.calls(), 0);
    }
}
