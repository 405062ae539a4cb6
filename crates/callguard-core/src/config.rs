//! Client configuration, loadable from YAML.
//!
//! ```yaml
//! interceptors: [logging, basic_auth, timeout]
//! unary_timeout_ms: 5000
//! stream_timeout_ms: 20000
//! credentials:
//!   username: admin
//!   password: secret
//! circuit_breaker:
//!   name: resiliency
//!   min_request_threshold: 3
//!   failure_ratio_threshold: 0.6
//!   open_timeout_ms: 4000
//!   max_probe_requests: 3
//! stream_buffer: 32
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CallError;
use crate::interceptor::BasicCredentials;
use crate::policy::CircuitBreakerConfig;

/// Environment variable holding the default username.
pub const USERNAME_ENV: &str = "CALLGUARD_USERNAME";
/// Environment variable holding the default password.
pub const PASSWORD_ENV: &str = "CALLGUARD_PASSWORD";

/// Interceptor kinds that can be named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptorKind {
    Logging,
    BasicAuth,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

impl From<&CredentialsConfig> for BasicCredentials {
    fn from(c: &CredentialsConfig) -> Self {
        BasicCredentials::new(c.username.clone(), c.password.clone())
    }
}

/// Everything needed to assemble a [`Client`](crate::client::Client) around a transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Interceptor order, outermost first. The breaker is always placed in front.
    pub interceptors: Vec<InterceptorKind>,
    pub unary_timeout_ms: u64,
    pub stream_timeout_ms: u64,
    /// Falls back to `CALLGUARD_USERNAME` / `CALLGUARD_PASSWORD` when absent.
    pub credentials: Option<CredentialsConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Slots buffering received stream messages.
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interceptors: vec![
                InterceptorKind::Logging,
                InterceptorKind::BasicAuth,
                InterceptorKind::Timeout,
            ],
            unary_timeout_ms: 5_000,
            stream_timeout_ms: 20_000,
            credentials: None,
            circuit_breaker: None,
            stream_buffer: 32,
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CallError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| CallError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CallError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CallError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), CallError> {
        if self.unary_timeout_ms == 0 || self.stream_timeout_ms == 0 {
            return Err(CallError::Config("timeouts must be positive".into()));
        }
        if self.stream_buffer == 0 {
            return Err(CallError::Config("stream_buffer must be at least 1".into()));
        }
        for (i, kind) in self.interceptors.iter().enumerate() {
            if self.interceptors[..i].contains(kind) {
                return Err(CallError::Config(format!(
                    "interceptor {kind:?} listed more than once"
                )));
            }
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        Ok(())
    }

    pub fn unary_timeout(&self) -> Duration {
        Duration::from_millis(self.unary_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    /// Configured credentials, or the ones found in the environment.
    pub fn resolve_credentials(&self) -> Option<BasicCredentials> {
        match &self.credentials {
            Some(c) => Some(c.into()),
            None => BasicCredentials::from_env(USERNAME_ENV, PASSWORD_ENV),
        }
    }
}
