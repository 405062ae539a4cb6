//! Call admission policies.

pub mod circuit_breaker;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, Counts, StateChange,
};
