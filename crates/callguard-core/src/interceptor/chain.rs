//! Ordered composition of interceptors.

use std::sync::Arc;

use crate::interceptor::{Interceptor, StreamOpenFn, UnaryCallFn};

/// An immutable, ordered list of interceptors.
///
/// The first interceptor is the outermost wrapper: it sees the call first and
/// the result last. The last one sits next to the transport. Cloning is cheap
/// and clones share the list.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Interceptor names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// A new chain with `outer` placed in front of every interceptor of `self`.
    pub fn with_outer(&self, outer: Arc<dyn Interceptor>) -> Self {
        let mut list = Vec::with_capacity(self.len() + 1);
        list.push(outer);
        list.extend(self.interceptors.iter().cloned());
        Self::new(list)
    }

    /// Wrap `terminal` so that calls flow through every interceptor in order.
    pub fn wrap_unary(&self, terminal: UnaryCallFn) -> UnaryCallFn {
        self.interceptors
            .iter()
            .rev()
            .fold(terminal, |next, interceptor| interceptor.wrap_unary(next))
    }

    /// Wrap `terminal` so that stream opens flow through every interceptor in order.
    pub fn wrap_stream(&self, terminal: StreamOpenFn) -> StreamOpenFn {
        self.interceptors
            .iter()
            .rev()
            .fold(terminal, |next, interceptor| interceptor.wrap_stream(next))
    }
}

impl FromIterator<Arc<dyn Interceptor>> for InterceptorChain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Interceptor>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names())
            .finish()
    }
}
