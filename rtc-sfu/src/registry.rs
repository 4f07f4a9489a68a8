//! Interceptor Registry - Type-safe builder for constructing interceptor chains.

use crate::Interceptor;
use crate::noop::NoopInterceptor;

/// Registry for constructing interceptor chains.
///
/// `Registry` wraps an interceptor chain and allows adding more interceptors
/// via the [`with`](Registry::with) method. The chain can be extracted with [`build`](Registry::build).
///
/// # Example
///
/// ```ignore
/// use rtc_sfu::{Registry, RtcpFeedbackGenerationBuilder, SenderBandwidthEstimationBuilder};
///
/// let chain = Registry::new()
///     .with(RtcpFeedbackGenerationBuilder::new().build())
///     .with(SenderBandwidthEstimationBuilder::new().build())
///     .build();
/// ```
pub struct Registry<P> {
    inner: P,
}

impl Registry<NoopInterceptor> {
    /// Create a new empty registry with a `NoopInterceptor` as the innermost layer.
    pub fn new() -> Self {
        Registry {
            inner: NoopInterceptor::new(),
        }
    }
}

impl Default for Registry<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Interceptor> Registry<P> {
    /// Create a registry from an existing interceptor.
    pub fn from(inner: P) -> Self {
        Registry { inner }
    }

    /// Wrap the current chain with another interceptor.
    pub fn with<O, F>(self, f: F) -> Registry<O>
    where
        F: FnOnce(P) -> O,
        O: Interceptor,
    {
        Registry {
            inner: f(self.inner),
        }
    }

    /// Build and return the interceptor chain.
    pub fn build(self) -> P {
        self.inner
    }
}
