use std::sync::Arc;
use std::time::Duration;

use crate::policies::RecordSource;

/// Configuration knobs for [`Spf`](crate::Spf).
#[derive(Debug, Clone, Default)]
pub struct SpfOptions {
    /// Evaluate `v=spf1 a/24 mx/24 ptr ~all` for domains without a record.
    pub use_best_guess: bool,
    /// Accept mail relayed by hosts listed at `spf.trusted-forwarder.org`.
    pub use_trusted_forwarder: bool,
    /// Require the SPF and TXT record sets to agree when both are published.
    pub spf_must_equal_txt: bool,
    /// Explanation used for `fail` results when the record carries no `exp`.
    pub default_explanation: Option<String>,
    /// DNS timeout in milliseconds; zero keeps the resolver's own setting.
    pub timeout_ms: u64,
    /// Records consulted before DNS.
    pub override_policy: Option<Arc<dyn RecordSource>>,
    /// Records consulted when DNS has none.
    pub fallback_policy: Option<Arc<dyn RecordSource>>,
}

impl SpfOptions {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }

    pub fn with_best_guess(mut self, enabled: bool) -> Self {
        self.use_best_guess = enabled;
        self
    }

    pub fn with_trusted_forwarder(mut self, enabled: bool) -> Self {
        self.use_trusted_forwarder = enabled;
        self
    }

    pub fn with_strict_txt(mut self, enabled: bool) -> Self {
        self.spf_must_equal_txt = enabled;
        self
    }

    pub fn with_default_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.default_explanation = Some(explanation.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_override_policy(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.override_policy = Some(source);
        self
    }

    pub fn with_fallback_policy(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.fallback_policy = Some(source);
        self
    }
}
