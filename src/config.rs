use std::time::Duration;

/// Unique identifier for an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(pub &'static str);

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Configuration for a single upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Unique identifier for this provider.
    pub id: ProviderId,
    /// Base URL of the provider's API, without a trailing path.
    pub url: String,
}

impl ProviderConfig {
    pub fn new(id: &'static str, url: impl Into<String>) -> Self {
        Self {
            id: ProviderId(id),
            url: url.into(),
        }
    }
}

/// Budget for a single race.
///
/// Every provider launched by one race shares the same absolute deadline,
/// derived once from `timeout` when the race starts.
#[derive(Debug, Clone)]
pub struct RaceConfig {
    /// Time allowed for the whole race when the caller does not pass its own deadline.
    pub timeout: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

impl RaceConfig {
    /// Tight budget for interactive lookups: 300ms.
    pub fn fast() -> Self {
        Self {
            timeout: Duration::from_millis(300),
        }
    }

    /// Generous budget for slow or distant upstreams: 5 seconds.
    pub fn patient() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Budget rules for a chained downstream call.
///
/// Neither field can extend the caller's deadline: both only ever shrink it.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Upper bound for one outbound call, applied on top of the inherited deadline.
    pub request_timeout: Duration,

    /// Time reserved for this stage to turn the downstream reply into its own
    /// response before the inherited deadline passes.
    pub safety_margin: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            safety_margin: Duration::ZERO,
        }
    }
}

impl ForwardConfig {
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
