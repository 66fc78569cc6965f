use std::time::Duration;

use crate::config::ProviderId;

/// Failure of a single upstream lookup.
///
/// Never fatal to a race on its own; it is collected and reported only when
/// every provider has failed.
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    /// The request could not be sent or its body could not be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The upstream answered, but has no record for the query.
    #[error("not found: {0}")]
    NotFound(String),

    /// The upstream body could not be decoded.
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The lookup observed cancellation before producing a result.
    #[error("cancelled")]
    Cancelled,

    /// The lookup task panicked.
    #[error("provider task panicked")]
    Panicked,
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Terminal failures of a race.
#[derive(thiserror::Error, Debug)]
pub enum RaceError {
    /// No providers were registered with the dispatcher.
    #[error("no providers configured")]
    NoProviders,

    /// Every provider failed before the deadline.
    ///
    /// Holds exactly one entry per provider, in completion order.
    #[error("all providers failed: {0:?}")]
    AllFailed(Vec<(ProviderId, ProviderError)>),

    /// No provider succeeded before the shared deadline.
    #[error("race deadline exceeded")]
    DeadlineExceeded,

    /// The caller's context was cancelled while the race was running.
    #[error("race cancelled by caller")]
    Cancelled,
}

impl RaceError {
    /// True when every provider failed and each said the query does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            RaceError::AllFailed(failures) => {
                !failures.is_empty() && failures.iter().all(|(_, e)| e.is_not_found())
            }
            _ => false,
        }
    }
}

/// Failure reported by a downstream stage.
#[derive(thiserror::Error, Debug)]
pub enum DownstreamError {
    /// The call never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The downstream stage answered with a non-success status.
    #[error("downstream returned status {status}: {body}")]
    Status {
        status: u16,
        content_type: Option<String>,
        body: String,
    },

    /// The downstream reply could not be decoded.
    #[error("malformed downstream payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DownstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DownstreamError::Decode(err.to_string())
        } else {
            DownstreamError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DownstreamError {
    fn from(err: serde_json::Error) -> Self {
        DownstreamError::Decode(err.to_string())
    }
}

/// Terminal failures of a forwarded call.
#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    /// The inherited budget ran out before the downstream stage replied.
    #[error("downstream call timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's context was cancelled before the downstream stage replied.
    #[error("downstream call cancelled")]
    Cancelled,

    #[error(transparent)]
    Downstream(#[from] DownstreamError),
}
