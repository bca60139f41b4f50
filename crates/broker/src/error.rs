use thiserror::Error;

/// Failures surfaced by a broker adapter.
///
/// The engine's loops retry transient failures on their next tick and treat
/// everything else as a permanent outcome for the action in flight.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broker returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed broker response: {0}")]
    Decode(String),

    #[error("no broker credentials configured")]
    MissingCredentials,
}

impl BrokerError {
    /// Whether retrying the same call on a later tick is reasonable.
    /// Network faults, timeouts and 5xx responses are transient; 4xx
    /// responses and decode failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::MissingCredentials => false,
        }
    }
}
