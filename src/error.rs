//! Error types for signaling and negotiation

use crate::session::NegotiationState;
use std::time::Duration;
use thiserror::Error;

/// Everything a negotiation can fail with
#[derive(Debug, Error)]
pub enum Error {
    /// Response body is not a session description; the raw text is kept for diagnostics
    #[error("malformed answer from signaling endpoint: {raw}")]
    MalformedAnswer { raw: String },

    /// Request could not be completed (connection, timeout, non-success status)
    #[error("signaling endpoint unavailable: {0}")]
    TransportUnavailable(String),

    /// Gathering finished while the source had no local description
    #[error("candidate gathering finished without a local description")]
    LocalDescriptionMissing,

    /// Sentinel candidate never arrived
    #[error("candidate gathering did not finish within {0:?}")]
    GatheringTimedOut(Duration),

    /// Candidate events stopped before the sentinel
    #[error("candidate event stream closed before gathering finished")]
    CandidateStreamClosed,

    /// `start` called on a session that already left `Idle`
    #[error("negotiation session already started (state: {0})")]
    SessionAlreadyStarted(NegotiationState),

    /// Local peer connection rejected an operation
    #[error("peer connection error: {0}")]
    Peer(#[from] webrtc::Error),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Negotiation task was aborted before it produced an answer
    #[error("negotiation aborted")]
    Aborted,
}

impl Error {
    /// Whether starting a fresh negotiation can be expected to help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::MalformedAnswer { .. }
                | Error::TransportUnavailable(_)
                | Error::GatheringTimedOut(_)
                | Error::CandidateStreamClosed
                | Error::Aborted
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::TransportUnavailable(e.to_string())
    }
}

/// Result type for signaling and negotiation
pub type Result<T> = std::result::Result<T, Error>;
