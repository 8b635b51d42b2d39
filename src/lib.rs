//! Offer/answer negotiation for watching a remote media stream.
//!
//! A [`Negotiator`] takes a local offer from a [`DescriptionSource`], waits
//! for candidate gathering to finish, sends the finished offer once through
//! an [`AnswerTransport`] (normally the HTTP [`SignalingClient`]) and hands
//! back the remote answer.

pub mod config;
pub mod error;
pub mod logger;
pub mod negotiator;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::SignalConfig;
pub use error::{Error, Result};
pub use negotiator::{AnswerTransport, DescriptionSource, NegotiationHandle, Negotiator};
pub use peer::{CandidateEvent, IceCandidate, PeerOfferSource, SdpType, SessionDescription};
pub use session::{NegotiationSession, NegotiationState};
pub use signaling::SignalingClient;
