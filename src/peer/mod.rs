pub mod connection;
pub mod ice;
pub mod types;

pub use connection::{new_peer, PeerOfferSource};
pub use ice::{analyze_candidates, candidates_in_sdp, CandidateRelay, CandidateSummary};
pub use types::{CandidateEvent, IceCandidate, SdpType, ServerConfig, SessionDescription};
