use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Role of a session description on the wire
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    /// Provisional answer, a final one follows
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Session description as exchanged with the signaling endpoint.
///
/// Wire shape is `{"type": "...", "sdp": "..."}`. Values are immutable once
/// produced and passed around by value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, sdp)
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Whether this description can complete an offer we sent.
    pub fn is_answer(&self) -> bool {
        matches!(self.sdp_type, SdpType::Answer | SdpType::Pranswer)
    }

    /// Wire payload for the POST body.
    pub fn to_json(&self) -> String {
        // a struct of one enum and one string always serializes
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a response body; failures keep the raw text.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|_| Error::MalformedAnswer {
            raw: raw.to_string(),
        })
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = Error;

    fn try_from(desc: RTCSessionDescription) -> Result<Self> {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            RTCSdpType::Unspecified => {
                return Err(webrtc::Error::new("unspecified sdp type".to_owned()).into())
            }
        };
        Ok(Self::new(sdp_type, desc.sdp))
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = Error;

    fn try_from(desc: SessionDescription) -> Result<Self> {
        let converted = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
            // no constructor for rollback, both types share the wire shape
            SdpType::Rollback => serde_json::from_str(&desc.to_json())
                .map_err(|e| webrtc::Error::new(e.to_string()))?,
        };
        Ok(converted)
    }
}

/// ICE candidate discovered by the local network stack
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

/// Notification from candidate gathering.
///
/// `Complete` is the sentinel: it is delivered last, once per gathering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateEvent {
    Candidate(IceCandidate),
    Complete,
}

impl CandidateEvent {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, CandidateEvent::Complete)
    }
}

impl From<Option<IceCandidate>> for CandidateEvent {
    fn from(cand: Option<IceCandidate>) -> Self {
        match cand {
            Some(c) => CandidateEvent::Candidate(c),
            None => CandidateEvent::Complete,
        }
    }
}

/// STUN/TURN server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}
