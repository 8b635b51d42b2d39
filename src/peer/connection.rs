use crate::config::SignalConfig;
use crate::error::{Error, Result};
use crate::negotiator::DescriptionSource;
use crate::peer::ice::{dump_candidate, CandidateRelay};
use crate::peer::types::{CandidateEvent, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
};

/// Peer with default codecs and the configured ICE servers
pub async fn new_peer(config: &SignalConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut m = MediaEngine::default();
    m.register_default_codecs()?;

    let registry = register_default_interceptors(Registry::new(), &mut m)?;

    let api = APIBuilder::new()
        .with_media_engine(m)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(&config.ice_servers)).await?);

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Peer connection configuration
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Offer source backed by a webrtc-rs peer connection.
///
/// Gathering runs once per peer connection: retrying a negotiation needs a
/// new `PeerOfferSource` on a new peer.
pub struct PeerOfferSource {
    pc: Arc<RTCPeerConnection>,
    relay: CandidateRelay,
}

impl PeerOfferSource {
    /// Wraps `pc` and takes over its `on_ice_candidate` handler.
    pub fn new(pc: Arc<RTCPeerConnection>) -> Self {
        let relay = CandidateRelay::default();
        let forward = relay.clone();

        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let forward = forward.clone();
            Box::pin(async move {
                let event = match cand {
                    Some(c) => match dump_candidate("LOCAL", &c) {
                        Some(init) => CandidateEvent::Candidate(init.into()),
                        None => return,
                    },
                    None => {
                        debug!("ICE candidate gathering completed (null candidate received)");
                        CandidateEvent::Complete
                    }
                };
                forward.send(event);
            })
        }));

        Self { pc, relay }
    }

    /// Peer connection with a receive-only video transceiver, ready for a watch offer.
    pub async fn watch(config: &SignalConfig) -> Result<Self> {
        let pc = new_peer(config).await?;
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;
        Ok(Self::new(pc))
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Applies the remote answer returned by a negotiation.
    pub async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        if !answer.is_answer() {
            return Err(Error::MalformedAnswer {
                raw: answer.to_json(),
            });
        }
        let desc = RTCSessionDescription::try_from(answer)?;
        self.pc.set_remote_description(desc).await?;
        info!("remote answer applied");
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.relay.close();
        self.pc.close().await?;
        Ok(())
    }
}

#[async_trait]
impl DescriptionSource for PeerOfferSource {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        SessionDescription::try_from(offer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::try_from(desc)?;
        // starts candidate gathering
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        SessionDescription::try_from(desc).ok()
    }

    fn subscribe_candidates(&self) -> mpsc::UnboundedReceiver<CandidateEvent> {
        self.relay.subscribe()
    }
}
