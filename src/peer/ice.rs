use crate::peer::types::{CandidateEvent, IceCandidate};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};

/// Forwards candidate events from the peer callback to the current subscriber.
///
/// Each `subscribe` replaces the previous receiver; events with no
/// subscriber are dropped.
#[derive(Clone, Default)]
pub struct CandidateRelay {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<CandidateEvent>>>>,
}

impl CandidateRelay {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CandidateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    pub fn send(&self, event: CandidateEvent) {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("candidate subscriber gone, event dropped");
                }
            }
            None => debug!("no candidate subscriber, event dropped"),
        }
    }

    /// Drops the subscriber; its receiver sees the stream end.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Logs an ICE candidate as it appears (trickle ICE)
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) -> Option<RTCIceCandidateInit> {
    match cand.to_json() {
        Ok(init) => {
            debug!(
                "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
                init.candidate, init.sdp_mid, init.sdp_mline_index, init.username_fragment
            );
            Some(init)
        }
        Err(e) => {
            warn!("Failed to get candidate JSON: {:?}", e);
            None
        }
    }
}

/// Candidate counts by type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    summary
}

/// Extracts the `a=candidate:` lines of a description.
pub fn candidates_in_sdp(sdp: &str) -> Vec<IceCandidate> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix("a="))
        .filter(|attr| attr.starts_with("candidate:"))
        .map(|attr| IceCandidate {
            candidate: attr.trim_end().to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        })
        .collect()
}
