use crate::peer::types::SessionDescription;
use crate::utils::random_id;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Where a negotiation attempt currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Offering,
    Gathering,
    Submitted,
    Complete,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Complete | NegotiationState::Failed)
    }

    fn can_advance_to(self, next: NegotiationState) -> bool {
        use NegotiationState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Offering)
            | (Offering, Gathering)
            | (Gathering, Submitted)
            | (Submitted, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::Gathering => "gathering",
            NegotiationState::Submitted => "submitted",
            NegotiationState::Complete => "complete",
            NegotiationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State of one negotiation attempt.
///
/// Created by `Negotiator::begin` (or by hand when driving events manually)
/// and dropped once an answer is obtained or the attempt fails. A retry is a
/// new session.
pub struct NegotiationSession {
    id: String,
    started_at: DateTime<Utc>,
    state: NegotiationState,
    local_description: Option<SessionDescription>,
    candidates_seen: usize,
    // single-shot: set once, by whoever delivers the first sentinel
    submitted: AtomicBool,
}

impl NegotiationSession {
    pub fn new() -> Self {
        Self {
            id: random_id(),
            started_at: Utc::now(),
            state: NegotiationState::Idle,
            local_description: None,
            candidates_seen: 0,
            submitted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds since the session was created.
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn candidates_seen(&self) -> usize {
        self.candidates_seen
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    pub(crate) fn set_local_description(&mut self, desc: SessionDescription) {
        self.local_description = Some(desc);
    }

    pub(crate) fn record_candidate(&mut self) {
        self.candidates_seen += 1;
    }

    /// Claims the one submission this session is allowed.
    ///
    /// Returns true exactly once over the session's lifetime.
    pub(crate) fn try_claim_submission(&self) -> bool {
        self.submitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to `next` if the transition is legal; illegal moves are logged and dropped.
    pub(crate) fn advance(&mut self, next: NegotiationState) -> bool {
        if self.state.can_advance_to(next) {
            tracing::debug!(session = %self.id, from = %self.state, to = %next, "negotiation state changed");
            self.state = next;
            true
        } else {
            tracing::warn!(session = %self.id, from = %self.state, to = %next, "ignoring illegal negotiation transition");
            false
        }
    }
}

impl Default for NegotiationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NegotiationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("state", &self.state)
            .field("has_local_description", &self.local_description.is_some())
            .field("candidates_seen", &self.candidates_seen)
            .field("submitted", &self.is_submitted())
            .finish()
    }
}
