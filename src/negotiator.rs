//! Offer/answer negotiation sequencer
//!
//! A negotiation moves `Idle → Offering → Gathering → Submitted → Complete`,
//! or to `Failed` from any live state. The local offer is only sent once
//! candidate gathering reports its end-of-candidates sentinel, so the
//! description that goes out already carries every local candidate. Exactly
//! one submission happens per [`NegotiationSession`].
//!
//! Candidate notifications are consumed from a channel handed out by the
//! [`DescriptionSource`] rather than from free-standing callbacks, so all
//! session state lives in one place and is only touched by the task that
//! drives the negotiation.

use crate::config::{SignalConfig, DEFAULT_GATHER_TIMEOUT};
use crate::error::{Error, Result};
use crate::peer::types::{CandidateEvent, SessionDescription};
use crate::session::{NegotiationSession, NegotiationState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn, Instrument};

/// Produces the local offer and reports candidate gathering.
///
/// Candidate events for one subscription arrive in order and end with
/// exactly one [`CandidateEvent::Complete`].
#[async_trait]
pub trait DescriptionSource: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Starts gathering for `desc`.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Current local description, including candidates gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// New receiver for candidate events. Called before the offer is set so no event is missed.
    fn subscribe_candidates(&self) -> mpsc::UnboundedReceiver<CandidateEvent>;
}

/// Carries a finished offer to the remote side and returns its answer.
#[async_trait]
pub trait AnswerTransport: Send + Sync {
    async fn submit(&self, description: &SessionDescription) -> Result<SessionDescription>;
}

#[async_trait]
impl<T: AnswerTransport + ?Sized> AnswerTransport for Arc<T> {
    async fn submit(&self, description: &SessionDescription) -> Result<SessionDescription> {
        (**self).submit(description).await
    }
}

#[async_trait]
impl<S: DescriptionSource + ?Sized> DescriptionSource for Arc<S> {
    async fn create_offer(&self) -> Result<SessionDescription> {
        (**self).create_offer().await
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        (**self).set_local_description(desc).await
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        (**self).local_description().await
    }

    fn subscribe_candidates(&self) -> mpsc::UnboundedReceiver<CandidateEvent> {
        (**self).subscribe_candidates()
    }
}

/// Drives negotiations between a description source and a transport
pub struct Negotiator<S, T> {
    source: S,
    transport: T,
    gather_timeout: Duration,
}

impl<S, T> Negotiator<S, T>
where
    S: DescriptionSource,
    T: AnswerTransport,
{
    pub fn new(source: S, transport: T) -> Self {
        Self {
            source,
            transport,
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
        }
    }

    pub fn from_config(source: S, transport: T, config: &SignalConfig) -> Self {
        Self::new(source, transport).with_gather_timeout(config.gather_timeout)
    }

    pub fn with_gather_timeout(mut self, gather_timeout: Duration) -> Self {
        self.gather_timeout = gather_timeout;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn gather_timeout(&self) -> Duration {
        self.gather_timeout
    }

    /// Runs one full negotiation and returns the remote answer.
    ///
    /// Each call is a fresh [`NegotiationSession`]; nothing is retried here.
    pub async fn begin(&self) -> Result<SessionDescription> {
        let mut session = NegotiationSession::new();
        let span = tracing::info_span!("negotiation", session = %session.id());
        self.run(&mut session).instrument(span).await
    }

    async fn run(&self, session: &mut NegotiationSession) -> Result<SessionDescription> {
        let mut events = self.start(session).await?;

        // covers gathering only; submission is bounded by the request timeout
        let deadline = Instant::now() + self.gather_timeout;

        loop {
            let event = match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(fail(session, Error::CandidateStreamClosed)),
                Err(_) => {
                    warn!(timeout = ?self.gather_timeout, seen = session.candidates_seen(), "candidate gathering timed out");
                    return Err(fail(session, Error::GatheringTimedOut(self.gather_timeout)));
                }
            };
            if let Some(answer) = self.handle_candidate_event(session, event).await? {
                return Ok(answer);
            }
        }
    }

    /// `Idle → Offering → Gathering`: creates and sets the local offer.
    ///
    /// Returns the candidate events for this session, to be fed to
    /// [`Negotiator::handle_candidate_event`] in arrival order. Only needed
    /// when driving a session by hand; [`Negotiator::begin`] does both.
    pub async fn start(
        &self,
        session: &mut NegotiationSession,
    ) -> Result<mpsc::UnboundedReceiver<CandidateEvent>> {
        if session.state() != NegotiationState::Idle {
            return Err(Error::SessionAlreadyStarted(session.state()));
        }

        // subscribe before set_local_description or early candidates are lost
        let events = self.source.subscribe_candidates();

        session.advance(NegotiationState::Offering);
        let offered = async {
            let offer = self.source.create_offer().await?;
            self.source.set_local_description(offer.clone()).await?;
            Ok::<_, Error>(offer)
        }
        .await;

        match offered {
            Ok(offer) => {
                session.set_local_description(offer);
                session.advance(NegotiationState::Gathering);
                info!("local offer set, gathering candidates");
                Ok(events)
            }
            Err(e) => Err(fail(session, e)),
        }
    }

    /// Applies one candidate event to `session`.
    ///
    /// Returns `Ok(Some(answer))` when this event was the sentinel that
    /// triggered the submission, `Ok(None)` when the event was only observed.
    /// Candidates are only counted while gathering; a sentinel after the
    /// submission has been claimed is ignored.
    pub async fn handle_candidate_event(
        &self,
        session: &mut NegotiationSession,
        event: CandidateEvent,
    ) -> Result<Option<SessionDescription>> {
        match event {
            CandidateEvent::Candidate(cand) => {
                if session.state() != NegotiationState::Gathering {
                    debug!(state = %session.state(), "candidate outside gathering ignored");
                    return Ok(None);
                }
                session.record_candidate();
                trace!(candidate = %cand.candidate, sdp_mid = ?cand.sdp_mid, "local candidate");
                Ok(None)
            }
            CandidateEvent::Complete => {
                if session.is_submitted() || session.state().is_terminal() {
                    debug!(state = %session.state(), "duplicate end-of-candidates ignored");
                    return Ok(None);
                }
                if session.state() != NegotiationState::Gathering {
                    return Err(fail(session, Error::LocalDescriptionMissing));
                }

                let Some(local) = self.source.local_description().await else {
                    return Err(fail(session, Error::LocalDescriptionMissing));
                };

                if !session.try_claim_submission() {
                    debug!("submission already claimed");
                    return Ok(None);
                }

                info!(candidates = session.candidates_seen(), "gathering complete, submitting offer");
                session.set_local_description(local.clone());
                session.advance(NegotiationState::Submitted);

                match self.transport.submit(&local).await {
                    Ok(answer) => {
                        if !answer.is_answer() {
                            warn!(sdp_type = %answer.sdp_type(), "remote description is not an answer");
                        }
                        session.advance(NegotiationState::Complete);
                        info!(elapsed_ms = session.elapsed_ms(), "negotiation complete");
                        Ok(Some(answer))
                    }
                    Err(e) => Err(fail(session, e)),
                }
            }
        }
    }
}

impl<S, T> Negotiator<S, T>
where
    S: DescriptionSource + 'static,
    T: AnswerTransport + 'static,
{
    /// Runs [`Negotiator::begin`] on its own task.
    pub fn spawn(self: Arc<Self>) -> NegotiationHandle {
        let task = tokio::spawn(async move { self.begin().await });
        NegotiationHandle { task }
    }
}

/// Handle to a spawned negotiation
pub struct NegotiationHandle {
    task: JoinHandle<Result<SessionDescription>>,
}

impl NegotiationHandle {
    /// Stops the negotiation. Candidate listening ends with the task; if the
    /// offer had not been submitted yet, no request is left in flight.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn outcome(self) -> Result<SessionDescription> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Aborted),
            Err(e) => {
                warn!("negotiation task panicked: {e}");
                Err(Error::Aborted)
            }
        }
    }
}

fn fail(session: &mut NegotiationSession, e: Error) -> Error {
    if !session.state().is_terminal() {
        warn!(state = %session.state(), error = %e, "negotiation failed");
        session.advance(NegotiationState::Failed);
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::IceCandidate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed event script once the local description is set.
    struct ScriptedSource {
        offer: SessionDescription,
        script: Vec<CandidateEvent>,
        keep_description: bool,
        hold_open: bool,
        local: Mutex<Option<SessionDescription>>,
        tx: Mutex<Option<mpsc::UnboundedSender<CandidateEvent>>>,
    }

    impl ScriptedSource {
        fn new(offer: SessionDescription, script: Vec<CandidateEvent>) -> Self {
            Self {
                offer,
                script,
                keep_description: true,
                hold_open: false,
                local: Mutex::new(None),
                tx: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DescriptionSource for ScriptedSource {
        async fn create_offer(&self) -> Result<SessionDescription> {
            Ok(self.offer.clone())
        }

        async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
            if self.keep_description {
                *self.local.lock().unwrap() = Some(desc);
            }
            let tx = if self.hold_open {
                self.tx.lock().unwrap().clone()
            } else {
                self.tx.lock().unwrap().take()
            };
            if let Some(tx) = tx {
                for event in &self.script {
                    let _ = tx.send(event.clone());
                }
            }
            Ok(())
        }

        async fn local_description(&self) -> Option<SessionDescription> {
            self.local.lock().unwrap().clone()
        }

        fn subscribe_candidates(&self) -> mpsc::UnboundedReceiver<CandidateEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.tx.lock().unwrap() = Some(tx);
            rx
        }
    }

    /// Records every submission and answers with a fixed result.
    struct CountingTransport {
        calls: AtomicUsize,
        seen: Mutex<Vec<SessionDescription>>,
        reply: fn() -> Result<SessionDescription>,
    }

    impl CountingTransport {
        fn answering(reply: fn() -> Result<SessionDescription>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                reply,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnswerTransport for CountingTransport {
        async fn submit(&self, description: &SessionDescription) -> Result<SessionDescription> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(description.clone());
            (self.reply)()
        }
    }

    fn answer_y() -> Result<SessionDescription> {
        Ok(SessionDescription::answer("Y"))
    }

    fn candidate(n: usize) -> CandidateEvent {
        CandidateEvent::Candidate(IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 5000{n} typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        })
    }

    fn script(n: usize) -> Vec<CandidateEvent> {
        let mut events: Vec<_> = (0..n).map(candidate).collect();
        events.push(CandidateEvent::Complete);
        events
    }

    #[tokio::test]
    async fn submits_exact_offer_once_after_sentinel() {
        for n in [0, 1, 100] {
            let offer = SessionDescription::offer("X");
            let source = ScriptedSource::new(offer.clone(), script(n));
            let transport = CountingTransport::answering(answer_y);
            let negotiator = Negotiator::new(source, transport.clone());

            let answer = negotiator.begin().await.unwrap();

            assert_eq!(answer, SessionDescription::answer("Y"));
            assert_eq!(transport.calls(), 1, "n = {n}");
            assert_eq!(transport.seen.lock().unwrap()[0], offer);
        }
    }

    #[tokio::test]
    async fn no_submission_before_sentinel() {
        let source = ScriptedSource::new(SessionDescription::offer("X"), vec![]);
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Negotiator::new(source, transport.clone());
        let mut session = NegotiationSession::new();
        let _events = negotiator.start(&mut session).await.unwrap();
        assert_eq!(session.state(), NegotiationState::Gathering);

        for n in 0..5 {
            let out = negotiator
                .handle_candidate_event(&mut session, candidate(n))
                .await
                .unwrap();
            assert!(out.is_none());
        }
        assert_eq!(transport.calls(), 0);
        assert_eq!(session.candidates_seen(), 5);
        assert_eq!(session.state(), NegotiationState::Gathering);
        assert!(!session.is_submitted());
    }

    #[tokio::test]
    async fn submission_follows_every_candidate() {
        for n in [0, 1, 100] {
            let source = ScriptedSource::new(SessionDescription::offer("X"), script(n));
            let transport = CountingTransport::answering(answer_y);
            let negotiator = Negotiator::new(source, transport.clone());
            let mut session = NegotiationSession::new();

            let mut events = negotiator.start(&mut session).await.unwrap();
            let mut delivered = 0;
            while let Some(event) = events.recv().await {
                let sentinel = event.is_sentinel();
                let out = negotiator
                    .handle_candidate_event(&mut session, event)
                    .await
                    .unwrap();
                if sentinel {
                    assert!(out.is_some(), "n = {n}");
                    break;
                }
                delivered += 1;
                assert!(out.is_none());
                assert_eq!(transport.calls(), 0, "submitted after {delivered} of {n} candidates");
            }

            assert_eq!(delivered, n);
            assert_eq!(session.candidates_seen(), n);
            assert_eq!(transport.calls(), 1);
            assert_eq!(session.state(), NegotiationState::Complete);
        }
    }

    #[tokio::test]
    async fn candidates_outside_gathering_are_not_counted() {
        let source = ScriptedSource::new(SessionDescription::offer("X"), vec![]);
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Negotiator::new(source, transport.clone());
        let mut session = NegotiationSession::new();

        negotiator
            .handle_candidate_event(&mut session, candidate(0))
            .await
            .unwrap();
        assert_eq!(session.candidates_seen(), 0);
        assert_eq!(session.state(), NegotiationState::Idle);

        let _events = negotiator.start(&mut session).await.unwrap();
        negotiator
            .handle_candidate_event(&mut session, candidate(1))
            .await
            .unwrap();
        negotiator
            .handle_candidate_event(&mut session, CandidateEvent::Complete)
            .await
            .unwrap();
        assert_eq!(session.state(), NegotiationState::Complete);

        let late = negotiator
            .handle_candidate_event(&mut session, candidate(2))
            .await
            .unwrap();
        assert!(late.is_none());
        assert_eq!(session.candidates_seen(), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn second_sentinel_after_complete_is_ignored() {
        let source = ScriptedSource::new(SessionDescription::offer("X"), vec![]);
        *source.local.lock().unwrap() = Some(SessionDescription::offer("X"));
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Negotiator::new(source, transport.clone());

        let mut session = NegotiationSession::new();
        session.advance(NegotiationState::Offering);
        session.advance(NegotiationState::Gathering);

        let first = negotiator
            .handle_candidate_event(&mut session, CandidateEvent::Complete)
            .await
            .unwrap();
        assert!(first.is_some());
        assert_eq!(session.state(), NegotiationState::Complete);

        let second = negotiator
            .handle_candidate_event(&mut session, CandidateEvent::Complete)
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn sentinel_without_local_description_fails_without_transport() {
        let mut source = ScriptedSource::new(SessionDescription::offer("X"), script(2));
        source.keep_description = false;
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Negotiator::new(source, transport.clone());

        let err = negotiator.begin().await.unwrap_err();

        assert!(matches!(err, Error::LocalDescriptionMissing));
        assert!(!err.is_retryable());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_reported_not_retried() {
        fn unavailable() -> Result<SessionDescription> {
            Err(Error::TransportUnavailable("connection refused".into()))
        }
        let source = ScriptedSource::new(SessionDescription::offer("X"), script(3));
        let transport = CountingTransport::answering(unavailable);
        let negotiator = Negotiator::new(source, transport.clone());

        let err = negotiator.begin().await.unwrap_err();

        assert!(matches!(err, Error::TransportUnavailable(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn failed_session_ignores_later_sentinel() {
        let source = ScriptedSource::new(SessionDescription::offer("X"), vec![]);
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Negotiator::new(source, transport.clone());
        let mut session = NegotiationSession::new();
        session.advance(NegotiationState::Offering);
        session.advance(NegotiationState::Gathering);

        // no local description on the source yet
        let err = negotiator
            .handle_candidate_event(&mut session, CandidateEvent::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocalDescriptionMissing));
        assert_eq!(session.state(), NegotiationState::Failed);

        let again = negotiator
            .handle_candidate_event(&mut session, CandidateEvent::Complete)
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gathering_without_sentinel_times_out() {
        let mut source = ScriptedSource::new(SessionDescription::offer("X"), vec![candidate(1)]);
        source.hold_open = true;
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Negotiator::new(source, transport.clone())
            .with_gather_timeout(Duration::from_secs(5));

        let err = negotiator.begin().await.unwrap_err();

        assert!(matches!(err, Error::GatheringTimedOut(t) if t == Duration::from_secs(5)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn closed_stream_before_sentinel_fails() {
        let source = ScriptedSource::new(SessionDescription::offer("X"), vec![candidate(1)]);
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Negotiator::new(source, transport.clone());

        let err = negotiator.begin().await.unwrap_err();

        assert!(matches!(err, Error::CandidateStreamClosed));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_before_sentinel_leaves_no_submission() {
        let mut source = ScriptedSource::new(SessionDescription::offer("X"), vec![candidate(1)]);
        source.hold_open = true;
        let transport = CountingTransport::answering(answer_y);
        let negotiator = Arc::new(Negotiator::new(source, transport.clone()));

        let handle = negotiator.clone().spawn();
        tokio::task::yield_now().await;
        handle.abort();

        assert!(matches!(handle.outcome().await, Err(Error::Aborted)));
        assert_eq!(transport.calls(), 0);
    }
}
