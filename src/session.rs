use crate::error::NegotiationError;
use crate::peer::ice::{wait_for_gathering, GATHERING_POLL_INTERVAL};
use crate::peer::{ConnectionState, SdpType, SessionId, SessionState, SignalingEnvelope, Transport};
use crate::source::Frame;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct NegotiationSettings {
    /// Hold the answer back until ICE gathering completes.
    pub wait_for_ice: bool,
    pub gathering_poll: Duration,
    /// Upper bound for the ICE wait alone.
    pub gathering_timeout: Duration,
    /// Upper bound for the whole negotiate call.
    pub timeout: Duration,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            wait_for_ice: true,
            gathering_poll: GATHERING_POLL_INTERVAL,
            gathering_timeout: DEFAULT_GATHERING_TIMEOUT,
            timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}

/// One negotiated connection and its state machine.
pub struct PeerSession {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    transport: Arc<dyn Transport>,
    transport_closed: AtomicBool,
    remote: Mutex<Option<SignalingEnvelope>>,
    local: Mutex<Option<SignalingEnvelope>>,
    settings: NegotiationSettings,
}

impl PeerSession {
    pub fn new(id: SessionId, transport: Arc<dyn Transport>, settings: NegotiationSettings) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Idle),
            transport,
            transport_closed: AtomicBool::new(false),
            remote: Mutex::new(None),
            local: Mutex::new(None),
            settings,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn remote_description(&self) -> Option<SignalingEnvelope> {
        self.remote.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn local_description(&self) -> Option<SignalingEnvelope> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Moves to `next` if the state machine allows it.
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            debug!(session = %self.id, "ignoring transition {:?} -> {:?}", *state, next);
            return false;
        }
        info!(session = %self.id, "session state {:?} -> {:?}", *state, next);
        *state = next;
        true
    }

    /// Answers `offer`, streaming `frames` on an outgoing video track when given.
    ///
    /// The whole procedure, ICE wait included, is bounded by the configured
    /// timeout. A failed session is left non-terminal: its owner retires it
    /// as failed, so removal and the terminal transition happen together.
    pub async fn negotiate(
        &self,
        offer: SignalingEnvelope,
        frames: Option<broadcast::Receiver<Frame>>,
    ) -> Result<SignalingEnvelope, NegotiationError> {
        let limit = self.settings.timeout;
        let result = match tokio::time::timeout(limit, self.run_negotiation(offer, frames)).await {
            Ok(result) => result,
            Err(_) => Err(NegotiationError::Timeout(limit)),
        };

        if let Err(e) = &result {
            warn!(session = %self.id, "negotiation failed: {}", e);
        }
        result
    }

    async fn run_negotiation(
        &self,
        offer: SignalingEnvelope,
        frames: Option<broadcast::Receiver<Frame>>,
    ) -> Result<SignalingEnvelope, NegotiationError> {
        if !self.transition(SessionState::Negotiating) {
            return Err(NegotiationError::TransportClosed);
        }
        if offer.kind != SdpType::Offer {
            return Err(NegotiationError::MalformedDescription(format!(
                "expected an offer, got {:?}",
                offer.kind
            )));
        }

        self.transport.set_remote_description(&offer).await?;
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner) = Some(offer);

        if let Some(frames) = frames {
            self.transport.attach_video(frames).await?;
        }

        self.transport.create_answer().await?;

        if self.settings.wait_for_ice {
            wait_for_gathering(
                self.transport.as_ref(),
                self.settings.gathering_poll,
                self.settings.gathering_timeout,
            )
            .await?;
        }

        if self.state().is_terminal() {
            return Err(NegotiationError::TransportClosed);
        }

        let answer = self
            .transport
            .local_description()
            .await
            .ok_or(NegotiationError::TransportClosed)?;
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = Some(answer.clone());
        Ok(answer)
    }

    /// Applies a transport connection-state change. Returns the new session
    /// state when it moved.
    pub fn apply_connection_state(&self, st: ConnectionState) -> Option<SessionState> {
        let next = st.session_target()?;
        self.transition(next).then_some(next)
    }

    pub fn mark_failed(&self) {
        self.transition(SessionState::Failed);
    }

    /// Logs transport diagnostics for a failed connection.
    pub async fn log_failure(&self) {
        self.transport.log_failure().await;
    }

    /// Closes the session and its transport. Safe to call more than once.
    pub async fn close(&self) {
        if !self.state().is_terminal() {
            self.transition(SessionState::Closed);
        }
        if self.transport_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.transport.close().await {
            warn!(session = %self.id, "closing transport failed: {}", e);
        }
        debug!(
            session = %self.id,
            "session closed after {}s",
            (Utc::now() - self.created_at).num_seconds()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::GatheringState;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Transport that never finishes gathering.
    #[derive(Default)]
    struct StuckTransport {
        closes: AtomicUsize,
        /// Reported while gathering; `New` unless a test closes it underneath.
        connection: Mutex<Option<ConnectionState>>,
        answer_hangs: bool,
    }

    #[async_trait]
    impl Transport for StuckTransport {
        async fn set_remote_description(&self, _: &SignalingEnvelope) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn attach_video(&self, _: broadcast::Receiver<Frame>) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn create_answer(&self) -> Result<(), NegotiationError> {
            if self.answer_hangs {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
        fn gathering_state(&self) -> GatheringState {
            GatheringState::Gathering
        }
        fn connection_state(&self) -> ConnectionState {
            self.connection
                .lock()
                .unwrap()
                .unwrap_or(ConnectionState::New)
        }
        async fn local_description(&self) -> Option<SignalingEnvelope> {
            Some(SignalingEnvelope::answer("v=0"))
        }
        async fn close(&self) -> Result<(), NegotiationError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session_with(
        transport: StuckTransport,
        settings: NegotiationSettings,
    ) -> (PeerSession, Arc<StuckTransport>) {
        let transport = Arc::new(transport);
        let s = PeerSession::new(SessionId("t".into()), transport.clone(), settings);
        (s, transport)
    }

    fn session(settings: NegotiationSettings) -> (PeerSession, Arc<StuckTransport>) {
        session_with(StuckTransport::default(), settings)
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_gathering_hits_its_own_bound() {
        let (s, _) = session(NegotiationSettings {
            gathering_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
            ..Default::default()
        });
        let started = tokio::time::Instant::now();
        let err = s.negotiate(SignalingEnvelope::offer("v=0"), None).await.unwrap_err();
        assert!(matches!(err, NegotiationError::GatheringTimeout(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
        // the owner decides the terminal state
        assert_eq!(s.state(), SessionState::Negotiating);
        assert!(s.local_description().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_answer_hits_the_overall_bound() {
        let (s, _) = session_with(
            StuckTransport {
                answer_hangs: true,
                ..Default::default()
            },
            NegotiationSettings {
                timeout: Duration::from_secs(3),
                ..Default::default()
            },
        );
        let err = s.negotiate(SignalingEnvelope::offer("v=0"), None).await.unwrap_err();
        assert!(matches!(err, NegotiationError::Timeout(d) if d == Duration::from_secs(3)));
        assert!(!s.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_closed_while_gathering() {
        let (s, _) = session_with(
            StuckTransport {
                connection: Mutex::new(Some(ConnectionState::Closed)),
                ..Default::default()
            },
            NegotiationSettings::default(),
        );
        let err = s.negotiate(SignalingEnvelope::offer("v=0"), None).await.unwrap_err();
        assert!(matches!(err, NegotiationError::TransportClosed), "{err:?}");
        assert!(s.local_description().is_none());

        s.mark_failed();
        s.close().await;
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn answer_returned_without_ice_wait() {
        let (s, _) = session(NegotiationSettings {
            wait_for_ice: false,
            ..Default::default()
        });
        let answer = s.negotiate(SignalingEnvelope::offer("v=0"), None).await.unwrap();
        assert_eq!(answer.kind, SdpType::Answer);
        assert_eq!(s.state(), SessionState::Negotiating);
        assert_eq!(s.local_description(), Some(answer));
        assert_eq!(s.remote_description(), Some(SignalingEnvelope::offer("v=0")));
    }

    #[tokio::test]
    async fn answer_envelope_is_rejected_as_offer() {
        let (s, _) = session(NegotiationSettings::default());
        let err = s.negotiate(SignalingEnvelope::answer("v=0"), None).await.unwrap_err();
        assert!(matches!(err, NegotiationError::MalformedDescription(_)));
        assert_eq!(s.state(), SessionState::Negotiating);
        assert!(s.remote_description().is_none());
    }

    #[tokio::test]
    async fn terminal_state_is_final() {
        let (s, transport) = session(NegotiationSettings {
            wait_for_ice: false,
            ..Default::default()
        });
        s.negotiate(SignalingEnvelope::offer("v=0"), None).await.unwrap();
        assert_eq!(
            s.apply_connection_state(ConnectionState::Connected),
            Some(SessionState::Connected)
        );
        assert_eq!(s.apply_connection_state(ConnectionState::Disconnected), None);
        assert_eq!(
            s.apply_connection_state(ConnectionState::Failed),
            Some(SessionState::Failed)
        );
        assert_eq!(s.apply_connection_state(ConnectionState::Connected), None);

        s.close().await;
        s.close().await;
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }
}
