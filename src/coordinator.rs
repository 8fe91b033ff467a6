//! The session lifecycle loop.
//!
//! [`Coordinator`] polls its [`SignalingChannel`] for offers, negotiates one
//! [`PeerSession`] per offer and publishes the answer. Sessions live in a
//! [`LiveSet`] together with the shared video source. A session only turns
//! `failed` or `closed` while it is being removed from the set, and the
//! source is released when the set becomes empty.

use crate::error::{Error, Result, SourceError};
use crate::peer::{ConnectionState, Connector, SessionId, SessionState, SignalingEnvelope, StateEvent};
use crate::retry::Backoff;
use crate::session::{NegotiationSettings, PeerSession};
use crate::signaling::SignalingChannel;
use crate::source::{Frame, SharedSource, SourceFactory};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Delay between polls when no offer is pending.
    pub poll_interval: Duration,
    /// Delay schedule after a failed poll.
    pub error_backoff: Backoff,
    pub negotiation: NegotiationSettings,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: Backoff::exponential(DEFAULT_ERROR_BACKOFF, Duration::from_secs(30), 2.0)
                .with_jitter(Duration::from_millis(250)),
            negotiation: NegotiationSettings::default(),
        }
    }
}

#[derive(Default)]
struct LiveSetInner {
    sessions: HashMap<SessionId, Arc<PeerSession>>,
    source: Option<SharedSource>,
}

impl LiveSetInner {
    /// Removes `id`, moves it to `terminal` and closes it, then releases the
    /// source if nothing is left.
    async fn retire(&mut self, id: &SessionId, terminal: SessionState) -> Option<Arc<PeerSession>> {
        let session = self.sessions.remove(id)?;
        if terminal == SessionState::Failed {
            session.mark_failed();
        }
        session.close().await;
        info!(
            session = %id,
            "session retired as {:?} ({} live)",
            session.state(),
            self.sessions.len()
        );

        if self.sessions.is_empty() {
            if let Some(source) = self.source.take() {
                source.release().await;
            }
        }
        Some(session)
    }

    /// A source that ended on its own feeds nobody any more. Its sessions
    /// are retired and the handle released so the next admit reopens.
    async fn reap_stale_source(&mut self) -> usize {
        let stale = self.source.as_ref().is_some_and(|s| !s.is_running());
        if !stale {
            return 0;
        }
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        warn!("video source ended, retiring {} session(s)", ids.len());
        for id in &ids {
            self.retire(id, SessionState::Closed).await;
        }
        if let Some(stale) = self.source.take() {
            stale.release().await;
        }
        ids.len()
    }
}

/// Live sessions plus the video source they share.
///
/// All mutation happens under one lock, so a release on the last removal
/// can never interleave with an open for a new session.
pub struct LiveSet {
    inner: Mutex<LiveSetInner>,
    factory: SourceFactory,
}

impl LiveSet {
    pub fn new(factory: SourceFactory) -> Self {
        Self {
            inner: Mutex::new(LiveSetInner::default()),
            factory,
        }
    }

    /// Inserts `session` and hands back a subscription to the shared source,
    /// opening the source first if no live one exists.
    pub async fn admit(
        &self,
        session: Arc<PeerSession>,
    ) -> std::result::Result<broadcast::Receiver<Frame>, SourceError> {
        let mut inner = self.inner.lock().await;

        inner.reap_stale_source().await;
        let frames = match &inner.source {
            Some(source) => source.subscribe(),
            None => {
                let source = SharedSource::open((self.factory)()).await?;
                let frames = source.subscribe();
                inner.source = Some(source);
                frames
            }
        };

        inner.sessions.insert(session.id().clone(), session);
        Ok(frames)
    }

    /// Removes `id` from the set, leaving it in `terminal` (`failed` or
    /// `closed`). Returns the session if it was live.
    pub async fn retire(&self, id: &SessionId, terminal: SessionState) -> Option<Arc<PeerSession>> {
        self.inner.lock().await.retire(id, terminal).await
    }

    /// Retires every session of a source that reached end of stream.
    /// Returns how many sessions went with it.
    pub async fn reap_stale_source(&self) -> usize {
        self.inner.lock().await.reap_stale_source().await
    }

    /// Feeds a connection-state change to the session it belongs to and
    /// retires the session if the change made it terminal. Both happen under
    /// the set's lock, so no reader sees a terminal session in the set.
    pub async fn on_connection_state(&self, id: &SessionId, st: ConnectionState) -> Option<SessionState> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.sessions.get(id).cloned() else {
            debug!(session = %id, "connection state {:?} for a retired session", st);
            return None;
        };

        let next = session.apply_connection_state(st)?;
        if next == SessionState::Failed {
            session.log_failure().await;
        }
        if next.is_terminal() {
            inner.retire(id, next).await;
        }
        Some(next)
    }

    /// Opens and immediately releases a source, surfacing a permanently
    /// unavailable device before any offer is taken.
    pub async fn probe_source(&self) -> std::result::Result<(), SourceError> {
        let inner = self.inner.lock().await;
        if inner.source.is_none() {
            SharedSource::open((self.factory)()).await?.release().await;
        }
        Ok(())
    }

    /// Closes every session and releases the source.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let ids: Vec<SessionId> = inner.sessions.keys().cloned().collect();
        for id in &ids {
            inner.retire(id, SessionState::Closed).await;
        }
        if let Some(source) = inner.source.take() {
            source.release().await;
        }
        info!("live set cleared ({} sessions closed)", ids.len());
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.sessions.is_empty()
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<PeerSession>> {
        self.inner.lock().await.sessions.get(id).cloned()
    }

    pub async fn states(&self) -> Vec<(SessionId, SessionState)> {
        let inner = self.inner.lock().await;
        let mut states: Vec<_> = inner
            .sessions
            .iter()
            .map(|(id, s)| (id.clone(), s.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Whether the shared source is currently open.
    pub async fn source_active(&self) -> bool {
        self.inner.lock().await.source.is_some()
    }

    /// Whether the open source is still producing frames.
    pub async fn source_running(&self) -> bool {
        self.inner.lock().await.source.as_ref().is_some_and(SharedSource::is_running)
    }
}

pub struct Coordinator {
    channel: Box<dyn SignalingChannel>,
    connector: Arc<dyn Connector>,
    live: Arc<LiveSet>,
    events_tx: mpsc::UnboundedSender<StateEvent>,
    events_rx: mpsc::UnboundedReceiver<StateEvent>,
    settings: CoordinatorSettings,
    backoff: Backoff,
}

impl Coordinator {
    pub fn new(
        channel: Box<dyn SignalingChannel>,
        connector: Arc<dyn Connector>,
        factory: SourceFactory,
        settings: CoordinatorSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            channel,
            connector,
            live: Arc::new(LiveSet::new(factory)),
            events_tx,
            events_rx,
            backoff: settings.error_backoff.clone(),
            settings,
        }
    }

    pub fn live(&self) -> Arc<LiveSet> {
        Arc::clone(&self.live)
    }

    /// Runs until `shutdown` resolves, then closes every live session.
    ///
    /// Only a video source that cannot be opened at all ends the loop with
    /// an error; per-offer failures are logged and the loop goes on.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.live.probe_source().await?;
        info!("coordinator started");

        tokio::pin!(shutdown);
        let mut next_poll = Instant::now();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                Some((id, st)) = self.events_rx.recv() => {
                    self.live.on_connection_state(&id, st).await;
                }
                _ = sleep_until(next_poll) => {
                    let delay = self.poll_once().await;
                    next_poll = Instant::now() + delay;
                }
            }
        }

        self.live.shutdown().await;
        Ok(())
    }

    /// One poll of the signaling channel. Returns how long to wait before
    /// the next poll.
    pub async fn poll_once(&mut self) -> Duration {
        self.live.reap_stale_source().await;

        match self.channel.fetch_offer().await {
            Ok(Some(offer)) => {
                self.backoff.reset();
                match self.handle_offer(offer).await {
                    Ok(id) => info!(session = %id, "session established"),
                    Err(e) => warn!("offer dropped: {}", e),
                }
                // more offers may be queued
                Duration::ZERO
            }
            Ok(None) => {
                self.backoff.reset();
                self.settings.poll_interval
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                error!("signaling poll failed: {} (retrying in {:?})", e, delay);
                delay
            }
        }
    }

    /// Negotiates `offer` and publishes the answer. The session stays in the
    /// live set only if every step succeeds.
    pub async fn handle_offer(&self, offer: SignalingEnvelope) -> Result<SessionId> {
        let id = SessionId::random();
        let transport = self.connector.connect(&id, self.events_tx.clone()).await?;
        let session = Arc::new(PeerSession::new(
            id.clone(),
            transport,
            self.settings.negotiation,
        ));

        let frames = match self.live.admit(Arc::clone(&session)).await {
            Ok(frames) => frames,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        let answer = match session.negotiate(offer.clone(), Some(frames)).await {
            Ok(answer) => answer,
            Err(e) => {
                self.live.retire(&id, SessionState::Failed).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.channel.publish_answer(&offer.sdp, &answer).await {
            self.live.retire(&id, SessionState::Closed).await;
            return Err(Error::from(e));
        }
        Ok(id)
    }

    /// Applies every state event already queued, without waiting.
    pub async fn process_pending_events(&mut self) {
        while let Ok((id, st)) = self.events_rx.try_recv() {
            self.live.on_connection_state(&id, st).await;
        }
    }
}
