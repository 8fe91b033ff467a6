#![allow(dead_code)]

use async_trait::async_trait;
use camrelay_lib::error::{ChannelError, NegotiationError, SourceError};
use camrelay_lib::peer::{
    ConnectionState, Connector, GatheringState, SessionId, SignalingEnvelope, StateEvent, Transport,
};
use camrelay_lib::signaling::SignalingChannel;
use camrelay_lib::source::{Frame, SourceDescriptor, SourceFactory, SourceSpec, VideoSource};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

/// Transport that answers every offer and reports state changes on demand.
pub struct FakeTransport {
    pub id: SessionId,
    events: mpsc::UnboundedSender<StateEvent>,
    state: Mutex<ConnectionState>,
    answered: AtomicBool,
    pub video_attached: AtomicBool,
    pub closed: AtomicBool,
    reject_remote: bool,
    close_while_gathering: bool,
}

impl FakeTransport {
    /// Simulates the underlying connection changing state.
    pub fn emit(&self, st: ConnectionState) {
        *self.state.lock().unwrap() = st;
        let _ = self.events.send((self.id.clone(), st));
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn set_remote_description(&self, offer: &SignalingEnvelope) -> Result<(), NegotiationError> {
        if self.reject_remote || !offer.sdp.starts_with("v=0") {
            return Err(NegotiationError::MalformedDescription(offer.sdp.clone()));
        }
        Ok(())
    }

    async fn attach_video(&self, _frames: broadcast::Receiver<Frame>) -> Result<(), NegotiationError> {
        self.video_attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_answer(&self) -> Result<(), NegotiationError> {
        if self.close_while_gathering {
            // gathering never completes and the connection goes away under it
            *self.state.lock().unwrap() = ConnectionState::Closed;
            return Ok(());
        }
        self.answered.store(true, Ordering::SeqCst);
        self.emit(ConnectionState::Connecting);
        Ok(())
    }

    fn gathering_state(&self) -> GatheringState {
        if self.answered.load(Ordering::SeqCst) {
            GatheringState::Complete
        } else {
            GatheringState::New
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn local_description(&self) -> Option<SignalingEnvelope> {
        self.answered
            .load(Ordering::SeqCst)
            .then(|| SignalingEnvelope::answer(format!("v=0 answer {}", self.id)))
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub transports: Mutex<Vec<Arc<FakeTransport>>>,
    pub reject_remote: AtomicBool,
    pub close_while_gathering: AtomicBool,
}

impl FakeConnector {
    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.transports.lock().unwrap()[index].clone()
    }

    pub fn by_id(&self, id: &SessionId) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .find(|t| &t.id == id)
            .cloned()
            .expect("no transport for session")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        id: &SessionId,
        events: mpsc::UnboundedSender<StateEvent>,
    ) -> Result<Arc<dyn Transport>, NegotiationError> {
        let transport = Arc::new(FakeTransport {
            id: id.clone(),
            events,
            state: Mutex::new(ConnectionState::New),
            answered: AtomicBool::new(false),
            video_attached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reject_remote: self.reject_remote.load(Ordering::SeqCst),
            close_while_gathering: self.close_while_gathering.load(Ordering::SeqCst),
        });
        self.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

/// Opens and releases of every source a factory built.
#[derive(Default)]
pub struct SourceCounters {
    pub opens: AtomicUsize,
    pub releases: AtomicUsize,
}

impl SourceCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Wraps any source and counts its lifecycle calls.
pub struct CountingSource {
    inner: Box<dyn VideoSource>,
    counters: Arc<SourceCounters>,
}

#[async_trait]
impl VideoSource for CountingSource {
    fn descriptor(&self) -> &SourceDescriptor {
        self.inner.descriptor()
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.start().await
    }

    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        self.inner.next_frame().await
    }

    async fn release(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release().await
    }
}

pub fn counting(inner: SourceFactory) -> (SourceFactory, Arc<SourceCounters>) {
    let counters = Arc::new(SourceCounters::default());
    let shared = counters.clone();
    let factory: SourceFactory = Arc::new(move || {
        Box::new(CountingSource {
            inner: inner(),
            counters: shared.clone(),
        }) as Box<dyn VideoSource>
    });
    (factory, counters)
}

/// Small synthetic source, counted.
pub fn counting_factory() -> (SourceFactory, Arc<SourceCounters>) {
    counting(
        SourceSpec::Synthetic {
            width: 8,
            height: 6,
            fps: 30,
        }
        .factory(),
    )
}

/// Raw `bgr24` recording of `frames` frames, readable as a camera device.
pub fn recording(frames: usize, width: u32, height: u32) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let frame_size = width as usize * height as usize * 3;
    for i in 0..frames {
        file.write_all(&vec![i as u8; frame_size]).unwrap();
    }
    file.flush().unwrap();
    file
}

#[derive(Default)]
struct ScriptedInner {
    polls: Mutex<VecDeque<Result<Option<SignalingEnvelope>, ChannelError>>>,
    published: Mutex<Vec<(String, SignalingEnvelope)>>,
    fail_publish: AtomicBool,
}

/// Channel replaying a fixed list of poll results, then reporting nothing pending.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    inner: Arc<ScriptedInner>,
}

impl ScriptedChannel {
    pub fn push_offer(&self, sdp: &str) {
        self.inner
            .polls
            .lock()
            .unwrap()
            .push_back(Ok(Some(SignalingEnvelope::offer(sdp))));
    }

    pub fn push_error(&self) {
        self.inner
            .polls
            .lock()
            .unwrap()
            .push_back(Err(ChannelError::Status(503)));
    }

    pub fn fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, SignalingEnvelope)> {
        self.inner.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingChannel for ScriptedChannel {
    async fn fetch_offer(&self) -> Result<Option<SignalingEnvelope>, ChannelError> {
        self.inner.polls.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn publish_answer(
        &self,
        correlation_id: &str,
        answer: &SignalingEnvelope,
    ) -> Result<(), ChannelError> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(ChannelError::Status(500));
        }
        self.inner
            .published
            .lock()
            .unwrap()
            .push((correlation_id.to_string(), answer.clone()));
        Ok(())
    }
}
