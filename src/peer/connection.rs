use crate::error::{Error, NegotiationError};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::codec::{
    default_capabilities, filter_capabilities, media_engine_for, primary_codec, CodecEntry,
    CodecPreference,
};
use crate::peer::ice::analyze_candidates;
use crate::peer::state::{ConnectionState, GatheringState};
use crate::peer::transport::{Connector, StateEvent, Transport};
use crate::peer::types::{IceServerKind, ServerConfig, SessionId, SignalingEnvelope};
use crate::source::Frame;
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Builds webrtc-rs peer connections restricted to the preferred codec.
pub struct RtcConnector {
    ice_servers: Vec<ServerConfig>,
    codec: Option<CodecPreference>,
}

impl RtcConnector {
    pub fn new(ice_servers: Vec<ServerConfig>, codec: Option<CodecPreference>) -> Self {
        Self { ice_servers, codec }
    }
}

#[async_trait]
impl Connector for RtcConnector {
    async fn connect(
        &self,
        id: &SessionId,
        events: mpsc::UnboundedSender<StateEvent>,
    ) -> Result<Arc<dyn Transport>, NegotiationError> {
        let codecs = filter_capabilities(default_capabilities(), self.codec.as_ref())?;
        let mut media_engine = media_engine_for(&codecs)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);

        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => dump_candidate("LOCAL", &c),
                None => debug!("ICE candidate gathering completed (null candidate received)"),
            }
            Box::pin(async {})
        }));

        let gather_id = id.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!(session = %gather_id, "ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        let state_id = id.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(session = %state_id, "Peer connection state changed to: {:?}", st);
            // coordinator gone means shutdown, nothing to report to
            let _ = events.send((state_id.clone(), ConnectionState::from(st)));
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcTransport {
            id: id.clone(),
            pc,
            codecs,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

/// Peer connection configuration. An empty server list gathers host
/// candidates only.
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

/// Rejects entries that can never work: empty URLs and TURN without credentials.
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), Error> {
    for server in servers {
        if server.url.is_empty() {
            return Err(Error::Config("ICE server URL cannot be empty".into()));
        }
        if server.kind == IceServerKind::Turn && (server.username.is_none() || server.credential.is_none()) {
            return Err(Error::Config(format!(
                "TURN server {} requires username and credential",
                server.url
            )));
        }
    }
    Ok(())
}

/// webrtc-rs backed [`Transport`].
pub struct RtcTransport {
    id: SessionId,
    pc: Arc<RTCPeerConnection>,
    codecs: Vec<CodecEntry>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RtcTransport {
    fn track_task(&self, handle: JoinHandle<()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(_) => handle.abort(),
        }
    }
}

#[async_trait]
impl Transport for RtcTransport {
    async fn set_remote_description(&self, offer: &SignalingEnvelope) -> Result<(), NegotiationError> {
        let desc = offer.to_rtc()?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| NegotiationError::MalformedDescription(e.to_string()))
    }

    async fn attach_video(&self, frames: broadcast::Receiver<Frame>) -> Result<(), NegotiationError> {
        let codec = primary_codec(&self.codecs, RTPCodecType::Video)
            .ok_or_else(|| NegotiationError::UnsupportedCodec("video/*".into()))?;

        let track = Arc::new(TrackLocalStaticSample::new(
            codec.params.capability.clone(),
            "video".to_owned(),
            format!("camrelay-{}", self.id),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        info!(session = %self.id, "video track attached ({})", codec.mime_type());

        // RTCP has to be drained for the interceptors to work
        self.track_task(tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        }));
        self.track_task(tokio::spawn(write_frames(self.id.clone(), track, frames)));
        Ok(())
    }

    async fn create_answer(&self) -> Result<(), NegotiationError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        Ok(())
    }

    fn gathering_state(&self) -> GatheringState {
        self.pc.ice_gathering_state().into()
    }

    fn connection_state(&self) -> ConnectionState {
        self.pc.connection_state().into()
    }

    async fn local_description(&self) -> Option<SignalingEnvelope> {
        let desc = self.pc.local_description().await?;
        analyze_candidates(&desc.sdp);
        SignalingEnvelope::try_from(&desc).ok()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.pc.close().await?;
        Ok(())
    }

    async fn log_failure(&self) {
        dump_selected_pair(&self.pc, "BEFORE-FAIL").await;
    }
}

async fn write_frames(
    id: SessionId,
    track: Arc<TrackLocalStaticSample>,
    mut frames: broadcast::Receiver<Frame>,
) {
    loop {
        match frames.recv().await {
            Ok(frame) => {
                let sample = Sample {
                    data: frame.data,
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!(session = %id, "write_sample failed: {}", e);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(session = %id, "video track skipped {} frames", skipped);
            }
            Err(RecvError::Closed) => {
                warn!(session = %id, "video source closed, stopping track");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stun_server_keeps_its_scheme() {
        let cfg = rtc_config(&[ServerConfig::stun(DEFAULT_STUN_SERVER)]);
        assert_eq!(cfg.ice_servers.len(), 1);
        assert_eq!(cfg.ice_servers[0].urls, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(cfg.bundle_policy, RTCBundlePolicy::MaxBundle);
        assert!(rtc_config(&[]).ice_servers.is_empty());
    }

    #[test]
    fn turn_credentials_are_carried() {
        let servers = vec![ServerConfig {
            kind: IceServerKind::Turn,
            url: "turn.example.org:3478".into(),
            username: Some("user".into()),
            credential: Some("secret".into()),
        }];
        validate_ice_servers(&servers).unwrap();
        let ice = get_user_ice_servers(&servers);
        assert_eq!(ice[0].urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(ice[0].username, "user");
        assert_eq!(ice[0].credential, "secret");
    }

    #[test]
    fn invalid_servers_are_rejected() {
        let mut turn = ServerConfig::stun("turn.example.org");
        turn.kind = IceServerKind::Turn;
        assert!(validate_ice_servers(&[turn]).is_err());
        assert!(validate_ice_servers(&[ServerConfig::stun("")]).is_err());
    }
}
