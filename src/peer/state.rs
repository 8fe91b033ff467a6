use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Negotiation state of a peer session.
///
/// `idle -> negotiating -> {connected, failed}`, `connected -> failed`, and any
/// live state may be closed. `failed` and `closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Negotiating) => true,
            (Negotiating, Connected) | (Negotiating, Failed) => true,
            (Connected, Failed) => true,
            (Idle | Negotiating | Connected, Closed) => true,
            _ => false,
        }
    }
}

/// Transport-level connection state, as reported by the underlying library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Session state a connection-state change leads to, if any.
    /// `disconnected` can still recover, so it moves nothing.
    pub fn session_target(self) -> Option<SessionState> {
        match self {
            ConnectionState::Connected => Some(SessionState::Connected),
            ConnectionState::Failed => Some(SessionState::Failed),
            ConnectionState::Closed => Some(SessionState::Closed),
            _ => None,
        }
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(st: RTCPeerConnectionState) -> Self {
        match st {
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

impl From<RTCIceGatheringState> for GatheringState {
    fn from(st: RTCIceGatheringState) -> Self {
        match st {
            RTCIceGatheringState::Gathering => GatheringState::Gathering,
            RTCIceGatheringState::Complete => GatheringState::Complete,
            _ => GatheringState::New,
        }
    }
}
