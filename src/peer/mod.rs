pub mod codec;
pub mod connection;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use codec::CodecPreference;
pub use connection::{validate_ice_servers, RtcConnector};
pub use state::{ConnectionState, GatheringState, SessionState};
pub use transport::{Connector, StateEvent, Transport};
pub use types::{IceServerKind, SdpType, ServerConfig, SessionId, SignalingEnvelope};
