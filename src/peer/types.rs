use crate::error::NegotiationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// One half of an offer/answer exchange, as carried over signaling.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignalingEnvelope {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpType,
}

impl SignalingEnvelope {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Answer,
        }
    }

    pub fn to_rtc(&self) -> Result<RTCSessionDescription, NegotiationError> {
        let desc = match self.kind {
            SdpType::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        desc.map_err(|e| NegotiationError::MalformedDescription(e.to_string()))
    }
}

impl TryFrom<&RTCSessionDescription> for SignalingEnvelope {
    type Error = NegotiationError;

    fn try_from(desc: &RTCSessionDescription) -> Result<Self, Self::Error> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            other => {
                return Err(NegotiationError::MalformedDescription(format!(
                    "unexpected description type {other}"
                )))
            }
        };
        Ok(Self {
            sdp: desc.sdp.clone(),
            kind,
        })
    }
}

/// Live-set key of a peer session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn random() -> Self {
        Self(crate::utils::random_id())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

impl IceServerKind {
    pub fn scheme(self) -> &'static str {
        match self {
            IceServerKind::Stun => "stun:",
            IceServerKind::Turn => "turn:",
        }
    }
}

/// ICE server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(rename = "type")]
    pub kind: IceServerKind,
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            kind: IceServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}
