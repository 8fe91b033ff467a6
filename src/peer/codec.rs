use crate::error::NegotiationError;
use std::fmt;
use std::str::FromStr;
use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;

/// A `"<kind>/<name>"` codec restriction such as `video/H264`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPreference {
    kind: RTPCodecType,
    mime_type: String,
}

impl CodecPreference {
    pub fn kind(&self) -> RTPCodecType {
        self.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn matches(&self, mime_type: &str) -> bool {
        self.mime_type.eq_ignore_ascii_case(mime_type)
    }
}

impl FromStr for CodecPreference {
    type Err = NegotiationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| NegotiationError::UnsupportedCodec(s.to_string()))?;
        let kind = match kind.to_ascii_lowercase().as_str() {
            "video" => RTPCodecType::Video,
            "audio" => RTPCodecType::Audio,
            _ => return Err(NegotiationError::UnsupportedCodec(s.to_string())),
        };
        if name.is_empty() {
            return Err(NegotiationError::UnsupportedCodec(s.to_string()));
        }
        Ok(Self {
            kind,
            mime_type: s.to_string(),
        })
    }
}

impl fmt::Display for CodecPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime_type)
    }
}

/// A codec the answering side is able to send.
#[derive(Debug, Clone)]
pub struct CodecEntry {
    pub kind: RTPCodecType,
    pub params: RTCRtpCodecParameters,
}

impl CodecEntry {
    pub fn mime_type(&self) -> &str {
        &self.params.capability.mime_type
    }
}

fn video_feedback() -> Vec<RTCPFeedback> {
    [("goog-remb", ""), ("ccm", "fir"), ("nack", ""), ("nack", "pli")]
        .into_iter()
        .map(|(typ, parameter)| RTCPFeedback {
            typ: typ.to_owned(),
            parameter: parameter.to_owned(),
        })
        .collect()
}

fn entry(
    kind: RTPCodecType,
    mime_type: &str,
    clock_rate: u32,
    channels: u16,
    fmtp: &str,
    payload_type: u8,
) -> CodecEntry {
    let rtcp_feedback = if kind == RTPCodecType::Video {
        video_feedback()
    } else {
        vec![]
    };
    CodecEntry {
        kind,
        params: RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                clock_rate,
                channels,
                sdp_fmtp_line: fmtp.to_owned(),
                rtcp_feedback,
            },
            payload_type,
            ..Default::default()
        },
    }
}

/// Codec capability table offered when no preference narrows it.
pub fn default_capabilities() -> Vec<CodecEntry> {
    vec![
        entry(
            RTPCodecType::Audio,
            MIME_TYPE_OPUS,
            48000,
            2,
            "minptime=10;useinbandfec=1",
            111,
        ),
        entry(RTPCodecType::Video, MIME_TYPE_VP8, 90000, 0, "", 96),
        entry(RTPCodecType::Video, MIME_TYPE_VP9, 90000, 0, "profile-id=0", 98),
        entry(
            RTPCodecType::Video,
            MIME_TYPE_H264,
            90000,
            0,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f",
            102,
        ),
        entry(
            RTPCodecType::Video,
            MIME_TYPE_H264,
            90000,
            0,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
            125,
        ),
    ]
}

/// Applies `preference` to `capabilities`: codecs of the preferred kind are
/// reduced to the matching entries, codecs of the other kind are kept.
pub fn filter_capabilities(
    capabilities: Vec<CodecEntry>,
    preference: Option<&CodecPreference>,
) -> Result<Vec<CodecEntry>, NegotiationError> {
    let Some(pref) = preference else {
        return Ok(capabilities);
    };

    let (same_kind, other): (Vec<_>, Vec<_>) =
        capabilities.into_iter().partition(|c| c.kind == pref.kind());
    let kept: Vec<CodecEntry> = same_kind
        .into_iter()
        .filter(|c| pref.matches(c.mime_type()))
        .collect();
    if kept.is_empty() {
        return Err(NegotiationError::UnsupportedCodec(pref.to_string()));
    }
    Ok(other.into_iter().chain(kept).collect())
}

/// Builds a media engine that can only negotiate `codecs`.
pub fn media_engine_for(codecs: &[CodecEntry]) -> Result<MediaEngine, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    for codec in codecs {
        media_engine.register_codec(codec.params.clone(), codec.kind)?;
    }
    Ok(media_engine)
}

/// First codec of `kind` in the list, used to type the outgoing track.
pub fn primary_codec(codecs: &[CodecEntry], kind: RTPCodecType) -> Option<&CodecEntry> {
    codecs.iter().find(|c| c.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp8_and_h264() -> Vec<CodecEntry> {
        vec![
            entry(RTPCodecType::Video, MIME_TYPE_VP8, 90000, 0, "", 96),
            entry(RTPCodecType::Video, MIME_TYPE_H264, 90000, 0, "", 102),
        ]
    }

    #[test]
    fn preference_selects_exact_entry() {
        let pref: CodecPreference = "video/H264".parse().unwrap();
        let kept = filter_capabilities(vp8_and_h264(), Some(&pref)).unwrap();
        let mime_types: Vec<_> = kept.iter().map(CodecEntry::mime_type).collect();
        assert_eq!(mime_types, vec!["video/H264"]);
    }

    #[test]
    fn preference_matching_nothing_is_unsupported() {
        let pref: CodecPreference = "video/hh".parse().unwrap();
        let err = filter_capabilities(vp8_and_h264(), Some(&pref)).unwrap_err();
        assert!(matches!(err, NegotiationError::UnsupportedCodec(name) if name == "video/hh"));
    }

    #[test]
    fn malformed_preference_is_rejected() {
        assert!("H264".parse::<CodecPreference>().is_err());
        assert!("text/plain".parse::<CodecPreference>().is_err());
        assert!("video/".parse::<CodecPreference>().is_err());
    }

    #[test]
    fn filter_keeps_other_kind_and_all_matching_profiles() {
        let pref: CodecPreference = "video/H264".parse().unwrap();
        let filtered = filter_capabilities(default_capabilities(), Some(&pref)).unwrap();
        let video: Vec<_> = filtered
            .iter()
            .filter(|c| c.kind == RTPCodecType::Video)
            .map(|c| c.mime_type().to_string())
            .collect();
        assert_eq!(video, vec![MIME_TYPE_H264, MIME_TYPE_H264]);
        assert!(filtered.iter().any(|c| c.mime_type() == MIME_TYPE_OPUS));
    }

    #[test]
    fn filter_without_preference_is_identity() {
        let all = default_capabilities().len();
        assert_eq!(filter_capabilities(default_capabilities(), None).unwrap().len(), all);
    }

    #[test]
    fn filter_fails_for_unknown_codec() {
        let pref: CodecPreference = "video/AV9".parse().unwrap();
        assert!(matches!(
            filter_capabilities(default_capabilities(), Some(&pref)),
            Err(NegotiationError::UnsupportedCodec(_))
        ));
    }
}
