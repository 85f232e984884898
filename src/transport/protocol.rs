//! JSON message protocol of the telephony media stream WebSocket.
//!
//! Inbound frames carry call lifecycle events and base64 caller audio;
//! outbound frames carry base64 reply audio and playback markers.

use crate::error::{CallrelayError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Events sent by the telephony provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    /// WebSocket established, no call metadata yet.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    /// Stream metadata; outbound frames must carry `stream_sid`.
    Start { start: StartMetadata },
    /// One chunk of caller audio.
    Media { media: MediaPayload },
    /// A previously sent marker was reached during playback.
    Mark { mark: MarkPayload },
    /// The media stream ended.
    Stop,
    /// Any event this bridge does not act on (dtmf, ...).
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CallrelayError::Protocol {
            message: format!("invalid inbound frame: {}", e),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio.
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

impl MediaPayload {
    /// Encode raw audio bytes.
    pub fn encode(audio: &[u8]) -> Self {
        Self {
            payload: STANDARD.encode(audio),
            track: None,
        }
    }

    /// Decode the base64 payload to raw audio bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| CallrelayError::Protocol {
                message: format!("invalid media payload: {}", e),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Frames written back to the telephony provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Reply audio to play.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Marker echoed back once everything before it was played.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Discard any audio queued for playback.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundMessage {
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        OutboundMessage::Media {
            stream_sid: stream_sid.to_string(),
            media: MediaPayload::encode(audio),
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        OutboundMessage::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload {
                name: name.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        OutboundMessage::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    /// Serialize message to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connected() {
        let event =
            InboundEvent::parse(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#)
                .unwrap();
        assert_eq!(
            event,
            InboundEvent::Connected {
                protocol: Some("Call".to_string())
            }
        );
    }

    #[test]
    fn test_parse_start() {
        let text = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ18ad3ab5a668481ce02b83e7395059f0",
                "accountSid": "AC123",
                "callSid": "CA123",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ18ad3ab5a668481ce02b83e7395059f0"
        }"#;

        match InboundEvent::parse(text).unwrap() {
            InboundEvent::Start { start } => {
                assert_eq!(start.stream_sid, "MZ18ad3ab5a668481ce02b83e7395059f0");
                assert_eq!(start.call_sid.as_deref(), Some("CA123"));
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_and_decode() {
        let text = r#"{"event":"media","sequenceNumber":"3","media":{"track":"inbound","chunk":"1","timestamp":"5","payload":"AAEC"},"streamSid":"MZ1"}"#;

        match InboundEvent::parse(text).unwrap() {
            InboundEvent::Media { media } => {
                assert_eq!(media.track.as_deref(), Some("inbound"));
                assert_eq!(media.decode().unwrap(), vec![0, 1, 2]);
            }
            other => panic!("expected media, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_mark_and_stop() {
        let mark = InboundEvent::parse(r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"abc"}}"#)
            .unwrap();
        assert_eq!(
            mark,
            InboundEvent::Mark {
                mark: MarkPayload {
                    name: "abc".to_string()
                }
            }
        );

        let stop = InboundEvent::parse(
            r#"{"event":"stop","streamSid":"MZ1","stop":{"accountSid":"AC1","callSid":"CA1"}}"#,
        )
        .unwrap();
        assert_eq!(stop, InboundEvent::Stop);
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let event =
            InboundEvent::parse(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#).unwrap();
        assert_eq!(event, InboundEvent::Unknown);
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        let err = InboundEvent::parse("not json").unwrap_err();
        assert!(matches!(err, CallrelayError::Protocol { .. }));

        let err = InboundEvent::parse(r#"{"event":"media"}"#).unwrap_err();
        assert!(matches!(err, CallrelayError::Protocol { .. }));
    }

    #[test]
    fn test_invalid_base64_is_protocol_error() {
        let media = MediaPayload {
            payload: "***".to_string(),
            track: None,
        };
        assert!(matches!(
            media.decode(),
            Err(CallrelayError::Protocol { .. })
        ));
    }

    #[test]
    fn test_outbound_media_json_shape() {
        let json = OutboundMessage::media("MZ1", &[0, 1, 2]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "MZ1");
        assert_eq!(value["media"]["payload"], "AAEC");
        assert!(value["media"].get("track").is_none());
    }

    #[test]
    fn test_outbound_mark_json_shape() {
        let json = OutboundMessage::mark("MZ1", "label-1").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], "mark");
        assert_eq!(value["streamSid"], "MZ1");
        assert_eq!(value["mark"]["name"], "label-1");
    }

    #[test]
    fn test_outbound_clear_json_shape() {
        let json = OutboundMessage::Clear {
            stream_sid: "MZ1".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"event":"clear","streamSid":"MZ1"}"#);
    }
}
