//! Codec for encoding/decoding tunnel messages
//!
//! One message per WebSocket text frame, JSON encoded.

use crate::messages::TunnelMessage;
use crate::MAX_FRAME_SIZE;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Tunnel message codec
pub struct TunnelCodec;

impl TunnelCodec {
    /// Encode a tunnel message to a text frame
    pub fn encode(msg: &TunnelMessage) -> Result<String, CodecError> {
        let text = serde_json::to_string(msg)?;

        if text.len() > MAX_FRAME_SIZE {
            return Err(CodecError::MessageTooLarge(text.len()));
        }

        Ok(text)
    }

    /// Decode a tunnel message from a text frame
    pub fn decode(text: &str) -> Result<TunnelMessage, CodecError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(CodecError::MessageTooLarge(text.len()));
        }

        Ok(serde_json::from_str(text)?)
    }

    /// Decode a tunnel message from raw frame bytes
    pub fn decode_bytes(bytes: &[u8]) -> Result<TunnelMessage, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Self::decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ReplyEnvelope, RequestData, RequestEnvelope};

    #[test]
    fn test_encode_decode_request() {
        let msg = TunnelMessage::Request(RequestEnvelope::new(
            "agent-1",
            RequestData::new("svc", "/health", "GET", ""),
        ));

        let encoded = TunnelCodec::encode(&msg).unwrap();
        let decoded = TunnelCodec::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        let result = TunnelCodec::decode(r#"{"hello":"world"}"#);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TunnelCodec::decode("not json at all").is_err());
        assert!(TunnelCodec::decode("").is_err());
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_utf8() {
        let result = TunnelCodec::decode_bytes(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(CodecError::InvalidUtf8)));
    }

    #[test]
    fn test_decode_bytes_reply() {
        let decoded = TunnelCodec::decode_bytes(br#"{"responseID":"r1","payload":"ok"}"#).unwrap();
        assert_eq!(decoded, TunnelMessage::Reply(ReplyEnvelope::new("r1", "ok")));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let huge = "x".repeat(MAX_FRAME_SIZE + 1);
        assert!(matches!(
            TunnelCodec::decode(&huge),
            Err(CodecError::MessageTooLarge(_))
        ));

        let msg = TunnelMessage::Reply(ReplyEnvelope::new("r1", huge));
        assert!(matches!(
            TunnelCodec::encode(&msg),
            Err(CodecError::MessageTooLarge(_))
        ));
    }
}
