//! # Wire Codec Boundary
//!
//! The pipeline hands [`Envelope`]s to a codec and gets bytes back. Framing
//! belongs to whatever carries the bytes; one call encodes one frame.

use crate::error::{PipelineError, PipelineResult};
use crate::protocol::Envelope;

/// Maps structured messages to and from wire frames.
pub trait WireCodec: Send + Sync + 'static {
    fn encode(&self, envelope: &Envelope) -> PipelineResult<Vec<u8>>;

    fn decode(&self, frame: &[u8]) -> PipelineResult<Envelope>;
}

/// JSON codec for in-process devices and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> PipelineResult<Vec<u8>> {
        serde_json::to_vec(envelope).map_err(|e| PipelineError::EncodeFailed(e.to_string()))
    }

    fn decode(&self, frame: &[u8]) -> PipelineResult<Envelope> {
        serde_json::from_slice(frame).map_err(|e| PipelineError::DecodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorMsg, OfMessage};
    use ofsb_core::Xid;

    #[test]
    fn test_json_codec_decodes_device_error() {
        let frame = br#"{"xid":42,"message":{"type":"Error","payload":{"err_type":6,"code":0}}}"#;
        let envelope = JsonCodec.decode(frame).unwrap();

        assert_eq!(envelope.xid, Xid::new(42));
        assert_eq!(envelope.message, OfMessage::Error(ErrorMsg::new(6, 0, "")));
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let err = JsonCodec.decode(b"not json").unwrap_err();
        assert!(matches!(err, PipelineError::DecodeFailed(_)));
    }
}
