//! Wire format for action messages.
//!
//! Messages are sbor-encoded then LZ4-compressed. The size prefix is part
//! of LZ4's framing; it stores the original uncompressed size so
//! decompression can pre-allocate the output buffer.

use crate::ActionMessage;
use thiserror::Error;

/// Errors from wire encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message too short")]
    MessageTooShort,

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("decompression failed: {0}")]
    Decompress(String),
}

/// Encode a message to wire format.
pub fn encode_message(message: &ActionMessage) -> Result<Vec<u8>, CodecError> {
    let bytes = sbor::basic_encode(message).map_err(|e| CodecError::Encode(format!("{e:?}")))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decode a message from wire format.
pub fn decode_message(data: &[u8]) -> Result<ActionMessage, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    let bytes = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    sbor::basic_decode(&bytes).map_err(|e| CodecError::Decode(format!("{e:?}")))
}
