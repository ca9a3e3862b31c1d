//! Shareable level references
//!
//! A level pack can be handed around as an opaque token: the payload is
//! serialized to JSON and base64-encoded so it survives a URL query
//! parameter. Decoding is the exact inverse and never panics on hostile
//! input.

use super::{validate_grid, StartPosition, TileGrid};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted encoded token size (256 KB)
const MAX_ENCODED_LEN: usize = 256 * 1024;

/// The level pack carried by a shareable reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePayload {
    pub levels: Vec<TileGrid>,
    pub level_names: Vec<String>,
    pub player_start_positions: Vec<StartPosition>,
}

/// Error type for share token decoding
#[derive(Debug, Clone, PartialEq)]
pub enum ShareDecodeError {
    /// Token exceeds the size cap
    TooLarge { size: usize, max: usize },
    /// Token is not valid base64
    Base64(String),
    /// Decoded bytes are not a valid payload
    Json(String),
    /// Payload carried a malformed grid
    Invalid(String),
}

impl fmt::Display for ShareDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareDecodeError::TooLarge { size, max } => {
                write!(f, "share token too large: {} bytes (max: {})", size, max)
            }
            ShareDecodeError::Base64(msg) => write!(f, "base64 decode error: {}", msg),
            ShareDecodeError::Json(msg) => write!(f, "payload parse error: {}", msg),
            ShareDecodeError::Invalid(msg) => write!(f, "invalid payload: {}", msg),
        }
    }
}

impl std::error::Error for ShareDecodeError {}

/// Encode a payload into an opaque URL-safe token
pub fn encode_share_payload(payload: &SharePayload) -> String {
    let json = serde_json::to_vec(payload).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(json)
}

/// Decode a share token back into its payload
///
/// Accepts standard base64. Oversized or malformed input fails with a
/// [`ShareDecodeError`] rather than a crash.
pub fn decode_share_payload(token: &str) -> Result<SharePayload, ShareDecodeError> {
    if token.len() > MAX_ENCODED_LEN {
        return Err(ShareDecodeError::TooLarge {
            size: token.len(),
            max: MAX_ENCODED_LEN,
        });
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| ShareDecodeError::Base64(e.to_string()))?;

    let payload: SharePayload =
        serde_json::from_slice(&bytes).map_err(|e| ShareDecodeError::Json(e.to_string()))?;

    for (i, grid) in payload.levels.iter().enumerate() {
        validate_grid(grid)
            .map_err(|e| ShareDecodeError::Invalid(format!("level {}: {}", i, e)))?;
    }

    Ok(payload)
}
