//! Local level library encoding
//!
//! The locally authored level set is persisted as a single RON document,
//! brotli-compressed on write. Reading auto-detects the format so plain RON
//! written by hand (or by older builds) still loads.

use super::{validate_local_level, LocalLevel};
use std::fmt;
use std::io::Cursor;

/// Error type for library encoding/decoding
#[derive(Debug)]
pub enum LibraryError {
    Parse(ron::error::SpannedError),
    Serialize(ron::Error),
    Compression(String),
    InvalidUtf8(String),
    Validation(String),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::Parse(e) => write!(f, "parse error: {}", e),
            LibraryError::Serialize(e) => write!(f, "serialize error: {}", e),
            LibraryError::Compression(msg) => write!(f, "compression error: {}", msg),
            LibraryError::InvalidUtf8(msg) => write!(f, "invalid UTF-8: {}", msg),
            LibraryError::Validation(msg) => write!(f, "validation error: {}", msg),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<ron::error::SpannedError> for LibraryError {
    fn from(e: ron::error::SpannedError) -> Self {
        LibraryError::Parse(e)
    }
}

impl From<ron::Error> for LibraryError {
    fn from(e: ron::Error) -> Self {
        LibraryError::Serialize(e)
    }
}

/// Serialize a level library to compressed bytes
pub fn serialize_library(levels: &[LocalLevel]) -> Result<Vec<u8>, LibraryError> {
    let config = ron::ser::PrettyConfig::new()
        .depth_limit(4)
        .indentor("  ".to_string());

    let ron_string = ron::ser::to_string_pretty(&levels, config)?;

    // Brotli quality 6, window 22 - good balance of speed/ratio
    let mut compressed = Vec::new();
    brotli::BrotliCompress(
        &mut Cursor::new(ron_string.as_bytes()),
        &mut compressed,
        &brotli::enc::BrotliEncoderParams {
            quality: 6,
            lgwin: 22,
            ..Default::default()
        },
    )
    .map_err(|e| LibraryError::Compression(e.to_string()))?;

    Ok(compressed)
}

/// Parse a level library from bytes (compressed or plain RON)
pub fn parse_library(bytes: &[u8]) -> Result<Vec<LocalLevel>, LibraryError> {
    // Detect format: RON starts with '[' / '(' or whitespace, brotli is binary
    let is_plain_ron = bytes
        .first()
        .map(|&b| matches!(b, b'[' | b'(' | b' ' | b'\n' | b'\r' | b'\t'))
        .unwrap_or(false);

    let contents = if is_plain_ron {
        String::from_utf8(bytes.to_vec()).map_err(|e| LibraryError::InvalidUtf8(e.to_string()))?
    } else {
        let mut decompressed = Vec::new();
        brotli::BrotliDecompress(&mut Cursor::new(bytes), &mut decompressed)
            .map_err(|e| LibraryError::Compression(e.to_string()))?;
        String::from_utf8(decompressed).map_err(|e| LibraryError::InvalidUtf8(e.to_string()))?
    };

    let levels: Vec<LocalLevel> = ron::from_str(&contents)?;

    for (i, level) in levels.iter().enumerate() {
        validate_local_level(level)
            .map_err(|e| LibraryError::Validation(format!("level {}: {}", i, e)))?;
    }

    Ok(levels)
}
