//! Gzip + base64 payload encoding for large batches.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{Result, SweepError};

pub fn gzip_base64(data: &[u8]) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

pub fn gunzip_base64(encoded: &str) -> Result<Vec<u8>> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| SweepError::Transport(format!("Invalid base64 payload: {}", e)))?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetitive_payload_shrinks() {
        let data = "{\"rule\":\"color-contrast\"}".repeat(500);
        let encoded = gzip_base64(data.as_bytes()).unwrap();
        assert!(encoded.len() < data.len() / 4);
        assert_eq!(gunzip_base64(&encoded).unwrap(), data.as_bytes());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(gunzip_base64("%%%").is_err());
    }
}
