use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::EnvelopeError;

/// Compress data with gzip at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| EnvelopeError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EnvelopeError::Compression(e.to_string()))
}

/// Decompress gzip data.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| EnvelopeError::Decompression(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data = br#"[{"id":"PollCount","type":"counter","delta":1}]"#;
        let compressed = compress(data).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        assert_eq!(decompress(&compressed).unwrap(), data.to_vec());
    }

    #[test]
    fn test_empty() {
        let compressed = compress(b"").unwrap();
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            decompress(b"definitely not gzip"),
            Err(EnvelopeError::Decompression(_))
        ));
    }
}
