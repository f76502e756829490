//! Compressed hub payload decoding.
//!
//! Some hubs ship large results and event arguments as text of the form
//! `base64(raw-deflate(json))`. [`decode_payload`] reverses that. The deflate
//! stream carries no zlib or gzip header.
//!
//! ```ignore
//! if let Some(text) = envelope.compressed_result() {
//!     let value = decode_payload(text)?;
//! }
//! ```

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use serde_json::Value;

/// Failure at one of the three decoding stages.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The text is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The bytes are not a raw deflate stream.
    #[error("invalid deflate stream: {0}")]
    Inflate(#[from] std::io::Error),

    /// The inflated text is not JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a `base64(raw-deflate(json))` payload.
///
/// # Errors
///
/// Returns the [`DecodeError`] of the first stage that fails.
pub fn decode_payload(text: &str) -> Result<Value, DecodeError> {
    let compressed = STANDARD.decode(text.trim())?;

    let mut inflated = Vec::with_capacity(compressed.len() * 4);
    DeflateDecoder::new(compressed.as_slice()).read_to_end(&mut inflated)?;

    Ok(serde_json::from_slice(&inflated)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn encode(json: &str) -> String {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        STANDARD.encode(encoder.finish().unwrap())
    }

    #[test]
    fn test_decodes_compressed_json() {
        let payload = encode(r#"{"Markets":[{"MarketName":"BTC-ETH","Last":0.034}]}"#);

        let value = decode_payload(&payload).unwrap();

        assert_eq!(value["Markets"][0]["MarketName"], json!("BTC-ETH"));
        assert_eq!(value["Markets"][0]["Last"], json!(0.034));
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let payload = format!("  {}\n", encode("[1,2,3]"));
        assert_eq!(decode_payload(&payload).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_rejects_invalid_base64() {
        let err = decode_payload("not base64!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_rejects_non_deflate_bytes() {
        let payload = STANDARD.encode([0xff, 0xff, 0xff, 0xff]);
        let err = decode_payload(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::Inflate(_)));
    }

    #[test]
    fn test_rejects_non_json_content() {
        let err = decode_payload(&encode("plain text")).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }
}
