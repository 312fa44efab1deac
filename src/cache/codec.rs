//! Compressed string form of the persisted cache.
//!
//! JSON text is gzip-compressed and base64-encoded so the whole cache fits in
//! a single string-valued storage key.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{CacheError, Result};

/// Compress serialized cache text into its stored form.
pub fn compress(text: &str) -> Result<String> {
  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder
    .write_all(text.as_bytes())
    .map_err(|e| CacheError::StorageWrite(format!("compression failed: {}", e)))?;
  let bytes = encoder
    .finish()
    .map_err(|e| CacheError::StorageWrite(format!("compression failed: {}", e)))?;
  Ok(BASE64.encode(bytes))
}

/// Reverse [`compress`]. Any failure is reported as corruption.
pub fn decompress(stored: &str) -> Result<String> {
  let bytes = BASE64
    .decode(stored.trim())
    .map_err(|e| CacheError::StoreCorruption(format!("invalid base64: {}", e)))?;
  let mut decoder = GzDecoder::new(bytes.as_slice());
  let mut text = String::new();
  decoder
    .read_to_string(&mut text)
    .map_err(|e| CacheError::StoreCorruption(format!("decompression failed: {}", e)))?;
  Ok(text)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_compress_shrinks_repetitive_text() {
    let text = r#"{"concept_id":1,"concept_name":"Hypertension"}"#.repeat(200);
    let stored = compress(&text).unwrap();
    assert!(stored.len() < text.len());
    assert_eq!(decompress(&stored).unwrap(), text);
  }

  #[test]
  fn test_decompress_rejects_garbage() {
    assert!(matches!(
      decompress("not base64 at all!!"),
      Err(CacheError::StoreCorruption(_))
    ));
    // Valid base64 that is not gzip
    assert!(matches!(
      decompress(&BASE64.encode(b"plain bytes")),
      Err(CacheError::StoreCorruption(_))
    ));
  }
}
