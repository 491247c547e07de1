//! Test fixtures: job envelopes and minimal image payloads

#![allow(dead_code)]

/// PNG signature; enough for format detection.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// JPEG SOI marker followed by a JFIF APP0 segment header.
pub const JPEG_BYTES: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF\0";

/// Bytes that no image decoder recognises.
pub const TEXT_BYTES: &[u8] = b"definitely not an image";

/// Envelope as published by the web tier.
pub fn job_body(storage_key: &str) -> String {
    serde_json::json!({
        "id": "5c1d6f5e-8a0b-4d0c-9a34-6f1f4f7b2a10",
        "s3_key": storage_key,
        "timestamps": { "webtier": { "request": 1_700_000_000_000i64 } }
    })
    .to_string()
}
