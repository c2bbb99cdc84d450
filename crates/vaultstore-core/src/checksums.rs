//! ETag computation: MD5 for single-shot objects, composite MD5-of-MD5s for
//! multipart objects, matching S3's ETag convention.

use md5::{Digest, Md5};

/// Computes the MD5 digest of a full in-memory buffer, hex-encoded.
#[must_use]
pub fn compute_md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// An incremental MD5 hasher for streaming single-shot uploads.
#[derive(Debug, Default)]
pub struct StreamingMd5 {
    hasher: Md5,
}

impl StreamingMd5 {
    /// Creates a fresh incremental hasher.
    #[must_use]
    pub fn new() -> Self {
        Self { hasher: Md5::new() }
    }

    /// Feeds a chunk of bytes into the hash.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Finalizes and returns the hex-encoded ETag.
    #[must_use]
    pub fn finalize_etag(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Computes the S3 composite multipart ETag from each part's hex MD5, in part order:
/// `hex(md5(concat(raw_md5_bytes))) + "-" + part_count`.
#[must_use]
pub fn compute_multipart_etag(part_md5_hex: &[String]) -> String {
    let mut hasher = Md5::new();
    for hex_digest in part_md5_hex {
        if let Ok(raw) = hex::decode(hex_digest) {
            hasher.update(&raw);
        }
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_md5_hex.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_compute_md5_hex_for_known_input() {
        // md5("") is the well-known empty-string digest.
        assert_eq!(compute_md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_should_match_streaming_and_oneshot_md5() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let oneshot = compute_md5_hex(data);
        let mut streaming = StreamingMd5::new();
        for chunk in data.chunks(7) {
            streaming.update(chunk);
        }
        assert_eq!(streaming.finalize_etag(), oneshot);
    }

    #[test]
    fn test_should_append_part_count_suffix() {
        let parts = vec![compute_md5_hex(b"part1"), compute_md5_hex(b"part2")];
        let etag = compute_multipart_etag(&parts);
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2); // 32 hex chars + "-2"
    }
}
