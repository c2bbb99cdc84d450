//! Small stateless helpers shared across services: id generation, range parsing,
//! pagination tokens.

use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};

/// Generates a fresh object version id.
#[must_use]
pub fn generate_version_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generates a fresh multipart upload id.
#[must_use]
pub fn generate_upload_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generates a request id for tracing/log correlation.
#[must_use]
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time formatted as RFC 3339, matching the timestamps stored with rows.
#[must_use]
pub fn timestamp_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// An inclusive byte range, resolved against a concrete object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte included, inclusive.
    pub start: u64,
    /// Last byte included, inclusive.
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by this range.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// True if the range covers zero bytes (never constructed by [`parse_range_header`]).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Parses an HTTP `Range` header value of the form `bytes=N-M`, `bytes=-N`, or `bytes=N-`,
/// clamped against `total_size`.
///
/// Returns `Ok(None)` if the header is absent/unparseable in a way that should be treated
/// as "no range" rather than an error (matching permissive S3 behavior for malformed
/// ranges on GET).
pub fn parse_range_header(header: &str, total_size: u64) -> EngineResult<Option<ByteRange>> {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return Ok(None);
    };
    let spec = spec.trim();
    let Some((start_s, end_s)) = spec.split_once('-') else {
        return Ok(None);
    };

    if total_size == 0 {
        return Ok(None);
    }

    if start_s.is_empty() {
        // suffix range: last N bytes
        let suffix_len: u64 = end_s
            .parse()
            .map_err(|_| EngineError::InvalidArgument(format!("invalid range: {header}")))?;
        if suffix_len == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "invalid range: {header}"
            )));
        }
        let len = suffix_len.min(total_size);
        return Ok(Some(ByteRange {
            start: total_size - len,
            end: total_size - 1,
        }));
    }

    let start: u64 = start_s
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("invalid range: {header}")))?;
    if start >= total_size {
        return Err(EngineError::InvalidArgument(format!(
            "range start {start} beyond object size {total_size}"
        )));
    }

    let end: u64 = if end_s.is_empty() {
        total_size - 1
    } else {
        let raw: u64 = end_s
            .parse()
            .map_err(|_| EngineError::InvalidArgument(format!("invalid range: {header}")))?;
        raw.min(total_size - 1)
    };

    if end < start {
        return Err(EngineError::InvalidArgument(format!(
            "invalid range: {header}"
        )));
    }

    Ok(Some(ByteRange { start, end }))
}

/// Encodes a listing continuation token from the last key returned.
#[must_use]
pub fn encode_continuation_token(last_key: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(last_key.as_bytes())
}

/// Decodes a listing continuation token back into the last key returned.
pub fn decode_continuation_token(token: &str) -> EngineResult<String> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| EngineError::InvalidArgument("invalid continuation token".into()))?;
    String::from_utf8(bytes)
        .map_err(|_| EngineError::InvalidArgument("invalid continuation token".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_bounded_range() {
        let r = parse_range_header("bytes=5-10", 100)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
            .unwrap_or_else(|| panic!("expected Some"));
        assert_eq!(r, ByteRange { start: 5, end: 10 });
        assert_eq!(r.len(), 6);
    }

    #[test]
    fn test_should_parse_suffix_range() {
        let r = parse_range_header("bytes=-10", 100)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
            .unwrap_or_else(|| panic!("expected Some"));
        assert_eq!(r, ByteRange { start: 90, end: 99 });
    }

    #[test]
    fn test_should_parse_open_ended_range() {
        let r = parse_range_header("bytes=90-", 100)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
            .unwrap_or_else(|| panic!("expected Some"));
        assert_eq!(r, ByteRange { start: 90, end: 99 });
    }

    #[test]
    fn test_should_clamp_end_beyond_size() {
        let r = parse_range_header("bytes=0-999999", 100)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
            .unwrap_or_else(|| panic!("expected Some"));
        assert_eq!(r.end, 99);
    }

    #[test]
    fn test_should_reject_start_beyond_size() {
        assert!(parse_range_header("bytes=200-300", 100).is_err());
    }

    #[test]
    fn test_should_round_trip_continuation_token() {
        let tok = encode_continuation_token("some/object/key");
        let decoded =
            decode_continuation_token(&tok).unwrap_or_else(|e| panic!("decode failed: {e}"));
        assert_eq!(decoded, "some/object/key");
    }
}
