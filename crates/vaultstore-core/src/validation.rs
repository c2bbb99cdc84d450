//! Input validation for bucket names, object keys, and user metadata.

use crate::error::{EngineError, EngineResult};

/// Validates a bucket name against the DNS-label rules.
pub fn validate_bucket_name(name: &str) -> EngineResult<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} must be 3-63 characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} contains invalid characters"
        )));
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit())
        || !(last.is_ascii_lowercase() || last.is_ascii_digit())
    {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} must start and end with a letter or digit"
        )));
    }
    if name.contains("..") {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} must not contain consecutive dots"
        )));
    }
    if is_ipv4_shaped(name) {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} must not be formatted as an IP address"
        )));
    }
    if name.starts_with("xn--") {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} must not start with xn--"
        )));
    }
    if name.ends_with("-s3alias") {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} must not end with -s3alias"
        )));
    }
    if name.starts_with("sthree-") {
        return Err(EngineError::InvalidArgument(format!(
            "bucket name {name:?} must not start with sthree-"
        )));
    }
    Ok(())
}

fn is_ipv4_shaped(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && p.parse::<u8>().is_ok())
}

/// Validates an object key: non-empty and within the size limit.
pub fn validate_object_key(key: &str) -> EngineResult<()> {
    if key.is_empty() {
        return Err(EngineError::InvalidArgument("object key must not be empty".into()));
    }
    if key.as_bytes().len() > 1024 {
        return Err(EngineError::InvalidArgument(
            "object key must not exceed 1024 bytes".into(),
        ));
    }
    Ok(())
}

/// Validates the total size of a user-supplied metadata map (S3 caps this at 2 KiB).
pub fn validate_metadata(metadata: &std::collections::BTreeMap<String, String>) -> EngineResult<()> {
    let total: usize = metadata
        .iter()
        .map(|(k, v)| k.len() + v.len())
        .sum();
    if total > 2048 {
        return Err(EngineError::InvalidArgument(
            "user metadata must not exceed 2048 bytes total".into(),
        ));
    }
    Ok(())
}

/// Validates a multipart part number is within the allowed range.
pub fn validate_part_number(part_number: u32) -> EngineResult<()> {
    if !(1..=10_000).contains(&part_number) {
        return Err(EngineError::InvalidArgument(format!(
            "part number {part_number} must be between 1 and 10000"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_accept_valid_bucket_name() {
        assert!(validate_bucket_name("my-bucket-1").is_ok());
    }

    #[test]
    fn test_should_reject_short_bucket_name() {
        assert!(validate_bucket_name("ab").is_err());
    }

    #[test]
    fn test_should_reject_uppercase_bucket_name() {
        assert!(validate_bucket_name("MyBucket").is_err());
    }

    #[test]
    fn test_should_reject_consecutive_dots() {
        assert!(validate_bucket_name("my..bucket").is_err());
    }

    #[test]
    fn test_should_reject_ipv4_shaped_name() {
        assert!(validate_bucket_name("192.168.1.1").is_err());
    }

    #[test]
    fn test_should_reject_s3alias_suffix() {
        assert!(validate_bucket_name("my-bucket-s3alias").is_err());
    }

    #[test]
    fn test_should_reject_empty_key() {
        assert!(validate_object_key("").is_err());
    }

    #[test]
    fn test_should_reject_oversized_key() {
        let key = "a".repeat(1025);
        assert!(validate_object_key(&key).is_err());
    }

    #[test]
    fn test_should_reject_out_of_range_part_number() {
        assert!(validate_part_number(0).is_err());
        assert!(validate_part_number(10_001).is_err());
        assert!(validate_part_number(1).is_ok());
    }
}
