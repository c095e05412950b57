//! Composite key encoding for multipart uploads.
//!
//! Overview records live under `overview<sep>objectKey<sep>uploadId` and
//! part records under `uploadId<sep>partNumber` inside the bucket's shadow
//! container. Two separators exist; which one applies is fixed by the
//! bucket's metadata model version and must be threaded through every call.

use crate::errors::{GatewayError, GatewayResult};

pub const OVERVIEW_PREFIX: &str = "overview";
pub const MPU_SHADOW_BUCKET_PREFIX: &str = "mpuShadowBucket";

/// Width part numbers are padded to so that key order equals numeric order.
const PART_NUMBER_WIDTH: usize = 5;

/// Key-encoding scheme of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Splitter {
    /// Buckets with metadata model version < 2.
    Legacy,
    Current,
}

impl Splitter {
    pub fn for_model_version(md_model_version: u32) -> Self {
        if md_model_version < 2 {
            Self::Legacy
        } else {
            Self::Current
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "|",
            Self::Current => "..|..",
        }
    }
}

/// Name of the container holding a bucket's multipart state.
pub fn mpu_bucket_name(bucket: &str) -> String {
    format!("{}{}", MPU_SHADOW_BUCKET_PREFIX, bucket)
}

pub fn overview_key(object_key: &str, upload_id: &str, splitter: Splitter) -> String {
    let sep = splitter.as_str();
    format!("{OVERVIEW_PREFIX}{sep}{object_key}{sep}{upload_id}")
}

pub fn part_key(upload_id: &str, part_number: u32, splitter: Splitter) -> String {
    format!(
        "{}{:0width$}",
        part_prefix(upload_id, splitter),
        part_number,
        width = PART_NUMBER_WIDTH
    )
}

/// Common prefix of every part key of an upload.
pub fn part_prefix(upload_id: &str, splitter: Splitter) -> String {
    format!("{}{}", upload_id, splitter.as_str())
}

/// Parse the base-10 suffix after the last separator occurrence.
pub fn parse_part_number(key: &str, splitter: Splitter) -> GatewayResult<u32> {
    let sep = splitter.as_str();
    let index = key
        .rfind(sep)
        .ok_or_else(|| GatewayError::MalformedKey(key.to_string()))?;
    let suffix = &key[index + sep.len()..];
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::MalformedKey(key.to_string()));
    }
    match suffix.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(GatewayError::MalformedKey(key.to_string())),
    }
}
