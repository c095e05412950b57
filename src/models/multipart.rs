//! Represents multipart upload sessions and their parts.

use crate::models::bucket::Identity;
use serde::{Deserialize, Serialize};

/// Overview of an in-progress multipart upload.
///
/// Written once when the upload is initiated, under
/// `overview<sep>objectKey<sep>uploadId` in the bucket's shadow container.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MpuOverview {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub initiator: Identity,
    pub owner: Identity,
    pub storage_class: String,

    /// Location whose backend owns the upload's data.
    pub controlling_location_constraint: String,

    pub md_model_version: u32,
    pub initiated: String,
}

/// Where the bytes of a part were written.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartLocation {
    pub key: String,
    pub data_store_name: String,
    pub size: u64,
}

/// Value of a stored part record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PartValue {
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "partLocations", default)]
    pub locations: Vec<PartLocation>,
}

/// A part entry as returned by a listing source, before normalization.
///
/// Entries read from the metadata store carry their encoded `key`; entries
/// from a backend's native listing carry `part_number` directly.
#[derive(Clone, Debug)]
pub struct RawPartEntry {
    pub key: Option<String>,
    pub part_number: Option<u32>,
    pub value: PartValue,
}

/// One page of raw part entries plus the source's own truncation signal.
#[derive(Clone, Debug, Default)]
pub struct RawPartListing {
    pub contents: Vec<RawPartEntry>,
    pub is_truncated: bool,
}

/// A normalized part.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub part_number: u32,
    pub last_modified: String,
    pub etag: String,
    pub size: u64,
}

/// A normalized page of parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub parts: Vec<Part>,
    pub is_truncated: bool,
    /// Part number of the last returned part; only set when truncated.
    pub next_part_number_marker: Option<u32>,
}

/// Everything a ListParts response reports.
#[derive(Clone, Debug)]
pub struct PartsListing {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub initiator: Identity,
    pub owner: Identity,
    pub storage_class: String,
    pub part_number_marker: u32,
    pub max_parts: usize,
    pub page: ListingPage,
}
