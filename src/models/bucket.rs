//! Represents a logical bucket and the identity that owns it.

use serde::{Deserialize, Serialize};

/// Metadata model version assigned to newly created buckets.
pub const CURRENT_MD_MODEL_VERSION: u32 = 2;

/// A canonical user identity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// A storage bucket in the gateway.
///
/// Stored in the `__metastore` container under the bucket name.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    /// Globally unique bucket name (must conform to DNS naming rules).
    pub name: String,

    /// Account that owns this bucket.
    pub owner: Identity,

    /// Location whose backend stores the bucket's objects by default.
    pub location_constraint: String,

    /// Selects the key-encoding scheme used for this bucket's multipart keys.
    pub md_model_version: u32,

    /// RFC 3339 creation timestamp.
    pub creation_date: String,
}
