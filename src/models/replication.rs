//! Results returned by the replication ingestion routes.

use serde::{Deserialize, Serialize};

/// Locates replicated bytes in the data store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataRetrievalInfo {
    pub key: String,
    pub data_store_name: String,
    pub size: u64,
    /// Byte offset of this chunk; single-part replication writes start at 0.
    pub start: u64,
}
