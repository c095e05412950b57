//! Core data models for the object gateway.
//!
//! Everything here is persisted as a JSON document in the metadata store
//! (buckets, multipart overviews, part records) or returned to callers
//! (listing pages, replication descriptors). Field names follow the
//! documents' on-disk camelCase encoding via `serde`.

pub mod bucket;
pub mod multipart;
pub mod replication;
