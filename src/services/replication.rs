//! Replication ingestion: data and metadata written on behalf of an
//! external replication engine.
//!
//! Both operations skip the client write pipeline. The caller has already
//! been authenticated and the bucket already checked. Payloads are stored
//! as given; no server-side cipher applies here.

use crate::{
    errors::{GatewayError, GatewayResult},
    models::{bucket::BucketInfo, replication::DataRetrievalInfo},
    services::{
        data_store::{DataContext, PayloadStream, digest_matches},
        gateway_service::GatewayService,
        location,
        metadata_store::{PutOptions, StoredDocument},
    },
};
use serde_json::Value;
use tracing::{debug, warn};

/// A replicated payload and what the engine declared about it.
pub struct DataIngest<'a> {
    pub object_key: &'a str,
    pub canonical_id: &'a str,
    pub requested_location: Option<&'a str>,
    pub declared_len: u64,
    pub content_md5: &'a str,
}

impl GatewayService {
    /// Write replicated bytes and verify them against the declared digest.
    ///
    /// On mismatch the written bytes are removed again and nothing else is
    /// committed.
    pub async fn ingest_data(
        &self,
        bucket: &BucketInfo,
        ingest: DataIngest<'_>,
        payload: PayloadStream,
    ) -> GatewayResult<Vec<DataRetrievalInfo>> {
        let backend = location::resolve(ingest.requested_location, bucket, &self.data)?;
        let ctx = DataContext {
            bucket: bucket.name.clone(),
            object_key: ingest.object_key.to_string(),
            owner: ingest.canonical_id.to_string(),
        };
        let stored = self
            .data
            .write(&ctx, payload, Some(ingest.declared_len), &backend)
            .await?;

        if !digest_matches(ingest.content_md5, &stored.md5) {
            warn!(
                bucket = %bucket.name,
                key = %ingest.object_key,
                declared = %ingest.content_md5,
                computed = %stored.md5,
                "rejecting replicated data"
            );
            self.data
                .delete_best_effort(&stored.data_store_name, &stored.key)
                .await;
            return Err(GatewayError::IntegrityMismatch {
                declared: ingest.content_md5.to_string(),
                computed: stored.md5,
            });
        }

        debug!(
            bucket = %bucket.name,
            key = %ingest.object_key,
            location = %stored.data_store_name,
            size = ingest.declared_len,
            "ingested replicated data"
        );
        Ok(vec![DataRetrievalInfo {
            key: stored.key,
            data_store_name: stored.data_store_name,
            size: ingest.declared_len,
            start: 0,
        }])
    }

    /// Commit a replicated metadata document as an explicit version.
    ///
    /// The document's own `versionId` is kept, so re-sending the same
    /// version overwrites it instead of adding another one.
    pub async fn ingest_metadata(
        &self,
        bucket: &BucketInfo,
        object_key: &str,
        raw: &[u8],
    ) -> GatewayResult<StoredDocument> {
        let document: Value = serde_json::from_slice(raw)
            .map_err(|err| GatewayError::MalformedMetadata(err.to_string()))?;
        if !document.is_object() {
            return Err(GatewayError::MalformedMetadata(
                "metadata must be a JSON object".into(),
            ));
        }
        let version_id = match document.get("versionId") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(_) => {
                return Err(GatewayError::MalformedMetadata(
                    "versionId must be a string".into(),
                ));
            }
        };

        let stored = self
            .store
            .put_document(
                &bucket.name,
                object_key,
                document,
                PutOptions::versioned(version_id),
            )
            .await?;

        debug!(
            bucket = %bucket.name,
            key = %object_key,
            version_id = ?stored.version_id,
            "ingested replicated metadata"
        );
        Ok(stored)
    }
}
