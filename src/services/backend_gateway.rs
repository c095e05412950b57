//! Backend gateway: decides where the parts of an upload are listed from.
//!
//! Two [`PartSource`]s exist. The local one reads part records from the
//! metadata store; the native one asks the backend of the upload's
//! controlling location. The native source is only consulted in
//! multi-backend mode and only for locations declaring `nativeListing`.

use crate::{
    config::BackendMode,
    errors::GatewayResult,
    models::multipart::{MpuOverview, PartValue, RawPartEntry, RawPartListing},
    services::{
        data_store::{DataBackend, DataRouter},
        key_codec::{Splitter, part_key, part_prefix},
        metadata_store::{ListingParams, MetadataStore},
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// One page request against a listing source.
#[derive(Debug, Clone)]
pub struct PartListingRequest<'a> {
    pub mpu_bucket: &'a str,
    pub object_key: &'a str,
    pub upload_id: &'a str,
    pub splitter: Splitter,
    /// Exclusive lower bound; 0 lists from the first part.
    pub part_number_marker: u32,
    pub max_parts: usize,
}

#[async_trait]
pub trait PartSource: Send + Sync {
    /// `Ok(None)` means this source cannot answer for the upload.
    async fn list_parts(
        &self,
        request: &PartListingRequest<'_>,
    ) -> GatewayResult<Option<RawPartListing>>;
}

/// Part records kept in the bucket's shadow container.
pub struct LocalPartSource {
    store: Arc<dyn MetadataStore>,
}

impl LocalPartSource {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PartSource for LocalPartSource {
    async fn list_parts(
        &self,
        request: &PartListingRequest<'_>,
    ) -> GatewayResult<Option<RawPartListing>> {
        let params = ListingParams {
            prefix: Some(part_prefix(request.upload_id, request.splitter)),
            after: (request.part_number_marker > 0)
                .then(|| part_key(request.upload_id, request.part_number_marker, request.splitter)),
            max_keys: request.max_parts,
        };
        let listing = self
            .store
            .list_documents(request.mpu_bucket, &params)
            .await?;

        let contents = listing
            .entries
            .into_iter()
            .map(|(key, value)| {
                Ok(RawPartEntry {
                    key: Some(key),
                    part_number: None,
                    value: serde_json::from_value::<PartValue>(value)?,
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Some(RawPartListing {
            contents,
            is_truncated: listing.is_truncated,
        }))
    }
}

/// Parts tracked by a backend's own multipart API.
pub struct NativePartSource {
    backend: Arc<dyn DataBackend>,
}

impl NativePartSource {
    pub fn new(backend: Arc<dyn DataBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl PartSource for NativePartSource {
    async fn list_parts(
        &self,
        request: &PartListingRequest<'_>,
    ) -> GatewayResult<Option<RawPartListing>> {
        match self.backend.native_multipart() {
            Some(native) => {
                native
                    .list_parts(
                        request.object_key,
                        request.upload_id,
                        request.part_number_marker,
                        request.max_parts,
                    )
                    .await
            }
            None => Ok(None),
        }
    }
}

/// Chooses the listing source for an upload.
pub struct BackendGateway {
    mode: BackendMode,
    data: Arc<DataRouter>,
    local: LocalPartSource,
}

impl BackendGateway {
    pub fn new(mode: BackendMode, data: Arc<DataRouter>, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            mode,
            data,
            local: LocalPartSource::new(store),
        }
    }

    /// Backend managing the upload's parts natively, if any.
    ///
    /// Only in multi-backend mode, and only when the controlling location
    /// declares native listing.
    pub fn native_backend(&self, location: &str) -> GatewayResult<Option<Arc<dyn DataBackend>>> {
        if self.mode != BackendMode::Multiple || !self.data.supports_native_listing(location) {
            return Ok(None);
        }
        let backend = self.data.backend(location)?;
        Ok(backend.native_multipart().is_some().then_some(backend))
    }

    /// List one page of parts for the upload described by `overview`.
    ///
    /// A native result is returned as is, even when empty: uploads owned by
    /// such a location never have local part records. Only a source that
    /// cannot answer falls through to the metadata store.
    pub async fn list_parts(
        &self,
        overview: &MpuOverview,
        request: &PartListingRequest<'_>,
    ) -> GatewayResult<RawPartListing> {
        let location = &overview.controlling_location_constraint;
        if let Some(backend) = self.native_backend(location)? {
            let native = NativePartSource::new(backend);
            if let Some(listing) = native.list_parts(request).await? {
                debug!(
                    upload_id = %request.upload_id,
                    location = %location,
                    parts = listing.contents.len(),
                    "listed parts natively"
                );
                return Ok(listing);
            }
            debug!(
                upload_id = %request.upload_id,
                location = %location,
                "native listing unavailable, using metadata store"
            );
        }

        let listing = self.local.list_parts(request).await?.unwrap_or_default();
        debug!(
            upload_id = %request.upload_id,
            parts = listing.contents.len(),
            "listed parts from metadata store"
        );
        Ok(listing)
    }
}
