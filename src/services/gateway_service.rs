//! src/services/gateway_service.rs
//!
//! GatewayService: bucket and multipart-upload operations on top of the
//! metadata store (JSON documents) and the per-location data backends.
//! Replication ingestion lives in `replication.rs` on the same service.

use crate::{
    config::BackendMode,
    errors::{GatewayError, GatewayResult},
    models::{
        bucket::{BucketInfo, CURRENT_MD_MODEL_VERSION, Identity},
        multipart::{MpuOverview, PartLocation, PartValue, PartsListing},
    },
    services::{
        auth::AuthHandler,
        backend_gateway::{BackendGateway, PartListingRequest},
        data_store::{DataContext, DataRouter, PayloadStream, digest_matches},
        key_codec::{self, Splitter},
        location,
        metadata_store::{ListingParams, MetadataStore, PutOptions},
        part_listing,
    },
};
use chrono::{SecondsFormat, Utc};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Container holding bucket attributes.
pub const METASTORE: &str = "__metastore";

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MAX_PART_NUMBER: u32 = 10_000;
const ABORT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// Settings the service needs at request time.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub storage_dir: PathBuf,
    pub listing_hard_limit: usize,
    pub default_location: String,
}

/// Parameters of a new multipart upload.
#[derive(Debug, Clone, Default)]
pub struct InitiateUpload {
    pub initiator: Option<Identity>,
    pub storage_class: Option<String>,
    pub location: Option<String>,
}

/// GatewayService is the shared request state.
///
/// Cheap to clone; every collaborator is behind an `Arc` and safe for
/// concurrent use. No locks are held across requests.
#[derive(Clone)]
pub struct GatewayService {
    pub store: Arc<dyn MetadataStore>,
    pub data: Arc<DataRouter>,
    pub gateway: Arc<BackendGateway>,
    pub auth: Arc<dyn AuthHandler>,
    pub settings: Arc<ServiceSettings>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl GatewayService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        data: Arc<DataRouter>,
        mode: BackendMode,
        auth: Arc<dyn AuthHandler>,
        settings: ServiceSettings,
    ) -> Self {
        let gateway = Arc::new(BackendGateway::new(mode, data.clone(), store.clone()));
        Self {
            store,
            data,
            gateway,
            auth,
            settings: Arc::new(settings),
        }
    }

    /// Reject empty, oversized, or control-character keys.
    pub fn ensure_key_safe(key: &str) -> GatewayResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(GatewayError::InvalidObjectKey);
        }
        if key.bytes().any(|b| b.is_ascii_control()) {
            return Err(GatewayError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    pub fn ensure_bucket_name_safe(name: &str) -> GatewayResult<()> {
        let invalid = |reason: &str| {
            Err(GatewayError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            })
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return invalid("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return invalid("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return invalid("cannot contain consecutive dots or dot-hyphen combinations");
        }
        if is_ipv4_like(name) {
            return invalid("must not be formatted like an IP address");
        }
        Ok(())
    }

    /// Fetch bucket attributes. Returns NoSuchBucket if missing.
    pub async fn fetch_bucket(&self, bucket: &str) -> GatewayResult<BucketInfo> {
        Self::ensure_bucket_name_safe(bucket)?;
        let doc = self
            .store
            .get_document(METASTORE, bucket)
            .await?
            .ok_or_else(|| GatewayError::NoSuchBucket(bucket.to_string()))?;
        Ok(serde_json::from_value(doc)?)
    }

    pub(crate) async fn put_bucket_info(&self, bucket: &BucketInfo) -> GatewayResult<()> {
        self.store
            .put_document(
                METASTORE,
                &bucket.name,
                serde_json::to_value(bucket)?,
                PutOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Create a bucket on the requested (or default) location.
    ///
    /// New buckets always use the current key-encoding scheme.
    pub async fn create_bucket(
        &self,
        name: &str,
        location: Option<String>,
        owner: Identity,
    ) -> GatewayResult<BucketInfo> {
        Self::ensure_bucket_name_safe(name)?;
        let location = location.unwrap_or_else(|| self.settings.default_location.clone());
        if self.data.location(&location).is_none() {
            return Err(GatewayError::InvalidArgument(format!(
                "location `{}` is not configured",
                location
            )));
        }
        if self.store.get_document(METASTORE, name).await?.is_some() {
            return Err(GatewayError::BucketAlreadyExists(name.to_string()));
        }

        let bucket = BucketInfo {
            name: name.to_string(),
            owner,
            location_constraint: location,
            md_model_version: CURRENT_MD_MODEL_VERSION,
            creation_date: now(),
        };
        self.put_bucket_info(&bucket).await?;
        info!(bucket = %bucket.name, location = %bucket.location_constraint, "created bucket");
        Ok(bucket)
    }

    /// Load the overview of an upload under the bucket's key scheme.
    async fn fetch_overview(
        &self,
        bucket: &BucketInfo,
        key: &str,
        upload_id: &str,
    ) -> GatewayResult<(Splitter, MpuOverview)> {
        let splitter = Splitter::for_model_version(bucket.md_model_version);
        let overview_key = key_codec::overview_key(key, upload_id, splitter);
        let doc = self
            .store
            .get_document(&key_codec::mpu_bucket_name(&bucket.name), &overview_key)
            .await?
            .ok_or_else(|| GatewayError::NoSuchUpload(upload_id.to_string()))?;
        Ok((splitter, serde_json::from_value(doc)?))
    }

    /// Start a multipart upload and record its overview.
    pub async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        request: InitiateUpload,
    ) -> GatewayResult<MpuOverview> {
        Self::ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let backend = location::resolve(request.location.as_deref(), &bucket_rec, &self.data)?;
        let splitter = Splitter::for_model_version(bucket_rec.md_model_version);
        let upload_id = Uuid::new_v4().simple().to_string();

        if let Some(data) = self.gateway.native_backend(&backend.location)? {
            if let Some(native) = data.native_multipart() {
                native.create_upload(key, &upload_id).await?;
            }
        }

        let overview = MpuOverview {
            bucket: bucket_rec.name.clone(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            initiator: request
                .initiator
                .unwrap_or_else(|| bucket_rec.owner.clone()),
            owner: bucket_rec.owner.clone(),
            storage_class: request
                .storage_class
                .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.into()),
            controlling_location_constraint: backend.location,
            md_model_version: bucket_rec.md_model_version,
            initiated: now(),
        };

        self.store
            .put_document(
                &key_codec::mpu_bucket_name(&bucket_rec.name),
                &key_codec::overview_key(key, &upload_id, splitter),
                serde_json::to_value(&overview)?,
                PutOptions::default(),
            )
            .await?;

        debug!(
            bucket = %bucket,
            key = %key,
            upload_id = %upload_id,
            location = %overview.controlling_location_constraint,
            "initiated multipart upload"
        );
        Ok(overview)
    }

    /// Store one part on the upload's controlling location.
    ///
    /// Re-uploading a part number replaces the previous record.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        payload: PayloadStream,
        declared_len: Option<u64>,
        content_md5: Option<&str>,
    ) -> GatewayResult<PartValue> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(GatewayError::InvalidArgument(format!(
                "part number must be between 1 and {}",
                MAX_PART_NUMBER
            )));
        }
        Self::ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let (splitter, overview) = self.fetch_overview(&bucket_rec, key, upload_id).await?;
        let backend = location::resolve(
            Some(overview.controlling_location_constraint.as_str()),
            &bucket_rec,
            &self.data,
        )?;

        let ctx = DataContext {
            bucket: bucket_rec.name.clone(),
            object_key: key.to_string(),
            owner: overview.owner.id.clone(),
        };
        let stored = self.data.write(&ctx, payload, declared_len, &backend).await?;

        if let Some(declared) = content_md5 {
            if !digest_matches(declared, &stored.md5) {
                self.data
                    .delete_best_effort(&stored.data_store_name, &stored.key)
                    .await;
                return Err(GatewayError::IntegrityMismatch {
                    declared: declared.to_string(),
                    computed: stored.md5,
                });
            }
        }

        let value = PartValue {
            last_modified: now(),
            etag: stored.md5.clone(),
            size: stored.size,
            locations: vec![PartLocation {
                key: stored.key,
                data_store_name: stored.data_store_name,
                size: stored.size,
            }],
        };

        if let Some(data) = self.gateway.native_backend(&backend.location)? {
            if let Some(native) = data.native_multipart() {
                let replaced = native
                    .record_part(key, upload_id, part_number, value.clone())
                    .await?;
                if let Some(old) = replaced {
                    self.remove_part_data(&old).await;
                }
                return Ok(value);
            }
        }

        let mpu_bucket = key_codec::mpu_bucket_name(&bucket_rec.name);
        let part_key = key_codec::part_key(upload_id, part_number, splitter);
        let previous = self.store.get_document(&mpu_bucket, &part_key).await?;
        self.store
            .put_document(
                &mpu_bucket,
                &part_key,
                serde_json::to_value(&value)?,
                PutOptions::default(),
            )
            .await?;

        if let Some(previous) = previous {
            match serde_json::from_value::<PartValue>(previous) {
                Ok(old) => self.remove_part_data(&old).await,
                Err(err) => warn!(part_key = %part_key, error = %err, "unreadable replaced part"),
            }
        }

        debug!(
            bucket = %bucket,
            upload_id = %upload_id,
            part_number,
            size = value.size,
            "stored part"
        );
        Ok(value)
    }

    async fn remove_part_data(&self, part: &PartValue) {
        for location in &part.locations {
            self.data
                .delete_best_effort(&location.data_store_name, &location.key)
                .await;
        }
    }

    /// Abort an upload: drop its parts, their data and its overview.
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> GatewayResult<()> {
        Self::ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let (splitter, overview) = self.fetch_overview(&bucket_rec, key, upload_id).await?;
        let mpu_bucket = key_codec::mpu_bucket_name(&bucket_rec.name);

        let native = self
            .gateway
            .native_backend(&overview.controlling_location_constraint)?;
        match native.as_deref().and_then(|data| data.native_multipart()) {
            Some(native) => {
                for part in native.abort_upload(key, upload_id).await? {
                    self.remove_part_data(&part).await;
                }
            }
            None => {
                let mut params = ListingParams {
                    prefix: Some(key_codec::part_prefix(upload_id, splitter)),
                    after: None,
                    max_keys: ABORT_PAGE_SIZE,
                };
                loop {
                    let listing = self.store.list_documents(&mpu_bucket, &params).await?;
                    params.after = listing.entries.last().map(|(item, _)| item.clone());
                    for (item, doc) in listing.entries {
                        match serde_json::from_value::<PartValue>(doc) {
                            Ok(part) => self.remove_part_data(&part).await,
                            Err(err) => {
                                warn!(part_key = %item, error = %err, "unreadable part on abort")
                            }
                        }
                        self.store.delete_document(&mpu_bucket, &item).await?;
                    }
                    if !listing.is_truncated {
                        break;
                    }
                }
            }
        }

        self.store
            .delete_document(
                &mpu_bucket,
                &key_codec::overview_key(key, upload_id, splitter),
            )
            .await?;
        info!(bucket = %bucket, key = %key, upload_id = %upload_id, "aborted multipart upload");
        Ok(())
    }

    /// List one page of an upload's parts.
    ///
    /// Validates the paging parameters, loads the overview (which also
    /// proves the upload exists), lets the backend gateway pick the listing
    /// source, then normalizes the result. The first failing step aborts
    /// the listing.
    pub async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        max_parts: Option<&str>,
        part_number_marker: Option<&str>,
    ) -> GatewayResult<PartsListing> {
        let max_parts = part_listing::resolve_max_parts(max_parts, self.settings.listing_hard_limit)?;
        let part_number_marker = part_listing::resolve_part_number_marker(part_number_marker)?;
        Self::ensure_key_safe(key)?;

        let bucket_rec = self.fetch_bucket(bucket).await?;
        let (splitter, overview) = self.fetch_overview(&bucket_rec, key, upload_id).await?;
        let mpu_bucket = key_codec::mpu_bucket_name(&bucket_rec.name);

        let request = PartListingRequest {
            mpu_bucket: &mpu_bucket,
            object_key: key,
            upload_id,
            splitter,
            part_number_marker,
            max_parts,
        };
        let raw = self.gateway.list_parts(&overview, &request).await?;
        let page = part_listing::normalize(raw, splitter)?;

        Ok(PartsListing {
            bucket: bucket_rec.name,
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            initiator: overview.initiator,
            owner: overview.owner,
            storage_class: overview.storage_class,
            part_number_marker,
            max_parts,
            page,
        })
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
