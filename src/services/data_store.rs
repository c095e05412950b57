//! Data store: where payload bytes live.
//!
//! Each configured location gets one [`DataBackend`]. `file` locations
//! stream payloads to disk sharded beneath
//! `storage_dir/{location}/{shard}/{shard}/{key}`; `mem` locations keep
//! payloads in memory and also manage multipart uploads natively, which is
//! what a location declaring `nativeListing` needs.

use crate::{
    config::{LocationConfig, LocationKind},
    errors::{GatewayError, GatewayResult},
    models::multipart::{PartValue, RawPartEntry, RawPartListing},
    services::location::BackendInfo,
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use md5::Context;
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::{debug, warn};
use uuid::Uuid;

pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;

/// Who and what a payload is written for.
#[derive(Debug, Clone)]
pub struct DataContext {
    pub bucket: String,
    pub object_key: String,
    pub owner: String,
}

/// Outcome of a successful payload write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredData {
    pub key: String,
    pub data_store_name: String,
    pub size: u64,
    /// Lowercase hex MD5 of the bytes actually written.
    pub md5: String,
}

#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Write the payload as given and report what was stored.
    async fn put(&self, ctx: &DataContext, payload: PayloadStream) -> GatewayResult<StoredData>;

    async fn delete(&self, key: &str) -> GatewayResult<()>;

    /// Native multipart capability, when the backend tracks parts itself.
    fn native_multipart(&self) -> Option<&dyn NativeMultipart> {
        None
    }
}

/// Multipart uploads managed by the backend rather than the metadata store.
#[async_trait]
pub trait NativeMultipart: Send + Sync {
    async fn create_upload(&self, object_key: &str, upload_id: &str) -> GatewayResult<()>;

    /// Record a part, returning the one it replaced.
    async fn record_part(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        value: PartValue,
    ) -> GatewayResult<Option<PartValue>>;

    /// Parts strictly after `part_number_marker`, ascending, at most
    /// `max_parts`. `None` means the backend cannot list this upload.
    async fn list_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> GatewayResult<Option<RawPartListing>>;

    /// Forget the upload and return the parts it held.
    async fn abort_upload(&self, object_key: &str, upload_id: &str)
    -> GatewayResult<Vec<PartValue>>;
}

/// Lowercase hex form of a Content-MD5 value given as hex or base64.
pub fn normalize_content_md5(declared: &str) -> Option<String> {
    let declared = declared.trim();
    if declared.len() == 32 && declared.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Some(declared.to_ascii_lowercase());
    }
    let raw = BASE64.decode(declared).ok()?;
    (raw.len() == 16).then(|| raw.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Whether a declared Content-MD5 matches a computed hex digest.
pub fn digest_matches(declared: &str, computed_hex: &str) -> bool {
    normalize_content_md5(declared).is_some_and(|d| d == computed_hex)
}

fn new_storage_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Storage keys are generated here; anything else is refused so a key can
/// never escape the backend's root.
fn ensure_storage_key_safe(key: &str) -> GatewayResult<()> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(GatewayError::InvalidObjectKey);
    }
    Ok(())
}

/// Payloads on the local filesystem.
#[derive(Clone)]
pub struct FileBackend {
    name: String,
    base_path: PathBuf,
}

impl FileBackend {
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into(),
        }
    }

    /// Two-level shard identifiers from MD5(key), as lowercase hex (00–ff).
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Remove empty shard directories up to the backend root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl DataBackend for FileBackend {
    /// Streams to a temp file while hashing, fsyncs, then renames into place.
    /// The temp file is removed on any failure.
    async fn put(&self, ctx: &DataContext, mut payload: PayloadStream) -> GatewayResult<StoredData> {
        let key = new_storage_key();
        let file_path = self.payload_path(&key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            GatewayError::Io(io::Error::other("payload path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = payload.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(GatewayError::Io(err));
                }
            };
            size += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(GatewayError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(GatewayError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(GatewayError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(GatewayError::Io(err));
        }

        debug!(
            bucket = %ctx.bucket,
            object_key = %ctx.object_key,
            owner = %ctx.owner,
            location = %self.name,
            key = %key,
            size,
            "stored payload on disk"
        );

        Ok(StoredData {
            key,
            data_store_name: self.name.clone(),
            size,
            md5: format!("{:x}", digest.compute()),
        })
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        ensure_storage_key_safe(key)?;
        let file_path = self.payload_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(GatewayError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}

type UploadParts = BTreeMap<u32, PartValue>;

/// Payloads and multipart uploads held in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    name: String,
    objects: RwLock<HashMap<String, Bytes>>,
    uploads: RwLock<HashMap<(String, String), UploadParts>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
impl MemoryBackend {
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn put(&self, ctx: &DataContext, mut payload: PayloadStream) -> GatewayResult<StoredData> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = payload.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let bytes = buf.freeze();
        let key = new_storage_key();
        let stored = StoredData {
            key: key.clone(),
            data_store_name: self.name.clone(),
            size: bytes.len() as u64,
            md5: format!("{:x}", md5::compute(&bytes)),
        };
        self.objects.write().await.insert(key, bytes);

        debug!(
            bucket = %ctx.bucket,
            object_key = %ctx.object_key,
            location = %self.name,
            key = %stored.key,
            "stored payload in memory"
        );
        Ok(stored)
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn native_multipart(&self) -> Option<&dyn NativeMultipart> {
        Some(self)
    }
}

#[async_trait]
impl NativeMultipart for MemoryBackend {
    async fn create_upload(&self, object_key: &str, upload_id: &str) -> GatewayResult<()> {
        self.uploads
            .write()
            .await
            .entry((object_key.to_string(), upload_id.to_string()))
            .or_default();
        Ok(())
    }

    async fn record_part(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        value: PartValue,
    ) -> GatewayResult<Option<PartValue>> {
        let mut uploads = self.uploads.write().await;
        let parts = uploads
            .get_mut(&(object_key.to_string(), upload_id.to_string()))
            .ok_or_else(|| GatewayError::NoSuchUpload(upload_id.to_string()))?;
        Ok(parts.insert(part_number, value))
    }

    async fn list_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> GatewayResult<Option<RawPartListing>> {
        let uploads = self.uploads.read().await;
        let parts = uploads
            .get(&(object_key.to_string(), upload_id.to_string()))
            .ok_or_else(|| GatewayError::NoSuchUpload(upload_id.to_string()))?;

        let mut remaining = parts
            .range(part_number_marker.saturating_add(1)..)
            .map(|(number, value)| RawPartEntry {
                key: None,
                part_number: Some(*number),
                value: value.clone(),
            });
        let contents: Vec<_> = remaining.by_ref().take(max_parts).collect();
        let is_truncated = remaining.next().is_some();

        Ok(Some(RawPartListing {
            contents,
            is_truncated,
        }))
    }

    async fn abort_upload(
        &self,
        object_key: &str,
        upload_id: &str,
    ) -> GatewayResult<Vec<PartValue>> {
        let parts = self
            .uploads
            .write()
            .await
            .remove(&(object_key.to_string(), upload_id.to_string()))
            .ok_or_else(|| GatewayError::NoSuchUpload(upload_id.to_string()))?;
        Ok(parts.into_values().collect())
    }
}

/// Maps location names to their backend and capability flags.
pub struct DataRouter {
    locations: BTreeMap<String, LocationConfig>,
    backends: HashMap<String, Arc<dyn DataBackend>>,
}

impl DataRouter {
    /// Build one backend per location; file locations live under
    /// `storage_dir/{location}`.
    pub fn from_locations(locations: BTreeMap<String, LocationConfig>, storage_dir: &Path) -> Self {
        let backends = locations
            .iter()
            .map(|(name, location)| {
                let backend: Arc<dyn DataBackend> = match location.kind {
                    LocationKind::File => Arc::new(FileBackend::new(name, storage_dir.join(name))),
                    LocationKind::Mem => Arc::new(MemoryBackend::new(name)),
                };
                (name.clone(), backend)
            })
            .collect();

        Self {
            locations,
            backends,
        }
    }

    /// Serve `name` from a caller-supplied backend.
    #[cfg(test)]
    pub fn with_backend(mut self, name: &str, backend: Arc<dyn DataBackend>) -> Self {
        self.backends.insert(name.to_string(), backend);
        self
    }

    pub fn location(&self, name: &str) -> Option<&LocationConfig> {
        self.locations.get(name)
    }

    pub fn supports_native_listing(&self, name: &str) -> bool {
        self.location(name).is_some_and(|l| l.native_listing)
    }

    pub fn backend(&self, name: &str) -> GatewayResult<Arc<dyn DataBackend>> {
        self.backends.get(name).cloned().ok_or_else(|| {
            GatewayError::BackendUnavailable(format!("no backend for location `{}`", name))
        })
    }

    /// Write a payload to the selected backend.
    ///
    /// A payload whose length disagrees with `declared_len` is removed again
    /// and rejected.
    pub async fn write(
        &self,
        ctx: &DataContext,
        payload: PayloadStream,
        declared_len: Option<u64>,
        backend: &BackendInfo,
    ) -> GatewayResult<StoredData> {
        let data = self.backend(&backend.location)?;
        let stored = data.put(ctx, payload).await?;

        if let Some(declared) = declared_len {
            if declared != stored.size {
                warn!(
                    location = %backend.location,
                    declared,
                    received = stored.size,
                    "payload length mismatch"
                );
                self.delete_best_effort(&stored.data_store_name, &stored.key)
                    .await;
                return Err(GatewayError::IntegrityMismatch {
                    declared: format!("{} bytes", declared),
                    computed: format!("{} bytes", stored.size),
                });
            }
        }
        Ok(stored)
    }

    pub async fn delete_best_effort(&self, location: &str, key: &str) {
        let result = match self.backend(location) {
            Ok(data) => data.delete(key).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(location, key, error = %err, "failed to remove payload");
        }
    }
}
