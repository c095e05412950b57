//! Shared fixtures for unit tests.

use crate::{
    config::{BackendMode, LocationConfig, LocationKind},
    models::bucket::{BucketInfo, CURRENT_MD_MODEL_VERSION, Identity},
    services::{
        auth::{AllowAllAuth, AuthHandler},
        data_store::{DataRouter, MemoryBackend, PayloadStream},
        gateway_service::{GatewayService, ServiceSettings},
        metadata_store::{MetadataStore, SqliteMetadataStore},
    },
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use sqlx::sqlite::SqlitePoolOptions;
use std::{collections::BTreeMap, sync::Arc};
use tempfile::TempDir;

/// A migrated SQLite store living in memory.
///
/// A single connection that never expires, since every connection to
/// `sqlite::memory:` opens its own empty database.
pub async fn memory_store() -> SqliteMetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteMetadataStore::new(Arc::new(pool));
    store.run_migrations().await.unwrap();
    store
}

pub fn body(data: impl Into<Bytes>) -> PayloadStream {
    let bytes: Bytes = data.into();
    stream::iter(vec![Ok(bytes)]).boxed()
}

pub fn test_locations() -> BTreeMap<String, LocationConfig> {
    BTreeMap::from([
        ("us-east-1".to_string(), LocationConfig::file()),
        (
            "cloud-a".to_string(),
            LocationConfig {
                kind: LocationKind::Mem,
                native_listing: true,
            },
        ),
    ])
}

pub struct TestGateway {
    pub service: GatewayService,
    _dir: TempDir,
}

impl TestGateway {
    pub async fn bucket(&self, name: &str) -> BucketInfo {
        self.service
            .create_bucket(name, None, Identity::new("owner-id", "owner"))
            .await
            .unwrap()
    }

    /// A bucket created before the current key scheme.
    pub async fn legacy_bucket(&self, name: &str) -> BucketInfo {
        let bucket = BucketInfo {
            name: name.to_string(),
            owner: Identity::new("owner-id", "owner"),
            location_constraint: "us-east-1".into(),
            md_model_version: CURRENT_MD_MODEL_VERSION - 1,
            creation_date: "2019-01-01T00:00:00.000Z".into(),
        };
        self.service.put_bucket_info(&bucket).await.unwrap();
        bucket
    }
}

pub async fn service_with(mode: BackendMode, auth: Arc<dyn AuthHandler>) -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let data = DataRouter::from_locations(test_locations(), dir.path());
    build_gateway(mode, auth, data, dir).await
}

/// Multiple-backend gateway whose `cloud-a` payloads stay inspectable.
pub async fn multi_backend_service_with_memory() -> (TestGateway, Arc<MemoryBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryBackend::new("cloud-a"));
    let data =
        DataRouter::from_locations(test_locations(), dir.path()).with_backend("cloud-a", memory.clone());
    let gateway = build_gateway(BackendMode::Multiple, Arc::new(AllowAllAuth), data, dir).await;
    (gateway, memory)
}

async fn build_gateway(
    mode: BackendMode,
    auth: Arc<dyn AuthHandler>,
    data: DataRouter,
    dir: TempDir,
) -> TestGateway {
    let store: Arc<dyn MetadataStore> = Arc::new(memory_store().await);
    let data = Arc::new(data);
    let settings = ServiceSettings {
        storage_dir: dir.path().to_path_buf(),
        listing_hard_limit: 1000,
        default_location: "us-east-1".into(),
    };
    TestGateway {
        service: GatewayService::new(store, data, mode, auth, settings),
        _dir: dir,
    }
}

pub async fn single_backend_service() -> TestGateway {
    service_with(BackendMode::Single, Arc::new(AllowAllAuth)).await
}

pub async fn multi_backend_service() -> TestGateway {
    service_with(BackendMode::Multiple, Arc::new(AllowAllAuth)).await
}
