//! Metadata store: JSON documents addressed by container + item.
//!
//! The gateway only depends on the [`MetadataStore`] trait. The SQLite
//! implementation keeps the latest document of every item in `documents`
//! and, for versioned puts, every version in `document_versions`.

use crate::errors::{GatewayError, GatewayResult};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// How a document is committed.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Keep the document as a distinct version and move the latest pointer.
    pub versioning: bool,
    /// Use this version ID instead of generating one.
    pub version_id: Option<String>,
}

impl PutOptions {
    pub fn versioned(version_id: Option<String>) -> Self {
        Self {
            versioning: true,
            version_id,
        }
    }
}

/// A committed document, with `versionId` set when it was versioned.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub version_id: Option<String>,
    pub document: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ListingParams {
    pub prefix: Option<String>,
    /// Only items strictly greater than this one are returned.
    pub after: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentListing {
    pub entries: Vec<(String, Value)>,
    pub is_truncated: bool,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_document(&self, container: &str, item: &str) -> GatewayResult<Option<Value>>;

    async fn get_document_version(
        &self,
        container: &str,
        item: &str,
        version_id: &str,
    ) -> GatewayResult<Option<Value>>;

    async fn put_document(
        &self,
        container: &str,
        item: &str,
        document: Value,
        options: PutOptions,
    ) -> GatewayResult<StoredDocument>;

    /// Remove an item and all of its versions. Returns whether it existed.
    async fn delete_document(&self, container: &str, item: &str) -> GatewayResult<bool>;

    /// List items in ascending order.
    async fn list_documents(
        &self,
        container: &str,
        params: &ListingParams,
    ) -> GatewayResult<DocumentListing>;

    async fn ping(&self) -> GatewayResult<()>;
}

/// SQLite-backed [`MetadataStore`].
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn run_migrations(&self) -> GatewayResult<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_document(&self, container: &str, item: &str) -> GatewayResult<Option<Value>> {
        let body = sqlx::query_scalar::<_, String>(
            "SELECT body FROM documents WHERE container = ? AND item = ?",
        )
        .bind(container)
        .bind(item)
        .fetch_optional(&*self.db)
        .await?;

        body.map(|b| serde_json::from_str(&b).map_err(GatewayError::from))
            .transpose()
    }

    async fn get_document_version(
        &self,
        container: &str,
        item: &str,
        version_id: &str,
    ) -> GatewayResult<Option<Value>> {
        let body = sqlx::query_scalar::<_, String>(
            "SELECT body FROM document_versions
             WHERE container = ? AND item = ? AND version_id = ?",
        )
        .bind(container)
        .bind(item)
        .bind(version_id)
        .fetch_optional(&*self.db)
        .await?;

        body.map(|b| serde_json::from_str(&b).map_err(GatewayError::from))
            .transpose()
    }

    async fn put_document(
        &self,
        container: &str,
        item: &str,
        mut document: Value,
        options: PutOptions,
    ) -> GatewayResult<StoredDocument> {
        let timestamp = now();

        if !options.versioning {
            let body = serde_json::to_string(&document)?;
            sqlx::query(
                "INSERT INTO documents (container, item, body, version_id, updated_at)
                 VALUES (?, ?, ?, NULL, ?)
                 ON CONFLICT(container, item) DO UPDATE SET
                    body = excluded.body,
                    version_id = NULL,
                    updated_at = excluded.updated_at",
            )
            .bind(container)
            .bind(item)
            .bind(&body)
            .bind(&timestamp)
            .execute(&*self.db)
            .await?;

            return Ok(StoredDocument {
                version_id: None,
                document,
            });
        }

        let version_id = options
            .version_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        if let Value::Object(map) = &mut document {
            map.insert("versionId".into(), Value::String(version_id.clone()));
        }
        let body = serde_json::to_string(&document)?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO document_versions (container, item, version_id, body, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(container, item, version_id) DO UPDATE SET
                body = excluded.body,
                created_at = excluded.created_at",
        )
        .bind(container)
        .bind(item)
        .bind(&version_id)
        .bind(&body)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO documents (container, item, body, version_id, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(container, item) DO UPDATE SET
                body = excluded.body,
                version_id = excluded.version_id,
                updated_at = excluded.updated_at",
        )
        .bind(container)
        .bind(item)
        .bind(&body)
        .bind(&version_id)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(container, item, version_id = %version_id, "committed versioned document");

        Ok(StoredDocument {
            version_id: Some(version_id),
            document,
        })
    }

    async fn delete_document(&self, container: &str, item: &str) -> GatewayResult<bool> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM documents WHERE container = ? AND item = ?")
            .bind(container)
            .bind(item)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_versions WHERE container = ? AND item = ?")
            .bind(container)
            .bind(item)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_documents(
        &self,
        container: &str,
        params: &ListingParams,
    ) -> GatewayResult<DocumentListing> {
        // One extra row tells whether the listing is truncated.
        let fetch_limit = i64::try_from(params.max_keys.saturating_add(1)).unwrap_or(i64::MAX);

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT item, body FROM documents WHERE container = ");
        builder.push_bind(container);

        if let Some(prefix) = &params.prefix {
            builder.push(" AND substr(item, 1, length(");
            builder.push_bind(prefix);
            builder.push(")) = ");
            builder.push_bind(prefix);
        }

        if let Some(after) = &params.after {
            builder.push(" AND item > ");
            builder.push_bind(after);
        }

        builder.push(" ORDER BY item ASC LIMIT ");
        builder.push_bind(fetch_limit);

        let mut rows: Vec<(String, String)> =
            builder.build_query_as().fetch_all(&*self.db).await?;

        let is_truncated = rows.len() > params.max_keys;
        rows.truncate(params.max_keys);

        let entries = rows
            .into_iter()
            .map(|(item, body)| Ok((item, serde_json::from_str::<Value>(&body)?)))
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(DocumentListing {
            entries,
            is_truncated,
        })
    }

    async fn ping(&self) -> GatewayResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_store;
    use serde_json::json;

    #[tokio::test]
    async fn get_missing_document_is_none() {
        let store = memory_store().await;
        assert!(store.get_document("b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unversioned_put_overwrites_latest() {
        let store = memory_store().await;
        store
            .put_document("b", "k", json!({"n": 1}), PutOptions::default())
            .await
            .unwrap();
        let stored = store
            .put_document("b", "k", json!({"n": 2}), PutOptions::default())
            .await
            .unwrap();

        assert!(stored.version_id.is_none());
        assert_eq!(
            store.get_document("b", "k").await.unwrap(),
            Some(json!({"n": 2}))
        );
    }

    #[tokio::test]
    async fn versioned_put_uses_explicit_version_and_moves_latest() {
        let store = memory_store().await;
        let first = store
            .put_document("b", "k", json!({"n": 1}), PutOptions::versioned(Some("v1".into())))
            .await
            .unwrap();
        store
            .put_document("b", "k", json!({"n": 2}), PutOptions::versioned(Some("v2".into())))
            .await
            .unwrap();

        assert_eq!(first.version_id.as_deref(), Some("v1"));
        assert_eq!(first.document["versionId"], "v1");
        assert_eq!(
            store.get_document("b", "k").await.unwrap().unwrap()["n"],
            2
        );
        assert_eq!(
            store
                .get_document_version("b", "k", "v1")
                .await
                .unwrap()
                .unwrap()["n"],
            1
        );
    }

    #[tokio::test]
    async fn same_version_twice_overwrites_instead_of_duplicating() {
        let store = memory_store().await;
        for n in [1, 2] {
            store
                .put_document(
                    "b",
                    "k",
                    json!({"n": n}),
                    PutOptions::versioned(Some("v1".into())),
                )
                .await
                .unwrap();
        }

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM document_versions WHERE container = 'b' AND item = 'k'",
        )
        .fetch_one(&*store.db)
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            store
                .get_document_version("b", "k", "v1")
                .await
                .unwrap()
                .unwrap()["n"],
            2
        );
    }

    #[tokio::test]
    async fn versioned_put_generates_an_id_when_none_given() {
        let store = memory_store().await;
        let stored = store
            .put_document("b", "k", json!({}), PutOptions::versioned(None))
            .await
            .unwrap();
        let id = stored.version_id.unwrap();
        assert_eq!(id.len(), 32);
        assert!(store.get_document_version("b", "k", &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn listing_filters_by_prefix_and_marker_and_reports_truncation() {
        let store = memory_store().await;
        for item in ["a1", "a2", "a3", "b1"] {
            store
                .put_document("c", item, json!({"item": item}), PutOptions::default())
                .await
                .unwrap();
        }

        let params = ListingParams {
            prefix: Some("a".into()),
            after: Some("a1".into()),
            max_keys: 1,
        };
        let listing = store.list_documents("c", &params).await.unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].0, "a2");
        assert!(listing.is_truncated);

        let params = ListingParams {
            prefix: Some("a".into()),
            after: Some("a2".into()),
            max_keys: 10,
        };
        let listing = store.list_documents("c", &params).await.unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].0, "a3");
        assert!(!listing.is_truncated);
    }

    #[tokio::test]
    async fn listing_zero_keys_still_signals_truncation() {
        let store = memory_store().await;
        let params = ListingParams {
            max_keys: 0,
            ..Default::default()
        };
        assert!(!store.list_documents("c", &params).await.unwrap().is_truncated);

        store
            .put_document("c", "x", json!({}), PutOptions::default())
            .await
            .unwrap();
        let listing = store.list_documents("c", &params).await.unwrap();
        assert!(listing.entries.is_empty());
        assert!(listing.is_truncated);
    }

    #[tokio::test]
    async fn unbounded_listing_returns_everything() {
        let store = memory_store().await;
        for item in ["a", "b", "c"] {
            store
                .put_document("c", item, json!({}), PutOptions::default())
                .await
                .unwrap();
        }
        let params = ListingParams {
            max_keys: usize::MAX,
            ..Default::default()
        };
        let listing = store.list_documents("c", &params).await.unwrap();
        assert_eq!(listing.entries.len(), 3);
        assert!(!listing.is_truncated);
    }

    #[tokio::test]
    async fn delete_removes_item_and_versions() {
        let store = memory_store().await;
        store
            .put_document("b", "k", json!({}), PutOptions::versioned(Some("v1".into())))
            .await
            .unwrap();
        assert!(store.delete_document("b", "k").await.unwrap());
        assert!(!store.delete_document("b", "k").await.unwrap());
        assert!(store.get_document_version("b", "k", "v1").await.unwrap().is_none());
    }
}
