//! Defines routes for the gateway.
//!
//! ## Structure
//! - **Health**
//!   - `GET /healthz`, `GET /readyz`
//!
//! - **Replication**
//!   - `ANY /_/backbeat/{bucket}/{*key}/{resource}`: data and metadata ingestion
//!
//! - **Bucket-level endpoints**
//!   - `PUT    /{bucket}`: create bucket
//!
//! - **Multipart endpoints**
//!   - `POST   /{bucket}/{*key}?uploads`: initiate upload
//!   - `PUT    /{bucket}/{*key}?partNumber&uploadId`: upload part
//!   - `GET    /{bucket}/{*key}?uploadId`: list parts
//!   - `DELETE /{bucket}/{*key}?uploadId`: abort upload
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        backbeat_handlers::route_backbeat,
        health_handlers::{healthz, readyz},
        multipart_handlers::{create_bucket, delete_object, get_object, post_object, put_object},
    },
    services::gateway_service::GatewayService,
};
use axum::{
    Router,
    routing::{any, get, put},
};

/// Build the router. Handlers share a `GatewayService` as state.
pub fn routes() -> Router<GatewayService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // replication ingestion; the resource is the last path segment
        .route("/_/backbeat/{*path}", any(route_backbeat))
        // Multipart routes
        .route(
            "/{bucket}/{*key}",
            put(put_object)
                .post(post_object)
                .get(get_object)
                .delete(delete_object),
        )
        // Bucket-level routes
        .route("/{bucket}", put(create_bucket))
}
