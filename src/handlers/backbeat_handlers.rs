//! Replication routes under `/_/backbeat/{bucket}/{key...}/{resource}`.
//!
//! - `PUT .../data`     -> store replicated bytes, reply with retrieval info
//! - `PUT .../metadata` -> commit a replicated metadata document as a version

use crate::{
    errors::{AppError, GatewayError},
    handlers::multipart_handlers::payload_stream,
    models::bucket::BucketInfo,
    services::{
        auth::CANONICAL_ID_HEADER, gateway_service::GatewayService, location::requested_location,
        replication::DataIngest,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-amz-request-id");
const MAX_METADATA_BYTES: usize = 16 * 1024 * 1024;

/// A backbeat path split into its parts.
#[derive(Debug, PartialEq, Eq)]
struct BackbeatTarget<'a> {
    bucket: &'a str,
    object_key: String,
    resource: &'a str,
}

/// `bucket/key.../resource`; the key may itself contain slashes.
fn parse_target(path: &str) -> Option<BackbeatTarget<'_>> {
    let (bucket, rest) = path.split_once('/')?;
    let (object_key, resource) = rest.rsplit_once('/')?;
    if bucket.is_empty() || object_key.is_empty() || resource.is_empty() {
        return None;
    }
    Some(BackbeatTarget {
        bucket,
        object_key: object_key.to_string(),
        resource,
    })
}

fn json_response<T: Serialize>(payload: T) -> Response {
    let mut response = Json(payload).into_response();
    if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().simple().to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Any method on `/_/backbeat/{*path}`.
pub async fn route_backbeat(
    State(service): State<GatewayService>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let Some(target) = parse_target(&path) else {
        debug!(method = %method, path = %path, "invalid backbeat request");
        return Err(GatewayError::MethodNotAllowed.into());
    };

    let auth = service.auth.authenticate(&headers).await?;
    let bucket = service.fetch_bucket(target.bucket).await?;

    match (method, target.resource) {
        (Method::PUT, "data") => {
            put_data(&service, &bucket, &target, &auth.canonical_id, &headers, body).await
        }
        (Method::PUT, "metadata") => put_metadata(&service, &bucket, &target, body).await,
        (method, resource) => {
            debug!(method = %method, resource, "no such backbeat route");
            Err(GatewayError::MethodNotAllowed.into())
        }
    }
}

async fn put_data(
    service: &GatewayService,
    bucket: &BucketInfo,
    target: &BackbeatTarget<'_>,
    authenticated_id: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let canonical_id = headers
        .get(CANONICAL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(authenticated_id);
    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| GatewayError::InvalidArgument("missing or invalid content-length".into()))?;
    let content_md5 = headers
        .get("content-md5")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let requested = requested_location(headers);

    let ingest = DataIngest {
        object_key: &target.object_key,
        canonical_id,
        requested_location: requested.as_deref(),
        declared_len,
        content_md5,
    };
    let info = service
        .ingest_data(bucket, ingest, payload_stream(body))
        .await?;
    Ok(json_response(info))
}

async fn put_metadata(
    service: &GatewayService,
    bucket: &BucketInfo,
    target: &BackbeatTarget<'_>,
    body: Body,
) -> Result<Response, AppError> {
    let raw = axum::body::to_bytes(body, MAX_METADATA_BYTES)
        .await
        .map_err(|err| GatewayError::MalformedMetadata(err.to_string()))?;
    let stored = service
        .ingest_metadata(bucket, &target.object_key, &raw)
        .await?;
    Ok(json_response(stored.document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BackendMode,
        services::auth::SharedTokenAuth,
        test_support::{service_with, single_backend_service},
    };
    use axum::http::StatusCode;
    use std::sync::Arc;

    const BODY: &str = "I am a body";
    const BODY_MD5: &str = "be747eb4b75517bf6b3cf7c5fbb62f3a";

    fn data_headers(md5: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("11"));
        headers.insert("content-md5", HeaderValue::from_str(md5).unwrap());
        headers.insert(CANONICAL_ID_HEADER, HeaderValue::from_static("replicator"));
        headers
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn parses_targets() {
        assert_eq!(
            parse_target("b/dir/obj/data"),
            Some(BackbeatTarget {
                bucket: "b",
                object_key: "dir/obj".into(),
                resource: "data",
            })
        );
        assert!(parse_target("b/data").is_none());
        assert!(parse_target("b//data").is_none());
        assert!(parse_target("b/obj/").is_none());
    }

    #[tokio::test]
    async fn put_data_returns_retrieval_info() {
        let t = single_backend_service().await;
        t.bucket("bb-data").await;

        let response = route_backbeat(
            State(t.service.clone()),
            Path("bb-data/obj/data".to_string()),
            Method::PUT,
            data_headers(BODY_MD5),
            Body::from(BODY),
        )
        .await
        .unwrap();
        assert!(response.headers().contains_key("x-amz-request-id"));
        let body = json_body(response).await;
        assert_eq!(body[0]["dataStoreName"], "us-east-1");
        assert_eq!(body[0]["size"], 11);
        assert_eq!(body[0]["start"], 0);
    }

    #[tokio::test]
    async fn put_data_with_bad_digest_fails() {
        let t = single_backend_service().await;
        t.bucket("bb-digest").await;
        let err = route_backbeat(
            State(t.service.clone()),
            Path("bb-digest/obj/data".to_string()),
            Method::PUT,
            data_headers("00000000000000000000000000000000"),
            Body::from(BODY),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "BadDigest");
    }

    #[tokio::test]
    async fn put_metadata_reports_version() {
        let t = single_backend_service().await;
        t.bucket("bb-md").await;
        let response = route_backbeat(
            State(t.service.clone()),
            Path("bb-md/obj/metadata".to_string()),
            Method::PUT,
            HeaderMap::new(),
            Body::from(r#"{"versionId":"v42"}"#),
        )
        .await
        .unwrap();
        assert_eq!(json_body(response).await["versionId"], "v42");
    }

    #[tokio::test]
    async fn unknown_routes_are_not_allowed() {
        let t = single_backend_service().await;
        t.bucket("bb-route").await;
        for (method, path) in [
            (Method::GET, "bb-route/obj/data"),
            (Method::PUT, "bb-route/obj/tagging"),
            (Method::PUT, "bb-route/data"),
        ] {
            let err = route_backbeat(
                State(t.service.clone()),
                Path(path.to_string()),
                method,
                HeaderMap::new(),
                Body::empty(),
            )
            .await
            .unwrap_err();
            assert_eq!(err.status, StatusCode::METHOD_NOT_ALLOWED);
        }
    }

    #[tokio::test]
    async fn missing_bucket_is_reported() {
        let t = single_backend_service().await;
        let err = route_backbeat(
            State(t.service.clone()),
            Path("no-bucket/obj/metadata".to_string()),
            Method::PUT,
            HeaderMap::new(),
            Body::from("{}"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "NoSuchBucket");
    }

    #[tokio::test]
    async fn token_is_required_when_configured() {
        let t = service_with(BackendMode::Single, Arc::new(SharedTokenAuth::new("s3cret"))).await;
        t.bucket("bb-auth").await;
        let err = route_backbeat(
            State(t.service.clone()),
            Path("bb-auth/obj/metadata".to_string()),
            Method::PUT,
            HeaderMap::new(),
            Body::from("{}"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(
            route_backbeat(
                State(t.service.clone()),
                Path("bb-auth/obj/metadata".to_string()),
                Method::PUT,
                headers,
                Body::from("{}"),
            )
            .await
            .is_ok()
        );
    }
}
