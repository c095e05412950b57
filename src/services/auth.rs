//! Authentication of replication requests.
//!
//! The request handler receives an [`AuthHandler`] at construction; which
//! one is used is decided once in `main` from the configuration.

use crate::errors::{GatewayError, GatewayResult};
use async_trait::async_trait;
use axum::http::{HeaderMap, header};

/// Header carrying the canonical ID of the account a replication acts for.
pub const CANONICAL_ID_HEADER: &str = "x-scal-canonical-id";

/// Who a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub canonical_id: String,
}

#[async_trait]
pub trait AuthHandler: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> GatewayResult<AuthInfo>;
}

fn canonical_id(headers: &HeaderMap) -> String {
    headers
        .get(CANONICAL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Accepts requests bearing `Authorization: Bearer <token>`.
pub struct SharedTokenAuth {
    token: String,
}

impl SharedTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthHandler for SharedTokenAuth {
    async fn authenticate(&self, headers: &HeaderMap) -> GatewayResult<AuthInfo> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(GatewayError::AccessDenied)?;
        if presented.trim() != self.token {
            return Err(GatewayError::AccessDenied);
        }
        Ok(AuthInfo {
            canonical_id: canonical_id(headers),
        })
    }
}

/// Accepts every request. Used when no replication token is configured.
pub struct AllowAllAuth;

#[async_trait]
impl AuthHandler for AllowAllAuth {
    async fn authenticate(&self, headers: &HeaderMap) -> GatewayResult<AuthInfo> {
        Ok(AuthInfo {
            canonical_id: canonical_id(headers),
        })
    }
}
