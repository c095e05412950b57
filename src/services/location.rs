//! Location-constraint resolution: which backend a write goes to.

use crate::{
    errors::{GatewayError, GatewayResult},
    models::bucket::BucketInfo,
    services::data_store::DataRouter,
};
use axum::http::HeaderMap;

/// Header naming an explicit location for a single write.
pub const LOCATION_HEADER: &str = "x-amz-meta-scal-location-constraint";

/// The backend selected for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub location: String,
}

/// Location requested through [`LOCATION_HEADER`], if any.
pub fn requested_location(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Pick the requested location, else the bucket's, and make sure a backend
/// serves it.
pub fn resolve(
    requested: Option<&str>,
    bucket: &BucketInfo,
    data: &DataRouter,
) -> GatewayResult<BackendInfo> {
    let location = requested.unwrap_or(&bucket.location_constraint);
    if data.location(location).is_none() {
        return Err(GatewayError::BackendUnavailable(format!(
            "location `{}` is not configured",
            location
        )));
    }
    Ok(BackendInfo {
        location: location.to_string(),
    })
}
