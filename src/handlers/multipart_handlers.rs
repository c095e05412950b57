//! HTTP handlers for buckets and multipart uploads.
//! Part bodies are streamed to the data store; listing and lifecycle logic
//! lives in `GatewayService`.

use crate::{
    errors::{AppError, GatewayError},
    models::{bucket::Identity, multipart::PartsListing},
    services::{
        auth::CANONICAL_ID_HEADER,
        data_store::PayloadStream,
        gateway_service::{GatewayService, InitiateUpload},
        location::requested_location,
    },
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::io;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";
const ANONYMOUS: &str = "anonymous";

/// Characters left as-is by `encoding-type=url`.
const URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Query parameters recognised on `/{bucket}/{*key}`.
#[derive(Debug, Default, Deserialize)]
pub struct MultipartQuery {
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<String>,
    #[serde(rename = "max-parts")]
    pub max_parts: Option<String>,
    #[serde(rename = "part-number-marker")]
    pub part_number_marker: Option<String>,
    #[serde(rename = "encoding-type")]
    pub encoding_type: Option<String>,
}

/// Optional request body for `PUT /{bucket}`.
#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    #[serde(rename = "LocationConstraint")]
    pub location_constraint: Option<String>,
}

fn requester(headers: &HeaderMap) -> Option<Identity> {
    headers
        .get(CANONICAL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|id| Identity::new(id, id))
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn declared_length(headers: &HeaderMap) -> Result<Option<u64>, GatewayError> {
    header_str(headers, header::CONTENT_LENGTH)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| GatewayError::InvalidArgument("invalid content-length".into()))
        })
        .transpose()
}

pub(crate) fn payload_stream(body: Body) -> PayloadStream {
    body.into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed()
}

fn xml_response(status: StatusCode, xml: String) -> Response {
    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    *response.status_mut() = status;
    response
}

/// PUT `/{bucket}`: create bucket.
pub async fn create_bucket(
    State(service): State<GatewayService>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let location = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<CreateBucketReq>(&body)
            .map_err(|err| {
                AppError::new(
                    StatusCode::BAD_REQUEST,
                    "MalformedXML",
                    format!("invalid bucket configuration: {}", err),
                )
            })?
            .location_constraint
    };
    let owner = requester(&headers).unwrap_or_else(|| Identity::new(ANONYMOUS, ANONYMOUS));

    service.create_bucket(&bucket, location, owner).await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<CreateBucketResult xmlns="{}">"#,
            r#"<Location>/{}</Location>"#,
            r#"</CreateBucketResult>"#
        ),
        S3_XMLNS,
        xml_escape(&bucket)
    );
    Ok(xml_response(StatusCode::OK, xml))
}

/// POST `/{bucket}/{*key}?uploads`: initiate a multipart upload.
pub async fn post_object(
    State(service): State<GatewayService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<MultipartQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if q.uploads.is_none() {
        return Err(GatewayError::MethodNotAllowed.into());
    }

    let request = InitiateUpload {
        initiator: requester(&headers),
        storage_class: header_str(&headers, "x-amz-storage-class").map(str::to_string),
        location: requested_location(&headers),
    };
    let overview = service
        .initiate_multipart_upload(&bucket, &key, request)
        .await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<InitiateMultipartUploadResult xmlns="{}">"#,
            r#"<Bucket>{}</Bucket>"#,
            r#"<Key>{}</Key>"#,
            r#"<UploadId>{}</UploadId>"#,
            r#"</InitiateMultipartUploadResult>"#
        ),
        S3_XMLNS,
        xml_escape(&overview.bucket),
        xml_escape(&overview.key),
        xml_escape(&overview.upload_id)
    );
    Ok(xml_response(StatusCode::OK, xml))
}

/// PUT `/{bucket}/{*key}?partNumber=N&uploadId=U`: upload one part.
pub async fn put_object(
    State(service): State<GatewayService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<MultipartQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let (Some(upload_id), Some(part_number)) = (q.upload_id.as_deref(), q.part_number.as_deref())
    else {
        return Err(GatewayError::MethodNotAllowed.into());
    };
    let part_number = part_number.trim().parse::<u32>().map_err(|_| {
        GatewayError::InvalidArgument(format!("invalid part number `{}`", part_number))
    })?;
    let declared_len = declared_length(&headers)?;
    let content_md5 = header_str(&headers, "content-md5");

    let part = service
        .upload_part(
            &bucket,
            &key,
            upload_id,
            part_number,
            payload_stream(body),
            declared_len,
            content_md5,
        )
        .await?;

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", part.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// GET `/{bucket}/{*key}?uploadId=U`: list parts.
pub async fn get_object(
    State(service): State<GatewayService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<MultipartQuery>,
) -> Result<Response, AppError> {
    let Some(upload_id) = q.upload_id.as_deref() else {
        return Err(GatewayError::MethodNotAllowed.into());
    };

    let listing = service
        .list_parts(
            &bucket,
            &key,
            upload_id,
            q.max_parts.as_deref(),
            q.part_number_marker.as_deref(),
        )
        .await?;

    let url_encoded = q.encoding_type.as_deref() == Some("url");
    Ok(xml_response(
        StatusCode::OK,
        build_list_parts_xml(&listing, url_encoded),
    ))
}

/// DELETE `/{bucket}/{*key}?uploadId=U`: abort an upload.
pub async fn delete_object(
    State(service): State<GatewayService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<MultipartQuery>,
) -> Result<impl IntoResponse, AppError> {
    let Some(upload_id) = q.upload_id.as_deref() else {
        return Err(GatewayError::MethodNotAllowed.into());
    };
    service
        .abort_multipart_upload(&bucket, &key, upload_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn build_list_parts_xml(listing: &PartsListing, url_encoded: bool) -> String {
    let encode = |value: &str| -> String {
        if url_encoded {
            utf8_percent_encode(value, URL_ENCODE_SET).to_string()
        } else {
            xml_escape(value)
        }
    };
    let tag = |xml: &mut String, name: &str, value: &str| {
        xml.push_str(&format!("<{}>{}</{}>", name, encode(value), name));
    };

    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListPartsResult xmlns="{}">"#,
        S3_XMLNS
    );
    tag(&mut xml, "Bucket", &listing.bucket);
    tag(&mut xml, "Key", &listing.key);
    tag(&mut xml, "UploadId", &listing.upload_id);
    xml.push_str("<Initiator>");
    tag(&mut xml, "ID", &listing.initiator.id);
    tag(&mut xml, "DisplayName", &listing.initiator.display_name);
    xml.push_str("</Initiator><Owner>");
    tag(&mut xml, "ID", &listing.owner.id);
    tag(&mut xml, "DisplayName", &listing.owner.display_name);
    xml.push_str("</Owner>");
    tag(&mut xml, "StorageClass", &listing.storage_class);
    if listing.part_number_marker > 0 {
        tag(
            &mut xml,
            "PartNumberMarker",
            &listing.part_number_marker.to_string(),
        );
    }
    if let Some(next) = listing.page.next_part_number_marker {
        tag(&mut xml, "NextPartNumberMarker", &next.to_string());
    }
    tag(&mut xml, "MaxParts", &listing.max_parts.to_string());
    tag(
        &mut xml,
        "IsTruncated",
        if listing.page.is_truncated { "true" } else { "false" },
    );

    for part in &listing.page.parts {
        xml.push_str("<Part>");
        tag(&mut xml, "PartNumber", &part.part_number.to_string());
        tag(&mut xml, "LastModified", &part.last_modified);
        tag(&mut xml, "ETag", &format!("\"{}\"", part.etag));
        tag(&mut xml, "Size", &part.size.to_string());
        xml.push_str("</Part>");
    }

    xml.push_str("</ListPartsResult>");
    xml
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::multipart::{ListingPage, Part},
        test_support::single_backend_service,
    };

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn listing(key: &str, marker: u32, page: ListingPage) -> PartsListing {
        PartsListing {
            bucket: "b".into(),
            key: key.into(),
            upload_id: "u1".into(),
            initiator: Identity::new("i", "init"),
            owner: Identity::new("o", "owner"),
            storage_class: "STANDARD".into(),
            part_number_marker: marker,
            max_parts: 2,
            page,
        }
    }

    fn part(n: u32) -> Part {
        Part {
            part_number: n,
            last_modified: "2024-01-01T00:00:00.000Z".into(),
            etag: format!("etag{}", n),
            size: 10,
        }
    }

    #[test]
    fn xml_omits_markers_when_not_applicable() {
        let xml = build_list_parts_xml(
            &listing(
                "a&b",
                0,
                ListingPage {
                    parts: vec![part(1)],
                    is_truncated: false,
                    next_part_number_marker: None,
                },
            ),
            false,
        );
        assert!(xml.contains("<Key>a&amp;b</Key>"));
        assert!(!xml.contains("PartNumberMarker"));
        assert!(xml.contains("<IsTruncated>false</IsTruncated>"));
        assert!(xml.contains("<ETag>&quot;etag1&quot;</ETag>"));
    }

    #[test]
    fn xml_reports_markers_for_truncated_pages() {
        let xml = build_list_parts_xml(
            &listing(
                "k",
                1,
                ListingPage {
                    parts: vec![part(2), part(3)],
                    is_truncated: true,
                    next_part_number_marker: Some(3),
                },
            ),
            false,
        );
        assert!(xml.contains("<PartNumberMarker>1</PartNumberMarker>"));
        assert!(xml.contains("<NextPartNumberMarker>3</NextPartNumberMarker>"));
        assert!(xml.contains("<MaxParts>2</MaxParts>"));
        assert_eq!(xml.matches("<Part>").count(), 2);
    }

    #[test]
    fn url_encoding_applies_to_text_fields() {
        let xml = build_list_parts_xml(&listing("dir/a b", 0, ListingPage::default()), true);
        assert!(xml.contains("<Key>dir%2Fa%20b</Key>"));
    }

    #[tokio::test]
    async fn multipart_round_trip_over_handlers() {
        let t = single_backend_service().await;
        create_bucket(
            State(t.service.clone()),
            Path("web-bucket".to_string()),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await
        .unwrap();

        let response = post_object(
            State(t.service.clone()),
            Path(("web-bucket".to_string(), "dir/obj".to_string())),
            Query(MultipartQuery {
                uploads: Some(String::new()),
                ..Default::default()
            }),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        let xml = body_string(response).await;
        let start = xml.find("<UploadId>").unwrap() + "<UploadId>".len();
        let end = xml.find("</UploadId>").unwrap();
        let upload_id = xml[start..end].to_string();

        for n in 1..=3 {
            let response = put_object(
                State(t.service.clone()),
                Path(("web-bucket".to_string(), "dir/obj".to_string())),
                Query(MultipartQuery {
                    upload_id: Some(upload_id.clone()),
                    part_number: Some(n.to_string()),
                    ..Default::default()
                }),
                HeaderMap::new(),
                Body::from(format!("part {}", n)),
            )
            .await
            .unwrap();
            assert!(response.headers().contains_key(header::ETAG));
        }

        let response = get_object(
            State(t.service.clone()),
            Path(("web-bucket".to_string(), "dir/obj".to_string())),
            Query(MultipartQuery {
                upload_id: Some(upload_id.clone()),
                max_parts: Some("2".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        let xml = body_string(response).await;
        assert!(xml.contains("<IsTruncated>true</IsTruncated>"));
        assert!(xml.contains("<NextPartNumberMarker>2</NextPartNumberMarker>"));
        assert!(xml.contains("<Initiator><ID>anonymous</ID>"));

        let response = delete_object(
            State(t.service.clone()),
            Path(("web-bucket".to_string(), "dir/obj".to_string())),
            Query(MultipartQuery {
                upload_id: Some(upload_id),
                ..Default::default()
            }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn listing_without_upload_id_is_not_allowed() {
        let t = single_backend_service().await;
        let err = get_object(
            State(t.service.clone()),
            Path(("b".to_string(), "k".to_string())),
            Query(MultipartQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unknown_upload_maps_to_not_found() {
        let t = single_backend_service().await;
        t.bucket("nf-bucket").await;
        let err = get_object(
            State(t.service.clone()),
            Path(("nf-bucket".to_string(), "k".to_string())),
            Query(MultipartQuery {
                upload_id: Some("missing".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NoSuchUpload");
    }
}
