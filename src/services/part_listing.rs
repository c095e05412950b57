//! Part listing engine: request parameter handling and normalization of raw
//! part entries into a [`ListingPage`].

use crate::{
    errors::{GatewayError, GatewayResult},
    models::multipart::{ListingPage, Part, RawPartEntry, RawPartListing},
    services::key_codec::{Splitter, parse_part_number},
};

pub const DEFAULT_MAX_PARTS: usize = 1000;

fn is_decimal(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve the `max-parts` request parameter.
///
/// Missing or non-numeric values fall back to [`DEFAULT_MAX_PARTS`]; the
/// result never exceeds `hard_limit`. Negative values are rejected.
pub fn resolve_max_parts(raw: Option<&str>, hard_limit: usize) -> GatewayResult<usize> {
    let requested = match raw.map(str::trim) {
        Some(value) if value.starts_with('-') && is_decimal(&value[1..]) => {
            return Err(GatewayError::InvalidArgument(format!(
                "max-parts must be non-negative, got {}",
                value
            )));
        }
        Some(value) if is_decimal(value) => value.parse::<usize>().unwrap_or(hard_limit),
        _ => DEFAULT_MAX_PARTS,
    };
    Ok(requested.min(hard_limit))
}

/// Resolve the `part-number-marker` request parameter; 0 lists from the start.
pub fn resolve_part_number_marker(raw: Option<&str>) -> GatewayResult<u32> {
    match raw.map(str::trim) {
        Some(value) if value.starts_with('-') && is_decimal(&value[1..]) => Err(
            GatewayError::InvalidArgument(format!("part-number-marker must be non-negative, got {}", value)),
        ),
        Some(value) if is_decimal(value) => value.parse::<u32>().map_err(|_| {
            GatewayError::InvalidArgument(format!("part-number-marker out of range: {}", value))
        }),
        _ => Ok(0),
    }
}

fn entry_part_number(entry: &RawPartEntry, splitter: Splitter) -> GatewayResult<u32> {
    match (&entry.key, entry.part_number) {
        (Some(key), _) => parse_part_number(key, splitter),
        (None, Some(number)) => Ok(number),
        (None, None) => Err(GatewayError::MalformedKey(String::new())),
    }
}

/// Turn raw entries into parts, keeping the source's order and truncation
/// signal.
pub fn normalize(raw: RawPartListing, splitter: Splitter) -> GatewayResult<ListingPage> {
    let parts = raw
        .contents
        .into_iter()
        .map(|entry| {
            let part_number = entry_part_number(&entry, splitter)?;
            Ok(Part {
                part_number,
                last_modified: entry.value.last_modified,
                etag: entry.value.etag,
                size: entry.value.size,
            })
        })
        .collect::<GatewayResult<Vec<_>>>()?;

    let next_part_number_marker = if raw.is_truncated {
        parts.last().map(|p| p.part_number)
    } else {
        None
    };

    Ok(ListingPage {
        parts,
        is_truncated: raw.is_truncated,
        next_part_number_marker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::multipart::PartValue, services::key_codec::part_key};

    fn value(etag: &str, size: u64) -> PartValue {
        PartValue {
            last_modified: "2024-05-01T10:00:00.000Z".into(),
            etag: etag.into(),
            size,
            locations: Vec::new(),
        }
    }

    #[test]
    fn max_parts_defaults_and_clamps() {
        assert_eq!(resolve_max_parts(None, 1000).unwrap(), 1000);
        assert_eq!(resolve_max_parts(Some("abc"), 1000).unwrap(), 1000);
        assert_eq!(resolve_max_parts(Some("abc"), 500).unwrap(), 500);
        assert_eq!(resolve_max_parts(Some("20"), 1000).unwrap(), 20);
        assert_eq!(resolve_max_parts(Some("5000"), 1000).unwrap(), 1000);
        assert_eq!(resolve_max_parts(Some("0"), 1000).unwrap(), 0);
        assert_eq!(
            resolve_max_parts(Some("99999999999999999999999"), 1000).unwrap(),
            1000
        );
    }

    #[test]
    fn negative_max_parts_is_invalid() {
        assert!(matches!(
            resolve_max_parts(Some("-1"), 1000),
            Err(GatewayError::InvalidArgument(_))
        ));
    }

    #[test]
    fn marker_parsing() {
        assert_eq!(resolve_part_number_marker(None).unwrap(), 0);
        assert_eq!(resolve_part_number_marker(Some("x")).unwrap(), 0);
        assert_eq!(resolve_part_number_marker(Some("7")).unwrap(), 7);
        assert!(resolve_part_number_marker(Some("-2")).is_err());
        assert!(resolve_part_number_marker(Some("99999999999")).is_err());
    }

    #[test]
    fn normalizes_keyed_and_numbered_entries() {
        let raw = RawPartListing {
            contents: vec![
                RawPartEntry {
                    key: Some(part_key("u1", 1, Splitter::Current)),
                    part_number: None,
                    value: value("e1", 5),
                },
                RawPartEntry {
                    key: None,
                    part_number: Some(2),
                    value: value("e2", 6),
                },
            ],
            is_truncated: true,
        };

        let page = normalize(raw, Splitter::Current).unwrap();
        assert_eq!(
            page.parts,
            vec![
                Part {
                    part_number: 1,
                    last_modified: "2024-05-01T10:00:00.000Z".into(),
                    etag: "e1".into(),
                    size: 5,
                },
                Part {
                    part_number: 2,
                    last_modified: "2024-05-01T10:00:00.000Z".into(),
                    etag: "e2".into(),
                    size: 6,
                },
            ]
        );
        assert!(page.is_truncated);
        assert_eq!(page.next_part_number_marker, Some(2));
    }

    #[test]
    fn untruncated_page_has_no_next_marker() {
        let raw = RawPartListing {
            contents: vec![RawPartEntry {
                key: Some("u1|00003".into()),
                part_number: None,
                value: value("e3", 1),
            }],
            is_truncated: false,
        };
        let page = normalize(raw, Splitter::Legacy).unwrap();
        assert_eq!(page.parts[0].part_number, 3);
        assert_eq!(page.next_part_number_marker, None);
    }

    #[test]
    fn empty_listing() {
        let page = normalize(RawPartListing::default(), Splitter::Current).unwrap();
        assert!(page.parts.is_empty());
        assert!(!page.is_truncated);
        assert_eq!(page.next_part_number_marker, None);
    }

    #[test]
    fn unparseable_key_fails_the_whole_page() {
        let raw = RawPartListing {
            contents: vec![RawPartEntry {
                key: Some("u1..|..oops".into()),
                part_number: None,
                value: value("e", 1),
            }],
            is_truncated: false,
        };
        assert!(matches!(
            normalize(raw, Splitter::Current),
            Err(GatewayError::MalformedKey(_))
        ));
    }
}
