//! The refreshed document
//!
//! On the wire the document is JSON with a `data` array of records. Record dates use
//! the compact `yyyyMMddHHmmss` form in a fixed UTC+9 offset. Once parsed, dates are
//! held in UTC and persist as ISO-8601.

use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Format of record dates on the wire
pub const COMPACT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Offset of record dates on the wire, in seconds east of UTC
pub const COMPACT_TIMESTAMP_OFFSET_SECS: i32 = 9 * 60 * 60;

/// Parsed document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Records in document order
    pub data: Vec<SampleData>,
}

/// One record of the document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleData {
    /// Record timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Record title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Deserialize)]
struct WireSample {
    data: Vec<WireSampleData>,
}

#[derive(Deserialize)]
struct WireSampleData {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn wire_offset() -> Result<FixedOffset> {
    FixedOffset::east_opt(COMPACT_TIMESTAMP_OFFSET_SECS)
        .ok_or_else(|| Error::Decode("invalid compact timestamp offset".to_string()))
}

/// Parse a compact `yyyyMMddHHmmss` UTC+9 timestamp
pub fn parse_compact_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, COMPACT_TIMESTAMP_FORMAT)
        .map_err(|e| Error::Decode(format!("invalid timestamp '{}': {}", value, e)))?;
    let local = wire_offset()?
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| Error::Decode(format!("ambiguous timestamp '{}'", value)))?;
    Ok(local.with_timezone(&Utc))
}

/// Render a timestamp in the compact wire form
pub fn format_compact_timestamp(value: &DateTime<Utc>) -> Result<String> {
    Ok(value
        .with_timezone(&wire_offset()?)
        .format(COMPACT_TIMESTAMP_FORMAT)
        .to_string())
}

/// Decode a downloaded document
///
/// Fails with [`Error::Decode`] when the body is not the expected shape, or when a
/// record carries an unparseable date.
pub fn decode_document(body: &[u8]) -> Result<Sample> {
    let wire: WireSample = serde_json::from_slice(body)
        .map_err(|e| Error::Decode(format!("unexpected document shape: {}", e)))?;

    let data = wire
        .data
        .into_iter()
        .map(|record| {
            Ok(SampleData {
                date: record
                    .date
                    .as_deref()
                    .map(parse_compact_timestamp)
                    .transpose()?,
                title: record.title,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Sample { data })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_timestamps_are_read_in_utc_plus_nine() {
        let parsed = parse_compact_timestamp("20181117114326").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2018, 11, 17, 2, 43, 26).unwrap());
        assert_eq!(format_compact_timestamp(&parsed).unwrap(), "20181117114326");
    }

    #[test]
    fn compact_timestamp_rejects_other_formats() {
        for value in ["2018-11-17T11:43:26Z", "201811171143", "", "20181317114326"] {
            assert!(
                matches!(parse_compact_timestamp(value), Err(Error::Decode(_))),
                "{value} must be rejected"
            );
        }
    }

    #[test]
    fn document_records_keep_order_and_optionals() {
        let body = br#"{"data":[
            {"date":"20181201090000","title":"first"},
            {"title":"untimed"},
            {}
        ]}"#;
        let sample = decode_document(body).unwrap();

        assert_eq!(sample.data.len(), 3);
        assert_eq!(
            sample.data[0].date,
            Some(Utc.with_ymd_and_hms(2018, 12, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(sample.data[0].title.as_deref(), Some("first"));
        assert_eq!(sample.data[1].date, None);
        assert_eq!(sample.data[2], SampleData::default());
    }

    #[test]
    fn document_without_data_is_a_decode_error() {
        let bodies: [&[u8]; 2] = [b"{}", br#"{"error":"not found"}"#];
        for body in bodies {
            assert!(matches!(decode_document(body), Err(Error::Decode(_))));
        }
        assert_eq!(decode_document(br#"{"data":[]}"#).unwrap(), Sample::default());
    }

    #[test]
    fn wrong_shapes_are_decode_errors() {
        let bodies: [&[u8]; 4] = [
            b"not json",
            br#"[1,2]"#,
            br#"{"data":{"title":"x"}}"#,
            br#"{"data":[{"date":"soon"}]}"#,
        ];
        for body in bodies {
            assert!(matches!(decode_document(body), Err(Error::Decode(_))));
        }
    }
}
