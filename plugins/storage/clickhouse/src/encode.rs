use std::io::{Read, Write};

use base64::Engine;
use chrono::SecondsFormat;
use serde_json::{Map, Value};

use relay_api::{ColumnNames, RelayError, SinkRow};

use crate::config::{Compression, PayloadEncoding};

/// Append one row as a JSONEachRow line.
///
/// Event time goes out as RFC 3339 with microseconds; the insert runs with
/// `date_time_input_format=best_effort`, so the server parses it into
/// whatever DateTime type the column has.
pub fn write_row(
    out: &mut Vec<u8>,
    columns: &ColumnNames,
    row: &SinkRow,
    encoding: PayloadEncoding,
) -> Result<(), RelayError> {
    let mut object = Map::with_capacity(6);
    object.insert(
        columns.timestamp.clone(),
        Value::String(row.event_time.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    object.insert(columns.subject.clone(), Value::String(row.routing_key.clone()));
    object.insert(columns.partition_key.clone(), Value::String(row.partition_key.clone()));
    object.insert(columns.sequence.clone(), Value::from(row.sequence));
    object.insert(columns.metadata.clone(), Value::String(row.metadata.clone()));
    object.insert(columns.data.clone(), Value::String(payload_text(row, encoding)));

    serde_json::to_writer(&mut *out, &object)?;
    out.push(b'\n');
    Ok(())
}

fn payload_text(row: &SinkRow, encoding: PayloadEncoding) -> String {
    match encoding {
        PayloadEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(&row.payload),
        PayloadEncoding::Text => match std::str::from_utf8(&row.payload) {
            Ok(text) => text.to_string(),
            Err(e) => {
                tracing::warn!(
                    subject = %row.routing_key,
                    sequence = row.sequence,
                    error = %e,
                    "payload is not valid utf-8, storing lossy text"
                );
                String::from_utf8_lossy(&row.payload).into_owned()
            }
        },
    }
}

/// Compress a request body for the given `Content-Encoding`.
pub fn compress(body: Vec<u8>, compression: Compression) -> Result<Vec<u8>, RelayError> {
    match compression {
        Compression::None => Ok(body),
        Compression::Gzip => {
            let mut encoder = flate2::read::GzEncoder::new(&body[..], flate2::Compression::default());
            let mut compressed = Vec::new();
            encoder
                .read_to_end(&mut compressed)
                .map_err(|e| RelayError::new(format!("gzip compress: {e}")))?;
            Ok(compressed)
        }
        Compression::Lz4 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::with_capacity(body.len() / 2));
            encoder
                .write_all(&body)
                .map_err(|e| RelayError::new(format!("lz4 compress: {e}")))?;
            encoder
                .finish()
                .map_err(|e| RelayError::new(format!("lz4 compress: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::TimeZone;

    use super::*;

    fn row(payload: &'static [u8]) -> SinkRow {
        SinkRow {
            event_time: chrono::Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            routing_key: "chat.v1.msg.1001".into(),
            partition_key: "1001".into(),
            sequence: 42,
            metadata: r#"{"stream":"CHAT"}"#.into(),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn json_each_row_line() {
        let mut out = Vec::new();
        write_row(&mut out, &ColumnNames::default(), &row(b"{\"text\":\"hi\"}"), PayloadEncoding::Text).unwrap();
        assert_eq!(out.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["timestamp"], "2025-03-01T12:00:00.000000Z");
        assert_eq!(value["subject"], "chat.v1.msg.1001");
        assert_eq!(value["chat_id"], "1001");
        assert_eq!(value["sequence"], 42);
        assert_eq!(value["metadata"], r#"{"stream":"CHAT"}"#);
        assert_eq!(value["data"], r#"{"text":"hi"}"#);
    }

    #[test]
    fn payload_encodings() {
        let mut out = Vec::new();
        write_row(&mut out, &ColumnNames::default(), &row(b"\xff\x00a"), PayloadEncoding::Base64).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["data"], "/wBh");

        let mut out = Vec::new();
        write_row(&mut out, &ColumnNames::default(), &row(b"a\xffb"), PayloadEncoding::Text).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["data"], "a\u{fffd}b");
    }

    #[test]
    fn compressed_bodies_decode() {
        let body = b"{\"a\":1}\n".repeat(100);

        let gzip = compress(body.clone(), Compression::Gzip).unwrap();
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&gzip[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, body);

        let lz4 = compress(body.clone(), Compression::Lz4).unwrap();
        let mut decoded = Vec::new();
        lz4_flex::frame::FrameDecoder::new(&lz4[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, body);

        assert_eq!(compress(body.clone(), Compression::None).unwrap(), body);
    }
}
