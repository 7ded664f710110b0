// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Dumps
//!
//! Writes a message body and its headers next to each other for inspection:
//! `<correlation id>.json` and `<correlation id>_headers.json`. Nothing in the retry
//! path calls this.

use crate::errors::PersistError;
use lapin::types::{AMQPValue, FieldTable};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes the body and the pretty printed headers of a message into `dir`.
///
/// Returns the paths of the body file and the headers file.
pub fn save_message_to_file(
    dir: &Path,
    correlation_id: &str,
    body: &[u8],
    headers: Option<&FieldTable>,
) -> Result<(PathBuf, PathBuf), PersistError> {
    if correlation_id.is_empty()
        || correlation_id.contains(['/', '\\'])
        || correlation_id == "."
        || correlation_id == ".."
    {
        return Err(PersistError::InvalidCorrelationId(correlation_id.to_owned()));
    }

    let body_path = dir.join(format!("{correlation_id}.json"));
    write(&body_path, body)?;

    let headers_path = dir.join(format!("{correlation_id}_headers.json"));
    let headers = headers.map(table_to_json).unwrap_or(Value::Object(Map::new()));
    write(&headers_path, &serde_json::to_vec_pretty(&headers)?)?;

    debug!(
        body = %body_path.display(),
        headers = %headers_path.display(),
        "message saved"
    );

    Ok((body_path, headers_path))
}

fn write(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    std::fs::write(path, contents).map_err(|source| PersistError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Converts an AMQP field table into plain JSON values.
pub fn table_to_json(table: &FieldTable) -> Value {
    Value::Object(
        table
            .inner()
            .iter()
            .map(|(key, value)| (key.as_str().to_owned(), value_to_json(value)))
            .collect(),
    )
}

fn value_to_json(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(v) => Value::Bool(*v),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Timestamp(v) => Value::from(*v),
        AMQPValue::Float(v) => Number::from_f64(f64::from(*v))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AMQPValue::Double(v) => Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AMQPValue::DecimalValue(v) => {
            let scaled = f64::from(v.value) / 10f64.powi(i32::from(v.scale));
            Number::from_f64(scaled)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        AMQPValue::ShortString(v) => Value::String(v.as_str().to_owned()),
        AMQPValue::LongString(v) => Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()),
        AMQPValue::ByteArray(v) => Value::Array(
            v.as_slice().iter().map(|b| Value::from(*b)).collect(),
        ),
        AMQPValue::FieldArray(v) => Value::Array(v.as_slice().iter().map(value_to_json).collect()),
        AMQPValue::FieldTable(v) => table_to_json(v),
        AMQPValue::Void => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{X_RETRY_COUNT, X_RETRY_TTL};
    use lapin::types::{LongString, ShortString};

    #[test]
    fn writes_body_and_headers_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let mut headers = FieldTable::default();
        headers.insert(ShortString::from(X_RETRY_COUNT), AMQPValue::LongInt(2));
        headers.insert(ShortString::from(X_RETRY_TTL), AMQPValue::LongLongInt(1500));
        headers.insert(
            ShortString::from("source"),
            AMQPValue::LongString(LongString::from("billing")),
        );

        let (body_path, headers_path) =
            save_message_to_file(dir.path(), "corr-1", br#"{"id":1}"#, Some(&headers)).unwrap();

        assert_eq!(body_path, dir.path().join("corr-1.json"));
        assert_eq!(headers_path, dir.path().join("corr-1_headers.json"));
        assert_eq!(std::fs::read(&body_path).unwrap(), br#"{"id":1}"#.to_vec());

        let written: Value =
            serde_json::from_slice(&std::fs::read(&headers_path).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!({
                "X-Retry-Count": 2,
                "X-Retry-TTL": 1500,
                "source": "billing",
            })
        );
    }

    #[test]
    fn missing_headers_are_written_as_an_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let (_, headers_path) = save_message_to_file(dir.path(), "corr-2", b"x", None).unwrap();

        assert_eq!(std::fs::read_to_string(headers_path).unwrap(), "{}");
    }

    #[test]
    fn rejects_ids_that_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["", "../etc", "a/b", ".."] {
            assert!(matches!(
                save_message_to_file(dir.path(), id, b"x", None),
                Err(PersistError::InvalidCorrelationId(_))
            ));
        }
    }

    #[test]
    fn io_failures_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = save_message_to_file(&missing, "corr-3", b"x", None).unwrap_err();
        assert!(matches!(err, PersistError::Io { ref path, .. } if path.starts_with(&missing)));
    }
}
