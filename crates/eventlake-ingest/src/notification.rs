//! Object-storage event notifications.
//!
//! The queue carries standard object-storage event payloads: a JSON
//! document with one or more records, each naming a `(bucket, key)`.
//! Anything that does not parse to at least one reference is malformed
//! and treated as a poison pill by the ingestion loop.

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// One `(bucket, key)` reference from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<Record>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    s3: S3Entity,
}

#[derive(Debug, Serialize, Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Parse a notification body into its object references.
pub fn parse(body: &[u8]) -> Result<Vec<ObjectRef>> {
    let notification: Notification = serde_json::from_slice(body)
        .map_err(|e| IngestError::MalformedNotification(e.to_string()))?;
    if notification.records.is_empty() {
        return Err(IngestError::MalformedNotification(
            "no records in payload".into(),
        ));
    }
    Ok(notification
        .records
        .into_iter()
        .map(|r| ObjectRef {
            bucket: r.s3.bucket.name,
            key: r.s3.object.key,
        })
        .collect())
}

/// Encode references back into a notification body. Used by tests and
/// local tooling that feed the queue directly.
pub fn encode(refs: &[ObjectRef]) -> Vec<u8> {
    let notification = Notification {
        records: refs
            .iter()
            .map(|r| Record {
                s3: S3Entity {
                    bucket: BucketEntity {
                        name: r.bucket.clone(),
                    },
                    object: ObjectEntity { key: r.key.clone() },
                },
            })
            .collect(),
    };
    serde_json::to_vec(&notification).expect("notification encodes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_record() {
        let body = br#"{"Records":[{"s3":{"bucket":{"name":"events"},"object":{"key":"2024/07/batch-1.elcf"}}}]}"#;
        let refs = parse(body).unwrap();
        assert_eq!(refs, vec![ObjectRef::new("events", "2024/07/batch-1.elcf")]);
    }

    #[test]
    fn test_parse_multiple_records() {
        let refs = vec![
            ObjectRef::new("events", "a.elcf"),
            ObjectRef::new("events", "b.elcf"),
        ];
        assert_eq!(parse(&encode(&refs)).unwrap(), refs);
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let body = br#"{"Records":[{"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"b","arn":"arn:aws:s3:::b"},"object":{"key":"k","size":123}}}]}"#;
        let refs = parse(body).unwrap();
        assert_eq!(refs, vec![ObjectRef::new("b", "k")]);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse(b"not json"),
            Err(IngestError::MalformedNotification(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_records() {
        assert!(matches!(
            parse(br#"{"Records":[]}"#),
            Err(IngestError::MalformedNotification(_))
        ));
        assert!(matches!(
            parse(br#"{}"#),
            Err(IngestError::MalformedNotification(_))
        ));
    }
}
