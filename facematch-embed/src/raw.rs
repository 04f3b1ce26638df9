//! Ingestion adapter for loosely structured face data.
//!
//! Extractor scripts and older databases disagree on where the vector lives
//! (`embedding`, `normed_embedding`, `feat`, or just "the first array").
//! Everything that reads such data goes through this module once, so the rest
//! of the crate only ever sees an [`Embedding`] and a [`Detection`].

use log::debug;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::face::{Detection, Embedding};

/// Keys probed for the vector, in priority order.
pub const EMBEDDING_KEYS: [&str; 4] = ["embedding", "normed_embedding", "feat", "face_embedding"];

/// Keys that may hold the source photo path.
pub const PATH_KEYS: [&str; 3] = ["path", "sourcePath", "source_path"];

/// Numeric arrays that are metadata, never the embedding.
const METADATA_KEYS: [&str; 4] = ["bbox", "kps", "keypoints", "landmarks"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no embedding found (keys: {0})")]
    MissingEmbedding(String),
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("embedding has a non-numeric value at position {0}")]
    NonNumeric(usize),
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
    #[error("extractor reported failure: {0}")]
    Extractor(String),
    #[error("unsupported face data: expected object or array, got {0}")]
    UnsupportedType(&'static str),
}

/// One face as read from raw data, before it is given a database key.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFace {
    pub embedding: Embedding,
    pub source_path: Option<String>,
    pub detection: Option<Detection>,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn flatten_into(value: &Value, out: &mut Vec<f64>) -> Result<(), IngestError> {
    match value {
        Value::Array(items) => items.iter().try_for_each(|v| flatten_into(v, out)),
        Value::Number(n) => {
            let x = n.as_f64().ok_or(IngestError::NonNumeric(out.len()))?;
            out.push(x);
            Ok(())
        }
        _ => Err(IngestError::NonNumeric(out.len())),
    }
}

/// Parse a numeric array into an embedding. Nested arrays (e.g. a `(1, D)`
/// matrix) are flattened row-major.
pub fn parse_vector(value: &Value) -> Result<Embedding, IngestError> {
    if !value.is_array() {
        return Err(IngestError::UnsupportedType(type_name(value)));
    }
    let mut values = Vec::new();
    flatten_into(value, &mut values)?;
    if values.is_empty() {
        return Err(IngestError::EmptyEmbedding);
    }
    Ok(Embedding::new(values))
}

fn locate_vector(obj: &Map<String, Value>) -> Result<&Value, IngestError> {
    if let Some(v) = EMBEDDING_KEYS.iter().find_map(|k| obj.get(*k)) {
        return Ok(v);
    }
    let (key, value) = obj
        .iter()
        .filter(|(k, _)| !METADATA_KEYS.contains(&k.as_str()))
        .find(|(_, v)| v.is_array())
        .ok_or_else(|| {
            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            IngestError::MissingEmbedding(keys.join(", "))
        })?;
    debug!("No known embedding key, using array at `{}`", key);
    Ok(value)
}

fn parse_bbox(value: &Value) -> Result<Option<[f64; 4]>, IngestError> {
    if value.is_null() {
        return Ok(None);
    }
    let mut values = Vec::new();
    flatten_into(value, &mut values).map_err(|e| IngestError::Malformed {
        field: "bbox",
        reason: e.to_string(),
    })?;
    let bbox: [f64; 4] = values.try_into().map_err(|v: Vec<f64>| IngestError::Malformed {
        field: "bbox",
        reason: format!("expected 4 numbers, got {}", v.len()),
    })?;
    Ok(Some(bbox))
}

fn parse_keypoints(value: &Value) -> Result<Option<Vec<[f64; 2]>>, IngestError> {
    let points = match value {
        Value::Null => return Ok(None),
        Value::Array(points) => points,
        other => {
            return Err(IngestError::Malformed {
                field: "keypoints",
                reason: format!("expected array, got {}", type_name(other)),
            })
        }
    };
    points
        .iter()
        .enumerate()
        .map(|(i, p)| match p.as_array().map(|xy| xy.as_slice()) {
            Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok([x, y]),
                _ => Err(IngestError::Malformed {
                    field: "keypoints",
                    reason: format!("point {i} is not numeric"),
                }),
            },
            _ => Err(IngestError::Malformed {
                field: "keypoints",
                reason: format!("point {i} is not an [x, y] pair"),
            }),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn parse_confidence(value: &Value) -> Result<Option<f64>, IngestError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(IngestError::Malformed {
            field: "confidence",
            reason: format!("expected number, got {}", type_name(other)),
        }),
    }
}

fn parse_detection(obj: &Map<String, Value>) -> Result<Option<Detection>, IngestError> {
    let first = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));
    let detection = Detection {
        bbox: first(&["bbox"]).map(parse_bbox).transpose()?.flatten(),
        keypoints: first(&["kps", "keypoints"])
            .map(parse_keypoints)
            .transpose()?
            .flatten(),
        confidence: first(&["confidence", "det_score"])
            .map(parse_confidence)
            .transpose()?
            .flatten(),
    };
    Ok((!detection.is_empty()).then_some(detection))
}

/// Read one face from raw data: either a bare numeric array or an object
/// holding the vector plus optional path and detection fields.
pub fn face_from_value(value: &Value) -> Result<RawFace, IngestError> {
    match value {
        Value::Array(_) => Ok(RawFace {
            embedding: parse_vector(value)?,
            source_path: None,
            detection: None,
        }),
        Value::Object(obj) => Ok(RawFace {
            embedding: parse_vector(locate_vector(obj)?)?,
            source_path: PATH_KEYS
                .iter()
                .find_map(|k| obj.get(*k))
                .and_then(Value::as_str)
                .map(str::to_string),
            detection: parse_detection(obj)?,
        }),
        other => Err(IngestError::UnsupportedType(type_name(other))),
    }
}

fn extractor_failure(obj: &Map<String, Value>) -> Option<IngestError> {
    let failed = obj.get("success").and_then(Value::as_bool) == Some(false);
    match obj.get("error") {
        Some(Value::String(msg)) => Some(IngestError::Extractor(msg.clone())),
        Some(other) if !other.is_null() => Some(IngestError::Extractor(other.to_string())),
        _ if failed => Some(IngestError::Extractor("unspecified error".to_string())),
        _ => None,
    }
}

/// Read a query embedding: a bare array, or an extractor result object.
pub fn query_from_value(value: &Value) -> Result<Embedding, IngestError> {
    if let Value::Object(obj) = value {
        if let Some(err) = extractor_failure(obj) {
            return Err(err);
        }
    }
    Ok(face_from_value(value)?.embedding)
}

/// Read every face from one extractor invocation.
///
/// Accepts `{"faces": [...]}` for multi-face output, a single-face object, or
/// a bare vector. `{"error": ...}` or `{"success": false}` is a failure.
/// `{"faces": []}` means no face was detected and yields an empty list.
pub fn faces_from_extractor_output(value: &Value) -> Result<Vec<RawFace>, IngestError> {
    match value {
        Value::Object(obj) => {
            if let Some(err) = extractor_failure(obj) {
                return Err(err);
            }
            match obj.get("faces") {
                Some(Value::Array(faces)) => faces.iter().map(face_from_value).collect(),
                Some(other) => Err(IngestError::Malformed {
                    field: "faces",
                    reason: format!("expected array, got {}", type_name(other)),
                }),
                None => Ok(vec![face_from_value(value)?]),
            }
        }
        _ => Ok(vec![face_from_value(value)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::embedding(json!({"embedding": [1.0, 2.0], "feat": [9.0]}))]
    #[case::normed(json!({"normed_embedding": [1.0, 2.0], "feat": [9.0]}))]
    #[case::feat(json!({"feat": [1.0, 2.0]}))]
    #[case::face_embedding(json!({"scores": [9.0], "face_embedding": [1.0, 2.0]}))]
    #[case::first_array(json!({"quality": "good", "bbox": [0, 0, 1, 1], "vec": [1.0, 2.0]}))]
    #[case::bare(json!([1.0, 2.0]))]
    #[case::nested(json!({"embedding": [[1.0, 2.0]]}))]
    fn test_vector_probing(#[case] value: Value) {
        let face = face_from_value(&value).unwrap();
        assert_eq!(face.embedding.to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_missing_embedding_lists_keys() {
        let err = face_from_value(&json!({"path": "a.jpg", "confidence": 0.9})).unwrap_err();
        match err {
            IngestError::MissingEmbedding(keys) => assert_eq!(keys, "path, confidence"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_numeric_and_empty() {
        assert!(matches!(
            face_from_value(&json!({"embedding": [1.0, "x"]})),
            Err(IngestError::NonNumeric(1))
        ));
        assert!(matches!(
            face_from_value(&json!({"embedding": []})),
            Err(IngestError::EmptyEmbedding)
        ));
        assert!(matches!(
            face_from_value(&json!("nope")),
            Err(IngestError::UnsupportedType("string"))
        ));
    }

    #[test]
    fn test_path_and_detection() {
        let face = face_from_value(&json!({
            "embedding": [0.5, 0.5],
            "path": "denemelik/IMG_1.JPG",
            "bbox": [1.0, 2.0, 3.0, 4.0],
            "kps": [[1.0, 1.5], [2.0, 2.5]],
            "det_score": 0.87
        }))
        .unwrap();
        assert_eq!(face.source_path.as_deref(), Some("denemelik/IMG_1.JPG"));
        let det = face.detection.unwrap();
        assert_eq!(det.bbox, Some([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(det.keypoints, Some(vec![[1.0, 1.5], [2.0, 2.5]]));
        assert_eq!(det.confidence, Some(0.87));
    }

    #[test]
    fn test_null_metadata_is_absent() {
        let face = face_from_value(&json!({"embedding": [1.0], "kps": null, "bbox": null})).unwrap();
        assert_eq!(face.detection, None);
    }

    #[test]
    fn test_malformed_bbox() {
        let err = face_from_value(&json!({"embedding": [1.0], "bbox": [1.0, 2.0]})).unwrap_err();
        assert!(matches!(err, IngestError::Malformed { field: "bbox", .. }));
    }

    #[test]
    fn test_query_from_extractor_result() {
        let q = query_from_value(&json!({
            "success": true,
            "embedding": [0.1, 0.2, 0.3],
            "embedding_size": 3,
            "confidence": 0.99
        }))
        .unwrap();
        assert_eq!(q.dim(), 3);

        let err = query_from_value(&json!({"error": "no face"})).unwrap_err();
        assert!(matches!(err, IngestError::Extractor(msg) if msg == "no face"));
    }

    #[test]
    fn test_extractor_output_shapes() {
        let multi = faces_from_extractor_output(&json!({
            "faces": [
                {"embedding": [1.0, 0.0], "bbox": [0, 0, 10, 10]},
                {"embedding": [0.0, 1.0]}
            ]
        }))
        .unwrap();
        assert_eq!(multi.len(), 2);

        let single =
            faces_from_extractor_output(&json!({"success": true, "embedding": [1.0, 0.0]}))
                .unwrap();
        assert_eq!(single.len(), 1);

        let none = faces_from_extractor_output(&json!({"faces": []})).unwrap();
        assert!(none.is_empty());

        assert!(faces_from_extractor_output(&json!({"success": false})).is_err());
    }
}
