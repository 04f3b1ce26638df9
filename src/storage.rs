use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use facematch_embed::{raw, Detection, Embedding, RawFace};
use log::{info, warn};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CodecError, RecordError, StoreError};
use crate::key::FaceKey;

/// One stored face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub key: String,
    pub embedding: Embedding,
    /// Path as captured at extraction time. May be absolute, use another
    /// machine's separators, or not exist here at all.
    pub source_path: String,
    pub detection: Option<Detection>,
}

impl FaceRecord {
    /// Builds a record from adapter output. Without a stored path the photo
    /// part of the key stands in for it.
    pub fn from_raw(key: impl Into<String>, raw: RawFace) -> Self {
        let key = key.into();
        let source_path = raw
            .source_path
            .unwrap_or_else(|| FaceKey::parse(&key).photo);
        Self {
            key,
            embedding: raw.embedding,
            source_path,
            detection: raw.detection,
        }
    }

    pub fn face_key(&self) -> FaceKey {
        FaceKey::parse(&self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    /// `{ "<key>": { "embedding": [...], "path": "...", ... } }`
    Json,
    /// postcard-encoded record list
    Binary,
}

impl StoreFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "bin" | "postcard" => Some(Self::Binary),
            _ => None,
        }
    }

    fn sniff(data: &[u8]) -> Self {
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Self::Json,
            _ => Self::Binary,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "binary",
        }
    }
}

/// Face records keyed by face key, iterated in persisted order.
///
/// Built once by a training pass and read-only afterwards; the only way to
/// change a persisted database is to rebuild and replace it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceDatabase {
    records: Vec<FaceRecord>,
    index: HashMap<String, usize>,
    rejected: usize,
}

impl FaceDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = FaceRecord>) -> Self {
        let mut db = Self::new();
        for record in records {
            db.insert(record);
        }
        db
    }

    /// Adds a record. An existing record with the same key is replaced in
    /// place and returned. Detection metadata with no fields is dropped.
    pub fn insert(&mut self, mut record: FaceRecord) -> Option<FaceRecord> {
        if record.detection.as_ref().is_some_and(Detection::is_empty) {
            record.detection = None;
        }
        match self.index.get(&record.key) {
            Some(&i) => Some(std::mem::replace(&mut self.records[i], record)),
            None => {
                self.index.insert(record.key.clone(), self.records.len());
                self.records.push(record);
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&FaceRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    /// Full scan in persisted order. Cheap to restart.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FaceRecord)> {
        self.records.iter().map(|r| (r.key.as_str(), r))
    }

    pub fn records(&self) -> &[FaceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Dimensionality of the first record, taken as the database's D.
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dim())
    }

    /// Records whose dimensionality differs from [`Self::dimension`].
    pub fn inconsistent(&self) -> usize {
        match self.dimension() {
            Some(d) => self.records.iter().filter(|r| r.embedding.dim() != d).count(),
            None => 0,
        }
    }

    /// Records dropped while loading because their data was unusable.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn photo_count(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.face_key().photo)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Missing {
                path: path.to_path_buf(),
            });
        }
        let data = std::fs::read(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let corrupt = |source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        };
        let is_pickle = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pkl"));
        if is_pickle {
            return Err(corrupt(CodecError::Pickle));
        }

        let format = StoreFormat::from_path(path).unwrap_or_else(|| StoreFormat::sniff(&data));
        let db = Self::decode(&data, format).map_err(corrupt)?;

        if db.is_empty() {
            warn!("store {} contains no face records", path.display());
        }
        let inconsistent = db.inconsistent();
        if inconsistent > 0 {
            warn!(
                "{} record(s) in {} do not have dimension {}; they will be skipped when matching",
                inconsistent,
                path.display(),
                db.dimension().unwrap_or_default()
            );
        }
        info!(
            "Loaded {} face record(s) from {} ({})",
            db.len(),
            path.display(),
            format.name()
        );
        Ok(db)
    }

    /// Writes the whole database, replacing any existing store atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let format = StoreFormat::from_path(path).unwrap_or(StoreFormat::Json);
        let data = self.encode(format).map_err(StoreError::Encode)?;

        let write_err = |p: &Path| {
            let p = p.to_path_buf();
            move |source| StoreError::Write { path: p, source }
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err(parent))?;
        }
        let temp_path = part_path(path);
        std::fs::write(&temp_path, data).map_err(write_err(&temp_path))?;
        std::fs::rename(&temp_path, path).map_err(write_err(path))?;
        Ok(())
    }

    pub fn decode(data: &[u8], format: StoreFormat) -> Result<Self, CodecError> {
        match format {
            StoreFormat::Json => Self::from_json(serde_json::from_slice(data)?),
            StoreFormat::Binary => {
                let records: Vec<FaceRecord> = postcard::from_bytes(data)?;
                Ok(Self::from_records(records))
            }
        }
    }

    pub fn encode(&self, format: StoreFormat) -> Result<Vec<u8>, CodecError> {
        Ok(match format {
            StoreFormat::Json => {
                if let Some(bad) = self.records.iter().find(|r| !r.embedding.is_finite()) {
                    return Err(CodecError::NonFinite(bad.key.clone()));
                }
                serde_json::to_vec(&JsonStore(self))?
            }
            StoreFormat::Binary => postcard::to_allocvec(&self.records)?,
        })
    }

    /// Lenient per record: entries the ingestion adapter cannot read are
    /// logged, counted and left out.
    fn from_json(value: Value) -> Result<Self, CodecError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Array(_) => return Err(CodecError::NotAMapping("array")),
            _ => return Err(CodecError::NotAMapping("scalar")),
        };
        let mut db = Self::new();
        for (key, face) in map {
            match raw::face_from_value(&face) {
                Ok(raw) => {
                    db.insert(FaceRecord::from_raw(key, raw));
                }
                Err(source) => {
                    warn!("Skipping {}", RecordError::Ingest { key, source });
                    db.rejected += 1;
                }
            }
        }
        Ok(db)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// JSON layout of one record, field names as the legacy dictionaries use them.
#[derive(Serialize)]
struct StoredFace<'a> {
    embedding: &'a Embedding,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kps: Option<&'a Vec<[f64; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
}

struct JsonStore<'a>(&'a FaceDatabase);

impl Serialize for JsonStore<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for record in &self.0.records {
            let detection = record.detection.as_ref();
            let stored = StoredFace {
                embedding: &record.embedding,
                path: &record.source_path,
                bbox: detection.and_then(|d| d.bbox),
                kps: detection.and_then(|d| d.keypoints.as_ref()),
                confidence: detection.and_then(|d| d.confidence),
            };
            map.serialize_entry(&record.key, &stored)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &str, values: &[f64]) -> FaceRecord {
        FaceRecord {
            key: key.to_string(),
            embedding: Embedding::new(values.to_vec()),
            source_path: format!("C:\\event\\{}", FaceKey::parse(key).photo),
            detection: None,
        }
    }

    #[test]
    fn test_insert_overwrites_in_place() {
        let mut db = FaceDatabase::from_records([
            record("a.jpg||face_0", &[1.0, 0.0]),
            record("b.jpg||face_0", &[0.0, 1.0]),
        ]);
        let old = db.insert(record("a.jpg||face_0", &[0.5, 0.5]));
        assert!(old.is_some());
        let keys: Vec<&str> = db.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a.jpg||face_0", "b.jpg||face_0"]);
        assert_eq!(db.get("a.jpg||face_0").unwrap().embedding.to_vec(), [0.5, 0.5]);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn test_iteration_is_restartable() {
        let db = FaceDatabase::from_records([
            record("b.jpg||face_0", &[1.0]),
            record("a.jpg||face_0", &[2.0]),
        ]);
        let first: Vec<&str> = db.iter().map(|(k, _)| k).collect();
        let second: Vec<&str> = db.iter().map(|(k, _)| k).collect();
        assert_eq!(first, second);
        assert_eq!(first, ["b.jpg||face_0", "a.jpg||face_0"]);
    }

    #[test]
    fn test_from_raw_uses_key_photo_without_path() {
        let raw = RawFace {
            embedding: Embedding::new(vec![1.0]),
            source_path: None,
            detection: None,
        };
        let r = FaceRecord::from_raw("IMG_2072.JPG||face_3", raw);
        assert_eq!(r.source_path, "IMG_2072.JPG");
    }

    #[test]
    fn test_json_keeps_persisted_order_and_skips_bad_records() {
        let data = br#"{
            "z.jpg||face_0": {"embedding": [1.0, 0.0], "path": "z.jpg"},
            "broken.jpg||face_0": {"path": "broken.jpg"},
            "a.jpg||face_0": {"normed_embedding": [0.0, 1.0], "confidence": 0.5}
        }"#;
        let db = FaceDatabase::decode(data, StoreFormat::Json).unwrap();
        let keys: Vec<&str> = db.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["z.jpg||face_0", "a.jpg||face_0"]);
        assert_eq!(db.rejected(), 1);
        assert_eq!(db.get("a.jpg||face_0").unwrap().source_path, "a.jpg");
    }

    #[test]
    fn test_json_must_be_a_mapping() {
        assert!(matches!(
            FaceDatabase::decode(b"[1, 2]", StoreFormat::Json),
            Err(CodecError::NotAMapping("array"))
        ));
        assert!(matches!(
            FaceDatabase::decode(b"{not json", StoreFormat::Json),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn test_sniff_format() {
        assert_eq!(StoreFormat::sniff(b"  \n{\"a\": 1}"), StoreFormat::Json);
        assert_eq!(StoreFormat::sniff(&[0x02, 0x0d]), StoreFormat::Binary);
        assert_eq!(
            StoreFormat::from_path(Path::new("face_database.JSON")),
            Some(StoreFormat::Json)
        );
        assert_eq!(StoreFormat::from_path(Path::new("faces.bin")), Some(StoreFormat::Binary));
        assert_eq!(StoreFormat::from_path(Path::new("faces.db")), None);
    }

    #[test]
    fn test_load_missing_and_pickle() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.json");
        assert!(matches!(
            FaceDatabase::load(&missing),
            Err(StoreError::Missing { .. })
        ));

        let pkl = tmp.path().join("face_database.pkl");
        std::fs::write(&pkl, [0x80u8, 0x03, 0x7d]).unwrap();
        assert!(matches!(
            FaceDatabase::load(&pkl),
            Err(StoreError::Corrupt {
                source: CodecError::Pickle,
                ..
            })
        ));
    }

    #[test]
    fn test_load_empty_store_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.json");
        std::fs::write(&path, "{}").unwrap();
        let db = FaceDatabase::load(&path).unwrap();
        assert!(db.is_empty());
        assert_eq!(db.dimension(), None);
    }

    #[test]
    fn test_save_leaves_no_part_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("models").join("event").join("faces.bin");
        let db = FaceDatabase::from_records([record("a.jpg||face_0", &[1.0, 2.0])]);
        db.save(&path).unwrap();
        assert!(path.exists());
        assert!(!part_path(&path).exists());
        assert_eq!(FaceDatabase::load(&path).unwrap(), db);
    }

    #[test]
    fn test_inconsistent_dimensions_are_counted() {
        let db = FaceDatabase::from_records([
            record("a.jpg||face_0", &[1.0, 0.0]),
            record("b.jpg||face_0", &[1.0, 0.0, 0.0]),
            record("c.jpg||face_0", &[0.0, 1.0]),
        ]);
        assert_eq!(db.dimension(), Some(2));
        assert_eq!(db.inconsistent(), 1);
        assert_eq!(db.photo_count(), 3);
    }
}
