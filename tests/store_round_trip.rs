use anyhow::Result;
use facematch::error::{CodecError, StoreError};
use facematch::{Detection, Embedding, FaceDatabase, FaceRecord};
use tempfile::TempDir;

fn sample() -> FaceDatabase {
    FaceDatabase::from_records([
        FaceRecord {
            key: "denemelik/IMG_2072.JPG||face_0".to_string(),
            embedding: Embedding::new(vec![0.1, -0.25, 0.3333333333333333]),
            source_path: "C:\\Users\\cam\\IMG_2072.JPG".to_string(),
            detection: Some(Detection {
                bbox: Some([10.5, 20.0, 110.0, 140.25]),
                keypoints: Some(vec![[30.0, 50.0], [80.0, 50.0]]),
                confidence: Some(0.97),
            }),
        },
        FaceRecord {
            key: "IMG_2072.JPG||face_1".to_string(),
            embedding: Embedding::new(vec![1e-9, 2.0, -3.5]),
            source_path: "IMG_2072.JPG".to_string(),
            detection: Some(Detection {
                confidence: Some(0.5),
                ..Detection::default()
            }),
        },
        FaceRecord {
            key: "GNZZ7539.JPG".to_string(),
            embedding: Embedding::new(vec![0.0, 0.0, 1.0]),
            source_path: "/srv/event/GNZZ7539.JPG".to_string(),
            detection: None,
        },
    ])
}

#[test]
fn json_and_binary_stores_reload_identically() -> Result<()> {
    let dir = TempDir::new()?;
    let db = sample();

    for name in ["faces.json", "faces.bin"] {
        let path = dir.path().join(name);
        db.save(&path)?;
        let loaded = FaceDatabase::load(&path)?;
        assert_eq!(loaded, db, "{name}");
        assert_eq!(loaded.rejected(), 0);
    }
    Ok(())
}

#[test]
fn non_finite_embedding_is_refused_by_json() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = sample();
    db.insert(FaceRecord {
        key: "a.jpg||face_0".to_string(),
        embedding: Embedding::new(vec![f64::NAN, 1.0, 0.0]),
        source_path: "a.jpg".to_string(),
        detection: None,
    });

    let bin = dir.path().join("faces.bin");
    db.save(&bin)?;
    let loaded = FaceDatabase::load(&bin)?;
    assert_eq!(loaded.len(), 4);

    let json = dir.path().join("faces.json");
    let err = loaded.save(&json).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Encode(CodecError::NonFinite(ref key)) if key == "a.jpg||face_0"
    ));
    assert!(!json.exists());
    Ok(())
}

#[test]
fn empty_detection_reloads_the_same_from_json() -> Result<()> {
    let dir = TempDir::new()?;
    let db = FaceDatabase::from_records([FaceRecord {
        key: "b.jpg||face_0".to_string(),
        embedding: Embedding::new(vec![0.5, 0.5]),
        source_path: "b.jpg".to_string(),
        detection: Some(Detection::default()),
    }]);
    assert_eq!(db.get("b.jpg||face_0").unwrap().detection, None);

    let path = dir.path().join("faces.json");
    db.save(&path)?;
    assert_eq!(FaceDatabase::load(&path)?, db);
    Ok(())
}
