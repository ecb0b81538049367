//! End-to-end orchestration scenarios, driven through the ingest and search
//! services with a scripted detector and real stores on temporary paths.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use image::{Rgb, RgbImage};

use faceid_core::types::l2_norm;
use faceid_core::{
    DetectorError, FaceDetector, GateRejection, PersonDetails, PersonRecord, RawDetection,
    SnapshotSink, StoreError, EMBEDDING_DIM,
};
use faceid_service::{
    spawn_analysis_pool, AnalysisHandle, IngestError, IngestService, RegistrationRequest,
    SearchService,
};
use faceid_store::{DiskImageStore, SnapshotStore};

/// Detector that replays a scripted list of per-photo detection sets.
/// Tests run a single worker, so photos are analyzed in submission order.
#[derive(Clone)]
struct ScriptedDetector {
    script: Arc<Mutex<VecDeque<Vec<RawDetection>>>>,
}

impl ScriptedDetector {
    fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
        }
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>, DetectorError> {
        let mut script = self.script.lock().unwrap();
        Ok(script.pop_front().unwrap_or_default())
    }
}

fn pool_with(script: Vec<Vec<RawDetection>>) -> AnalysisHandle {
    let detector = ScriptedDetector::new(script);
    spawn_analysis_pool(1, 4, move |_| Ok(detector.clone())).unwrap()
}

/// A sharp 300×300 test photo (high-frequency content clears any blur gate).
fn photo_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(300, 300, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn detection(confidence: f32, unit_axis: usize) -> RawDetection {
    let mut embedding = vec![0.0f32; EMBEDDING_DIM];
    embedding[unit_axis] = 1.0;
    RawDetection {
        confidence,
        // 200x200 box inside the 330x330 margined photo.
        bbox: [50.0, 50.0, 250.0, 250.0],
        embedding,
    }
}

fn details() -> PersonDetails {
    PersonDetails {
        full_name: "Alisher Usmonov".into(),
        document_number: "AC2031455".into(),
        sex: Some(1),
        ..Default::default()
    }
}

fn corpus_record(person_id: &str, embedding: Vec<f32>) -> PersonRecord {
    PersonRecord {
        person_id: person_id.into(),
        details: PersonDetails {
            full_name: format!("person {person_id}"),
            document_number: format!("doc-{person_id}"),
            ..Default::default()
        },
        embedding,
        num_templates: 1,
        det_score: 0.9,
        blur: 120.0,
        face_size: 150,
        faces_found: 1,
        face_ref: format!("persons/{person_id}.jpg"),
        created_at: Utc::now(),
    }
}

fn unit_with_first_component(c: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[0] = c;
    v[1] = (1.0 - c * c).sqrt();
    v
}

#[tokio::test]
async fn scenario_clear_face_is_registered_with_unit_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open_in_memory().await.unwrap();
    let images = DiskImageStore::open(dir.path()).await.unwrap();
    let service = IngestService::new(
        pool_with(vec![vec![detection(0.95, 0)]]),
        store.clone(),
        images,
    );

    let person_id = service
        .ingest(RegistrationRequest {
            photos: vec![photo_bytes()],
            details: details(),
        })
        .await
        .unwrap();

    let record = store.fetch(&person_id).await.unwrap().expect("committed");
    assert_eq!(record.det_score, 0.95);
    assert_eq!(record.num_templates, 1);
    assert_eq!(record.face_size, 200);
    let norm = l2_norm(&record.embedding);
    assert!((norm - 1.0).abs() < 1e-4, "stored norm {norm}");
    assert!(std::path::Path::new(&record.face_ref).exists(), "crop saved");
}

#[tokio::test]
async fn scenario_borderline_confidence_rejected_for_registration_accepted_for_search() {
    // Registration profile (min 0.60) rejects a 0.50-confidence face...
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open_in_memory().await.unwrap();
    let images = DiskImageStore::open(dir.path()).await.unwrap();
    let ingest = IngestService::new(
        pool_with(vec![vec![detection(0.50, 0)]]),
        store.clone(),
        images,
    );

    let err = ingest
        .ingest(RegistrationRequest {
            photos: vec![photo_bytes()],
            details: details(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Rejected(GateRejection::QualityTooLow { faces_found: 1 })
    ));
    assert_eq!(store.count().await.unwrap(), 0, "nothing persisted");

    // ...while the search profile (min 0.45) accepts the same detection.
    let search = SearchService::new(pool_with(vec![vec![detection(0.50, 0)]]), store.clone());
    let outcome = search.search(photo_bytes(), 0.6, 5).await.unwrap();
    assert!(outcome.rejection.is_none(), "search gate must accept");
    assert!(outcome.matches.is_empty(), "empty corpus yields no matches");
}

#[tokio::test]
async fn scenario_threshold_filters_and_orders_matches() {
    let store = SnapshotStore::open_in_memory().await.unwrap();
    for (id, c) in [("p91", 0.91f32), ("p40", 0.40), ("p72", 0.72)] {
        store
            .insert_snapshot(&corpus_record(id, unit_with_first_component(c)))
            .await
            .unwrap();
    }

    let search = SearchService::new(pool_with(vec![vec![detection(0.95, 0)]]), store);
    let outcome = search.search(photo_bytes(), 0.6, 5).await.unwrap();

    assert_eq!(outcome.scanned, 3);
    let ids: Vec<&str> = outcome.matches.iter().map(|m| m.person_id.as_str()).collect();
    assert_eq!(ids, vec!["p91", "p72"]);
    assert!((outcome.matches[0].similarity - 0.91).abs() < 1e-3);
    assert!((outcome.matches[1].similarity - 0.72).abs() < 1e-3);
}

#[tokio::test]
async fn scenario_multi_photo_registration_aggregates_accepted_embeddings() {
    // Three photos: two pass (orthogonal unit embeddings), one fails quality.
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open_in_memory().await.unwrap();
    let images = DiskImageStore::open(dir.path()).await.unwrap();
    let service = IngestService::new(
        pool_with(vec![
            vec![detection(0.90, 0)],
            vec![detection(0.50, 1)], // below the registration threshold
            vec![detection(0.80, 1)],
        ]),
        store.clone(),
        images,
    );

    let person_id = service
        .ingest(RegistrationRequest {
            photos: vec![photo_bytes(), photo_bytes(), photo_bytes()],
            details: details(),
        })
        .await
        .unwrap();

    let record = store.fetch(&person_id).await.unwrap().expect("committed");
    assert_eq!(record.num_templates, 2);
    assert!((record.embedding[0] - 0.5).abs() < 1e-6);
    assert!((record.embedding[1] - 0.5).abs() < 1e-6);
    assert!(record.embedding[2..].iter().all(|&v| v == 0.0));
    // Metadata comes from the best accepted photo.
    assert_eq!(record.det_score, 0.90);
}

#[tokio::test]
async fn all_photos_rejected_fails_registration_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let images_dir = dir.path().join("persons");
    let store = SnapshotStore::open_in_memory().await.unwrap();
    let images = DiskImageStore::open(&images_dir).await.unwrap();
    let service = IngestService::new(
        pool_with(vec![Vec::new(), vec![detection(0.30, 0)]]),
        store.clone(),
        images,
    );

    let err = service
        .ingest(RegistrationRequest {
            photos: vec![photo_bytes(), photo_bytes()],
            details: details(),
        })
        .await
        .unwrap_err();

    // The threshold rejection wins over no-face for diagnostics.
    assert!(matches!(
        err,
        IngestError::Rejected(GateRejection::QualityTooLow { .. })
    ));
    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(std::fs::read_dir(&images_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn malformed_photo_fails_the_whole_request() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open_in_memory().await.unwrap();
    let images = DiskImageStore::open(dir.path()).await.unwrap();
    let service = IngestService::new(
        pool_with(vec![vec![detection(0.95, 0)]]),
        store.clone(),
        images,
    );

    let err = service
        .ingest(RegistrationRequest {
            photos: vec![b"not an image".to_vec()],
            details: details(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Decode(_)));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn empty_registration_is_rejected_upfront() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open_in_memory().await.unwrap();
    let images = DiskImageStore::open(dir.path()).await.unwrap();
    let service = IngestService::new(pool_with(Vec::new()), store, images);

    let err = service
        .ingest(RegistrationRequest {
            photos: Vec::new(),
            details: details(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NoPhoto));
}

/// Sink that always fails, to exercise commit reconciliation.
struct FailingSink;

impl SnapshotSink for FailingSink {
    async fn insert_snapshot(&self, _record: &PersonRecord) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }
}

#[tokio::test]
async fn failed_snapshot_insert_unwinds_the_saved_crop() {
    let dir = tempfile::tempdir().unwrap();
    let images_dir = dir.path().join("persons");
    let images = DiskImageStore::open(&images_dir).await.unwrap();
    let service = IngestService::new(
        pool_with(vec![vec![detection(0.95, 0)]]),
        FailingSink,
        images,
    );

    let err = service
        .ingest(RegistrationRequest {
            photos: vec![photo_bytes()],
            details: details(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Store(_)));
    assert_eq!(
        std::fs::read_dir(&images_dir).unwrap().count(),
        0,
        "crop must not survive an aborted commit"
    );
}

#[tokio::test]
async fn search_with_no_usable_face_is_a_successful_empty_outcome() {
    let store = SnapshotStore::open_in_memory().await.unwrap();
    store
        .insert_snapshot(&corpus_record("p1", unit_with_first_component(1.0)))
        .await
        .unwrap();

    let search = SearchService::new(pool_with(vec![Vec::new()]), store);
    let outcome = search.search(photo_bytes(), 0.6, 5).await.unwrap();

    assert!(outcome.matches.is_empty());
    assert_eq!(outcome.scanned, 0);
    assert_eq!(outcome.rejection, Some(GateRejection::NoFace));
}

#[tokio::test]
async fn search_truncates_to_top_k() {
    let store = SnapshotStore::open_in_memory().await.unwrap();
    for i in 0..4 {
        store
            .insert_snapshot(&corpus_record(
                &format!("p{i}"),
                unit_with_first_component(0.99 - i as f32 * 0.01),
            ))
            .await
            .unwrap();
    }

    let search = SearchService::new(pool_with(vec![vec![detection(0.95, 0)]]), store);
    let outcome = search.search(photo_bytes(), 0.6, 2).await.unwrap();
    assert_eq!(outcome.scanned, 4);
    assert_eq!(outcome.matches.len(), 2);
    assert_eq!(outcome.matches[0].person_id, "p0");
    assert_eq!(outcome.matches[1].person_id, "p1");
}
