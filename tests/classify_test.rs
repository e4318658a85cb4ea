use async_trait::async_trait;
use axum::{ body::Bytes, http::{ HeaderMap, StatusCode }, routing::{ get, post }, Json, Router };
use ecg_assist::classify::client::{ ClassificationBackend, CsvUpload, HttpClassifier, RawReply, TransportError };
use ecg_assist::classify::report::render;
use ecg_assist::classify::{ ClassificationController, DisplayState, SubmitOutcome };
use ecg_assist::models::verdict::FailureKind;
use serde_json::{ json, Value };
use std::collections::HashMap;
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn spawn_fake_service() -> String {
    let app = Router::new()
        .route("/predict", post(predict))
        .route("/predict_batch", post(predict_batch))
        .route(
            "/health",
            get(|| async {
                Json(
                    json!({
                    "status": "healthy",
                    "model_loaded": true,
                    "scaler_loaded": true,
                    "class_mapping_loaded": true
                })
                )
            })
        )
        .route(
            "/classes",
            get(|| async {
                Json(json!({ "classes": ["Atrial Fibrillation", "Normal Sinus Rhythm"], "total_classes": 2 }))
            })
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn predict(headers: HeaderMap, body: Bytes) -> (StatusCode, String) {
    if !is_multipart(&headers) {
        return (StatusCode::BAD_REQUEST, json!({ "error": "expected multipart" }).to_string());
    }
    let body = String::from_utf8_lossy(&body);
    if !body.contains("name=\"file\"") {
        return (StatusCode::BAD_REQUEST, json!({ "error": "No file provided" }).to_string());
    }
    if body.contains("broken.csv") {
        return (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "model unavailable" }).to_string());
    }
    if body.contains("short.csv") {
        return (
            StatusCode::OK,
            json!({ "preprocessing_success": false, "error": "signal too short" }).to_string(),
        );
    }
    if body.contains("garbled.csv") {
        return (StatusCode::OK, "<html>oops</html>".to_string());
    }
    (
        StatusCode::OK,
        json!({
            "predicted_diagnosis": "Atrial Fibrillation",
            "overall_confidence": 0.91,
            "total_heartbeats": 50,
            "continuous_samples": 18000,
            "segment_distribution": {
                "Atrial Fibrillation": { "segment_count": 45, "percentage": 90.0, "avg_confidence": 0.93 },
                "Normal Sinus Rhythm": { "segment_count": 5, "percentage": 10.0, "avg_confidence": 0.71 }
            },
            "preprocessing_success": true,
            "majority_vote_count": 45
        }).to_string(),
    )
}

async fn predict_batch(body: Bytes) -> Json<Value> {
    let body = String::from_utf8_lossy(&body);
    let files = body.matches("name=\"files\"").count();
    Json(
        json!({
        "batch_results": [
            {
                "filename": "a.csv",
                "predicted_diagnosis": "Normal Sinus Rhythm",
                "overall_confidence": 0.88,
                "preprocessing_success": true
            },
            { "filename": "b.csv", "preprocessing_success": false, "error": "flat signal" }
        ],
        "total_files": files,
        "successful_predictions": 1
    })
    )
}

fn upload(name: &str) -> CsvUpload {
    CsvUpload::new(name, b"time,lead\n0,0.1\n1,0.2\n".to_vec()).unwrap()
}

#[tokio::test]
async fn successful_classification_becomes_display_model() {
    let base = spawn_fake_service().await;
    let classifier = HttpClassifier::new(&base, Some(Duration::from_secs(5))).unwrap();
    let controller = ClassificationController::new(Arc::new(classifier));

    let outcome = controller.submit(Some(upload("patient.csv"))).await;
    let SubmitOutcome::Applied(verdict) = outcome else {
        panic!("expected applied outcome, got {:?}", outcome);
    };
    assert!(verdict.is_success());
    assert_eq!(verdict.predicted_diagnosis, "Atrial Fibrillation");
    assert_eq!(verdict.total_heartbeats, 50);
    assert_eq!(verdict.segment_distribution.len(), 2);
    assert_eq!(verdict.source_filename.as_deref(), Some("patient.csv"));

    assert!(!controller.is_loading());
    assert_eq!(controller.diagnosis_context().as_deref(), Some("Atrial Fibrillation"));
    let rendered = render(&controller.display_state());
    assert!(rendered.contains("Atrial Fibrillation"));
    assert!(rendered.contains("91.00%"));
}

#[tokio::test]
async fn service_error_status_uses_its_message() {
    let base = spawn_fake_service().await;
    let controller = ClassificationController::new(Arc::new(HttpClassifier::new(&base, None).unwrap()));

    let outcome = controller.submit(Some(upload("broken.csv"))).await;
    let SubmitOutcome::Applied(verdict) = outcome else {
        panic!("expected applied outcome");
    };
    assert!(!verdict.preprocessing_succeeded);
    assert_eq!(verdict.error_message.as_deref(), Some("model unavailable"));
    assert_eq!(verdict.failure, Some(FailureKind::Remote));
    assert_eq!(controller.diagnosis_context(), None);
    assert!(matches!(controller.display_state(), DisplayState::RequestFailed { .. }));
}

#[tokio::test]
async fn preprocessing_failure_is_a_processing_error() {
    let base = spawn_fake_service().await;
    let controller = ClassificationController::new(Arc::new(HttpClassifier::new(&base, None).unwrap()));

    controller.submit(Some(upload("short.csv"))).await;
    match controller.display_state() {
        DisplayState::ProcessingError { filename, message } => {
            assert_eq!(filename.as_deref(), Some("short.csv"));
            assert_eq!(message, "signal too short");
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn non_json_success_is_an_invalid_response() {
    let base = spawn_fake_service().await;
    let controller = ClassificationController::new(Arc::new(HttpClassifier::new(&base, None).unwrap()));

    let SubmitOutcome::Applied(verdict) = controller.submit(Some(upload("garbled.csv"))).await else {
        panic!("expected applied outcome");
    };
    assert_eq!(verdict.failure, Some(FailureKind::Transport));
    assert!(verdict.error_message.unwrap().starts_with("Invalid response from classification service"));
}

#[tokio::test]
async fn unreachable_service_is_a_transport_failure() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let classifier = HttpClassifier::new(&format!("http://{}", addr), Some(Duration::from_secs(2))).unwrap();
    let controller = ClassificationController::new(Arc::new(classifier));
    let SubmitOutcome::Applied(verdict) = controller.submit(Some(upload("patient.csv"))).await else {
        panic!("expected applied outcome");
    };
    assert!(!verdict.preprocessing_succeeded);
    assert_eq!(verdict.failure, Some(FailureKind::Transport));
    assert!(!verdict.error_message.unwrap_or_default().is_empty());
    assert!(matches!(controller.display_state(), DisplayState::RequestFailed { .. }));
}

#[tokio::test]
async fn missing_file_makes_no_request() {
    let backend = Arc::new(GatedBackend::default());
    let controller = ClassificationController::new(backend.clone());

    assert_eq!(controller.submit(None).await, SubmitOutcome::NoFileSelected);
    assert_eq!(controller.display_state(), DisplayState::Idle);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn health_and_classes_are_read() {
    let base = spawn_fake_service().await;
    let classifier = HttpClassifier::new(&base, None).unwrap();

    let health = classifier.health().await.unwrap();
    assert!(health.is_ready());
    let classes = classifier.classes().await.unwrap();
    assert_eq!(classes.total_classes, 2);
    assert_eq!(classes.classes[0], "Atrial Fibrillation");
}

#[tokio::test]
async fn batch_results_are_normalized_per_file() {
    let base = spawn_fake_service().await;
    let classifier = HttpClassifier::new(&base, None).unwrap();

    let batch = classifier.predict_batch(&[upload("a.csv"), upload("b.csv")]).await;
    assert_eq!(batch.total_files, 2);
    assert_eq!(batch.successful_predictions, 1);
    assert_eq!(batch.results.len(), 2);
    assert!(batch.results[0].is_success());
    assert_eq!(batch.results[1].source_filename.as_deref(), Some("b.csv"));
    assert_eq!(batch.results[1].error_message.as_deref(), Some("flat signal"));
}

/// Backend whose replies are released by the test, one oneshot per filename.
#[derive(Default)]
struct GatedBackend {
    gates: Mutex<HashMap<String, oneshot::Receiver<RawReply>>>,
    calls: Mutex<usize>,
}

impl GatedBackend {
    fn gate(&self, filename: &str) -> oneshot::Sender<RawReply> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(filename.to_string(), rx);
        tx
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ClassificationBackend for GatedBackend {
    async fn predict(&self, upload: &CsvUpload) -> Result<RawReply, TransportError> {
        *self.calls.lock().unwrap() += 1;
        let rx = self.gates
            .lock()
            .unwrap()
            .remove(&upload.filename)
            .ok_or_else(|| TransportError::Other(format!("no gate for {}", upload.filename)))?;
        rx.await.map_err(|e| TransportError::Other(e.to_string()))
    }
}

fn success_reply(diagnosis: &str) -> RawReply {
    RawReply {
        status: 200,
        body: json!({
            "predicted_diagnosis": diagnosis,
            "overall_confidence": 0.8,
            "preprocessing_success": true
        }).to_string(),
    }
}

#[tokio::test]
async fn older_submission_finishing_last_is_discarded() {
    let backend = Arc::new(GatedBackend::default());
    let release_first = backend.gate("first.csv");
    let release_second = backend.gate("second.csv");
    let controller = Arc::new(ClassificationController::new(backend.clone()));

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit(Some(upload("first.csv"))).await }
    });
    while backend.calls() < 1 {
        tokio::task::yield_now().await;
    }
    let second = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit(Some(upload("second.csv"))).await }
    });
    while backend.calls() < 2 {
        tokio::task::yield_now().await;
    }
    assert!(controller.is_loading());
    assert_eq!(controller.display_state(), DisplayState::Loading { filename: "second.csv".to_string() });

    release_second.send(success_reply("Bradycardia")).unwrap();
    assert!(matches!(second.await.unwrap(), SubmitOutcome::Applied(_)));

    release_first.send(success_reply("Tachycardia")).unwrap();
    assert!(matches!(first.await.unwrap(), SubmitOutcome::Superseded(_)));

    assert_eq!(controller.diagnosis_context().as_deref(), Some("Bradycardia"));
}

#[tokio::test]
async fn result_arriving_after_reset_is_discarded() {
    let backend = Arc::new(GatedBackend::default());
    let release = backend.gate("pending.csv");
    let controller = Arc::new(ClassificationController::new(backend.clone()));

    let pending = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit(Some(upload("pending.csv"))).await }
    });
    while backend.calls() < 1 {
        tokio::task::yield_now().await;
    }
    assert!(controller.is_loading());

    controller.reset();
    assert_eq!(controller.display_state(), DisplayState::Idle);

    release.send(success_reply("Atrial Fibrillation")).unwrap();
    assert!(matches!(pending.await.unwrap(), SubmitOutcome::Superseded(_)));
    assert_eq!(controller.display_state(), DisplayState::Idle);
    assert_eq!(controller.diagnosis_context(), None);
}
