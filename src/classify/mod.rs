pub mod client;
pub mod normalize;
pub mod report;

use log::{ info, warn };
use std::sync::{ Arc, Mutex, MutexGuard };

use self::client::{ ClassificationBackend, CsvUpload };
use self::normalize::{ normalize_response, transport_failure };
use crate::models::verdict::{ ClassificationVerdict, FailureKind };

#[derive(Clone, Debug, PartialEq)]
pub enum DisplayState {
    Idle,
    Loading {
        filename: String,
    },
    Success(ClassificationVerdict),
    ProcessingError {
        filename: Option<String>,
        message: String,
    },
    RequestFailed {
        filename: Option<String>,
        message: String,
    },
}

impl DisplayState {
    fn from_verdict(verdict: &ClassificationVerdict) -> Self {
        match (&verdict.error_message, verdict.failure) {
            (None, _) if verdict.preprocessing_succeeded => DisplayState::Success(verdict.clone()),
            (message, Some(FailureKind::Preprocessing)) =>
                DisplayState::ProcessingError {
                    filename: verdict.source_filename.clone(),
                    message: message.clone().unwrap_or_default(),
                },
            (message, _) =>
                DisplayState::RequestFailed {
                    filename: verdict.source_filename.clone(),
                    message: message.clone().unwrap_or_default(),
                },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    NoFileSelected,
    Applied(ClassificationVerdict),
    /// A newer submission started while this one was in flight; its verdict
    /// was discarded.
    Superseded(ClassificationVerdict),
}

#[derive(Default)]
struct LifecycleState {
    latest_seq: u64,
    loading: Option<String>,
    verdict: Option<ClassificationVerdict>,
}

/// Owns the current verdict and applies submission results in submission
/// order. Results of superseded submissions are dropped.
pub struct ClassificationController {
    backend: Arc<dyn ClassificationBackend>,
    state: Mutex<LifecycleState>,
}

impl ClassificationController {
    pub fn new(backend: Arc<dyn ClassificationBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(LifecycleState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn submit(&self, upload: Option<CsvUpload>) -> SubmitOutcome {
        let Some(upload) = upload else {
            return SubmitOutcome::NoFileSelected;
        };

        let seq = {
            let mut state = self.lock();
            state.latest_seq += 1;
            state.loading = Some(upload.filename.clone());
            state.verdict = None;
            state.latest_seq
        };
        info!("Classification #{} started for {}", seq, upload.filename);

        let verdict = match self.backend.predict(&upload).await {
            Ok(reply) => normalize_response(reply.status, &reply.body, Some(&upload.filename)),
            Err(e) => {
                warn!("Classification #{} transport error: {}", seq, e);
                transport_failure(&e, Some(&upload.filename))
            }
        };

        let mut state = self.lock();
        if state.latest_seq != seq {
            warn!(
                "Discarding result of classification #{} ({}); #{} is newer",
                seq,
                upload.filename,
                state.latest_seq
            );
            return SubmitOutcome::Superseded(verdict);
        }
        state.loading = None;
        state.verdict = Some(verdict.clone());
        info!(
            "Classification #{} finished for {} (success: {})",
            seq,
            upload.filename,
            verdict.is_success()
        );
        SubmitOutcome::Applied(verdict)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading.is_some()
    }

    pub fn diagnosis_context(&self) -> Option<String> {
        self.lock()
            .verdict.as_ref()
            .filter(|v| v.is_success() && !v.predicted_diagnosis.is_empty())
            .map(|v| v.predicted_diagnosis.clone())
    }

    pub fn display_state(&self) -> DisplayState {
        let state = self.lock();
        if let Some(filename) = &state.loading {
            return DisplayState::Loading {
                filename: filename.clone(),
            };
        }
        match &state.verdict {
            Some(verdict) => DisplayState::from_verdict(verdict),
            None => DisplayState::Idle,
        }
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.latest_seq += 1;
        state.loading = None;
        state.verdict = None;
    }
}
