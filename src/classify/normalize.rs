//! Coercion of classification service replies into [`ClassificationVerdict`]s.
//!
//! The service answers with loosely shaped JSON (success payloads, error
//! payloads with a 2xx status, error payloads with a 5xx status, or no JSON at
//! all). Everything funnels through here so the controller only ever sees a
//! fully populated verdict.

use crate::models::verdict::{ BatchVerdict, ClassificationVerdict, FailureKind, SegmentStats };
use log::warn;
use serde_json::{ Map, Value };
use std::collections::BTreeMap;
use std::fmt::Display;

const PREPROCESSING_FALLBACK: &str = "Signal preprocessing failed";

type JsonObject = Map<String, Value>;

/// Converts one `/predict` reply into a verdict for `filename`.
///
/// The payload's own `filename` is ignored; the submitted name always wins.
pub fn normalize_response(status: u16, body: &str, filename: Option<&str>) -> ClassificationVerdict {
    let filename = filename.map(str::to_string);

    if !(200..300).contains(&status) {
        return status_failure(status, body, filename);
    }

    match parse_object(body) {
        Ok(payload) => verdict_from_payload(&payload, filename),
        Err(message) => ClassificationVerdict::failed(FailureKind::Transport, message, filename),
    }
}

pub fn transport_failure(err: &dyn Display, filename: Option<&str>) -> ClassificationVerdict {
    let message = err.to_string();
    let message = if message.trim().is_empty() {
        "Failed to reach the classification service".to_string()
    } else {
        message
    };
    ClassificationVerdict::failed(FailureKind::Transport, message, filename.map(str::to_string))
}

/// Converts one `/predict_batch` reply. `filenames` are the names submitted,
/// in order; they label entries whose payload carries no `filename`.
pub fn normalize_batch(status: u16, body: &str, filenames: &[String]) -> BatchVerdict {
    if !(200..300).contains(&status) {
        let failure = status_failure(status, body, None);
        return failed_batch(&failure, filenames);
    }

    let payload = match parse_object(body) {
        Ok(payload) => payload,
        Err(message) => {
            let failure = ClassificationVerdict::failed(FailureKind::Transport, message, None);
            return failed_batch(&failure, filenames);
        }
    };

    let results: Vec<ClassificationVerdict> = payload
        .get("batch_results")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .enumerate()
                .map(|(index, entry)| {
                    let fallback_name = filenames.get(index).cloned();
                    match entry.as_object() {
                        Some(object) => {
                            let name = string_field(object, "filename").or(fallback_name);
                            verdict_from_payload(object, name)
                        }
                        None =>
                            ClassificationVerdict::failed(
                                FailureKind::Transport,
                                "Malformed batch entry from classification service",
                                fallback_name
                            ),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let total_files = payload
        .get("total_files")
        .and_then(count)
        .map(|n| n as usize)
        .unwrap_or(filenames.len());
    let successful_predictions = payload
        .get("successful_predictions")
        .and_then(count)
        .map(|n| n as usize)
        .unwrap_or_else(|| results.iter().filter(|r| r.is_success()).count());

    BatchVerdict {
        results,
        total_files,
        successful_predictions,
    }
}

pub(crate) fn failed_batch(failure: &ClassificationVerdict, filenames: &[String]) -> BatchVerdict {
    BatchVerdict {
        results: filenames
            .iter()
            .map(|name| ClassificationVerdict {
                source_filename: Some(name.clone()),
                ..failure.clone()
            })
            .collect(),
        total_files: filenames.len(),
        successful_predictions: 0,
    }
}

fn status_failure(status: u16, body: &str, filename: Option<String>) -> ClassificationVerdict {
    match parse_object(body).ok().and_then(|payload| string_field(&payload, "error")) {
        Some(message) => ClassificationVerdict::failed(FailureKind::Remote, message, filename),
        None =>
            ClassificationVerdict::failed(
                FailureKind::Transport,
                format!("request failed with status {}", status),
                filename
            ),
    }
}

fn parse_object(body: &str) -> Result<JsonObject, String> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("Invalid response from classification service: expected a JSON object".to_string()),
        Err(e) => Err(format!("Invalid response from classification service: {}", e)),
    }
}

/// `preprocessing_success` is authoritative. When it is absent the verdict
/// counts as successful only if the payload carries no `error`.
fn verdict_from_payload(payload: &JsonObject, filename: Option<String>) -> ClassificationVerdict {
    let error = string_field(payload, "error");
    let succeeded = payload
        .get("preprocessing_success")
        .and_then(Value::as_bool)
        .unwrap_or(error.is_none());

    let (error_message, failure) = if succeeded {
        if let Some(stray) = &error {
            warn!("Ignoring error '{}' on a payload reporting preprocessing success", stray);
        }
        (None, None)
    } else {
        (
            Some(error.unwrap_or_else(|| PREPROCESSING_FALLBACK.to_string())),
            Some(FailureKind::Preprocessing),
        )
    };

    ClassificationVerdict {
        predicted_diagnosis: string_field(payload, "predicted_diagnosis").unwrap_or_default(),
        overall_confidence: payload.get("overall_confidence").and_then(Value::as_f64).unwrap_or(0.0),
        total_heartbeats: payload.get("total_heartbeats").and_then(count).unwrap_or(0),
        continuous_samples: payload.get("continuous_samples").and_then(count).unwrap_or(0),
        segment_distribution: payload
            .get("segment_distribution")
            .and_then(Value::as_object)
            .map(segment_distribution)
            .unwrap_or_default(),
        preprocessing_succeeded: succeeded,
        majority_vote_count: payload.get("majority_vote_count").and_then(count).unwrap_or(0),
        source_filename: filename,
        error_message,
        failure,
    }
}

fn segment_distribution(raw: &JsonObject) -> BTreeMap<String, SegmentStats> {
    raw.iter()
        .filter_map(|(label, stats)| {
            let Some(stats) = stats.as_object() else {
                warn!("Skipping malformed segment distribution entry for '{}'", label);
                return None;
            };
            Some((
                label.clone(),
                SegmentStats {
                    segment_count: stats.get("segment_count").and_then(count).unwrap_or(0),
                    percentage: stats.get("percentage").and_then(Value::as_f64).unwrap_or(0.0),
                    avg_confidence: stats.get("avg_confidence").and_then(Value::as_f64).unwrap_or(0.0),
                },
            ))
        })
        .collect()
}

fn string_field(payload: &JsonObject, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}
