//! Score and field normalization at the handler boundary
//!
//! Every producer has its own scale: cosine similarity in [-1, 1], cosine
//! distance, unbounded keyword scores, RRF sums, remote [0, 1] relevance.
//! Everything leaving a handler is on 0-100.

use crate::backend::DenseMetric;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Epoch values above this are taken to be milliseconds
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Dense similarity: `(1 - distance) * 100` or `similarity * 100`
pub fn normalize_dense(raw: f64, metric: DenseMetric) -> f64 {
    let similarity = match metric {
        DenseMetric::CosineSimilarity => raw,
        DenseMetric::CosineDistance => 1.0 - raw,
    };
    clamp_score(similarity * 100.0)
}

/// Keyword score relative to the best score observed in the same list
pub fn normalize_keyword(raw: f64, max_observed: f64) -> f64 {
    if max_observed <= 0.0 || !max_observed.is_finite() {
        return 0.0;
    }
    clamp_score(raw / max_observed * 100.0)
}

/// Remote relevance is reported in [0, 1]; out-of-range values are clamped first
pub fn normalize_external(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    clamp_score(raw.clamp(0.0, 1.0) * 100.0)
}

/// Fallback when a source supplies no score: earlier positions score higher
pub fn position_score(position: usize) -> f64 {
    clamp_score(100.0 / (1.0 + position as f64 * 0.1))
}

/// Epoch seconds from an ISO-8601 string, a date, or epoch seconds/milliseconds
pub fn normalize_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(epoch_seconds),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn epoch_seconds(value: i64) -> i64 {
    if value.abs() > EPOCH_MILLIS_THRESHOLD {
        value / 1000
    } else {
        value
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(epoch_seconds(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}
