//! Performance-based model ranking
//!
//! Scores candidates from persisted per-model metrics. Scoring is a
//! bounded sum: success rate and quality dominate, with smaller bonuses
//! for recent stage performance, expertise match, availability, and
//! speed, and a penalty for very recent use (possible rate limiting).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::analysis::QueryType;

/// Per-model performance record, persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub model_name: String,
    #[serde(default)]
    pub successful_syntheses: u64,
    #[serde(default)]
    pub failed_syntheses: u64,
    #[serde(default)]
    pub average_quality_score: f64,
    #[serde(default)]
    pub average_response_time: f64,
    /// Unix seconds of the last use
    #[serde(default)]
    pub last_used: Option<u64>,
    #[serde(default)]
    pub expertise_areas: Vec<String>,
    #[serde(default = "default_availability")]
    pub availability_score: f64,
}

const fn default_availability() -> f64 {
    1.0
}

impl ModelMetrics {
    fn new(model: &str) -> Self {
        Self {
            model_name: model.to_owned(),
            successful_syntheses: 0,
            failed_syntheses: 0,
            average_quality_score: 0.0,
            average_response_time: 0.0,
            last_used: None,
            expertise_areas: expertise_for(model),
            availability_score: 1.0,
        }
    }
}

/// Expertise tags per known model
const MODEL_EXPERTISE: &[(&str, &[&str])] = &[
    ("gpt-4", &["reasoning", "technical", "comprehensive", "code"]),
    ("gpt-4-turbo", &["fast", "technical", "comprehensive"]),
    ("gpt-4o", &["multimodal", "technical", "reasoning"]),
    ("o1-preview", &["complex_reasoning", "mathematical", "strategic"]),
    ("claude-3-5-sonnet-20241022", &["nuanced", "ethical", "analytical", "writing"]),
    ("claude-3-5-haiku-20241022", &["fast", "concise", "efficient"]),
    ("claude-3-opus", &["comprehensive", "creative", "philosophical"]),
    ("gemini-1.5-pro", &["factual", "structured", "multimodal", "research"]),
    ("gemini-1.5-flash", &["fast", "efficient", "factual"]),
    ("gemini-2.0-flash-exp", &["experimental", "fast", "innovative"]),
];

fn expertise_for(model: &str) -> Vec<String> {
    MODEL_EXPERTISE
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, tags)| tags.iter().map(|&t| t.to_owned()).collect())
        .unwrap_or_default()
}

/// Formatted per-model statistics for operator endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub total_syntheses: u64,
    pub success_rate: f64,
    pub average_quality: f64,
    pub average_response_time: f64,
    pub availability: f64,
    pub expertise_areas: Vec<String>,
}

/// Passive scoring service ranking synthesis candidates
pub struct ModelSelector {
    metrics: Mutex<HashMap<String, ModelMetrics>>,
    store_path: Option<PathBuf>,
}

impl ModelSelector {
    /// Create a selector, loading persisted metrics when available
    ///
    /// Load failures start fresh rather than erroring; the metrics file
    /// is an optimization, not a source of truth.
    pub fn new(store_path: Option<PathBuf>) -> Self {
        let mut metrics = store_path
            .as_ref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|raw| serde_json::from_str::<HashMap<String, ModelMetrics>>(&raw).ok())
            .unwrap_or_default();

        // Seed entries for known models so expertise and recency factors
        // apply from the first run
        for (model, _) in MODEL_EXPERTISE {
            metrics
                .entry((*model).to_owned())
                .or_insert_with(|| ModelMetrics::new(model));
        }

        Self {
            metrics: Mutex::new(metrics),
            store_path,
        }
    }

    /// Rank `available` models for synthesis, best first
    pub fn rank(
        &self,
        available: &[String],
        query_type: Option<QueryType>,
        recent_performers: &[String],
    ) -> Vec<String> {
        let metrics = self.lock();
        let now = now_secs();

        let mut scored: Vec<(String, f64)> = available
            .iter()
            .map(|model| {
                let score = metrics
                    .get(model)
                    .map_or(1.0, |m| score_model(m, query_type, recent_performers, now));
                (model.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(model, _)| model).collect()
    }

    /// Record a synthesis outcome; only final outcomes reach here
    ///
    /// Attempt-level retries are accounted inside the resilient wrapper,
    /// so a retried call cannot double-count success or failure.
    pub fn record_outcome(
        &self,
        model: &str,
        success: bool,
        quality_score: Option<f64>,
        response_time: Option<f64>,
    ) {
        {
            let mut metrics = self.lock();
            let entry = metrics
                .entry(model.to_owned())
                .or_insert_with(|| ModelMetrics::new(model));

            if success {
                entry.successful_syntheses += 1;
            } else {
                entry.failed_syntheses += 1;
            }

            if let Some(quality) = quality_score {
                entry.average_quality_score = if entry.average_quality_score == 0.0 {
                    quality
                } else {
                    entry.average_quality_score.mul_add(0.7, quality * 0.3)
                };
            }

            if let Some(elapsed) = response_time {
                entry.average_response_time = if entry.average_response_time == 0.0 {
                    elapsed
                } else {
                    entry.average_response_time.mul_add(0.7, elapsed * 0.3)
                };
            }

            entry.last_used = Some(now_secs());
        }

        self.save();
    }

    /// Nudge a model's availability score up or down
    pub fn record_availability(&self, model: &str, available: bool) {
        {
            let mut metrics = self.lock();
            let entry = metrics
                .entry(model.to_owned())
                .or_insert_with(|| ModelMetrics::new(model));

            entry.availability_score = if available {
                (entry.availability_score + 0.1).min(1.0)
            } else {
                (entry.availability_score - 0.3).max(0.0)
            };
        }

        self.save();
    }

    /// Formatted statistics for one model
    pub fn stats(&self, model: &str) -> Option<ModelStats> {
        let metrics = self.lock();
        let m = metrics.get(model)?;
        let total = m.successful_syntheses + m.failed_syntheses;
        Some(ModelStats {
            model: m.model_name.clone(),
            total_syntheses: total,
            success_rate: if total == 0 {
                0.0
            } else {
                m.successful_syntheses as f64 / total as f64
            },
            average_quality: m.average_quality_score,
            average_response_time: m.average_response_time,
            availability: m.availability_score,
            expertise_areas: m.expertise_areas.clone(),
        })
    }

    /// Statistics for every tracked model, sorted by name
    pub fn all_stats(&self) -> Vec<ModelStats> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names.iter().filter_map(|name| self.stats(name)).collect()
    }

    fn save(&self) {
        let Some(path) = &self.store_path else {
            return;
        };
        let snapshot = self.lock().clone();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!(path = %path.display(), error = %e, "could not persist selector metrics");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not serialize selector metrics"),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ModelMetrics>> {
        self.metrics.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn score_model(
    metrics: &ModelMetrics,
    query_type: Option<QueryType>,
    recent_performers: &[String],
    now: u64,
) -> f64 {
    let mut score = 0.0;

    // Success rate, 0-3
    let total = metrics.successful_syntheses + metrics.failed_syntheses;
    score += if total > 0 {
        (metrics.successful_syntheses as f64 / total as f64) * 3.0
    } else {
        1.5
    };

    // Quality, 0-3
    score += if metrics.average_quality_score > 0.0 {
        (metrics.average_quality_score / 10.0).min(1.0) * 3.0
    } else {
        1.5
    };

    // Performed well in earlier stages of this run, 0-2
    if recent_performers.iter().any(|m| m == &metrics.model_name) {
        score += 2.0;
    }

    // Expertise match, 0-2
    if let Some(query_type) = query_type {
        let tag = query_type.to_string();
        if metrics.expertise_areas.iter().any(|area| area == &tag) {
            score += 2.0;
        } else if metrics.expertise_areas.iter().any(|area| tag.contains(area.as_str())) {
            score += 1.0;
        }
    }

    // Availability, 0-1
    score += metrics.availability_score;

    // Very recent use may mean rate limiting, 0 to -1
    if let Some(last_used) = metrics.last_used {
        let since = now.saturating_sub(last_used);
        if since < 5 {
            score -= 1.0;
        } else if since < 30 {
            score -= 0.5;
        }
    }

    // Fast responders get a small edge, 0-1
    if metrics.average_response_time > 0.0 {
        if metrics.average_response_time < 5.0 {
            score += 1.0;
        } else if metrics.average_response_time < 10.0 {
            score += 0.5;
        }
    }

    score.max(0.0)
}
