// ── Engine: Extractor ─────────────────────────────────────────────────────
//
// Turns a conversation turn into zero or more `CandidateMemory` records by
// calling a local completion model (Ollama's `/api/generate`, `format:
// "json"`) and validating its response against a fixed record shape. Follows
// the donor's `EmbeddingClient`'s reqwest-JSON-POST-with-timeout pattern
// (`engine/memory.rs`); on any failure — network, parse, or validation — it
// degrades to an empty extraction rather than propagating the error, since a
// missed extraction is recoverable but a crashed ingest pipeline is not.

use log::warn;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::atoms::config::EngineConfig;
use crate::atoms::types::{CandidateMemory, Turn};

const SYSTEM_PROMPT: &str = "You extract durable facts and preferences about the user from a \
conversation turn. Respond with a JSON array of objects, each with exactly the keys \
`type` (lowercase snake_case, domain then aspect, e.g. `preference_food`), `content` \
(a short standalone statement), `confidence` (0.0-1.0), `rationale` (one sentence), and \
`is_correction` (boolean, true only when the turn explicitly corrects or retracts a fact \
the user stated earlier in this conversation, false otherwise). \
Return `[]` if the turn contains nothing worth remembering.";

/// Corrections are floored at this confidence regardless of what the model
/// reports, so an explicit retraction cannot be starved out by the
/// min-extraction-confidence threshold.
const CORRECTION_CONFIDENCE_FLOOR: f32 = 0.8;

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(rename = "type")]
    memory_type: String,
    content: String,
    confidence: f32,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    is_correction: bool,
}

pub struct Extractor {
    client: Client,
    base_url: String,
    model: String,
    min_confidence: f32,
}

impl Extractor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.extraction_base_url.clone(),
            model: config.extraction_model.clone(),
            min_confidence: config.min_extraction_confidence,
        }
    }

    /// Extract candidate memories from a single conversation turn. Never
    /// returns an error; a failed or malformed model call simply yields no
    /// candidates.
    pub async fn extract(&self, turn: &Turn) -> Vec<CandidateMemory> {
        if turn.role != "user" {
            return Vec::new();
        }

        match self.call_model(&turn.text).await {
            Ok(raw) => raw
                .into_iter()
                .filter_map(|r| self.normalize(r))
                .collect(),
            Err(e) => {
                warn!("[extractor] model call failed, yielding no candidates: {e}");
                Vec::new()
            }
        }
    }

    async fn call_model(&self, text: &str) -> Result<Vec<RawCandidate>, String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "system": SYSTEM_PROMPT,
            "prompt": text,
            "format": "json",
            "stream": false,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("extraction model {status} — {body}"));
        }

        let v: serde_json::Value = resp.json().await.map_err(|e| format!("parse error: {e}"))?;
        let response_text = v["response"].as_str().unwrap_or("[]");
        serde_json::from_str(response_text).map_err(|e| format!("invalid candidate shape: {e}"))
    }

    /// Normalize a raw model candidate into the fixed `CandidateMemory`
    /// shape: lowercase snake_case type label, confidence clamped to
    /// [0, 1] and bucketed to two decimal places, content trimmed, and
    /// below-threshold candidates dropped.
    fn normalize(&self, raw: RawCandidate) -> Option<CandidateMemory> {
        let memory_type = normalize_type_label(&raw.memory_type);
        let content = raw.content.trim().to_string();
        if memory_type.is_empty() || content.is_empty() {
            return None;
        }

        let mut confidence = bucket_confidence(raw.confidence.clamp(0.0, 1.0));
        if raw.is_correction {
            confidence = confidence.max(CORRECTION_CONFIDENCE_FLOOR);
        }
        if confidence < self.min_confidence {
            return None;
        }

        Some(CandidateMemory {
            memory_type,
            content,
            confidence,
            rationale: raw.rationale,
            event_time: None,
            is_correction: raw.is_correction,
        })
    }
}

fn normalize_type_label(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Round confidence to two decimal places for deterministic, reproducible
/// downstream comparisons (contradiction thresholds, ranking).
fn bucket_confidence(c: f32) -> f32 {
    (c * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_type_label_lowercases_and_snake_cases() {
        assert_eq!(normalize_type_label("Preference Food"), "preference_food");
        assert_eq!(normalize_type_label("  weird--Label!! "), "weird_label");
    }

    #[test]
    fn bucket_confidence_rounds_to_two_decimals() {
        assert_eq!(bucket_confidence(0.8333), 0.83);
        assert_eq!(bucket_confidence(0.005), 0.01);
    }

    #[test]
    fn normalize_drops_below_threshold_candidates() {
        let config = EngineConfig::default();
        let extractor = Extractor::new(&config);
        let raw = RawCandidate {
            memory_type: "preference_food".into(),
            content: "likes pizza".into(),
            confidence: 0.1,
            rationale: "stated directly".into(),
            is_correction: false,
        };
        assert!(extractor.normalize(raw).is_none());
    }

    #[test]
    fn normalize_keeps_candidate_above_threshold() {
        let config = EngineConfig::default();
        let extractor = Extractor::new(&config);
        let raw = RawCandidate {
            memory_type: "Preference Food".into(),
            content: "  likes pizza  ".into(),
            confidence: 0.9,
            rationale: "stated directly".into(),
            is_correction: false,
        };
        let cand = extractor.normalize(raw).unwrap();
        assert_eq!(cand.memory_type, "preference_food");
        assert_eq!(cand.content, "likes pizza");
        assert_eq!(cand.confidence, 0.9);
        assert!(!cand.is_correction);
    }

    #[test]
    fn normalize_floors_correction_confidence_and_propagates_flag() {
        let config = EngineConfig::default();
        let extractor = Extractor::new(&config);
        let raw = RawCandidate {
            memory_type: "preference_food".into(),
            content: "actually hates pizza now".into(),
            confidence: 0.2,
            rationale: "explicit retraction".into(),
            is_correction: true,
        };
        let cand = extractor.normalize(raw).unwrap();
        assert!(cand.is_correction);
        assert_eq!(cand.confidence, CORRECTION_CONFIDENCE_FLOOR);
    }

    #[tokio::test]
    async fn non_user_turns_are_skipped_without_a_model_call() {
        let config = EngineConfig::default();
        let extractor = Extractor::new(&config);
        let turn = Turn {
            role: "assistant".into(),
            text: "Sure, I'll remember that.".into(),
            timestamp: chrono::Utc::now(),
        };
        assert!(extractor.extract(&turn).await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_model_degrades_to_empty_extraction() {
        let mut config = EngineConfig::default();
        config.extraction_base_url = "http://127.0.0.1:1".into();
        let extractor = Extractor::new(&config);
        let turn = Turn {
            role: "user".into(),
            text: "I like pizza".into(),
            timestamp: chrono::Utc::now(),
        };
        assert!(extractor.extract(&turn).await.is_empty());
    }
}
