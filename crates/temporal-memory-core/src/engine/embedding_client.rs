// ── Engine: Embedding Client ─────────────────────────────────────────────────
//
// Calls an Ollama-native or OpenAI-compatible embedding endpoint. Tries the
// current Ollama format (`POST /api/embed`) first, falls back to the legacy
// Ollama format (`POST /api/embeddings`), then an OpenAI-compatible format
// (`POST /v1/embeddings`) — mirroring the donor's dual-format probing so a
// single config works against either backend without a feature flag.

use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::config::EngineConfig;
use crate::atoms::error::{EngineError, EngineResult};

pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl EmbeddingClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.embedding_base_url.clone(),
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
        }
    }

    /// Embed `text`, returning a fixed-length unit-norm vector. Fails closed
    /// (returns `Err`) rather than producing a mismatched-dimension vector —
    /// callers (StorageService, BackfillWorker) treat this as "try again
    /// later", never as "store without an embedding silently".
    pub async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vec = match self.embed_ollama(text).await {
            Ok(v) => v,
            Err(ollama_err) => match self.embed_openai(text).await {
                Ok(v) => v,
                Err(openai_err) => {
                    return Err(EngineError::model(
                        self.base_url.clone(),
                        format!("ollama: {ollama_err} | openai: {openai_err}"),
                    ));
                }
            },
        };

        if vec.len() != self.dims {
            warn!(
                "[embedding] model '{}' returned {} dims, expected {}",
                self.model,
                vec.len(),
                self.dims
            );
        }
        normalize(&mut vec);
        Ok(vec)
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>, String> {
        let new_url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let new_body = json!({ "model": self.model, "input": text });

        let new_result = self
            .client
            .post(&new_url)
            .json(&new_body)
            .timeout(Duration::from_secs(60))
            .send()
            .await;

        if let Ok(resp) = new_result {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    if let Some(vec) = extract_first_embedding(&v["embeddings"]) {
                        return Ok(vec);
                    }
                    if let Some(vec) = v["embedding"].as_array().map(|arr| to_f32_vec(arr)) {
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                }
            } else {
                info!(
                    "[embedding] /api/embed returned {} — trying legacy endpoint",
                    resp.status()
                );
            }
        }

        let legacy_url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let legacy_body = json!({ "model": self.model, "prompt": text });

        let resp = self
            .client
            .post(&legacy_url)
            .json(&legacy_body)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| format!("not reachable at {}: {e}", self.base_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("ollama embed {status} — {text}"));
        }

        let v: Value = resp.json().await.map_err(|e| format!("parse error: {e}"))?;
        let embedding = v["embedding"]
            .as_array()
            .ok_or_else(|| "no 'embedding' array in response".to_string())?;
        let vec = to_f32_vec(embedding);
        if vec.is_empty() {
            return Err("empty embedding vector".into());
        }
        Ok(vec)
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": text });

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
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("openai embed {status} — {text}"));
        }

        let v: Value = resp.json().await.map_err(|e| format!("parse error: {e}"))?;
        let embedding = v["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| "no 'data[0].embedding' array in response".to_string())?;
        let vec = to_f32_vec(embedding);
        if vec.is_empty() {
            return Err("empty embedding vector".into());
        }
        Ok(vec)
    }
}

fn extract_first_embedding(v: &Value) -> Option<Vec<f32>> {
    let vec = to_f32_vec(v.as_array()?.first()?.as_array()?);
    if vec.is_empty() {
        None
    } else {
        Some(vec)
    }
}

fn to_f32_vec(arr: &[Value]) -> Vec<f32> {
    arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
}

fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_leaves_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn extract_first_embedding_handles_nested_array() {
        let v = json!({ "embeddings": [[1.0, 2.0, 3.0]] });
        let extracted = extract_first_embedding(&v["embeddings"]).unwrap();
        assert_eq!(extracted, vec![1.0, 2.0, 3.0]);
    }
}
