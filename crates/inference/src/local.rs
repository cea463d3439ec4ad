//! llama.cpp server shim.
//!
//! One `llama-server` process per model serves the native `/completion`
//! and `/embedding` endpoints; each pool slot maps onto one of the
//! server's parallel contexts. Interrupting generation is a client
//! disconnect: dropping the token stream aborts the HTTP response and
//! the server frees the slot.

use serde_json::Value;

use sy_domain::config::ModelsConfig;
use sy_domain::events::BoxStream;
use sy_domain::{Error, Result};

use crate::registry::ModelSpec;
use crate::sse::{from_reqwest, sse_token_stream, ParsedChunk};
use crate::traits::{GenerationRequest, InferenceSession, ModelBackend};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlamaServerBackend {
    client: reqwest::Client,
    config: ModelsConfig,
}

impl LlamaServerBackend {
    pub fn new(config: ModelsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl ModelBackend for LlamaServerBackend {
    async fn open_session(&self, spec: &ModelSpec) -> Result<Box<dyn InferenceSession>> {
        let base_url = self
            .config
            .server_for(&spec.id)
            .trim_end_matches('/')
            .to_string();

        // Probe the server before handing out the context.
        let health_url = format!("{base_url}/health");
        let resp = self
            .client
            .get(&health_url)
            .send()
            .await
            .map_err(|e| Error::inference(&spec.id, e))?;
        if !resp.status().is_success() {
            return Err(Error::inference(
                &spec.id,
                format!("server at {base_url} unhealthy: {}", resp.status()),
            ));
        }

        tracing::debug!(model_id = %spec.id, base_url = %base_url, "inference context opened");

        Ok(Box::new(LlamaServerSession {
            client: self.client.clone(),
            base_url,
            model_id: spec.id.clone(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct LlamaServerSession {
    client: reqwest::Client,
    base_url: String,
    model_id: String,
}

#[async_trait::async_trait]
impl InferenceSession for LlamaServerSession {
    async fn generate(&self, req: GenerationRequest) -> Result<BoxStream<'static, Result<String>>> {
        let body = serde_json::json!({
            "prompt": req.prompt,
            "n_predict": req.max_tokens,
            "temperature": req.temperature,
            "stop": req.stop,
            "stream": true,
            "cache_prompt": true,
        });

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::inference(&self.model_id, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::inference(
                &self.model_id,
                format!("completion returned {status}: {detail}"),
            ));
        }

        let model_id = self.model_id.clone();
        Ok(sse_token_stream(response, move |data| {
            parse_completion_chunk(&model_id, data)
        }))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embedding", self.base_url))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await
            .map_err(|e| Error::inference(&self.model_id, e))?;

        if !response.status().is_success() {
            return Err(Error::inference(
                &self.model_id,
                format!("embedding returned {}", response.status()),
            ));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::inference(&self.model_id, e))?;
        parse_embedding(&value)
            .ok_or_else(|| Error::inference(&self.model_id, "embedding payload unrecognized"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_completion_chunk(model_id: &str, data: &str) -> Result<ParsedChunk> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| Error::inference(model_id, format!("bad stream payload: {e}")))?;

    let mut tokens = Vec::new();
    if let Some(content) = value.get("content").and_then(Value::as_str) {
        if !content.is_empty() {
            tokens.push(content.to_string());
        }
    }
    let stop = value.get("stop").and_then(Value::as_bool).unwrap_or(false);

    Ok(ParsedChunk { tokens, stop })
}

/// Accept both embedding payload shapes the server has shipped:
/// `{"embedding":[...]}` and `[{"embedding":[[...]]}]`.
fn parse_embedding(value: &Value) -> Option<Vec<f32>> {
    let floats = |v: &Value| -> Option<Vec<f32>> {
        v.as_array()?
            .iter()
            .map(|x| x.as_f64().map(|f| f as f32))
            .collect()
    };

    if let Some(embedding) = value.get("embedding") {
        if let Some(flat) = floats(embedding) {
            return Some(flat);
        }
    }
    let first = value.as_array()?.first()?;
    let embedding = first.get("embedding")?;
    if let Some(flat) = floats(embedding) {
        return Some(flat);
    }
    floats(embedding.as_array()?.first()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_chunk_extracts_content_and_stop() {
        let chunk =
            parse_completion_chunk("m", r#"{"content":" hello","stop":false}"#).unwrap();
        assert_eq!(chunk.tokens, vec![" hello"]);
        assert!(!chunk.stop);

        let last = parse_completion_chunk("m", r#"{"content":"","stop":true}"#).unwrap();
        assert!(last.tokens.is_empty());
        assert!(last.stop);
    }

    #[test]
    fn completion_chunk_rejects_garbage() {
        assert!(parse_completion_chunk("m", "not json").is_err());
    }

    #[test]
    fn embedding_payload_shapes() {
        let flat: Value = serde_json::from_str(r#"{"embedding":[0.1,0.2]}"#).unwrap();
        assert_eq!(parse_embedding(&flat).unwrap().len(), 2);

        let nested: Value =
            serde_json::from_str(r#"[{"index":0,"embedding":[[0.1,0.2,0.3]]}]"#).unwrap();
        assert_eq!(parse_embedding(&nested).unwrap().len(), 3);

        let garbage: Value = serde_json::from_str(r#"{"no":"embedding"}"#).unwrap();
        assert!(parse_embedding(&garbage).is_none());
    }
}
