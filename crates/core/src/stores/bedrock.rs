use crate::error::PipelineError;
use crate::signing::{uri_encode, SigV4Signer};
use crate::traits::{EmbeddingModel, LanguageModel};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const DEFAULT_EMBEDDING_MODEL: &str = "amazon.titan-embed-text-v1";
pub const DEFAULT_CHAT_MODEL: &str = "anthropic.claude-v2";

const HUMAN_TURN: &str = "\n\nHuman:";

/// Bedrock runtime `InvokeModel`. One attempt per call, no retries.
pub struct BedrockRuntime {
    client: Client,
    signer: SigV4Signer,
    endpoint: String,
}

impl BedrockRuntime {
    pub fn new(signer: SigV4Signer, endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", signer.region()))
            .trim_end_matches('/')
            .to_string();
        Self {
            client: Client::new(),
            signer,
            endpoint,
        }
    }

    pub async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value, PipelineError> {
        let url = Url::parse(&format!("{}/model/{}/invoke", self.endpoint, uri_encode(model_id)))
            .map_err(|error| PipelineError::Signing(error.into()))?;
        let payload = serde_json::to_vec(body)?;
        let headers = self.signer.sign(
            "POST",
            &url,
            &[("accept", "application/json"), ("content-type", "application/json")],
            &payload,
            Utc::now(),
        )?;

        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.body(payload).send().await?;
        let status = response.status();
        debug!(%model_id, %status, "bedrock invoke");

        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(PipelineError::Model(format!(
                "InvokeModel {model_id} failed (HTTP {status}): {details}"
            )));
        }
        Ok(response.json().await?)
    }
}

/// Titan text embeddings, one request per text.
pub struct BedrockEmbeddings {
    runtime: Arc<BedrockRuntime>,
    model_id: String,
}

impl BedrockEmbeddings {
    pub fn new(runtime: Arc<BedrockRuntime>, model_id: impl Into<String>) -> Self {
        Self {
            runtime,
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl EmbeddingModel for BedrockEmbeddings {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_query(text).await?);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let response = self
            .runtime
            .invoke(&self.model_id, &json!({ "inputText": text }))
            .await?;
        let embedding = response
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PipelineError::Model(format!("{} returned no embedding", self.model_id))
            })?;

        embedding
            .iter()
            .map(|value| {
                value
                    .as_f64()
                    .map(|number| number as f32)
                    .ok_or_else(|| {
                        PipelineError::Model("embedding value is not a number".to_string())
                    })
            })
            .collect()
    }
}

/// Claude text completion (`prompt` / `completion` body shape).
pub struct BedrockTextModel {
    runtime: Arc<BedrockRuntime>,
    model_id: String,
    max_tokens_to_sample: u32,
    temperature: f32,
}

impl BedrockTextModel {
    pub fn new(runtime: Arc<BedrockRuntime>, model_id: impl Into<String>) -> Self {
        Self {
            runtime,
            model_id: model_id.into(),
            max_tokens_to_sample: 300,
            temperature: 0.0,
        }
    }

    pub fn request_body(&self, prompt: &str) -> Value {
        let prompt = if prompt.starts_with(HUMAN_TURN) {
            prompt.to_string()
        } else {
            format!("{HUMAN_TURN} {prompt}")
        };
        json!({
            "prompt": prompt,
            "max_tokens_to_sample": self.max_tokens_to_sample,
            "temperature": self.temperature,
            "stop_sequences": [HUMAN_TURN],
        })
    }
}

#[async_trait]
impl LanguageModel for BedrockTextModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        let response = self
            .runtime
            .invoke(&self.model_id, &self.request_body(prompt))
            .await?;
        response
            .get("completion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::Model(format!("{} returned no completion", self.model_id))
            })
    }
}
