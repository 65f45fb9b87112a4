use super::{classify, http_client, probe_get, trim_base};
use async_trait::async_trait;
use ember_core::{EmberError, GenParams, Generator, Probe, Result, GENERATION_DEPENDENCY};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
pub(crate) struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerateOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

pub(crate) fn generate_request<'a>(model: &'a str, prompt: &'a str, params: &GenParams) -> GenerateRequest<'a> {
    GenerateRequest {
        model,
        prompt,
        stream: false,
        options: GenerateOptions {
            temperature: params.temperature,
            top_p: params.top_p,
            num_predict: params.max_tokens,
        },
    }
}

/// Text generation through a local Ollama runtime.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(url: &str, model: &str) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: trim_base(url),
            model: model.to_string(),
            client: http_client()?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, params: &GenParams, timeout: Duration) -> Result<String> {
        let model = params.model.as_deref().unwrap_or(&self.model);
        let body: GenerateResponse = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&generate_request(model, prompt, params))
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| classify(GENERATION_DEPENDENCY, timeout, e))?
            .json()
            .await
            .map_err(|e| classify(GENERATION_DEPENDENCY, timeout, e))?;

        if let Some(error) = body.error {
            return Err(EmberError::dependency(GENERATION_DEPENDENCY, error));
        }
        if body.response.trim().is_empty() {
            return Err(EmberError::dependency(GENERATION_DEPENDENCY, "empty response"));
        }
        Ok(body.response)
    }
}

#[async_trait]
impl Probe for OllamaGenerator {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        probe_get(
            &self.client,
            GENERATION_DEPENDENCY,
            &format!("{}/api/tags", self.base_url),
            timeout,
        )
        .await
    }
}
