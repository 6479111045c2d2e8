//! Encoder backed by an OpenAI-compatible `/embeddings` endpoint.
//!
//! Works against the hosted API as well as self-hosted servers that speak the
//! same wire format (text-embeddings-inference, vLLM, Ollama), which is why the
//! API key is optional.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{EncodeError, Encoder};

/// Connection and batching parameters for [`OpenAiEmbedder`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Embedding model identifier.
    pub model: String,
    /// Bearer token; omitted from requests when `None`.
    pub api_key: Option<String>,
    /// Requested output dimension, also enforced on responses.
    pub dimensions: Option<usize>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per batch, including the first.
    pub max_attempts: usize,
    /// Max inputs per HTTP request.
    pub batch_size: usize,
}

/// Blocking embeddings client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_attempts: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds the HTTP client. Must run outside of an async context.
    pub fn new(settings: OpenAiSettings) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !settings.model.trim().is_empty(),
            "missing embedding model name"
        );
        anyhow::ensure!(
            settings.base_url.starts_with("http://") || settings.base_url.starts_with("https://"),
            "embedding base URL must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {key}"))
                        .context("invalid embedding API key")?,
                );
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            model: settings.model,
            dimensions: settings.dimensions,
            max_attempts: settings.max_attempts.max(1),
            batch_size: settings.batch_size.max(1),
        })
    }

    /// Endpoint the client posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EncodeError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let mut attempt = 1usize;
        loop {
            let failure = match self.client.post(&self.endpoint).json(&body).send() {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: EmbeddingResponse = resp.json().map_err(|err| {
                        EncodeError::Malformed(format!("undecodable response body: {err}"))
                    })?;
                    return into_vectors(parsed, inputs.len(), self.dimensions);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if !is_retryable_status(status) {
                        return Err(EncodeError::Rejected {
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                    anyhow!("embedding request failed ({status}): {text}")
                }
                Err(err) => anyhow::Error::new(err).context("embedding request failed"),
            };
            if attempt >= self.max_attempts {
                return Err(EncodeError::Backend(failure.context(format!(
                    "giving up after {attempt} attempt(s)"
                ))));
            }
            tracing::debug!(attempt, error = %failure, "retrying embedding request");
            thread::sleep(retry_backoff(attempt));
            attempt += 1;
        }
    }
}

impl Encoder for OpenAiEmbedder {
    fn encode_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EncodeError> {
        if inputs.iter().any(|text| text.trim().is_empty()) {
            return Err(EncodeError::EmptyInput);
        }
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            vectors.extend(self.request(batch)?);
        }
        Ok(vectors)
    }

    fn max_batch(&self) -> usize {
        self.batch_size
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}

fn into_vectors(
    mut parsed: EmbeddingResponse,
    expected: usize,
    dimensions: Option<usize>,
) -> Result<Vec<Vec<f32>>, EncodeError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(EncodeError::Malformed(format!(
            "received {} embeddings for {} inputs",
            parsed.data.len(),
            expected
        )));
    }
    let width = dimensions.or_else(|| parsed.data.first().map(|entry| entry.embedding.len()));
    let mut vectors = Vec::with_capacity(expected);
    for entry in parsed.data {
        if Some(entry.embedding.len()) != width {
            return Err(EncodeError::Malformed(format!(
                "embedding {} has {} dimensions, expected {}",
                entry.index,
                entry.embedding.len(),
                width.unwrap_or_default()
            )));
        }
        if entry.embedding.iter().any(|value| !value.is_finite()) {
            return Err(EncodeError::Malformed(format!(
                "embedding {} contains non-finite values",
                entry.index
            )));
        }
        vectors.push(entry.embedding);
    }
    Ok(vectors)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
