//! Gemini REST client
//!
//! Thin wrapper over `models/{model}:generateContent`. Used for receipt
//! analysis (JSON response) and selfie composition (inline image response).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One part of a multimodal request
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RequestPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl RequestPart {
    pub fn text(text: impl Into<String>) -> Self {
        RequestPart::Text { text: text.into() }
    }

    /// Base64-encoded image payload
    pub fn image(mime_type: &str, base64_data: String) -> Self {
        RequestPart::Inline {
            inline_data: InlineData {
                mime_type: mime_type.to_string(),
                data: base64_data,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct GeminiOutput {
    pub model: String,
    pub texts: Vec<String>,
    pub images: Vec<InlineData>,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("GEMINI_API_KEY empty"));
        }
        Ok(Self {
            http,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn generate_content(
        &self,
        model: &str,
        parts: Vec<RequestPart>,
        generation_config: Value,
        timeout: Duration,
    ) -> Result<GeminiOutput> {
        let start = Instant::now();

        let req = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config,
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let resp = self
            .http
            .post(&url)
            .timeout(timeout)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .context("gemini request")?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("gemini {}: {}", status.as_u16(), snippet));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).context("gemini json parse")?;

        let mut texts = Vec::new();
        let mut images = Vec::new();
        let parts = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();
        for part in parts {
            if let Some(t) = part.text {
                texts.push(t);
            }
            if let Some(d) = part.inline_data {
                images.push(d);
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(model, latency_ms, texts = texts.len(), images = images.len(), "gemini response");

        Ok(GeminiOutput {
            model: model.to_string(),
            texts,
            images,
            latency_ms,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: Value,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}
