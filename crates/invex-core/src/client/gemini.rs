//! Google Gemini `generateContent` client.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExtractionClient, ExtractionPayload, ExtractionRequest};
use crate::error::ClientError;
use crate::invoice::ExtractionReply;
use crate::models::config::ModelConfig;

/// Finish reasons that mean the provider withheld the answer.
const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "RECITATION", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// Single-attempt Gemini client.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self, ClientError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ClientError::Config("empty API key".to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("invex/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model_identifier.clone(),
            api_key,
        })
    }

    /// Read the API key from the environment variable named in `config`.
    pub fn from_env(config: &ModelConfig) -> Result<Self, ClientError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ClientError::Config(format!("environment variable {} is not set", config.api_key_env))
        })?;
        Self::new(config, api_key)
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl ExtractionClient for GeminiClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionReply, ClientError> {
        let body = build_request(request);

        debug!("Calling {} for {}", self.model, request.filename());
        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| ClientError::Transport(format!("undecodable provider response: {}", e)))?;

        let reply = reply_text(parsed)?;
        debug!("{}: received {} chars", request.filename(), reply.len());
        Ok(ExtractionReply::new(request.filename(), reply))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn build_request(request: &ExtractionRequest) -> GenerateRequest {
    let mut parts = vec![RequestPart::Text {
        text: request.prompt().to_string(),
    }];

    match request.payload() {
        ExtractionPayload::Images(images) => {
            parts.extend(images.iter().map(|img| RequestPart::InlineData {
                inline_data: InlineData {
                    mime_type: img.mime_type.to_string(),
                    data: BASE64_STANDARD.encode(&img.data),
                },
            }));
        }
        ExtractionPayload::Text(text) => parts.push(RequestPart::Text { text: text.clone() }),
        ExtractionPayload::Pdf(data) => parts.push(RequestPart::InlineData {
            inline_data: InlineData {
                mime_type: "application/pdf".to_string(),
                data: BASE64_STANDARD.encode(data),
            },
        }),
    }

    GenerateRequest {
        contents: vec![RequestContent { role: "user", parts }],
        generation_config: GenerationConfig { temperature: 0.0 },
    }
}

/// Map a non-success HTTP status to the failure taxonomy.
fn classify_status(status: StatusCode, body: &str) -> ClientError {
    let message = format!("HTTP {}: {}", status.as_u16(), provider_message(body));
    match status {
        StatusCode::TOO_MANY_REQUESTS => ClientError::Quota(message),
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::PAYLOAD_TOO_LARGE => ClientError::Policy(message),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => ClientError::Transport(message),
        _ => ClientError::Policy(message),
    }
}

/// `error.message` from a provider error body, or the trimmed body.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(200).collect())
}

fn reply_text(response: GenerateResponse) -> Result<String, ClientError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ClientError::Policy(format!("prompt blocked: {}", reason)));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(String::new());
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            if BLOCKING_FINISH_REASONS.contains(&reason) {
                return Err(ClientError::Policy(format!("response withheld: {}", reason)));
            }
        }
    }

    Ok(text)
}
