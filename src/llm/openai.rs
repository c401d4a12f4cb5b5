/// OpenAI-compatible chat-completions gateway.
///
/// Sends the schema as `response_format: json_schema` and returns the parsed
/// JSON payload of the first choice.
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{LlmError, LlmGateway, LlmRequest, Stage};
use crate::config::LlmConfig;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// HTTP client for an OpenAI-compatible endpoint.
pub struct OpenAiGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    stage_models: HashMap<Stage, String>,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiGateway {
    /// Build a gateway from config; the API key is read from the variable
    /// named by `api_key_env` through `lookup`.
    pub fn from_config(
        config: &LlmConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LlmError> {
        let api_key = lookup(&config.api_key_env)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingApiKey(config.api_key_env.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to create HTTP client: {e}")))?;

        let stage_models = Stage::ALL
            .iter()
            .map(|&stage| (stage, config.model_for(stage).to_string()))
            .collect();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: config.model.clone(),
            stage_models,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model_for(&self, stage: Stage) -> &str {
        self.stage_models
            .get(&stage)
            .map_or(self.default_model.as_str(), String::as_str)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
    response_format: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn generate(&self, request: &LlmRequest) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = self.model_for(request.stage);
        let body = ChatRequest {
            model,
            temperature: self.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema_identifier(&request.schema_name),
                    "schema": request.schema,
                },
            }),
        };

        debug!("POST {url} model={model} stage={}", request.stage);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Transport(format!("request timed out after {}s", self.timeout_secs))
                } else if e.is_connect() {
                    LlmError::Transport(format!("cannot connect to {}: {e}", self.base_url))
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("response has no content".to_string()))?;

        parse_payload(&content)
    }
}

/// Parse the message content as JSON, unwrapping a fenced block if present.
pub fn parse_payload(content: &str) -> Result<Value, LlmError> {
    let json_str = FENCED_JSON
        .captures(content)
        .and_then(|c| c.get(1))
        .map_or(content.trim(), |m| m.as_str());

    serde_json::from_str(json_str)
        .map_err(|e| LlmError::MalformedResponse(format!("content is not JSON: {e}")))
}

/// Schema names sent upstream may only contain `[A-Za-z0-9_-]`.
fn schema_identifier(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
