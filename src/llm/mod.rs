/// Gateway to the external text-generation service.
///
/// Every call carries a JSON Schema derived from the Rust type the caller
/// expects back. [`generate_structured`] is the only way workflow code talks to
/// a gateway, so nothing untyped crosses into the domain logic.
pub mod mock;
pub mod openai;

use std::fmt;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::prompts::Prompt;

/// Errors that can occur while talking to the generation service.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("service returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response does not match schema {schema}: {reason}")]
    SchemaMismatch { schema: String, reason: String },

    #[error("API key variable {0} is not set")]
    MissingApiKey(String),
}

/// Pipeline step a call belongs to. Each stage may use its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ReadDocument,
    CreateCodeBook,
    DecideChunking,
    CodeChunk,
    CategorizeDocument,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::ReadDocument,
        Stage::CreateCodeBook,
        Stage::DecideChunking,
        Stage::CodeChunk,
        Stage::CategorizeDocument,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadDocument => "read_document",
            Self::CreateCodeBook => "create_codebook",
            Self::DecideChunking => "decide_chunking",
            Self::CodeChunk => "code_chunk",
            Self::CategorizeDocument => "categorize_document",
        }
    }

    /// Environment variable that overrides the model for this stage.
    pub fn model_env_var(self) -> &'static str {
        match self {
            Self::ReadDocument => "READ_DOCUMENT_MODEL",
            Self::CreateCodeBook => "CREATE_CODEBOOK_MODEL",
            Self::DecideChunking => "DECIDE_CHUNKING_MODEL",
            Self::CodeChunk => "CODE_CHUNK_MODEL",
            Self::CategorizeDocument => "CATEGORIZE_DOCUMENT_MODEL",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call to the service.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub stage: Stage,
    /// What the call is about (document name, chunk, or "code book").
    pub subject: String,
    pub system: String,
    pub user: String,
    pub schema_name: String,
    pub schema: Value,
}

/// Trait for generation backends.
///
/// Implementations return the raw JSON payload; conformance to
/// `request.schema` is checked by [`generate_structured`].
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<Value, LlmError>;
}

/// Build a request for `T`, send it and decode the answer into `T`.
pub async fn generate_structured<T>(
    gateway: &dyn LlmGateway,
    stage: Stage,
    subject: &str,
    prompt: Prompt,
) -> Result<T, LlmError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema_name = T::schema_name().to_string();
    let schema = serde_json::to_value(schemars::schema_for!(T)).map_err(|e| {
        LlmError::SchemaMismatch {
            schema: schema_name.clone(),
            reason: format!("schema generation failed: {e}"),
        }
    })?;

    let request = LlmRequest {
        stage,
        subject: subject.to_string(),
        system: prompt.system,
        user: prompt.user,
        schema_name,
        schema,
    };

    debug!(
        "{stage} request for {subject} ({} prompt chars)",
        request.system.len() + request.user.len()
    );
    let value = gateway.generate(&request).await?;

    serde_json::from_value(value).map_err(|e| LlmError::SchemaMismatch {
        schema: request.schema_name,
        reason: e.to_string(),
    })
}
