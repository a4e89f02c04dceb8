//! LLM Client implementations
//!
//! Provides the oracle boundary for OpenAI-compatible and Ollama APIs.
//! Every transport failure, non-success status, or unreadable response
//! envelope surfaces as `OracleUnavailable`.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medground_core::{
    ConfigError, GroundingError, LlmClient, LlmConfig, LlmProvider, PromptSpec, ResponseFormat,
    Result,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| GroundingError::ConfigError(format!("Failed to build HTTP client: {e}")))
}

// ============================================================================
// OpenAI Client
// ============================================================================

/// How requests authenticate and address the completions endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
enum ApiFlavor {
    /// `Authorization: Bearer`, `{base}/chat/completions`
    OpenAi,
    /// `api-key` header, deployment-scoped URL with `api-version`
    Azure { api_version: String },
}

/// OpenAI API client (also serves Azure OpenAI deployments)
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    flavor: ApiFlavor,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Choice {
    message: Message,
    finish_reason: Option<String>,
}

impl OpenAiClient {
    /// Create a new OpenAI client
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_DEFAULT_BASE_URL.to_string(),
            flavor: ApiFlavor::OpenAi,
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("OPENAI_API_KEY".to_string()))?;

        let base_url = config
            .openai_base_url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: api_key.clone(),
            base_url,
            flavor: ApiFlavor::OpenAi,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Create an Azure OpenAI client from config
    ///
    /// `openai_base_url` must be the deployment URL, e.g.
    /// `https://{resource}.openai.azure.com/openai/deployments/{deployment}`.
    pub fn azure_from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("OPENAI_API_KEY".to_string()))?;
        let deployment_url = config
            .openai_base_url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("OPENAI_BASE_URL".to_string()))?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: api_key.clone(),
            base_url: deployment_url.trim_end_matches('/').to_string(),
            flavor: ApiFlavor::Azure {
                api_version: config.azure_api_version.clone(),
            },
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Set custom base URL (for compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn endpoint(&self) -> String {
        match &self.flavor {
            ApiFlavor::OpenAi => format!("{}/chat/completions", self.base_url),
            ApiFlavor::Azure { api_version } => format!(
                "{}/chat/completions?api-version={}",
                self.base_url, api_version
            ),
        }
    }

    fn auth_header(&self) -> (&'static str, String) {
        match self.flavor {
            ApiFlavor::OpenAi => ("Authorization", format!("Bearer {}", self.api_key)),
            ApiFlavor::Azure { .. } => ("api-key", self.api_key.clone()),
        }
    }

    fn build_request(&self, spec: &PromptSpec) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &spec.system {
            messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: spec.prompt.clone(),
        });

        OpenAiRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: spec.temperature.unwrap_or(self.temperature),
            response_format: match spec.format {
                ResponseFormat::Json => Some(OpenAiResponseFormat {
                    kind: "json_object",
                }),
                ResponseFormat::Text => None,
            },
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, spec: &PromptSpec) -> Result<String> {
        let request = self.build_request(spec);
        let (auth_name, auth_value) = self.auth_header();

        let response = self
            .client
            .post(self.endpoint())
            .header(auth_name, auth_value)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GroundingError::OracleUnavailable(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GroundingError::OracleUnavailable(format!(
                "OpenAI error ({status}): {error_text}"
            )));
        }

        let result: OpenAiResponse = response.json().await.map_err(|e| {
            GroundingError::OracleUnavailable(format!("Failed to parse response: {e}"))
        })?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GroundingError::OracleUnavailable("No response generated".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct OllamaResponse {
    response: String,
    done: bool,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            temperature: LlmConfig::default().temperature,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.ollama_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn build_request(&self, spec: &PromptSpec) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: spec.prompt.clone(),
            system: spec.system.clone(),
            stream: false,
            format: match spec.format {
                ResponseFormat::Json => Some("json"),
                ResponseFormat::Text => None,
            },
            options: OllamaOptions {
                temperature: spec.temperature.unwrap_or(self.temperature),
            },
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, spec: &PromptSpec) -> Result<String> {
        let request = self.build_request(spec);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                GroundingError::OracleUnavailable(format!("Ollama request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GroundingError::OracleUnavailable(format!(
                "Ollama error ({status}): {error_text}"
            )));
        }

        let result: OllamaResponse = response.json().await.map_err(|e| {
            GroundingError::OracleUnavailable(format!("Failed to parse Ollama response: {e}"))
        })?;

        Ok(result.response)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an LLM client from config
pub fn create_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider {
        LlmProvider::OpenAI => Ok(Arc::new(OpenAiClient::from_config(config)?)),
        LlmProvider::Azure => Ok(Arc::new(OpenAiClient::azure_from_config(config)?)),
        LlmProvider::Ollama => Ok(Arc::new(OllamaClient::from_config(config)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================
