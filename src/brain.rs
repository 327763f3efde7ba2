//! LLM clients: any OpenAI-compatible chat endpoint, and Anthropic's Messages API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::AgentError;
use crate::interfaces::LlmClient;
use crate::types::{ConversationTurn, LlmResponse, Role, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

const VISION_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4-turbo",
    "grok-2-vision",
    "llava",
    "llama3.2-vision",
    "gemini",
];

/// Builds the client matching `config.provider`.
pub fn client_for(config: ProviderConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    config.validate()?;
    Ok(match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(config)?),
        _ => Arc::new(OpenAiClient::new(config)?),
    })
}

fn http_client(config: &ProviderConfig) -> Result<Client, AgentError> {
    Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| AgentError::Config(format!("http client init failed: {e}")))
}

async fn send_json(provider: ProviderKind, request: RequestBuilder) -> Result<Value, AgentError> {
    let response = request
        .send()
        .await
        .map_err(|e| AgentError::model_call(format!("{provider:?} request failed: {e}")))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AgentError::model_call(format!("{provider:?} response unreadable: {e}")))?;
    let json: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(api_error(provider, status, &json));
    }
    if json.is_null() {
        return Err(AgentError::model_call(format!(
            "{provider:?} returned a non-JSON body"
        )));
    }
    Ok(json)
}

fn api_error(provider: ProviderKind, status: StatusCode, body: &Value) -> AgentError {
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("unknown API error");
    AgentError::model_call(format!("{provider:?} API error ({status}): {message}"))
}

fn last_user_index(conversation: &[ConversationTurn]) -> Option<usize> {
    conversation.iter().rposition(|t| t.role == Role::User)
}

/// OpenAI, xAI, Gemini's OpenAI endpoint, DeepSeek, Ollama, LM Studio and custom servers.
pub struct OpenAiClient {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiClient {
    pub fn new(config: ProviderConfig) -> Result<Self, AgentError> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }
}

/// Chat-completions messages; the screenshot rides on the last user turn.
pub fn openai_messages(
    system_prompt: &str,
    conversation: &[ConversationTurn],
    screenshot: Option<&str>,
) -> Vec<Value> {
    let image_at = screenshot.and(last_user_index(conversation));
    let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
    for (i, turn) in conversation.iter().enumerate() {
        match (image_at == Some(i), screenshot) {
            (true, Some(shot)) => messages.push(json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": turn.content },
                    { "type": "image_url", "image_url": { "url": data_url(shot), "detail": "low" } },
                ],
            })),
            _ => messages.push(json!({ "role": turn.role.as_str(), "content": turn.content })),
        }
    }
    messages
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn send(
        &self,
        system_prompt: &str,
        conversation: &[ConversationTurn],
        screenshot: Option<&str>,
    ) -> Result<LlmResponse, AgentError> {
        let cfg = &self.config;
        let body = json!({
            "model": cfg.model,
            "messages": openai_messages(system_prompt, conversation, screenshot),
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", cfg.base_url))
            .json(&body);
        if !cfg.api_key.is_empty() {
            request = request.bearer_auth(&cfg.api_key);
        }

        let json = send_json(cfg.provider, request).await?;
        let choice = &json["choices"][0];
        if choice.is_null() {
            return Err(AgentError::model_call(format!("no choices in response: {json}")));
        }

        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        debug!(model = %cfg.model, chars = text.len(), "model replied");

        Ok(LlmResponse {
            text,
            usage: Usage {
                input_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            },
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        })
    }

    fn supports_vision(&self) -> bool {
        VISION_MODELS.iter().any(|m| self.config.model.contains(m))
    }

    fn estimate_cost(&self, usage: &Usage) -> f64 {
        self.config
            .pricing
            .cost(usage.input_tokens, usage.output_tokens)
    }
}

pub struct AnthropicClient {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicClient {
    pub fn new(config: ProviderConfig) -> Result<Self, AgentError> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }
}

/// Messages API turns; the screenshot becomes a base64 image block on the last user turn.
pub fn anthropic_messages(conversation: &[ConversationTurn], screenshot: Option<&str>) -> Vec<Value> {
    let image_at = screenshot.and(last_user_index(conversation));
    conversation
        .iter()
        .enumerate()
        .filter(|(_, turn)| turn.role != Role::System)
        .map(|(i, turn)| match (image_at == Some(i), screenshot) {
            (true, Some(shot)) => {
                let (media_type, data) = split_data_url(shot);
                json!({
                    "role": "user",
                    "content": [
                        { "type": "text", "text": turn.content },
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": media_type,
                                "data": data,
                            },
                        },
                    ],
                })
            }
            _ => json!({ "role": turn.role.as_str(), "content": turn.content }),
        })
        .collect()
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn send(
        &self,
        system_prompt: &str,
        conversation: &[ConversationTurn],
        screenshot: Option<&str>,
    ) -> Result<LlmResponse, AgentError> {
        let cfg = &self.config;
        let body = json!({
            "model": cfg.model,
            "max_tokens": cfg.max_tokens,
            "system": system_prompt,
            "messages": anthropic_messages(conversation, screenshot),
        });

        let request = self
            .client
            .post(format!("{}/messages", cfg.base_url))
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let json = send_json(cfg.provider, request).await?;
        let text: String = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        debug!(model = %cfg.model, chars = text.len(), "model replied");

        Ok(LlmResponse {
            text,
            usage: Usage {
                input_tokens: json["usage"]["input_tokens"].as_u64().unwrap_or(0),
                output_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0),
            },
            finish_reason: json["stop_reason"].as_str().map(str::to_string),
        })
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn estimate_cost(&self, usage: &Usage) -> f64 {
        self.config
            .pricing
            .cost(usage.input_tokens, usage.output_tokens)
    }
}

fn data_url(shot: &str) -> String {
    if shot.starts_with("data:") {
        shot.to_string()
    } else {
        format!("data:image/jpeg;base64,{shot}")
    }
}

/// `(media type, base64 payload)`; bare base64 is taken to be JPEG.
fn split_data_url(shot: &str) -> (&str, &str) {
    let Some(rest) = shot.strip_prefix("data:") else {
        return ("image/jpeg", shot);
    };
    match rest.split_once(',') {
        Some((header, data)) => {
            let media_type = header.split(';').next().filter(|t| !t.is_empty());
            (media_type.unwrap_or("image/jpeg"), data)
        }
        None => ("image/jpeg", rest),
    }
}
