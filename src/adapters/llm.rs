//! LLM provider client (OpenAI-compatible chat completions)

use super::{attribute_status, endpoint, parse_retry_after};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A completion request: messages plus an optional output-token budget
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// Completion result
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Contract the analyze stage needs from the LLM provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// Model identifier, for logging
    fn model_id(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequestWire<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseWire {
    choices: Vec<ChoiceWire>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceWire {
    message: MessageWire,
}

#[derive(Debug, Deserialize)]
struct MessageWire {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for any OpenAI-compatible endpoint
pub struct HttpLanguageModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    hard_timeout: Duration,
}

impl HttpLanguageModel {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.llm.base_url.clone(),
            model: config.llm.model.clone(),
            api_key: config.llm_api_key(),
            hard_timeout: config.hard_timeout(),
        })
    }

    async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = endpoint(&self.base_url, "chat/completions");
        let wire = ChatRequestWire {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&wire);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body = response.text().await.unwrap_or_default();
            return Err(attribute_status("llm", status, &body, retry_after));
        }

        let parsed: ChatResponseWire = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Transient("llm returned no choices".to_string()))?;

        Ok(Completion {
            text,
            usage: parsed.usage.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        match tokio::time::timeout(self.hard_timeout, self.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transient(format!(
                "llm call exceeded hard timeout of {:?}",
                self.hard_timeout
            ))),
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "id": "cmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ChatResponseWire = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("hello")
        );
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_response_without_usage() {
        let json = r#"{"choices": [{"message": {"content": "x"}}]}"#;
        let parsed: ChatResponseWire = serde_json::from_str(json).unwrap();
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_request_omits_absent_budget() {
        let wire = ChatRequestWire {
            model: "m",
            messages: &[ChatMessage::user("hi")],
            max_tokens: None,
        };
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("max_tokens"));
    }
}
