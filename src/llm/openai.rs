//! OpenAI-compatible chat completions provider.
//!
//! Calls `POST {base_url}/chat/completions`. Works with the OpenAI API and
//! with proxies that expose the same surface.
//!
//! Differences from Anthropic:
//! - System prompt is sent as a `role: "system"` message.
//! - Images are `image_url` parts carrying a `data:` URL.
//! - Token usage is `prompt_tokens` / `completion_tokens`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::client::{InputContentBlock, LlmClient, LlmResponse, Message, MessageContent};
use crate::config::LlmConfig;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

// ── Wire types ───────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ── OpenAiClient ─────────────────────────────────────────

pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client,
            config,
            base_url,
        }
    }
}

/// Translates a shared `Message` into the chat completions shape.
fn translate_message(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(text) => json!({"role": msg.role, "content": text}),
        MessageContent::Blocks(blocks) => {
            let parts: Vec<Value> = blocks
                .iter()
                .map(|block| match block {
                    InputContentBlock::Text { text } => json!({"type": "text", "text": text}),
                    InputContentBlock::Image { source } => json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", source.media_type, source.data)
                        }
                    }),
                })
                .collect();
            json!({"role": msg.role, "content": parts})
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system_prompt: &str, messages: &[Message]) -> Result<LlmResponse> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire_messages.push(json!({"role": "system", "content": system_prompt}));
        }
        wire_messages.extend(messages.iter().map(translate_message));

        let request = ChatRequest {
            model: &self.config.model,
            messages: wire_messages,
            max_tokens: self.config.max_tokens_per_request,
            temperature: 0.0,
        };

        debug!(
            "Calling chat completions ({}) with {} messages",
            self.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completions API error ({status}): {body}");
        }

        let resp: ChatResponse = response.json().await?;
        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let (input_tokens, output_tokens) = resp
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        info!("LLM response: {input_tokens} in / {output_tokens} out tokens");

        Ok(LlmResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }

    fn description(&self) -> String {
        format!("{} ({})", self.config.provider, self.config.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ImageSource;

    fn config(base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: "k".to_string(),
            base_url: base_url.map(String::from),
            max_tokens_per_request: 1024,
            timeout_secs: 10,
        }
    }

    #[test]
    fn test_default_base_url() {
        let client = OpenAiClient::new(config(None));
        assert_eq!(client.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_proxy_base_url() {
        let client = OpenAiClient::new(config(Some(
            "https://aiproxy.sanand.workers.dev/openai/v1/",
        )));
        assert_eq!(client.base_url, "https://aiproxy.sanand.workers.dev/openai/v1");
    }

    #[test]
    fn test_translate_text_message() {
        let value = translate_message(&Message::user("hi"));
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_translate_image_message() {
        let msg = Message::user_blocks(vec![
            InputContentBlock::Text {
                text: "What is the card number?".to_string(),
            },
            InputContentBlock::Image {
                source: ImageSource::base64("image/png", "iVBOR"),
            },
        ]);
        let value = translate_message(&msg);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(
            value["content"][1]["image_url"]["url"],
            "data:image/png;base64,iVBOR"
        );
    }

    #[test]
    fn test_response_parsing() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{
                "choices": [{"message": {"role": "assistant", "content": "{\"action\": \"run_sql\"}"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
            }"#,
        )
        .unwrap();
        assert_eq!(
            resp.choices[0].message.content.as_deref(),
            Some("{\"action\": \"run_sql\"}")
        );
        assert_eq!(resp.usage.unwrap().completion_tokens, 7);
    }

    #[test]
    fn test_response_without_usage() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(resp.usage.is_none());
        assert!(resp.choices[0].message.content.is_none());
    }
}
