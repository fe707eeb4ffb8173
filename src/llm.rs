//! Chat-completion provider abstraction and implementations.
//!
//! Defines the [`ChatProvider`] trait and concrete backends for the three
//! hosted model endpoints NutriFlow talks to:
//!
//! - **[`OpenAiChat`]** — OpenAI `POST /v1/chat/completions`.
//! - **[`AnthropicChat`]** — Anthropic `POST /v1/messages`.
//! - **[`OpenRouterChat`]** — OpenRouter-brokered multi-model endpoint.
//!
//! The chat path deliberately has no retries: agent callers absorb a failed
//! call into their deterministic fallback immediately. Retry/backoff lives
//! only in the embedding client.
//!
//! Also provides [`extract_json`] and [`parse_llm_json`] for pulling a
//! schema-validated JSON payload out of a model's free-text reply.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// A single chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the endpoint for a JSON object response where supported.
    pub json_response: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: 1024,
            json_response: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

/// Response text plus usage metadata.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub total_tokens: u64,
}

/// Trait for hosted chat-completion backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name (e.g. `"openai"`, `"anthropic"`, `"openrouter"`).
    fn name(&self) -> &str;

    /// Send one completion request and return the reply text.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

fn client_with_timeout(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

fn require_env_key(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

// ─── OpenAI ─────────────────────────────────────────────────────────

/// OpenAI chat-completions backend. Requires `OPENAI_API_KEY`.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiChat {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: client_with_timeout(timeout_secs)?,
            api_key: require_env_key("OPENAI_API_KEY")?,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }

        tracing::debug!(model = %request.model, "Sending request to OpenAI");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("OpenAI HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("OpenAI returned {}: {}", status, truncate(&error_body, 300));
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let total_tokens = reply["usage"]["total_tokens"].as_u64().unwrap_or(0);

        Ok(ChatResponse {
            content,
            model: request.model.clone(),
            total_tokens,
        })
    }
}

// ─── Anthropic ──────────────────────────────────────────────────────

/// Anthropic messages backend. Requires `ANTHROPIC_API_KEY`.
pub struct AnthropicChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicChat {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: client_with_timeout(timeout_secs)?,
            api_key: require_env_key("ANTHROPIC_API_KEY")?,
            base_url: "https://api.anthropic.com/v1".to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ChatProvider for AnthropicChat {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        tracing::debug!(model = %request.model, "Sending request to Anthropic");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Anthropic HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!(
                "Anthropic returned {}: {}",
                status,
                truncate(&error_body, 300)
            );
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        // Concatenate all text blocks in the reply.
        let content = reply["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b["type"] == "text").then(|| b["text"].as_str().unwrap_or_default())
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let input = reply["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let output = reply["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok(ChatResponse {
            content,
            model: request.model.clone(),
            total_tokens: input + output,
        })
    }
}

// ─── OpenRouter ─────────────────────────────────────────────────────

/// OpenRouter-brokered backend. Requires `OPENROUTER_API_KEY`.
pub struct OpenRouterChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterChat {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: client_with_timeout(timeout_secs)?,
            api_key: require_env_key("OPENROUTER_API_KEY")?,
            base_url: "https://openrouter.ai/api/v1".to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Send a raw messages array (used by the OCR vision path, which needs
    /// image content blocks the plain [`ChatRequest`] shape can't express).
    pub async fn complete_messages(
        &self,
        model: &str,
        messages: serde_json::Value,
        json_response: bool,
    ) -> Result<ChatResponse> {
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if json_response {
            body["response_format"] = json!({ "type": "json_object" });
            body["temperature"] = json!(0.1);
        }

        tracing::debug!(model = %model, "Sending request to OpenRouter");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://nutriflow.app")
            .header("X-Title", "NutriFlow")
            .json(&body)
            .send()
            .await
            .context("OpenRouter HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!(
                "OpenRouter returned {}: {}",
                status,
                truncate(&error_body, 300)
            );
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse OpenRouter response")?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let total_tokens = reply["usage"]["total_tokens"].as_u64().unwrap_or(0);

        Ok(ChatResponse {
            content,
            model: reply["model"].as_str().unwrap_or(model).to_string(),
            total_tokens,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenRouterChat {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        self.complete_messages(&request.model, json!(messages), request.json_response)
            .await
    }
}

/// Instantiate the chat provider named in the configuration.
pub fn create_chat_provider(config: &crate::config::LlmConfig) -> Result<Box<dyn ChatProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChat::new(config.timeout_secs)?)),
        "anthropic" => Ok(Box::new(AnthropicChat::new(config.timeout_secs)?)),
        "openrouter" => Ok(Box::new(OpenRouterChat::new(config.timeout_secs)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ─── JSON extraction ────────────────────────────────────────────────

/// Locate the JSON payload inside a model's free-text reply.
///
/// Handles the common failure modes: markdown code fences around the JSON,
/// and prose before or after it. Returns the slice spanning the outermost
/// balanced `{...}` or `[...]`.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    // Strip ``` / ```json fences.
    let inner = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest)
    } else {
        trimmed
    };
    let inner = inner.trim();

    let open = inner.find(['{', '['])?;
    let open_char = inner.as_bytes()[open] as char;
    let close_char = if open_char == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in inner[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if !in_string && c == open_char => depth += 1,
            c if !in_string && c == close_char => {
                depth -= 1;
                if depth == 0 {
                    return Some(&inner[open..open + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strictly parse a model reply into `T`.
///
/// Extraction failure and schema mismatch both surface as errors; callers
/// fold those into their fallback path.
pub fn parse_llm_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let payload = extract_json(text)
        .ok_or_else(|| anyhow::anyhow!("No JSON payload found in model reply"))?;
    serde_json::from_str(payload).context("Model reply did not match the expected schema")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Pick {
        healthiest: String,
        score: u32,
    }

    #[test]
    fn extracts_bare_json() {
        let text = r#"{"healthiest": "Salad", "score": 88}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "```json\n{\"healthiest\": \"Salad\", \"score\": 88}\n```";
        let parsed: Pick = parse_llm_json(text).unwrap();
        assert_eq!(parsed.healthiest, "Salad");
        assert_eq!(parsed.score, 88);
    }

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let text = "Sure! Here is the analysis:\n{\"healthiest\": \"Salad\", \"score\": 88}\nLet me know if you need more.";
        let parsed: Pick = parse_llm_json(text).unwrap();
        assert_eq!(parsed.score, 88);
    }

    #[test]
    fn handles_nested_braces_and_strings() {
        let text = r#"{"healthiest": "Bowl {spicy}", "score": 70}"#;
        let parsed: Pick = parse_llm_json(text).unwrap();
        assert_eq!(parsed.healthiest, "Bowl {spicy}");
    }

    #[test]
    fn extracts_arrays() {
        let text = "Here you go: [1, 2, 3] enjoy";
        assert_eq!(extract_json(text), Some("[1, 2, 3]"));
    }

    #[test]
    fn rejects_text_without_json() {
        assert!(extract_json("I could not read the menu, sorry.").is_none());
        assert!(parse_llm_json::<Pick>("nothing here").is_err());
    }

    #[test]
    fn rejects_schema_mismatch() {
        let text = r#"{"healthiest": "Salad"}"#;
        assert!(parse_llm_json::<Pick>(text).is_err());
    }
}
