//! The six-stage analysis agent chain.
//!
//! Each agent is one prompt, one model call, and one strict JSON parse.
//! When the call or the parse fails, the agent returns a deterministic
//! fallback value instead of an error, so a flaky model degrades output
//! quality rather than failing the whole analysis. The [`AgentOutput`]
//! wrapper keeps the distinction visible to callers.
//!
//! | Stage | Agent                | Input → Output                          |
//! |-------|----------------------|------------------------------------------|
//! | 1     | [`structurer`]       | raw OCR text → flat dish list            |
//! | 2     | [`scorer`]           | dishes + profile → scored dishes         |
//! | 3     | [`selector`]         | scored dishes → top three picks          |
//! | 4     | [`macro_profiler`]   | dish → macro profile                     |
//! | 5     | [`benefits`]         | dish + macros → health summary           |
//! | 6     | [`synthesizer`]      | dish + evidence → final score + category |
//!
//! [`ranker`] is the rule-based pre-scorer that short-circuits model calls
//! for clear-cut dishes.

pub mod benefits;
pub mod macro_profiler;
pub mod ranker;
pub mod scorer;
pub mod selector;
pub mod structurer;
pub mod synthesizer;

use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::config::LlmConfig;
use crate::llm::{parse_llm_json, ChatProvider, ChatRequest};
use crate::prompts::NUTRITIONIST_SYSTEM;

/// Result of one agent invocation.
///
/// `Parsed` means the model replied and the reply validated against the
/// agent's schema. `Fallback` carries the deterministic substitute and the
/// reason it was needed. Either way the caller gets a usable value.
#[derive(Debug, Clone)]
pub enum AgentOutput<T> {
    Parsed(T),
    Fallback { value: T, reason: String },
}

impl<T> AgentOutput<T> {
    pub fn into_inner(self) -> T {
        match self {
            AgentOutput::Parsed(v) => v,
            AgentOutput::Fallback { value, .. } => value,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            AgentOutput::Parsed(v) => v,
            AgentOutput::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, AgentOutput::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            AgentOutput::Parsed(_) => None,
            AgentOutput::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// Send one agent prompt and strictly parse the JSON reply.
pub(crate) async fn call_json<T: DeserializeOwned>(
    provider: &dyn ChatProvider,
    llm: &LlmConfig,
    agent: &str,
    prompt: String,
) -> Result<T> {
    let request = ChatRequest::new(&llm.model, prompt)
        .with_system(NUTRITIONIST_SYSTEM)
        .expect_json();
    let request = ChatRequest {
        temperature: llm.temperature,
        max_tokens: llm.max_tokens,
        ..request
    };

    let response = provider.complete(&request).await?;
    tracing::debug!(
        agent,
        model = %response.model,
        tokens = response.total_tokens,
        "Agent call completed"
    );
    parse_llm_json(&response.content)
}

/// Log and wrap a failed agent call as a fallback.
pub(crate) fn fall_back<T>(agent: &str, err: anyhow::Error, value: T) -> AgentOutput<T> {
    let reason = format!("{:#}", err);
    tracing::warn!(agent, error = %reason, "Agent call failed, using fallback");
    AgentOutput::Fallback { value, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_accessors() {
        let parsed: AgentOutput<u32> = AgentOutput::Parsed(7);
        assert!(!parsed.is_fallback());
        assert_eq!(parsed.fallback_reason(), None);
        assert_eq!(parsed.into_inner(), 7);

        let fb: AgentOutput<u32> = AgentOutput::Fallback {
            value: 1,
            reason: "timeout".to_string(),
        };
        assert!(fb.is_fallback());
        assert_eq!(fb.fallback_reason(), Some("timeout"));
        assert_eq!(*fb.value(), 1);
    }
}
