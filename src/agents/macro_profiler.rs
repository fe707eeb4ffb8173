//! Agent 4: estimate a dish's macro profile.

use super::{call_json, fall_back, AgentOutput};
use crate::config::LlmConfig;
use crate::llm::ChatProvider;
use crate::models::{MacroProfile, MenuItem};
use crate::prompts::macro_profiler_prompt;

/// Estimate macros for one dish. Falls back to the neutral mid profile.
pub async fn run(
    provider: &dyn ChatProvider,
    llm: &LlmConfig,
    item: &MenuItem,
) -> AgentOutput<MacroProfile> {
    match call_json::<MacroProfile>(provider, llm, "macro_profiler", macro_profiler_prompt(item))
        .await
    {
        Ok(mut profile) => {
            profile.confidence = profile.confidence.clamp(0.0, 1.0);
            AgentOutput::Parsed(profile)
        }
        Err(err) => fall_back("macro_profiler", err, MacroProfile::fallback()),
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{MacroLevel, MacroProfile};

    #[test]
    fn fallback_profile_is_neutral() {
        let p = MacroProfile::fallback();
        assert_eq!(p.calories, 500);
        assert_eq!(p.protein, MacroLevel::Mid);
        assert_eq!(p.sugar, MacroLevel::Low);
        assert!(p.confidence <= 0.5);
    }
}
