//! Agent 6: reconcile all evidence into a final score and category.

use super::{call_json, fall_back, AgentOutput};
use crate::config::LlmConfig;
use crate::llm::ChatProvider;
use crate::models::{score_to_category, MacroProfile, MenuItem, ScoreSynthesis};
use crate::prompts::synthesizer_prompt;

/// Produce the final score. The category is always recomputed from the
/// score so the pair can never disagree, whatever the model said.
pub async fn run(
    provider: &dyn ChatProvider,
    llm: &LlmConfig,
    item: &MenuItem,
    prior_score: f32,
    macros: &MacroProfile,
    summary: &str,
) -> AgentOutput<ScoreSynthesis> {
    match call_json::<ScoreSynthesis>(
        provider,
        llm,
        "synthesizer",
        synthesizer_prompt(item, prior_score, macros, summary),
    )
    .await
    {
        Ok(raw) => {
            let score = raw.score.clamp(0.0, 100.0);
            AgentOutput::Parsed(ScoreSynthesis {
                score,
                category: score_to_category(score),
                confidence: raw.confidence.clamp(0.0, 1.0),
            })
        }
        Err(err) => {
            let score = prior_score.clamp(0.0, 100.0);
            fall_back(
                "synthesizer",
                err,
                ScoreSynthesis {
                    score,
                    category: score_to_category(score),
                    confidence: 0.4,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{score_to_category, DishCategory};

    #[test]
    fn category_boundaries() {
        assert_eq!(score_to_category(76.0), DishCategory::Healthiest);
        assert_eq!(score_to_category(75.9), DishCategory::Balanced);
        assert_eq!(score_to_category(41.0), DishCategory::Balanced);
        assert_eq!(score_to_category(40.9), DishCategory::Indulgent);
        assert_eq!(score_to_category(0.0), DishCategory::Indulgent);
    }
}
