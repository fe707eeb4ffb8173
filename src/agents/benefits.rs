//! Agent 5: write the dish's health summary and predictions.

use super::{call_json, fall_back, AgentOutput};
use crate::config::LlmConfig;
use crate::llm::ChatProvider;
use crate::models::{BenefitSummary, MacroLevel, MacroProfile, MenuItem, UserProfile};
use crate::prompts::benefits_prompt;

/// Summarize health effects for one dish. The fallback builds plain text
/// from the macro estimate so the response never ships empty strings.
pub async fn run(
    provider: &dyn ChatProvider,
    llm: &LlmConfig,
    item: &MenuItem,
    macros: &MacroProfile,
    profile: &UserProfile,
) -> AgentOutput<BenefitSummary> {
    match call_json::<BenefitSummary>(
        provider,
        llm,
        "benefits",
        benefits_prompt(item, macros, profile),
    )
    .await
    {
        Ok(summary) => AgentOutput::Parsed(summary),
        Err(err) => fall_back("benefits", err, template_summary(item, macros)),
    }
}

fn template_summary(item: &MenuItem, macros: &MacroProfile) -> BenefitSummary {
    let weight = match (macros.fat, macros.sugar) {
        (MacroLevel::High, _) | (_, MacroLevel::High) => "a heavier",
        (MacroLevel::Low, MacroLevel::Low) => "a lighter",
        _ => "a moderate",
    };
    let protein_note = match macros.protein {
        MacroLevel::High => " with a good amount of protein",
        _ => "",
    };
    BenefitSummary {
        summary: format!(
            "{} is {} choice at roughly {} calories{}.",
            item.title, weight, macros.calories, protein_note
        ),
        short_term: match macros.sugar {
            MacroLevel::High => {
                "Expect a quick energy lift followed by a dip within a couple of hours.".to_string()
            }
            _ => "Should keep you comfortably full for a few hours.".to_string(),
        },
        long_term: match (macros.fat, macros.sugar) {
            (MacroLevel::High, _) | (_, MacroLevel::High) => {
                "Best kept as an occasional choice rather than a routine one.".to_string()
            }
            _ => "Fits into a regular rotation without much concern.".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_reflects_macros() {
        let item = MenuItem::titled("Fudge Sundae");
        let macros = MacroProfile {
            calories: 950,
            protein: MacroLevel::Low,
            carbs: MacroLevel::High,
            fat: MacroLevel::High,
            sugar: MacroLevel::High,
            confidence: 0.9,
        };
        let s = template_summary(&item, &macros);
        assert!(s.summary.contains("Fudge Sundae"));
        assert!(s.summary.contains("heavier"));
        assert!(s.short_term.contains("dip"));
        assert!(s.long_term.contains("occasional"));
    }

    #[test]
    fn template_for_light_dish_is_positive() {
        let item = MenuItem::titled("Steamed Greens");
        let macros = MacroProfile {
            calories: 180,
            protein: MacroLevel::Mid,
            carbs: MacroLevel::Low,
            fat: MacroLevel::Low,
            sugar: MacroLevel::Low,
            confidence: 0.9,
        };
        let s = template_summary(&item, &macros);
        assert!(s.summary.contains("lighter"));
        assert!(s.long_term.contains("regular rotation"));
    }
}
