//! Agent 3: pick the healthiest, balanced, and indulgent dish.

use super::{call_json, fall_back, AgentOutput};
use crate::config::LlmConfig;
use crate::llm::ChatProvider;
use crate::models::{PickRationale, ScoredMenuItem, TopPicks};
use crate::prompts::selector_prompt;

/// Ask the model for the three picks and validate each against the menu.
/// Hallucinated titles or a failed call fall back to a score-ordered pick.
pub async fn run(
    provider: &dyn ChatProvider,
    llm: &LlmConfig,
    scored: &[ScoredMenuItem],
) -> AgentOutput<TopPicks> {
    match call_json::<TopPicks>(provider, llm, "selector", selector_prompt(scored)).await {
        Ok(picks) if picks_exist(&picks, scored) => AgentOutput::Parsed(picks),
        Ok(_) => fall_back(
            "selector",
            anyhow::anyhow!("Model picked a dish that is not on the menu"),
            by_score(scored),
        ),
        Err(err) => fall_back("selector", err, by_score(scored)),
    }
}

fn picks_exist(picks: &TopPicks, scored: &[ScoredMenuItem]) -> bool {
    let on_menu =
        |title: &str| scored.iter().any(|s| s.item.title.eq_ignore_ascii_case(title));
    on_menu(&picks.healthiest) && on_menu(&picks.balanced) && on_menu(&picks.indulgent)
}

/// Deterministic selection: highest score is healthiest, lowest is
/// indulgent, the middle of the sorted order is balanced. An empty menu
/// yields placeholder titles so the response shape never collapses.
pub fn by_score(scored: &[ScoredMenuItem]) -> TopPicks {
    let rationale = PickRationale {
        healthiest: "Highest health score on this menu.".to_string(),
        balanced: "Sits in the middle of this menu's score range.".to_string(),
        indulgent: "Lowest health score on this menu.".to_string(),
    };

    if scored.is_empty() {
        return TopPicks {
            healthiest: "No dish available".to_string(),
            balanced: "No dish available".to_string(),
            indulgent: "No dish available".to_string(),
            rationale,
        };
    }

    let mut ordered: Vec<&ScoredMenuItem> = scored.iter().collect();
    ordered.sort_by(|a, b| b.score.total_cmp(&a.score));

    TopPicks {
        healthiest: ordered[0].item.title.clone(),
        balanced: ordered[ordered.len() / 2].item.title.clone(),
        indulgent: ordered[ordered.len() - 1].item.title.clone(),
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MenuItem;

    fn scored(title: &str, score: f32) -> ScoredMenuItem {
        ScoredMenuItem {
            item: MenuItem::titled(title),
            score,
            confidence: 0.8,
        }
    }

    #[test]
    fn by_score_orders_picks() {
        let menu = vec![
            scored("Burger", 30.0),
            scored("Salad", 85.0),
            scored("Stir Fry", 60.0),
        ];
        let picks = by_score(&menu);
        assert_eq!(picks.healthiest, "Salad");
        assert_eq!(picks.balanced, "Stir Fry");
        assert_eq!(picks.indulgent, "Burger");
    }

    #[test]
    fn by_score_handles_single_dish_menu() {
        let menu = vec![scored("Only Dish", 50.0)];
        let picks = by_score(&menu);
        assert_eq!(picks.healthiest, "Only Dish");
        assert_eq!(picks.balanced, "Only Dish");
        assert_eq!(picks.indulgent, "Only Dish");
    }

    #[test]
    fn by_score_on_empty_menu_uses_placeholders() {
        let picks = by_score(&[]);
        assert_eq!(picks.healthiest, "No dish available");
    }

    #[test]
    fn hallucinated_pick_is_detected() {
        let menu = vec![scored("Salad", 85.0)];
        let picks = TopPicks {
            healthiest: "Imaginary Bowl".to_string(),
            balanced: "Salad".to_string(),
            indulgent: "Salad".to_string(),
            rationale: PickRationale {
                healthiest: String::new(),
                balanced: String::new(),
                indulgent: String::new(),
            },
        };
        assert!(!picks_exist(&picks, &menu));
    }
}
