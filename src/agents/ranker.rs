//! Rule-based dish ranker.
//!
//! Scores a dish from its text and macro estimate without any model call,
//! then decides whether the score is clear-cut enough to keep as-is. Only
//! dishes that land inside the ambiguous band (`skip_below..skip_above`)
//! go to the model for refinement, which keeps most menus to a handful of
//! calls instead of one per dish.

use serde::Deserialize;

use super::{call_json, fall_back, AgentOutput};
use crate::config::{LlmConfig, RankerConfig};
use crate::llm::ChatProvider;
use crate::models::{MacroLevel, MacroProfile, MenuItem};
use crate::prompts::ranker_refinement_prompt;

const BASE_SCORE: f32 = 50.0;
/// The model may move a refined score at most this far from the rule score.
const REFINEMENT_RANGE: f32 = 25.0;

const UNHEALTHY_KEYWORDS: &[&str] = &[
    "fried",
    "deep fried",
    "crispy",
    "battered",
    "creamy",
    "cheesy",
    "buttery",
    "gravy",
    "sugar",
    "sweetened",
    "caramel",
    "chocolate",
    "candy",
    "cake",
    "pie",
    "donut",
    "pastry",
    "cookies",
    "milkshake",
];

const HEALTHY_KEYWORDS: &[&str] = &[
    "grilled",
    "steamed",
    "baked",
    "roasted",
    "poached",
    "fresh",
    "vegetable",
    "garden",
    "salad",
    "lean",
    "whole grain",
    "quinoa",
    "lentil",
    "bean",
    "chickpea",
    "tofu",
    "vegan",
    "plant-based",
];

/// Score plus how sure we are of it.
#[derive(Debug, Clone, Copy)]
pub struct RankedScore {
    pub score: f32,
    pub confidence: f32,
}

#[derive(Deserialize)]
struct Wire {
    score: f32,
    confidence: f32,
}

pub struct DishRanker {
    cfg: RankerConfig,
}

impl DishRanker {
    pub fn new(cfg: RankerConfig) -> Self {
        Self { cfg }
    }

    /// Deterministic score from macros and keyword hits, clamped to 0-100.
    pub fn rule_score(&self, item: &MenuItem, macros: &MacroProfile) -> f32 {
        let mut score = BASE_SCORE;

        score += match macros.protein {
            MacroLevel::High => 10.0,
            MacroLevel::Mid => 0.0,
            MacroLevel::Low => -5.0,
        };
        score += match macros.carbs {
            MacroLevel::High => -5.0,
            MacroLevel::Mid => 0.0,
            MacroLevel::Low => 5.0,
        };
        score += match macros.fat {
            MacroLevel::High => -10.0,
            MacroLevel::Mid => 0.0,
            MacroLevel::Low => 5.0,
        };
        score += match macros.sugar {
            MacroLevel::High => -15.0,
            MacroLevel::Mid => -5.0,
            MacroLevel::Low => 0.0,
        };
        if macros.calories > 800 {
            score -= 15.0;
        } else if macros.calories < 300 {
            score += 5.0;
        }

        let text = dish_text(item);
        for keyword in UNHEALTHY_KEYWORDS {
            if text.contains(keyword) {
                score -= 5.0;
            }
        }
        for keyword in HEALTHY_KEYWORDS {
            if text.contains(keyword) {
                score += 5.0;
            }
        }

        score.clamp(0.0, 100.0)
    }

    /// True when the rule score lands inside the ambiguous band and is
    /// worth a model call.
    pub fn needs_refinement(&self, score: f32) -> bool {
        score > self.cfg.skip_below && score < self.cfg.skip_above
    }

    /// Score a dish, calling the model only for ambiguous scores. Refined
    /// scores are clamped to within [`REFINEMENT_RANGE`] of the rule score.
    pub async fn score(
        &self,
        provider: &dyn ChatProvider,
        llm: &LlmConfig,
        item: &MenuItem,
        macros: &MacroProfile,
    ) -> AgentOutput<RankedScore> {
        let rule = self.rule_score(item, macros);
        if !self.needs_refinement(rule) {
            tracing::debug!(title = %item.title, score = rule, "Rule score is clear-cut, skipping model call");
            return AgentOutput::Parsed(RankedScore {
                score: rule,
                confidence: 0.9,
            });
        }

        match call_json::<Wire>(
            provider,
            llm,
            "ranker",
            ranker_refinement_prompt(item, rule),
        )
        .await
        {
            Ok(wire) => {
                let lo = (rule - REFINEMENT_RANGE).max(0.0);
                let hi = (rule + REFINEMENT_RANGE).min(100.0);
                AgentOutput::Parsed(RankedScore {
                    score: wire.score.clamp(lo, hi),
                    confidence: wire.confidence.clamp(0.0, 1.0),
                })
            }
            Err(err) => fall_back(
                "ranker",
                err,
                RankedScore {
                    score: rule,
                    confidence: 0.5,
                },
            ),
        }
    }
}

fn dish_text(item: &MenuItem) -> String {
    let mut text = item.title.to_lowercase();
    if let Some(desc) = &item.description {
        text.push(' ');
        text.push_str(&desc.to_lowercase());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RankerConfig {
        RankerConfig {
            skip_below: 20.0,
            skip_above: 90.0,
        }
    }

    fn neutral_macros() -> MacroProfile {
        MacroProfile {
            calories: 500,
            protein: MacroLevel::Mid,
            carbs: MacroLevel::Mid,
            fat: MacroLevel::Mid,
            sugar: MacroLevel::Mid,
            confidence: 0.8,
        }
    }

    #[test]
    fn neutral_dish_scores_near_base() {
        let ranker = DishRanker::new(cfg());
        let score = ranker.rule_score(&MenuItem::titled("House Plate"), &neutral_macros());
        // Base 50 minus 5 for mid sugar.
        assert_eq!(score, 45.0);
    }

    #[test]
    fn keywords_move_the_score() {
        let ranker = DishRanker::new(cfg());
        let macros = neutral_macros();
        let fried = ranker.rule_score(
            &MenuItem {
                title: "Crispy Fried Chicken".to_string(),
                description: Some("battered and served with gravy".to_string()),
                price: None,
                section: None,
            },
            &macros,
        );
        let grilled = ranker.rule_score(
            &MenuItem {
                title: "Grilled Garden Salad".to_string(),
                description: Some("fresh vegetable medley".to_string()),
                price: None,
                section: None,
            },
            &macros,
        );
        assert!(fried < 45.0);
        assert!(grilled > 45.0);
        // Four unhealthy hits at -5 each.
        assert_eq!(fried, 25.0);
    }

    #[test]
    fn extreme_scores_clamp() {
        let ranker = DishRanker::new(cfg());
        let macros = MacroProfile {
            calories: 1200,
            protein: MacroLevel::Low,
            carbs: MacroLevel::High,
            fat: MacroLevel::High,
            sugar: MacroLevel::High,
            confidence: 0.9,
        };
        let score = ranker.rule_score(
            &MenuItem {
                title: "Deep Fried Chocolate Caramel Cake Milkshake Pie".to_string(),
                description: Some("battered, creamy, buttery, sweetened sugar candy".to_string()),
                price: None,
                section: None,
            },
            &macros,
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn clear_cut_scores_skip_the_model() {
        let ranker = DishRanker::new(cfg());
        assert!(!ranker.needs_refinement(15.0));
        assert!(!ranker.needs_refinement(20.0));
        assert!(ranker.needs_refinement(20.1));
        assert!(ranker.needs_refinement(89.9));
        assert!(!ranker.needs_refinement(90.0));
        assert!(!ranker.needs_refinement(95.0));
    }
}
