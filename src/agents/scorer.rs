//! Agent 2: score every dish 0-100 for healthiness.

use serde::Deserialize;

use super::{call_json, fall_back, AgentOutput};
use crate::config::LlmConfig;
use crate::llm::ChatProvider;
use crate::models::{MenuItem, MenuSummary, ScoredMenuItem, UserProfile};
use crate::prompts::scorer_prompt;

const NEUTRAL_SCORE: f32 = 50.0;
const NEUTRAL_CONFIDENCE: f32 = 0.2;

#[derive(Deserialize)]
struct WireScore {
    title: String,
    score: f32,
    confidence: f32,
}

#[derive(Deserialize)]
struct Wire {
    scores: Vec<WireScore>,
}

/// Score the dish list. The output always has one entry per input dish,
/// in input order; dishes the model skipped get a neutral score.
pub async fn run(
    provider: &dyn ChatProvider,
    llm: &LlmConfig,
    items: &[MenuItem],
    profile: &UserProfile,
) -> AgentOutput<Vec<ScoredMenuItem>> {
    match call_json::<Wire>(provider, llm, "scorer", scorer_prompt(items, profile)).await {
        Ok(wire) => AgentOutput::Parsed(merge(items, &wire.scores)),
        Err(err) => fall_back("scorer", err, neutral_scores(items)),
    }
}

/// Match model scores back to input dishes by title, case-insensitively.
fn merge(items: &[MenuItem], scores: &[WireScore]) -> Vec<ScoredMenuItem> {
    items
        .iter()
        .map(|item| {
            let found = scores
                .iter()
                .find(|s| s.title.eq_ignore_ascii_case(&item.title));
            match found {
                Some(s) => ScoredMenuItem {
                    item: item.clone(),
                    score: s.score.clamp(0.0, 100.0),
                    confidence: s.confidence.clamp(0.0, 1.0),
                },
                None => {
                    tracing::debug!(title = %item.title, "Scorer reply missing dish, scoring neutral");
                    neutral(item)
                }
            }
        })
        .collect()
}

fn neutral(item: &MenuItem) -> ScoredMenuItem {
    ScoredMenuItem {
        item: item.clone(),
        score: NEUTRAL_SCORE,
        confidence: NEUTRAL_CONFIDENCE,
    }
}

fn neutral_scores(items: &[MenuItem]) -> Vec<ScoredMenuItem> {
    items.iter().map(neutral).collect()
}

/// Roll the per-dish scores up into a menu-level summary.
pub fn summarize(scored: &[ScoredMenuItem]) -> MenuSummary {
    if scored.is_empty() {
        return MenuSummary {
            average_score: NEUTRAL_SCORE,
            category: MenuSummary::category_for(NEUTRAL_SCORE),
            confidence: 0.0,
        };
    }
    let n = scored.len() as f32;
    let average = scored.iter().map(|s| s.score).sum::<f32>() / n;
    let confidence = scored.iter().map(|s| s.confidence).sum::<f32>() / n;
    MenuSummary {
        average_score: average,
        category: MenuSummary::category_for(average),
        confidence,
    }
}
