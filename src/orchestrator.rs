//! Fixed agent pipeline producing a full [`MenuAnalysis`].
//!
//! Stages run in order: structure the OCR text, score every dish, select
//! the top three, then analyze the three selections in parallel branches
//! (macros, ranked score, benefits, final synthesis). A branch that times
//! out or whose agents fall back degrades to a deterministic analysis
//! instead of failing the other branches; `MenuAnalysis.degraded` records
//! that anything along the way fell back.

use std::sync::Arc;
use std::time::Duration;

use crate::agents::ranker::DishRanker;
use crate::agents::{benefits, macro_profiler, scorer, selector, structurer, synthesizer};
use crate::config::{LlmConfig, RankerConfig};
use crate::llm::ChatProvider;
use crate::models::{
    score_to_category, DishAnalysis, HealthPrediction, MenuAnalysis, MenuItem, ScoredMenuItem,
    TopDishes, UserProfile,
};

pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    llm: LlmConfig,
    ranker: DishRanker,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ChatProvider>, llm: LlmConfig, ranker_cfg: RankerConfig) -> Self {
        Self {
            provider,
            llm,
            ranker: DishRanker::new(ranker_cfg),
        }
    }

    /// A dish branch makes at most four model calls, each carrying its own
    /// request timeout. This is the outer bound on the whole branch.
    fn branch_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs.saturating_mul(4))
    }

    /// Run the full pipeline over raw OCR text.
    ///
    /// Never fails: every stage has a deterministic fallback, and an empty
    /// menu yields placeholder picks. Degradation is reported, not raised.
    pub async fn analyze(&self, raw_text: &str, profile: &UserProfile) -> MenuAnalysis {
        let mut degraded = false;

        let structured = structurer::run(self.provider.as_ref(), &self.llm, raw_text).await;
        degraded |= structured.is_fallback();
        let items = structured.into_inner();
        tracing::info!(dishes = items.len(), "Structured menu text");

        let scored_out = scorer::run(self.provider.as_ref(), &self.llm, &items, profile).await;
        degraded |= scored_out.is_fallback();
        let scored = scored_out.into_inner();
        let summary = scorer::summarize(&scored);

        let picks_out = selector::run(self.provider.as_ref(), &self.llm, &scored).await;
        degraded |= picks_out.is_fallback();
        let picks = picks_out.into_inner();

        let healthiest = resolve_pick(&picks.healthiest, &scored, PickSlot::First);
        let balanced = resolve_pick(&picks.balanced, &scored, PickSlot::Middle);
        let indulgent = resolve_pick(&picks.indulgent, &scored, PickSlot::Last);

        let (h, b, i) = tokio::join!(
            self.dish_branch(&healthiest, profile),
            self.dish_branch(&balanced, profile),
            self.dish_branch(&indulgent, profile),
        );
        degraded |= h.1 || b.1 || i.1;

        MenuAnalysis {
            average_menu_score: summary.average_score,
            menu_category: summary.category,
            top_dishes: TopDishes {
                healthiest: h.0,
                balanced: b.0,
                indulgent: i.0,
            },
            degraded,
        }
    }

    /// Analyze one selected dish. Returns the analysis and whether any part
    /// of the branch degraded.
    async fn dish_branch(&self, item: &MenuItem, profile: &UserProfile) -> (DishAnalysis, bool) {
        let work = self.dish_branch_inner(item, profile);
        match tokio::time::timeout(self.branch_timeout(), work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(title = %item.title, "Dish branch timed out, using fallback analysis");
                (self.fallback_analysis(item), true)
            }
        }
    }

    async fn dish_branch_inner(
        &self,
        item: &MenuItem,
        profile: &UserProfile,
    ) -> (DishAnalysis, bool) {
        let mut degraded = false;

        let macros_out = macro_profiler::run(self.provider.as_ref(), &self.llm, item).await;
        degraded |= macros_out.is_fallback();
        let macros = macros_out.into_inner();

        let ranked_out = self
            .ranker
            .score(self.provider.as_ref(), &self.llm, item, &macros)
            .await;
        degraded |= ranked_out.is_fallback();
        let ranked = *ranked_out.value();

        let benefits_out =
            benefits::run(self.provider.as_ref(), &self.llm, item, &macros, profile).await;
        degraded |= benefits_out.is_fallback();
        let benefit = benefits_out.into_inner();

        let synth_out = synthesizer::run(
            self.provider.as_ref(),
            &self.llm,
            item,
            ranked.score,
            &macros,
            &benefit.summary,
        )
        .await;
        degraded |= synth_out.is_fallback();
        let synth = synth_out.into_inner();

        let confidence = synth
            .confidence
            .min(macros.confidence)
            .min(ranked.confidence);

        (
            DishAnalysis {
                title: item.title.clone(),
                price: item.price.clone(),
                category: synth.category,
                summary: benefit.summary,
                macros,
                health_prediction: HealthPrediction {
                    short_term: benefit.short_term,
                    long_term: benefit.long_term,
                },
                score: synth.score,
                confidence,
            },
            degraded,
        )
    }

    /// Deterministic analysis for a branch that could not run at all.
    fn fallback_analysis(&self, item: &MenuItem) -> DishAnalysis {
        let macros = crate::models::MacroProfile::fallback();
        let score = self.ranker.rule_score(item, &macros);
        DishAnalysis {
            title: item.title.clone(),
            price: item.price.clone(),
            category: score_to_category(score),
            summary: format!("{} could not be fully analyzed.", item.title),
            macros,
            health_prediction: HealthPrediction {
                short_term: "No short-term estimate available.".to_string(),
                long_term: "No long-term estimate available.".to_string(),
            },
            score,
            confidence: 0.2,
        }
    }
}

enum PickSlot {
    First,
    Middle,
    Last,
}

/// Resolve a picked title back to its menu item. A title the selector
/// invented maps to a positional stand-in (first, middle, or last dish),
/// and an empty menu maps to a placeholder item.
fn resolve_pick(title: &str, scored: &[ScoredMenuItem], slot: PickSlot) -> MenuItem {
    if let Some(found) = scored
        .iter()
        .find(|s| s.item.title.eq_ignore_ascii_case(title))
    {
        return found.item.clone();
    }
    if scored.is_empty() {
        return MenuItem::titled("No dish available");
    }
    let index = match slot {
        PickSlot::First => 0,
        PickSlot::Middle => scored.len() / 2,
        PickSlot::Last => scored.len() - 1,
    };
    tracing::debug!(title, "Pick not found on menu, substituting positional dish");
    scored[index].item.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(title: &str, score: f32) -> ScoredMenuItem {
        ScoredMenuItem {
            item: MenuItem::titled(title),
            score,
            confidence: 0.8,
        }
    }

    #[test]
    fn resolve_matches_case_insensitively() {
        let menu = vec![scored("Pad Thai", 60.0)];
        let item = resolve_pick("pad thai", &menu, PickSlot::First);
        assert_eq!(item.title, "Pad Thai");
    }

    #[test]
    fn resolve_substitutes_positionally() {
        let menu = vec![scored("A", 1.0), scored("B", 2.0), scored("C", 3.0)];
        assert_eq!(resolve_pick("Ghost", &menu, PickSlot::First).title, "A");
        assert_eq!(resolve_pick("Ghost", &menu, PickSlot::Middle).title, "B");
        assert_eq!(resolve_pick("Ghost", &menu, PickSlot::Last).title, "C");
    }

    #[test]
    fn resolve_on_empty_menu_is_a_placeholder() {
        let item = resolve_pick("Anything", &[], PickSlot::Middle);
        assert_eq!(item.title, "No dish available");
    }
}
