//! Core data models used throughout NutriFlow.
//!
//! These types represent the menu items, scores, and analysis results that
//! flow through the agent pipeline, plus the persisted rows backing the
//! deduplication scheme.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single menu item as produced by OCR structuring (agent 1).
///
/// Ephemeral: held in memory for the duration of one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl MenuItem {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            price: None,
            section: None,
        }
    }
}

/// Coarse macronutrient level used in macro profiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MacroLevel {
    High,
    Mid,
    Low,
}

/// Estimated macronutrient profile for one dish (agent 4 output).
///
/// Immutable once computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MacroProfile {
    pub calories: u32,
    pub protein: MacroLevel,
    pub carbs: MacroLevel,
    pub fat: MacroLevel,
    pub sugar: MacroLevel,
    pub confidence: f32,
}

impl MacroProfile {
    /// Neutral profile used when estimation fails.
    pub fn fallback() -> Self {
        Self {
            calories: 500,
            protein: MacroLevel::Mid,
            carbs: MacroLevel::Mid,
            fat: MacroLevel::Mid,
            sugar: MacroLevel::Low,
            confidence: 0.5,
        }
    }
}

/// Per-dish health category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DishCategory {
    Healthiest,
    Balanced,
    Indulgent,
}

/// Whole-menu category (agent 2 summary).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MenuCategory {
    Healthy,
    Balanced,
    Indulgent,
}

/// Menu item annotated with a 0-100 health score (agent 2 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredMenuItem {
    #[serde(flatten)]
    pub item: MenuItem,
    pub score: f32,
    pub confidence: f32,
}

/// Whole-menu summary attached to the scored item list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuSummary {
    pub average_score: f32,
    pub category: MenuCategory,
    pub confidence: f32,
}

impl MenuSummary {
    /// Category derived from an average score alone.
    pub fn category_for(average: f32) -> MenuCategory {
        if average >= 70.0 {
            MenuCategory::Healthy
        } else if average >= 40.0 {
            MenuCategory::Balanced
        } else {
            MenuCategory::Indulgent
        }
    }
}

/// Per-category rationale for the top-dish selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickRationale {
    pub healthiest: String,
    pub balanced: String,
    pub indulgent: String,
}

/// Titles of the three selected dishes (agent 3 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopPicks {
    pub healthiest: String,
    pub balanced: String,
    pub indulgent: String,
    pub rationale: PickRationale,
}

/// Benefit narrative for one dish (agent 5 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenefitSummary {
    pub summary: String,
    pub short_term: String,
    pub long_term: String,
}

/// Final synthesized score for one dish (agent 6 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreSynthesis {
    pub score: f32,
    pub category: DishCategory,
    pub confidence: f32,
}

/// Score-to-category mapping shared by the synthesizer and the ranker.
pub fn score_to_category(score: f32) -> DishCategory {
    if score >= 76.0 {
        DishCategory::Healthiest
    } else if score >= 41.0 {
        DishCategory::Balanced
    } else {
        DishCategory::Indulgent
    }
}

/// Expected effects of eating a dish, short and long horizon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthPrediction {
    pub short_term: String,
    pub long_term: String,
}

/// Fully enriched result for one selected dish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DishAnalysis {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    pub category: DishCategory,
    pub summary: String,
    pub macros: MacroProfile,
    pub health_prediction: HealthPrediction,
    pub score: f32,
    pub confidence: f32,
}

/// The three enriched dishes returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopDishes {
    pub healthiest: DishAnalysis,
    pub balanced: DishAnalysis,
    pub indulgent: DishAnalysis,
}

/// Complete menu analysis returned by the orchestrator.
///
/// `degraded` is true when any stage fell back to a deterministic value
/// instead of a model-derived one, so callers can distinguish a genuine
/// analysis from a papered-over failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuAnalysis {
    pub average_menu_score: f32,
    pub menu_category: MenuCategory,
    pub top_dishes: TopDishes,
    pub degraded: bool,
}

/// User health context fed into the selection and benefit agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default)]
    pub recent_patterns: Vec<String>,
}

// ─── Canonicalization input ─────────────────────────────────────────

/// Restaurant metadata extracted during structuring.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RestaurantInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// A dish inside a structured (nested) menu.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredDish {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub dietary_tags: Vec<String>,
}

/// A named category block in a structured menu.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredCategory {
    pub name: String,
    #[serde(default)]
    pub dishes: Vec<StructuredDish>,
}

/// Nested menu structure used for canonicalization and persistence.
///
/// Distinct from the flat [`MenuItem`] list the analysis pipeline uses:
/// this shape preserves category grouping and restaurant metadata so the
/// content hashes have a stable input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredMenu {
    #[serde(default)]
    pub restaurant: RestaurantInfo,
    #[serde(default)]
    pub categories: Vec<StructuredCategory>,
}

impl StructuredMenu {
    pub fn dish_count(&self) -> usize {
        self.categories.iter().map(|c| c.dishes.len()).sum()
    }
}

// ─── Persisted rows ─────────────────────────────────────────────────

/// Deduplicated, content-addressed representation of a restaurant menu.
///
/// Created once per distinct menu content and referenced by many scans.
/// The embedding vector lives only in the database.
#[derive(Debug, Clone)]
pub struct CanonicalMenu {
    pub id: Uuid,
    pub normalized_restaurant_name: Option<String>,
    pub normalized_location: Option<String>,
    pub content_signature_hash: Option<String>,
    pub full_structure_hash: String,
    pub dish_count: i64,
    pub first_scan_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One user upload event. Many-to-one with [`CanonicalMenu`].
#[derive(Debug, Clone)]
pub struct MenuScan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub canonical_menu_id: Option<Uuid>,
    pub image_hash: String,
    pub menu_raw_text: String,
    pub restaurant_name: Option<String>,
    pub location: Option<String>,
    pub ocr_method: String,
    pub scanned_at: DateTime<Utc>,
}

/// One dish row, created only alongside a freshly created canonical menu.
#[derive(Debug, Clone)]
pub struct DishRow {
    pub canonical_menu_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// How a save operation resolved against existing data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaveMethod {
    /// Same user already uploaded this exact image; nothing reprocessed.
    DuplicateImageHash,
    /// An existing canonical menu matched the content signature hash.
    ContentSignatureReuse,
    /// An existing canonical menu matched by embedding cosine similarity.
    VectorSimilarityReuse,
    /// No match by any tier; a new canonical menu was created.
    NewCanonicalMenu,
}

/// Summary of one save-scan operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub scan_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<Uuid>,
    pub method: SaveMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dish_count: Option<i64>,
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_signature_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_structure_hash: Option<String>,
    pub image_hash: String,
}
