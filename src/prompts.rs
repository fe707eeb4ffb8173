//! Prompt builders for the analysis agents.
//!
//! One function per agent. Every prompt ends with an explicit JSON schema
//! and a "respond with only JSON" instruction so [`crate::llm::parse_llm_json`]
//! has a fighting chance. Inputs are serialized with `serde_json` rather than
//! interpolated raw, so dish names with quotes or braces can't corrupt the
//! prompt structure.

use crate::models::{MacroProfile, MenuItem, ScoredMenuItem, TopPicks, UserProfile};

/// System message shared by the dish-level agents.
pub const NUTRITIONIST_SYSTEM: &str = "You are a registered nutritionist analyzing restaurant menus. You are precise, you never invent dishes that are not on the menu, and you always respond with valid JSON matching the requested schema.";

/// Agent 1: extract a flat dish list from raw OCR text.
pub fn structurer_prompt(raw_text: &str) -> String {
    format!(
        "Extract every distinct dish from this menu text. The text comes from OCR \
         and may contain noise, broken lines, and page furniture.\n\n\
         Menu text:\n\"\"\"\n{raw_text}\n\"\"\"\n\n\
         Rules:\n\
         - One entry per dish. Do not merge dishes or split one dish into two.\n\
         - Keep the dish title exactly as printed, minus obvious OCR garbage.\n\
         - Include the description and price when present, null when absent.\n\
         - section is the menu heading the dish appears under, null if none.\n\
         - Skip headings, addresses, phone numbers, and opening hours.\n\n\
         Respond with only JSON:\n\
         {{\"items\": [{{\"title\": string, \"description\": string|null, \
         \"price\": string|null, \"section\": string|null}}]}}"
    )
}

/// Agent 2: score every dish 0-100 for healthiness.
pub fn scorer_prompt(items: &[MenuItem], profile: &UserProfile) -> String {
    let items_json = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
    let profile_json = serde_json::to_string(profile).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Score each dish below from 0 (least healthy) to 100 (most healthy) for \
         this user.\n\n\
         User profile:\n{profile_json}\n\n\
         Dishes:\n{items_json}\n\n\
         Rules:\n\
         - Score every dish. Return them in the same order they were given.\n\
         - confidence is 0.0-1.0 and reflects how much the title and description \
           actually tell you about the dish.\n\
         - Deep-fried, heavily sweetened, and cream-based dishes score low. \
           Grilled, steamed, and vegetable-forward dishes score high.\n\n\
         Respond with only JSON:\n\
         {{\"scores\": [{{\"title\": string, \"score\": number, \
         \"confidence\": number}}]}}"
    )
}

/// Agent 3: pick the healthiest, most balanced, and most indulgent dish.
pub fn selector_prompt(scored: &[ScoredMenuItem]) -> String {
    let scored_json = serde_json::to_string(scored).unwrap_or_else(|_| "[]".to_string());
    format!(
        "From these scored dishes, pick exactly one healthiest, one balanced, \
         and one indulgent dish.\n\n\
         Scored dishes:\n{scored_json}\n\n\
         Rules:\n\
         - Each pick must be the exact title of a dish in the list.\n\
         - healthiest is the strongest nutritional choice, indulgent is the \
           treat, balanced sits between them.\n\
         - The three picks must be three different dishes when the menu has at \
           least three dishes.\n\
         - rationale gives one short sentence per pick.\n\n\
         Respond with only JSON:\n\
         {{\"healthiest\": string, \"balanced\": string, \"indulgent\": string, \
         \"rationale\": {{\"healthiest\": string, \"balanced\": string, \
         \"indulgent\": string}}}}"
    )
}

/// Agent 4: estimate the macro profile of a single dish.
pub fn macro_profiler_prompt(item: &MenuItem) -> String {
    let item_json = serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Estimate the nutritional profile of this dish as typically prepared in \
         a restaurant.\n\n\
         Dish:\n{item_json}\n\n\
         Rules:\n\
         - calories is a whole-number estimate for one serving.\n\
         - protein, carbs, fat, and sugar are each \"High\", \"Mid\", or \"Low\" \
           relative to a typical restaurant dish.\n\
         - confidence is 0.0-1.0.\n\n\
         Respond with only JSON:\n\
         {{\"calories\": number, \"protein\": \"High\"|\"Mid\"|\"Low\", \
         \"carbs\": \"High\"|\"Mid\"|\"Low\", \"fat\": \"High\"|\"Mid\"|\"Low\", \
         \"sugar\": \"High\"|\"Mid\"|\"Low\", \"confidence\": number}}"
    )
}

/// Agent 5: summarize the health impact of a dish for the user.
pub fn benefits_prompt(item: &MenuItem, macros: &MacroProfile, profile: &UserProfile) -> String {
    let item_json = serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string());
    let macros_json = serde_json::to_string(macros).unwrap_or_else(|_| "{}".to_string());
    let profile_json = serde_json::to_string(profile).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Write a short health summary of this dish for this user.\n\n\
         Dish:\n{item_json}\n\n\
         Estimated macros:\n{macros_json}\n\n\
         User profile:\n{profile_json}\n\n\
         Rules:\n\
         - summary is one or two plain sentences about the dish overall.\n\
         - short_term describes how the user is likely to feel in the hours \
           after eating it.\n\
         - long_term describes the effect of eating it regularly.\n\
         - No medical claims and no scolding.\n\n\
         Respond with only JSON:\n\
         {{\"summary\": string, \"short_term\": string, \"long_term\": string}}"
    )
}

/// Agent 6: synthesize a final 0-100 score and category for one dish.
pub fn synthesizer_prompt(
    item: &MenuItem,
    prior_score: f32,
    macros: &MacroProfile,
    summary: &str,
) -> String {
    let item_json = serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string());
    let macros_json = serde_json::to_string(macros).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Produce a final health score for this dish, reconciling the initial \
         score with the macro estimate and the written summary.\n\n\
         Dish:\n{item_json}\n\n\
         Initial score: {prior_score}\n\n\
         Macros:\n{macros_json}\n\n\
         Summary:\n{summary}\n\n\
         Rules:\n\
         - score is 0-100.\n\
         - category is \"Healthiest\" when score is 76 or above, \"Balanced\" \
           for 41-75, \"Indulgent\" for 40 or below.\n\
         - confidence is 0.0-1.0.\n\n\
         Respond with only JSON:\n\
         {{\"score\": number, \"category\": \"Healthiest\"|\"Balanced\"|\"Indulgent\", \
         \"confidence\": number}}"
    )
}

/// Structuring prompt for the canonicalization path: nested restaurant,
/// categories, and dishes with normalized prices and dietary tags.
pub fn structured_menu_prompt(raw_text: &str) -> String {
    format!(
        "Convert this OCR menu text into structured data.\n\n\
         Menu text:\n\"\"\"\n{raw_text}\n\"\"\"\n\n\
         Rules:\n\
         - restaurant.name and restaurant.location come from the text itself, \
           null if not present. location is the street address or city line.\n\
         - Group dishes under the category headings printed on the menu. Use a \
           single category named \"Menu\" if there are no headings.\n\
         - price is a plain number without currency symbols, null if absent.\n\
         - dietary_tags holds markers printed on the menu such as \"vegan\", \
           \"gf\", \"spicy\". Empty array when none.\n\
         - Do not invent dishes, prices, or tags.\n\n\
         Respond with only JSON:\n\
         {{\"restaurant\": {{\"name\": string|null, \"location\": string|null}}, \
         \"categories\": [{{\"name\": string, \"dishes\": [{{\"name\": string, \
         \"description\": string|null, \"price\": number|null, \
         \"dietary_tags\": [string]}}]}}]}}"
    )
}

/// Prompt sent by the rule-based ranker for dishes inside the ambiguous band.
pub fn ranker_refinement_prompt(item: &MenuItem, rule_score: f32) -> String {
    let item_json = serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string());
    format!(
        "A rule-based pass scored this dish {rule_score:.0} out of 100 for \
         healthiness, which is too close to call. Refine the score.\n\n\
         Dish:\n{item_json}\n\n\
         Rules:\n\
         - score is 0-100. Stay within 25 points of the rule-based score \
           unless the dish text clearly contradicts it.\n\
         - confidence is 0.0-1.0.\n\n\
         Respond with only JSON:\n\
         {{\"score\": number, \"confidence\": number}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MenuItem, UserProfile};

    #[test]
    fn prompts_embed_inputs_as_json() {
        let item = MenuItem {
            title: "Grilled \"Special\" Salmon".to_string(),
            description: Some("with {herb} butter".to_string()),
            price: None,
            section: None,
        };
        let prompt = macro_profiler_prompt(&item);
        // Quotes in the title must arrive escaped, not raw.
        assert!(prompt.contains(r#"Grilled \"Special\" Salmon"#));
        assert!(prompt.contains("Respond with only JSON"));
    }

    #[test]
    fn scorer_prompt_includes_profile_and_items() {
        let items = vec![MenuItem::titled("Caesar Salad")];
        let profile = UserProfile {
            goals: vec!["lose weight".to_string()],
            restrictions: vec![],
            recent_patterns: vec![],
        };
        let prompt = scorer_prompt(&items, &profile);
        assert!(prompt.contains("Caesar Salad"));
        assert!(prompt.contains("lose weight"));
    }
}
