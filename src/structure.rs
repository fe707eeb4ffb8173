//! Nested menu structuring for the canonicalization path.
//!
//! The analysis pipeline only needs a flat dish list; deduplication needs
//! the full [`StructuredMenu`] shape (restaurant metadata, categories,
//! normalized prices, dietary tags) because the content signature and the
//! structure hash are computed from it. This module produces that shape
//! from raw OCR text, with a line heuristic standing in when the model
//! call fails and an address heuristic filling in a missing location.

use crate::agents::AgentOutput;
use crate::config::StructuringConfig;
use crate::llm::{parse_llm_json, ChatProvider, ChatRequest};
use crate::models::{RestaurantInfo, StructuredCategory, StructuredDish, StructuredMenu};
use crate::prompts::structured_menu_prompt;

const STREET_KEYWORDS: &[&str] = &[
    "street", "st", "road", "rd", "avenue", "ave", "boulevard", "blvd", "lane", "ln", "drive",
    "dr", "way", "plaza", "square", "court",
];

/// Structure raw OCR text into the canonical nested shape.
///
/// Always returns a menu. A failed model call degrades to a line heuristic,
/// and a missing restaurant location is recovered from address-looking
/// lines in the raw text either way.
pub async fn structure_menu(
    provider: &dyn ChatProvider,
    cfg: &StructuringConfig,
    raw_text: &str,
) -> AgentOutput<StructuredMenu> {
    let request = ChatRequest {
        max_tokens: 4096,
        ..ChatRequest::new(&cfg.model, structured_menu_prompt(raw_text)).expect_json()
    };

    let result = provider.complete(&request).await;
    let mut output = match result.and_then(|r| parse_llm_json::<StructuredMenu>(&r.content)) {
        Ok(menu) if menu.dish_count() > 0 => AgentOutput::Parsed(menu),
        Ok(_) => AgentOutput::Fallback {
            value: heuristic_menu(raw_text),
            reason: "Model returned a menu with no dishes".to_string(),
        },
        Err(err) => {
            let reason = format!("{:#}", err);
            tracing::warn!(error = %reason, "Menu structuring failed, using line heuristic");
            AgentOutput::Fallback {
                value: heuristic_menu(raw_text),
                reason,
            }
        }
    };

    let menu = match &mut output {
        AgentOutput::Parsed(m) | AgentOutput::Fallback { value: m, .. } => m,
    };
    if menu.restaurant.location.is_none() {
        menu.restaurant.location = find_address_line(raw_text);
    }
    if menu.restaurant.name.is_none() {
        menu.restaurant.name = find_name_line(raw_text);
    }
    output
}

/// Single-category menu built from plausible dish lines.
fn heuristic_menu(raw_text: &str) -> StructuredMenu {
    let dishes = crate::agents::structurer::heuristic_items(raw_text)
        .into_iter()
        .map(|item| StructuredDish {
            name: item.title,
            description: item.description,
            price: item.price.as_deref().and_then(parse_price),
            dietary_tags: Vec::new(),
        })
        .collect();
    StructuredMenu {
        restaurant: RestaurantInfo {
            name: None,
            location: None,
        },
        categories: vec![StructuredCategory {
            name: "Menu".to_string(),
            dishes,
        }],
    }
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.trim_start_matches(['$', '£', '€']).parse().ok()
}

/// Score every line of the OCR text for address-ness and return the best
/// match. First pass wants strong evidence (score 3 or more); if nothing
/// qualifies, a weaker second pass accepts any line with some evidence.
pub fn find_address_line(raw_text: &str) -> Option<String> {
    let scored: Vec<(i32, &str)> = raw_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.len() <= 100)
        .map(|l| (address_score(l), l))
        .collect();

    // Earlier lines win ties, so iterate in order and keep strict maxima.
    for threshold in [3, 1] {
        let mut best: Option<(i32, &str)> = None;
        for &(score, line) in &scored {
            if score >= threshold && best.map_or(true, |(b, _)| score > b) {
                best = Some((score, line));
            }
        }
        if let Some((_, line)) = best {
            return Some(line.to_string());
        }
    }
    None
}

fn address_score(line: &str) -> i32 {
    let lower = line.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .filter(|w| !w.is_empty())
        .collect();

    let mut score = 0;

    if words
        .iter()
        .any(|w| STREET_KEYWORDS.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())))
    {
        score += 1;
    }
    // A house number: a token that is all digits, 1-5 of them.
    if words
        .iter()
        .any(|w| !w.is_empty() && w.len() <= 5 && w.chars().all(|c| c.is_ascii_digit()))
    {
        score += 1;
    }
    // A postal-code-looking token: 4+ characters, mostly digits.
    if words.iter().any(|w| {
        w.len() >= 4 && w.chars().filter(|c| c.is_ascii_digit()).count() * 2 >= w.len()
    }) {
        score += 1;
    }
    // "City, ST" style comma separation.
    if line.contains(',') && line.chars().any(|c| c.is_alphabetic()) {
        score += 1;
    }

    score
}

/// First short line with letters that does not look like an address.
fn find_name_line(raw_text: &str) -> Option<String> {
    raw_text
        .lines()
        .map(str::trim)
        .find(|l| {
            !l.is_empty()
                && l.len() <= 60
                && l.chars().any(|c| c.is_alphabetic())
                && address_score(l) < 2
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MENU_TEXT: &str = "The Golden Fork\n742 Evergreen Terrace Ave, Springfield, 49007\n\nStarters\nMiso Soup 4.50\nEdamame 5.00\n";

    #[test]
    fn address_line_is_found() {
        let line = find_address_line(MENU_TEXT).unwrap();
        assert!(line.contains("Evergreen"));
    }

    #[test]
    fn weak_evidence_still_finds_a_line_on_second_pass() {
        let text = "Cafe Luna\nMain Street\nCoffee 3.00";
        assert_eq!(find_address_line(text).as_deref(), Some("Main Street"));
    }

    #[test]
    fn no_address_yields_none() {
        assert_eq!(find_address_line("Soup\nSalad\nBread"), None);
    }

    #[test]
    fn name_line_skips_the_address() {
        assert_eq!(find_name_line(MENU_TEXT).as_deref(), Some("The Golden Fork"));
    }

    #[test]
    fn heuristic_menu_parses_prices() {
        let menu = heuristic_menu(MENU_TEXT);
        assert_eq!(menu.categories.len(), 1);
        let dishes = &menu.categories[0].dishes;
        let miso = dishes.iter().find(|d| d.name == "Miso Soup").unwrap();
        assert_eq!(miso.price, Some(4.5));
    }
}
