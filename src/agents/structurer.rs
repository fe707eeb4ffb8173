//! Agent 1: turn raw OCR text into a flat list of menu items.

use serde::Deserialize;

use super::{call_json, fall_back, AgentOutput};
use crate::config::LlmConfig;
use crate::llm::ChatProvider;
use crate::models::MenuItem;
use crate::prompts::structurer_prompt;

#[derive(Deserialize)]
struct Wire {
    items: Vec<MenuItem>,
}

/// Extract dishes from OCR text, falling back to a line heuristic.
pub async fn run(
    provider: &dyn ChatProvider,
    llm: &LlmConfig,
    raw_text: &str,
) -> AgentOutput<Vec<MenuItem>> {
    match call_json::<Wire>(provider, llm, "structurer", structurer_prompt(raw_text)).await {
        Ok(wire) if !wire.items.is_empty() => AgentOutput::Parsed(wire.items),
        Ok(_) => fall_back(
            "structurer",
            anyhow::anyhow!("Model returned an empty item list"),
            heuristic_items(raw_text),
        ),
        Err(err) => fall_back("structurer", err, heuristic_items(raw_text)),
    }
}

/// Line-based extraction used when the model is unavailable. Keeps lines
/// that plausibly name a dish and strips a trailing price if one is glued
/// to the name.
pub(crate) fn heuristic_items(raw_text: &str) -> Vec<MenuItem> {
    raw_text
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.len() < 3 || line.len() > 80 {
                return None;
            }
            if !line.chars().any(|c| c.is_alphabetic()) {
                return None;
            }
            // Headings and page furniture tend to be short and shouty.
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() > 10 {
                return None;
            }
            let (title, price) = split_trailing_price(line);
            if title.is_empty() {
                return None;
            }
            Some(MenuItem {
                title: title.to_string(),
                description: None,
                price: price.map(str::to_string),
                section: None,
            })
        })
        .collect()
}

/// Split "Pad Thai 12.50" into ("Pad Thai", Some("12.50")).
fn split_trailing_price(line: &str) -> (&str, Option<&str>) {
    if let Some((head, tail)) = line.rsplit_once(char::is_whitespace) {
        let candidate = tail.trim_start_matches(['$', '£', '€']);
        if !candidate.is_empty()
            && candidate.chars().all(|c| c.is_ascii_digit() || c == '.')
            && candidate.chars().any(|c| c.is_ascii_digit())
        {
            return (head.trim_end_matches(['.', '…', '-', ' ']), Some(tail));
        }
    }
    (line, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_keeps_dish_lines_and_strips_prices() {
        let text = "THE GOLDEN FORK\n\nPad Thai ... $12.50\nGrilled Salmon 18\n123-456-7890\n\nOpen 9am until late every single day of the week, including holidays";
        let items = heuristic_items(text);
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert!(titles.contains(&"Pad Thai"));
        assert!(titles.contains(&"Grilled Salmon"));
        // Phone number has no letters, long hours line has too many words.
        assert!(!titles.iter().any(|t| t.contains("123")));
        assert!(!titles.iter().any(|t| t.contains("Open 9am")));

        let pad_thai = items.iter().find(|i| i.title == "Pad Thai").unwrap();
        assert_eq!(pad_thai.price.as_deref(), Some("$12.50"));
    }

    #[test]
    fn split_price_leaves_plain_titles_alone() {
        assert_eq!(split_trailing_price("Miso Soup"), ("Miso Soup", None));
        assert_eq!(
            split_trailing_price("Miso Soup 4.50"),
            ("Miso Soup", Some("4.50"))
        );
    }
}
