//! Prompt templates and lenient parsing of model answers.
//!
//! Models are asked for JSON but do not reliably produce it bare, so each
//! parser tries the raw text, then a fenced ```json block, then (for
//! highlights) plain bullet lines before giving up with `Malformed`.

use serde::Deserialize;

use crate::model::ModelError;

use super::MustRead;

pub(crate) fn summary_prompt(title: &str) -> String {
    format!(
        "You are reading the chapter \"{title}\" of a book. Using only the \
         excerpts below, write a faithful summary of the chapter in 3 to 5 \
         sentences. Do not invent content that the excerpts do not support. \
         Answer with the summary text only."
    )
}

pub(crate) fn highlights_prompt(title: &str) -> String {
    format!(
        "You are reading the chapter \"{title}\" of a book. From the \
         excerpts below, extract the key points of the chapter as short \
         standalone statements. Answer with a JSON array of strings, for \
         example [\"first point\", \"second point\"]. Output the JSON array \
         and nothing else."
    )
}

pub(crate) fn must_read_prompt(title: &str) -> String {
    format!(
        "You are reading the chapter \"{title}\" of a book. From the \
         excerpts below, pick the passages most worth reading verbatim and \
         explain why each one matters. Answer with a JSON array of objects \
         with keys \"excerpt\" and \"reason\". Output the JSON array and \
         nothing else."
    )
}

/// Parses a highlights answer into its list of points.
pub(crate) fn parse_highlights(raw: &str) -> Result<Vec<String>, ModelError> {
    let trimmed = raw.trim();
    if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
        return Ok(clean_strings(items));
    }
    if let Some(block) = fenced_block(trimmed) {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(block) {
            return Ok(clean_strings(items));
        }
    }
    let bullets = bullet_lines(trimmed);
    if !bullets.is_empty() {
        return Ok(bullets);
    }
    Err(ModelError::Malformed(
        "highlights answer is neither JSON nor a bullet list".into(),
    ))
}

#[derive(Deserialize)]
struct MustReadItem {
    excerpt: String,
    reason: String,
}

/// Parses a must-read answer into excerpt/reason pairs.
pub(crate) fn parse_must_read(raw: &str) -> Result<Vec<MustRead>, ModelError> {
    let trimmed = raw.trim();
    let items = serde_json::from_str::<Vec<MustReadItem>>(trimmed)
        .or_else(|first_err| match fenced_block(trimmed) {
            Some(block) => serde_json::from_str::<Vec<MustReadItem>>(block),
            None => Err(first_err),
        })
        .map_err(|e| ModelError::Malformed(format!("must-read answer: {e}")))?;

    Ok(items
        .into_iter()
        .filter(|i| !i.excerpt.trim().is_empty())
        .map(|i| MustRead {
            excerpt: i.excerpt.trim().to_string(),
            reason: i.reason.trim().to_string(),
        })
        .collect())
}

/// Contents of the first fenced code block, tolerating a language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

fn bullet_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.strip_prefix("• "))?;
            let rest = rest.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect()
}

fn clean_strings(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
