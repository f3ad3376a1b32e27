//! Question list parsing
//!
//! Accepts a JSON array whose entries are either plain strings or flashcard
//! objects carrying a `question` field:
//! ```json
//! ["What is osmosis?", {"question": "Name the Krebs cycle products", "answer": "..."}]
//! ```

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum QuestionEntry {
    Text(String),
    Card { question: String },
}

/// Parse a JSON question list, preserving order
///
/// # Errors
/// Returns an error if the document is not an array of strings or question objects
pub fn parse_questions(json: &str) -> Result<Vec<String>> {
    let entries: Vec<QuestionEntry> =
        serde_json::from_str(json).context(
            "Expected a JSON array of strings or {\"question\": ...} objects",
        )?;

    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            QuestionEntry::Text(text) | QuestionEntry::Card { question: text } => text,
        })
        .collect())
}

/// Read and parse a question file
///
/// # Errors
/// Returns an error if the file cannot be read or parsed
pub fn load_questions(path: &Path) -> Result<Vec<String>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file {}", path.display()))?;
    parse_questions(&json).with_context(|| format!("Invalid questions file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_entries() {
        let json = r#"["What is osmosis?",
            {"question": "Name the Krebs cycle products", "answer": "CO2, NADH"}]"#;
        let questions = parse_questions(json).unwrap();
        assert_eq!(
            questions,
            vec![
                "What is osmosis?".to_string(),
                "Name the Krebs cycle products".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(parse_questions(r#"{"question": "lonely"}"#).is_err());
        assert!(parse_questions(r#"[{"answer": "no question"}]"#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_questions(Path::new("/nonexistent/questions.json"));
        assert!(result.is_err());
    }
}
