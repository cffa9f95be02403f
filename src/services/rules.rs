//! Keyword rule book applied to uploads and comments before they are stored.

use regex::Regex;
use tracing::warn;

/// Terms rejected when no list is configured.
pub const DEFAULT_PROHIBITED_TERMS: [&str; 8] = [
    "bomb",
    "explosives",
    "terrorism",
    "hacking",
    "nudity",
    "gore",
    "scam",
    "drugs",
];

/// Case-insensitive, whole-word matcher over a fixed list of terms.
#[derive(Clone, Debug)]
pub struct RuleBook {
    terms: Vec<(String, Regex)>,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::new(DEFAULT_PROHIBITED_TERMS.iter().map(|t| t.to_string()))
    }
}

impl RuleBook {
    /// Compile one word-boundary pattern per term. Multi-word terms match as
    /// a phrase.
    pub fn new(terms: impl IntoIterator<Item = String>) -> Self {
        let terms = terms
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .filter_map(|term| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(&term));
                match Regex::new(&pattern) {
                    Ok(regex) => Some((term, regex)),
                    Err(e) => {
                        warn!(%term, error = %e, "skipping prohibited term that does not compile");
                        None
                    }
                }
            })
            .collect();
        Self { terms }
    }

    /// Return the first prohibited term found in any of `texts`.
    pub fn first_violation<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> Option<&str> {
        texts.into_iter().find_map(|text| {
            self.terms
                .iter()
                .find(|(_, regex)| regex.is_match(text))
                .map(|(term, _)| term.as_str())
        })
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }
}
