//! Clinical-trial identifier formatting
//!
//! Scans free text for ClinicalTrials.gov identifiers (`NCT` followed by
//! exactly eight digits) and splits it into plain spans and link spans.
//! Concatenating the original text of every token reproduces the input.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Registry that trial identifiers link to by default
pub const DEFAULT_TRIAL_BASE_URL: &str = "https://clinicaltrials.gov/study";

fn trial_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // [0-9] rather than \d: the regex crate's \d matches any Unicode digit
    PATTERN.get_or_init(|| Regex::new(r"NCT[0-9]{8}").expect("trial identifier pattern is valid"))
}

/// Returns true if `candidate` is exactly one trial identifier
pub fn is_trial_identifier(candidate: &str) -> bool {
    candidate.len() == 11
        && candidate.starts_with("NCT")
        && candidate[3..].bytes().all(|b| b.is_ascii_digit())
}

/// A span of formatted text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnotatedToken {
    /// Text rendered as-is
    Text(String),
    /// A verified trial identifier and the registry page it points to
    TrialLink { identifier: String, href: String },
}

impl AnnotatedToken {
    /// The slice of the input this token was produced from
    pub fn original_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::TrialLink { identifier, .. } => identifier,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::TrialLink { .. })
    }
}

/// Detects trial identifiers and builds their links
#[derive(Debug, Clone)]
pub struct TrialFormatter {
    base_url: String,
}

impl TrialFormatter {
    /// Create a formatter linking to `base_url/<identifier>`
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Link for a single identifier
    pub fn link_for(&self, identifier: &str) -> String {
        format!("{}/{}", self.base_url, identifier)
    }

    /// Split `text` into plain and trial-link tokens
    pub fn format(&self, text: &str) -> Vec<AnnotatedToken> {
        let mut tokens = Vec::new();
        let mut plain_start = 0;
        let mut search_from = 0;

        while let Some(found) = trial_pattern().find_at(text, search_from) {
            if !is_delimited(text, found.start(), found.end()) {
                // "N" is ASCII, so the next byte is a char boundary
                search_from = found.start() + 1;
                continue;
            }

            if found.start() > plain_start {
                tokens.push(AnnotatedToken::Text(
                    text[plain_start..found.start()].to_string(),
                ));
            }

            let identifier = found.as_str();
            tokens.push(AnnotatedToken::TrialLink {
                identifier: identifier.to_string(),
                href: self.link_for(identifier),
            });

            plain_start = found.end();
            search_from = found.end();
        }

        if plain_start < text.len() {
            tokens.push(AnnotatedToken::Text(text[plain_start..].to_string()));
        }

        tokens
    }

    /// Render tokens as markdown, with trial identifiers as links
    pub fn to_markdown(tokens: &[AnnotatedToken]) -> String {
        tokens
            .iter()
            .map(|token| match token {
                AnnotatedToken::Text(text) => text.clone(),
                AnnotatedToken::TrialLink { identifier, href } => format!("[{identifier}]({href})"),
            })
            .collect()
    }
}

impl Default for TrialFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_TRIAL_BASE_URL)
    }
}

/// An identifier glued to letters or digits (e.g. `NCT017784910`) is not one
fn is_delimited(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();

    !before.is_some_and(|c| c.is_ascii_alphanumeric())
        && !after.is_some_and(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> AnnotatedToken {
        AnnotatedToken::Text(s.to_string())
    }

    fn link(id: &str) -> AnnotatedToken {
        AnnotatedToken::TrialLink {
            identifier: id.to_string(),
            href: format!("{DEFAULT_TRIAL_BASE_URL}/{id}"),
        }
    }

    #[test]
    fn test_single_identifier() {
        let tokens = TrialFormatter::default().format("See trial NCT01778491 for details.");
        assert_eq!(
            tokens,
            vec![
                text("See trial "),
                link("NCT01778491"),
                text(" for details.")
            ]
        );
    }

    #[test]
    fn test_empty_and_plain_input() {
        let formatter = TrialFormatter::default();
        assert!(formatter.format("").is_empty());
        assert_eq!(formatter.format("no trials here"), vec![text("no trials here")]);
    }

    #[test]
    fn test_adjacent_identifiers() {
        let tokens = TrialFormatter::default().format("NCT01778491,NCT00000001");
        assert_eq!(
            tokens,
            vec![link("NCT01778491"), text(","), link("NCT00000001")]
        );
    }

    #[test]
    fn test_rejects_wrong_shapes() {
        let formatter = TrialFormatter::default();
        for input in [
            "NCT0177849",    // seven digits
            "NCT017784910",  // nine digits
            "nct01778491",   // lowercase prefix
            "XNCT01778491",  // glued prefix
            "NCT01778491a",  // glued suffix
            "NCT０１７７８４９１", // full-width digits
        ] {
            let tokens = formatter.format(input);
            assert_eq!(tokens, vec![text(input)], "input {input:?}");
        }
    }

    #[test]
    fn test_identifier_in_parentheses_and_unicode() {
        let tokens = TrialFormatter::default().format("Étude (NCT01778491) — voir");
        assert_eq!(
            tokens,
            vec![text("Étude ("), link("NCT01778491"), text(") — voir")]
        );
    }

    #[test]
    fn test_custom_base_url_trailing_slash() {
        let formatter = TrialFormatter::new("https://example.org/trials/");
        assert_eq!(
            formatter.link_for("NCT01778491"),
            "https://example.org/trials/NCT01778491"
        );
    }

    #[test]
    fn test_to_markdown() {
        let formatter = TrialFormatter::default();
        let tokens = formatter.format("Enrolled in NCT01778491.");
        assert_eq!(
            TrialFormatter::to_markdown(&tokens),
            "Enrolled in [NCT01778491](https://clinicaltrials.gov/study/NCT01778491)."
        );
    }

    #[test]
    fn test_is_trial_identifier() {
        assert!(is_trial_identifier("NCT01778491"));
        assert!(!is_trial_identifier("NCT0177849"));
        assert!(!is_trial_identifier("NCTABCDEFGH"));
    }

    proptest! {
        #[test]
        fn prop_tokens_reconstruct_input(
            input in "(NCT[0-9]{6,10}|[a-zA-Z0-9 ,.()é]{0,6}){0,8}"
        ) {
            let tokens = TrialFormatter::default().format(&input);

            let mut offset = 0;
            for token in &tokens {
                let original = token.original_text();
                prop_assert!(!original.is_empty());
                prop_assert_eq!(&input[offset..offset + original.len()], original);

                if let AnnotatedToken::TrialLink { identifier, href } = token {
                    prop_assert!(is_trial_identifier(identifier));
                    prop_assert!(href.ends_with(identifier.as_str()));
                }
                offset += original.len();
            }
            prop_assert_eq!(offset, input.len());
        }

        #[test]
        fn prop_arbitrary_text_never_panics(input in any::<String>()) {
            let tokens = TrialFormatter::default().format(&input);
            let rebuilt: String = tokens.iter().map(AnnotatedToken::original_text).collect();
            prop_assert_eq!(rebuilt, input);
        }
    }
}
