//! Token-set similarity
//!
//! Both strings are lowercased, every non-alphanumeric character becomes a
//! space, and the resulting token sets are compared: shared tokens first,
//! then each side's leftovers. A keyword whose tokens all occur in the text
//! scores 100 no matter how long the text is.

use rapidfuzz::fuzz;
use std::collections::BTreeSet;

/// Pre-tokenized haystack, reused across every keyword of a document
pub struct Tokens {
    set: BTreeSet<String>,
}

impl Tokens {
    pub fn new(text: &str) -> Self {
        let cleaned: String = text
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .to_lowercase();

        Self {
            set: cleaned.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Similarity (0-100) between two token sets
pub fn token_set_ratio_with(a: &Tokens, b: &Tokens) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    // BTreeSet iteration is already sorted
    let join = |tokens: Vec<&String>| {
        tokens
            .into_iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    };

    let sect = join(a.set.intersection(&b.set).collect());
    let diff_ab = join(a.set.difference(&b.set).collect());
    let diff_ba = join(b.set.difference(&a.set).collect());

    let combined_ab = format!("{} {}", sect, diff_ab).trim().to_string();
    let combined_ba = format!("{} {}", sect, diff_ba).trim().to_string();

    [
        ratio(&sect, &combined_ab),
        ratio(&sect, &combined_ba),
        ratio(&combined_ab, &combined_ba),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

/// Indel similarity of two strings, rounded to 0-100
fn ratio(a: &str, b: &str) -> u8 {
    if a == b {
        return 100;
    }
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    fuzz::ratio(a.chars(), b.chars()).round_ties_even() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_set_ratio(a: &str, b: &str) -> u8 {
        token_set_ratio_with(&Tokens::new(a), &Tokens::new(b))
    }

    #[test]
    fn test_contained_tokens_score_full() {
        let text = "Il ricorso riguarda un appalto pubblico di servizi";
        assert_eq!(token_set_ratio(text, "appalto pubblico"), 100);
        assert_eq!(token_set_ratio(text, "Pubblico, appalto!"), 100);
    }

    #[test]
    fn test_unrelated_scores_low() {
        assert!(token_set_ratio("sentenza sul permesso di costruire", "gara d'appalto") < 50);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(token_set_ratio("", "appalto"), 0);
        assert_eq!(token_set_ratio("appalto", "   "), 0);
        assert_eq!(token_set_ratio("...", "appalto"), 0);
    }

    #[test]
    fn test_ratio_values() {
        assert_eq!(ratio("abc", "abc"), 100);
        assert_eq!(ratio("", ""), 100);
        assert_eq!(ratio("abcd", "abxd"), 75);
        assert_eq!(ratio("", "a"), 0);
    }

    #[test]
    fn test_near_miss_keyword() {
        // no shared token: "appalti bando" vs "appalto", 7 common chars over 20
        assert_eq!(token_set_ratio("bando appalti", "appalto"), 70);
        assert_eq!(token_set_ratio("appalti", "appalto"), 86);
    }

    #[test]
    fn test_symmetric() {
        let a = "tutela ambientale e paesaggistica";
        let b = "paesaggistica vincolo";
        assert_eq!(token_set_ratio(a, b), token_set_ratio(b, a));
    }

    #[test]
    fn test_unicode_preserved() {
        assert_eq!(token_set_ratio("attività edilizia", "attività"), 100);
    }
}
