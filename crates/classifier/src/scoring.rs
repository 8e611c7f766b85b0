//! Keyword scoring and relevance precedence

use crate::fuzzy::{token_set_ratio_with, Tokens};
use tarwatch_common::domain::{KeywordScores, Relevance};
use tarwatch_common::KeywordSets;
use tracing::info;

/// Minimum score for a whitelist keyword to count
pub const WHITELIST_CUTOFF: u8 = 81;

/// Minimum score for a category tag to count
pub const TAG_CUTOFF: u8 = 90;

/// Minimum score for a blacklist keyword to exclude a document
pub const BLACKLIST_CUTOFF: u8 = 95;

/// Best matches kept per keyword list
pub const MAX_MATCHES: usize = 5;

/// Outcome of scoring one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub relevance: Relevance,
    /// An exact keyword was found in the text
    pub shortcut: bool,
    pub matches: KeywordScores,
    pub blacklist: KeywordScores,
    pub tags: KeywordScores,
}

impl Evaluation {
    fn not_relevant() -> Self {
        Self {
            relevance: Relevance::NotRelevant,
            shortcut: false,
            matches: KeywordScores::new(),
            blacklist: KeywordScores::new(),
            tags: KeywordScores::new(),
        }
    }
}

/// Score `text` against every keyword list and decide relevance.
///
/// Exact hits win over everything, then blacklist matches exclude, then any
/// whitelist or tag match makes the document relevant.
pub fn evaluate(text: &str, keywords: &KeywordSets) -> Evaluation {
    let lowered = text.to_lowercase();
    if lowered.trim().is_empty() {
        return Evaluation::not_relevant();
    }

    let tokens = Tokens::new(&lowered);
    let matches = score(&tokens, &keywords.whitelist, WHITELIST_CUTOFF);
    let blacklist = score(&tokens, &keywords.blacklist, BLACKLIST_CUTOFF);
    let tags = score(&tokens, &keywords.tags, TAG_CUTOFF);

    let shortcut = keywords
        .exact
        .iter()
        .any(|keyword| !keyword.is_empty() && lowered.contains(&keyword.to_lowercase()));

    let relevance = if shortcut {
        Relevance::Relevant
    } else if !blacklist.is_empty() {
        if !matches.is_empty() || !tags.is_empty() {
            info!(
                blacklist = ?blacklist.keys().collect::<Vec<_>>(),
                "Blacklisted despite keyword matches"
            );
        }
        Relevance::NotRelevant
    } else if !matches.is_empty() || !tags.is_empty() {
        Relevance::Relevant
    } else {
        Relevance::NotRelevant
    };

    Evaluation {
        relevance,
        shortcut,
        matches,
        blacklist,
        tags,
    }
}

/// Keywords scoring at least `cutoff`, best first, at most `MAX_MATCHES`.
/// Keys keep the keyword as written; ties keep list order.
fn score(tokens: &Tokens, keywords: &[String], cutoff: u8) -> KeywordScores {
    let mut hits: Vec<(&String, u8)> = keywords
        .iter()
        .map(|keyword| (keyword, token_set_ratio_with(tokens, &Tokens::new(keyword))))
        .filter(|(_, score)| *score >= cutoff)
        .collect();

    hits.sort_by(|a, b| b.1.cmp(&a.1));
    hits.into_iter()
        .take(MAX_MATCHES)
        .map(|(keyword, score)| (keyword.clone(), score))
        .collect()
}
