//! Keyword lists driving classification

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Keyword lists used by the classifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSets {
    /// Fuzzy-matched terms that make a document relevant
    pub whitelist: Vec<String>,
    /// Fuzzy-matched terms that exclude a document
    pub blacklist: Vec<String>,
    /// Fuzzy-matched category terms
    #[serde(alias = "isp")]
    pub tags: Vec<String>,
    /// Exact substrings that shortcut to relevant
    pub exact: Vec<String>,
}

impl KeywordSets {
    /// Parse a JSON keyword document
    pub fn from_json(raw: &str) -> Result<Self> {
        let sets: KeywordSets = serde_json::from_str(raw).map_err(|e| AppError::KeywordLoad {
            message: format!("invalid keyword document: {}", e),
        })?;
        Ok(sets.normalized())
    }

    /// Download the keyword document from a URL
    pub async fn fetch(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let response = client.get(url).send().await.map_err(|e| AppError::KeywordLoad {
            message: format!("{}: {}", url, e),
        })?;

        if !response.status().is_success() {
            return Err(AppError::KeywordLoad {
                message: format!("{} returned {}", url, response.status()),
            });
        }

        let body = response.text().await?;
        let sets = Self::from_json(&body)?;

        info!(
            whitelist = sets.whitelist.len(),
            blacklist = sets.blacklist.len(),
            tags = sets.tags.len(),
            exact = sets.exact.len(),
            "Keyword sets loaded"
        );

        Ok(sets)
    }

    /// Trim every term and drop empties. Case is kept for display
    pub fn normalized(self) -> Self {
        fn clean(list: Vec<String>) -> Vec<String> {
            list.into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        }

        Self {
            whitelist: clean(self.whitelist),
            blacklist: clean(self.blacklist),
            tags: clean(self.tags),
            exact: clean(self.exact),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty() && self.blacklist.is_empty() && self.tags.is_empty() && self.exact.is_empty()
    }
}
