//! External publication source
//!
//! The collector depends on [`Source`] only; [`PortalSource`] scrapes the
//! administrative justice portal.

mod portal;

pub use portal::PortalSource;

use crate::domain::Court;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Summary of a ruling as shown in a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Identifier assigned by the listing
    pub listing_id: String,
    /// Ruling type, e.g. "Sentenza" or "Ordinanza"
    pub kind: String,
    pub seat: String,
    pub section: String,
    /// Ruling number within the court
    pub number: String,
    pub detail_url: String,
}

/// One page of a court listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Index of the last available page (0-based)
    pub last_page: u32,
    /// Candidates in the source's native order (newest first)
    pub candidates: Vec<Candidate>,
}

/// Parsed content of a ruling detail page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDetail {
    pub full_text: String,
    pub short_text: String,
    pub published_on: Option<NaiveDate>,
}

/// Trait for publication sources
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch one listing page of a court
    async fn fetch_listing(&self, court: &Court, page: u32) -> Result<ListingPage>;

    /// Fetch and parse the detail page of a candidate
    async fn fetch_detail(&self, candidate: &Candidate) -> Result<DocumentDetail>;
}
