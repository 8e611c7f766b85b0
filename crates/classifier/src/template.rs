//! Notification text template

use tarwatch_common::domain::{Document, KeywordScores};
use tarwatch_common::errors::{AppError, Result};
use tarwatch_common::text::html_escape;

/// Message template with `{court}`, `{section}`, `{kind}`, `{date}` and
/// `{text}` placeholders. Unknown placeholders are kept verbatim.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Render the message of a classified document, with its category tags
    /// appended as hashtags
    pub fn render(&self, document: &Document, tags: &KeywordScores) -> Result<String> {
        let section = extra(document, "section")?.to_uppercase();
        let kind = title_case(extra(document, "kind")?).replace(' ', "");
        let court = document.court_name.to_uppercase();
        let date = document.published_on.format("%d/%m/%Y").to_string();
        let text = html_escape(&document.short_text);

        let mut out = String::with_capacity(self.source.len() + text.len());
        let mut rest = self.source.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start..];

            let Some(end) = after.find('}') else {
                rest = after;
                break;
            };

            let value = match &after[1..end] {
                "court" => Some(court.as_str()),
                "section" => Some(section.as_str()),
                "kind" => Some(kind.as_str()),
                "date" => Some(date.as_str()),
                "text" => Some(text.as_str()),
                _ => None,
            };

            match value {
                Some(value) => out.push_str(value),
                None => out.push_str(&after[..=end]),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);

        if !tags.is_empty() {
            let hashtags: Vec<String> = tags.keys().map(|tag| format!("#{}", tag.replace(' ', ""))).collect();
            out.push_str("\n\n");
            out.push_str(&hashtags.join(" "));
        }

        Ok(out)
    }
}

fn extra<'a>(document: &'a Document, field: &str) -> Result<&'a str> {
    document
        .info
        .extra
        .get(field)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::MissingField {
            field: field.to_string(),
        })
}

/// Uppercase the first letter of every word, lowercase the rest
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;

    for c in text.chars() {
        if c.is_alphabetic() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }

    out
}
