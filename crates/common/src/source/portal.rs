//! Scraper for the administrative justice portal listing

use super::{Candidate, DocumentDetail, ListingPage, Source};
use crate::config::CollectorConfig;
use crate::domain::Court;
use crate::errors::{AppError, Result};
use crate::text::{decode_entities, normalize};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::NaiveDate;
use regex_lite::Regex;
use reqwest::Url;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Prefix of every form field of the portal search portlet
const FORM_PREFIX: &str = "_GaSearch_INSTANCE_2NDgCF3zWBwk_";

/// Short text length in characters
const SHORT_TEXT_LEN: usize = 1000;

/// Give up retrying a single request after this long
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(30);

static RE_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<form[^>]*provvedimentiForm[^>]*>"#).expect("valid regex"));
static RE_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"action="([^"]*)""#).expect("valid regex"));
static RE_PAGINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<li[^>]*class="[^"]*pagination-number[^"]*"[^>]*>(.*?)</li>"#).expect("valid regex")
});
static RE_ARTICLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<article[^>]*class="[^"]*ricerca--item[^"]*"[^>]*>(.*?)</article>"#).expect("valid regex")
});
static RE_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div[^>]*class="[^"]*col-sm-12[^"]*"[^>]*>"#).expect("valid regex"));
static RE_BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<b>(.*?)</b>").expect("valid regex"));
static RE_HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]+)""#).expect("valid regex"));
static RE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"));
static RE_ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static RE_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<p(\s[^>]*)?>(.*?)</p>").expect("valid regex"));
static RE_PUBLISHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Pubblicato il (\d{2}/\d{2}/\d{4})").expect("valid regex"));
static RE_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{2}/\d{2}/\d{4})").expect("valid regex"));

/// HTTP scraper for the portal search form
pub struct PortalSource {
    client: reqwest::Client,
    base_url: Url,
    page_size: u32,
    /// Form action of the current session
    action: Mutex<Option<Url>>,
}

impl PortalSource {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let base_url = Url::parse(&config.source_base_url).map_err(|e| AppError::Configuration {
            message: format!("invalid collector.source_base_url: {}", e),
        })?;

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            page_size: config.listing_page_size,
            action: Mutex::new(None),
        })
    }

    /// GET with exponential backoff on transient failures
    async fn get_text(&self, url: &Url) -> Result<String> {
        let client = &self.client;
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        };

        backoff::future::retry(policy, || async move {
            let response = client.get(url.clone()).send().await.map_err(retryable)?;
            let response = response.error_for_status().map_err(retryable)?;
            response.text().await.map_err(retryable)
        })
        .await
    }

    /// POST the search form with exponential backoff on transient failures
    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<String> {
        let client = &self.client;
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        };

        backoff::future::retry(policy, || async move {
            let response = client.post(url.clone()).form(form).send().await.map_err(retryable)?;
            let response = response.error_for_status().map_err(retryable)?;
            response.text().await.map_err(retryable)
        })
        .await
    }

    /// Open a session: picks up the session cookie and the form action URL
    async fn open_session(&self) -> Result<Url> {
        let html = self.get_text(&self.base_url).await?;
        let action = parse_form_action(&html)?;
        let action = self.base_url.join(&action).map_err(|e| AppError::SourceParse {
            message: format!("invalid form action {:?}: {}", action, e),
        })?;

        debug!(action = %action, "Portal session opened");
        Ok(action)
    }
}

fn retryable(err: reqwest::Error) -> backoff::Error<AppError> {
    let err = AppError::from(err);

    if err.is_transient() {
        warn!(error = %err, "Source request failed, retrying");
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

fn search_form(court: &Court, page: u32, page_size: u32) -> Vec<(String, String)> {
    [
        ("hiddenType", "Provvedimenti".to_string()),
        ("pageResultsProvvedimenti", page_size.to_string()),
        ("IsAdvanced", "false".to_string()),
        ("step", page.to_string()),
        ("sedeProvvedimenti", court.raw_name.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (format!("{}{}", FORM_PREFIX, k), v))
    .collect()
}

fn inner_text(fragment: &str) -> String {
    normalize(&decode_entities(fragment))
}

/// Action URL of the search form, entity-decoded
fn parse_form_action(html: &str) -> Result<String> {
    RE_FORM
        .find(html)
        .and_then(|form| RE_ACTION.captures(form.as_str()))
        .map(|caps| decode_entities(&caps[1]))
        .ok_or_else(|| AppError::SourceParse {
            message: "search form not found".to_string(),
        })
}

/// Parse a listing page; detail links are resolved against `base`
pub(crate) fn parse_listing(html: &str, base: &Url) -> Result<ListingPage> {
    let last_page = RE_PAGINATION
        .captures_iter(html)
        .last()
        .and_then(|caps| inner_text(&caps[1]).parse::<u32>().ok())
        .unwrap_or(0);

    let articles: Vec<&str> = RE_ARTICLE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    // The last item of the result list is the portlet's own footer entry
    let items = articles.len().saturating_sub(1);

    let mut candidates = Vec::with_capacity(items);
    for article in &articles[..items] {
        match parse_candidate(article, base) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => warn!(error = %e, "Skipping malformed listing item"),
        }
    }

    Ok(ListingPage {
        last_page,
        candidates,
    })
}

fn parse_candidate(article: &str, base: &Url) -> Result<Candidate> {
    let malformed = |what: &str| AppError::SourceParse {
        message: format!("listing item without {}", what),
    };

    let columns: Vec<&str> = RE_COLUMN.split(article).skip(1).collect();
    if columns.len() < 2 {
        return Err(malformed("columns"));
    }

    let bold = |column: &str| -> Vec<String> {
        RE_BOLD
            .captures_iter(column)
            .map(|caps| inner_text(&caps[1]))
            .collect()
    };

    let details = bold(columns[1]);
    if details.len() < 4 {
        return Err(malformed("kind/seat/section/number"));
    }

    let listing_id = columns
        .last()
        .and_then(|column| bold(column).into_iter().next())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("identifier"))?;

    let href = RE_HREF
        .captures(columns[0])
        .map(|caps| decode_entities(&caps[1]))
        .ok_or_else(|| malformed("detail link"))?;
    let detail_url = base.join(&href).map_err(|_| malformed("valid detail link"))?;

    let mut details = details.into_iter();
    Ok(Candidate {
        listing_id,
        kind: details.next().unwrap_or_default(),
        seat: details.next().unwrap_or_default(),
        section: details.next().unwrap_or_default(),
        number: details.next().unwrap_or_default(),
        detail_url: detail_url.to_string(),
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}

/// Parse a ruling detail page
pub(crate) fn parse_detail(html: &str) -> DocumentDetail {
    let body = RE_SCRIPT.replace_all(html, "");

    let full_text = RE_ANY_TAG
        .replace_all(&body, "\n")
        .lines()
        .map(|line| decode_entities(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let published_on = RE_PUBLISHED
        .captures(&body)
        .or_else(|| RE_DATE.captures(&body))
        .and_then(|caps| parse_date(&caps[1]));

    let paragraphs: Vec<(bool, &str)> = RE_PARAGRAPH
        .captures_iter(&body)
        .map(|caps| {
            let is_section = caps
                .get(1)
                .map(|attrs| attrs.as_str().contains("class=\"sezione"))
                .unwrap_or(false);
            (is_section, caps.get(2).map(|m| m.as_str()).unwrap_or_default())
        })
        .collect();

    let start = paragraphs.iter().position(|(is_section, _)| *is_section).unwrap_or(0);
    let short_source = paragraphs[start..]
        .iter()
        .map(|(_, p)| decode_entities(p))
        .collect::<Vec<_>>()
        .join("\n");
    let short_text: String = normalize(&short_source).chars().take(SHORT_TEXT_LEN).collect();

    DocumentDetail {
        full_text,
        short_text,
        published_on,
    }
}

#[async_trait]
impl Source for PortalSource {
    async fn fetch_listing(&self, court: &Court, page: u32) -> Result<ListingPage> {
        let action = {
            let mut cached = self.action.lock().await;
            match cached.as_ref() {
                Some(action) if page > 0 => action.clone(),
                _ => {
                    let action = self.open_session().await?;
                    *cached = Some(action.clone());
                    action
                }
            }
        };

        info!(court = %court.id, page, "Fetching listing");
        let html = self
            .post_form(&action, &search_form(court, page, self.page_size))
            .await?;

        parse_listing(&html, &self.base_url)
    }

    async fn fetch_detail(&self, candidate: &Candidate) -> Result<DocumentDetail> {
        debug!(listing_id = %candidate.listing_id, url = %candidate.detail_url, "Fetching detail");

        let url = Url::parse(&candidate.detail_url).map_err(|e| AppError::SourceParse {
            message: format!("invalid detail url {:?}: {}", candidate.detail_url, e),
        })?;
        let html = self.get_text(&url).await?;

        Ok(parse_detail(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers each connection with the next status of `statuses`, then 200
    async fn stub_portal(statuses: Vec<u16>) -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).copied().unwrap_or(200);

                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (Url::parse(&format!("http://{}/", addr)).unwrap(), hits)
    }

    fn source_for(url: &Url) -> PortalSource {
        PortalSource::new(&CollectorConfig {
            source_base_url: url.to_string(),
            request_timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (url, hits) = stub_portal(vec![503, 429]).await;

        let body = source_for(&url).get_text(&url).await.unwrap();

        assert_eq!(body, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let (url, hits) = stub_portal(vec![404]).await;

        let err = source_for(&url).get_text(&url).await.unwrap_err();

        assert!(matches!(&err, AppError::HttpClient(e) if e.status().map(|s| s.as_u16()) == Some(404)));
        assert!(!err.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_error_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(retryable(err), backoff::Error::Transient { .. }));
    }

    const LISTING: &str = r##"
        <ul>
          <li class="pagination-number"><a href="#">1</a></li>
          <li class="pagination-number active"><a href="#">2</a></li>
          <li class="pagination-number"><a href="#">3</a></li>
        </ul>
        <article class="ricerca--item">
          <div class="col-sm-12"><a href="/web/guest/dcsnprr?doc=1&amp;x=2">Apri</a></div>
          <div class="col-sm-12">
            Tipo <b>Sentenza</b> Sede <b>Roma</b> Sezione <b>2</b> Numero <b>00123/2024</b>
          </div>
          <div class="col-sm-12">N. Ricorso <b>202300456</b></div>
        </article>
        <article class="ricerca--item">
          <div class="col-sm-12"><a href="https://other.example/doc2">Apri</a></div>
          <div class="col-sm-12"><b>Ordinanza</b><b>Roma</b><b>3</b><b>00124/2024</b></div>
          <div class="col-sm-12"><b>202300457</b></div>
        </article>
        <article class="ricerca--item">footer</article>
    "##;

    fn base() -> Url {
        Url::parse("https://www.giustizia-amministrativa.it/web/guest/dcsnprr").unwrap()
    }

    #[test]
    fn test_parse_listing() {
        let page = parse_listing(LISTING, &base()).unwrap();

        assert_eq!(page.last_page, 3);
        assert_eq!(page.candidates.len(), 2);

        let first = &page.candidates[0];
        assert_eq!(first.listing_id, "202300456");
        assert_eq!(first.kind, "Sentenza");
        assert_eq!(first.seat, "Roma");
        assert_eq!(first.section, "2");
        assert_eq!(first.number, "00123/2024");
        assert_eq!(
            first.detail_url,
            "https://www.giustizia-amministrativa.it/web/guest/dcsnprr?doc=1&x=2"
        );
        assert_eq!(page.candidates[1].detail_url, "https://other.example/doc2");
    }

    #[test]
    fn test_parse_empty_listing() {
        let page = parse_listing("<html><body>Nessun risultato</body></html>", &base()).unwrap();
        assert_eq!(page.last_page, 0);
        assert!(page.candidates.is_empty());
    }

    #[test]
    fn test_malformed_item_skipped() {
        let html = r#"<article class="ricerca--item"><div class="col-sm-12">x</div></article>
                      <article class="ricerca--item">footer</article>"#;
        assert!(parse_listing(html, &base()).unwrap().candidates.is_empty());

        let article = r#"<div class="col-sm-12">x</div>"#;
        assert!(matches!(
            parse_candidate(article, &base()),
            Err(AppError::SourceParse { .. })
        ));
    }

    #[test]
    fn test_parse_form_action() {
        let html = r#"<form id="_GaSearch_INSTANCE_2NDgCF3zWBwk_provvedimentiForm" method="post"
                        action="https://portal/search?p_p_id=x&amp;p_p_lifecycle=1">"#;
        assert_eq!(
            parse_form_action(html).unwrap(),
            "https://portal/search?p_p_id=x&p_p_lifecycle=1"
        );
        assert!(parse_form_action("<form id=\"other\">").is_err());
    }

    #[test]
    fn test_parse_detail() {
        let html = r#"
            <html><head><script>var d = "01/01/2000";</script></head><body>
            <p>Intestazione 10/10/2023</p>
            <p class="sezione">Sezione Seconda</p>
            <p>Ricorso   proposto da „Mario”...</p>
            <div>Pubblicato il 15/03/2024</div>
            </body></html>"#;

        let detail = parse_detail(html);

        assert_eq!(detail.published_on, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(detail.short_text, "Sezione Seconda Ricorso proposto da Mario");
        assert!(detail.full_text.starts_with("Intestazione 10/10/2023\nSezione Seconda"));
        assert!(!detail.full_text.contains("var d"));
    }

    #[test]
    fn test_parse_detail_falls_back_to_first_date() {
        let detail = parse_detail("<p>Roma, 02/01/2024</p>");
        assert_eq!(detail.published_on, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(detail.short_text, "Roma, 02/01/2024");
    }

    #[test]
    fn test_short_text_truncated() {
        let html = format!("<p class=\"sezione\">{}</p>", "a".repeat(1500));
        assert_eq!(parse_detail(&html).short_text.chars().count(), 1000);
    }
}
