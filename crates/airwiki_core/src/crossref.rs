use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::config::{AppConfig, env_value_u64, env_value_usize};
use crate::http::{RetryPolicy, ensure_success, send_with_retry};
use crate::pacing::Pacer;

pub const SEARCH_ROWS: usize = 5;

pub trait BibliographyService {
    /// BibTeX entry for a DOI.
    fn fetch_citation(&mut self, doi: &str) -> Result<String>;
    fn fetch_citation_count(&mut self, doi: &str) -> Result<u64>;
    /// DOI of the work whose title matches `title` ignoring case and non-alphanumerics.
    fn search_by_title(&mut self, title: &str) -> Result<Option<String>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct CrossrefClientConfig {
    pub doi_url: String,
    pub crossref_url: String,
    pub mailto: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl CrossrefClientConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            doi_url: config.bibliography.doi_url(),
            crossref_url: config.bibliography.crossref_url(),
            mailto: config.bibliography.mailto(),
            user_agent: config.record_store.user_agent(),
            timeout_ms: env_value_u64("CROSSREF_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("CROSSREF_RATE_LIMIT_MS", 500),
            max_retries: env_value_usize("CROSSREF_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("CROSSREF_HTTP_RETRY_DELAY_MS", 1_000),
        }
    }
}

pub struct CrossrefClient {
    client: Client,
    config: CrossrefClientConfig,
    pacer: Pacer,
    retry: RetryPolicy,
    request_count: usize,
}

#[derive(Debug, Deserialize)]
struct WorkEnvelope {
    message: Work,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    message: SearchMessage,
}

#[derive(Debug, Deserialize)]
struct SearchMessage {
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Work {
    #[serde(rename = "DOI", default)]
    pub doi: String,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(rename = "is-referenced-by-count", default)]
    pub referenced_by_count: u64,
}

impl CrossrefClient {
    pub fn new(config: CrossrefClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Crossref HTTP client")?;
        Ok(Self {
            client,
            pacer: Pacer::from_millis(config.rate_limit_ms),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                retry_delay_ms: config.retry_delay_ms,
            },
            config,
            request_count: 0,
        })
    }

    fn url(&self, root: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(root).with_context(|| format!("invalid service URL: {root}"))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow!("service URL cannot be a base: {root}"))?;
            path.pop_if_empty();
            for segment in segments {
                // DOIs contain '/', which must stay a path separator for doi.org.
                path.extend(segment.split('/'));
            }
        }
        Ok(url)
    }

    fn get(
        &mut self,
        url: Url,
        accept: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::blocking::Response> {
        self.request_count += 1;
        let client = &self.client;
        let user_agent = match &self.config.mailto {
            Some(mailto) => format!("{} (mailto:{mailto})", self.config.user_agent),
            None => self.config.user_agent.clone(),
        };
        send_with_retry(&mut self.pacer, &self.retry, "Crossref", || {
            client
                .get(url.clone())
                .header("User-Agent", user_agent.as_str())
                .header("Accept", accept)
                .query(query)
        })
    }
}

impl BibliographyService for CrossrefClient {
    fn fetch_citation(&mut self, doi: &str) -> Result<String> {
        let url = self.url(&self.config.doi_url, &[doi])?;
        let response = self.get(url, "application/x-bibtex", &[])?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(anyhow!("DOI {doi} not found"));
        }
        ensure_success(response, "DOI resolver")?
            .text()
            .with_context(|| format!("failed to read BibTeX for {doi}"))
    }

    fn fetch_citation_count(&mut self, doi: &str) -> Result<u64> {
        let url = self.url(&self.config.crossref_url, &["works", doi])?;
        let response = self.get(url, "application/json", &[])?;
        let envelope: WorkEnvelope = ensure_success(response, "Crossref")?
            .json()
            .with_context(|| format!("failed to decode Crossref work {doi}"))?;
        Ok(envelope.message.referenced_by_count)
    }

    fn search_by_title(&mut self, title: &str) -> Result<Option<String>> {
        let url = self.url(&self.config.crossref_url, &["works"])?;
        let query = [
            ("query.title", title.to_string()),
            ("select", "title,DOI".to_string()),
            ("rows", SEARCH_ROWS.to_string()),
        ];
        let response = self.get(url, "application/json", &query)?;
        let envelope: SearchEnvelope = ensure_success(response, "Crossref")?
            .json()
            .context("failed to decode Crossref search response")?;
        Ok(select_doi_by_title(title, &envelope.message.items))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Pick the first work whose title equals `title` after lowercasing and dropping
/// non-alphanumerics.
pub fn select_doi_by_title(title: &str, works: &[Work]) -> Option<String> {
    let wanted = comparable_title(title);
    works
        .iter()
        .find(|work| {
            work.title
                .first()
                .is_some_and(|candidate| comparable_title(candidate) == wanted)
        })
        .map(|work| work.doi.clone())
}

fn comparable_title(title: &str) -> String {
    title
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|ch| ch.is_alphanumeric())
        .collect()
}
