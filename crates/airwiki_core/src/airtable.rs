use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::debug;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{AppConfig, env_value_u64, env_value_usize};
use crate::http::{RetryPolicy, ensure_success, send_with_retry};
use crate::pacing::Pacer;
use crate::record::Record;

/// Source of records. Tables are addressed by their name in the store.
pub trait RecordStore {
    /// Every record of `table`, restricted to `fields` when the list is non-empty.
    fn fetch_all(&mut self, table: &str, fields: &[String]) -> Result<Vec<Record>>;
    /// `None` when the record no longer exists.
    fn fetch_one(&mut self, table: &str, id: &str) -> Result<Option<Record>>;
    fn update(&mut self, table: &str, id: &str, fields: &Map<String, Value>) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct AirtableClientConfig {
    pub api_url: String,
    pub base: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Tables living outside the default base.
    pub table_bases: BTreeMap<String, String>,
}

impl AirtableClientConfig {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let base = config
            .record_store
            .base()
            .ok_or_else(|| anyhow!("record store base not configured; set [record_store].base or AIRTABLE_BASE"))?;
        let table_bases = config
            .tables
            .values()
            .filter_map(|table| {
                table
                    .base
                    .as_ref()
                    .map(|base| (table.source_table().to_string(), base.clone()))
            })
            .collect();
        Ok(Self {
            api_url: config.record_store.api_url(),
            base,
            api_key: config.record_store.api_key()?,
            user_agent: config.record_store.user_agent(),
            timeout_ms: env_value_u64("AIRTABLE_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("AIRTABLE_RATE_LIMIT_MS", 250),
            max_retries: env_value_usize("AIRTABLE_HTTP_RETRIES", 3),
            retry_delay_ms: env_value_u64("AIRTABLE_HTTP_RETRY_DELAY_MS", 1_000),
            table_bases,
        })
    }
}

pub struct AirtableClient {
    client: Client,
    config: AirtableClientConfig,
    pacer: Pacer,
    retry: RetryPolicy,
    request_count: usize,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<Record>,
    offset: Option<String>,
}

impl AirtableClient {
    pub fn new(config: AirtableClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Airtable HTTP client")?;
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

    fn table_url(&self, table: &str, record_id: Option<&str>) -> Result<Url> {
        let base = self
            .config
            .table_bases
            .get(table)
            .unwrap_or(&self.config.base);
        let mut url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid record store URL: {}", self.config.api_url))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("record store URL cannot be a base: {}", self.config.api_url))?;
            segments.pop_if_empty().push(base).push(table);
            if let Some(record_id) = record_id {
                segments.push(record_id);
            }
        }
        Ok(url)
    }

    fn list_page(
        &mut self,
        url: &Url,
        fields: &[String],
        offset: Option<&str>,
    ) -> Result<ListResponse> {
        let mut query = fields
            .iter()
            .map(|field| ("fields[]".to_string(), field.clone()))
            .collect::<Vec<_>>();
        if let Some(offset) = offset {
            query.push(("offset".to_string(), offset.to_string()));
        }

        self.request_count += 1;
        let client = &self.client;
        let api_key = &self.config.api_key;
        let user_agent = &self.config.user_agent;
        let response = send_with_retry(&mut self.pacer, &self.retry, "Airtable", || {
            client
                .get(url.clone())
                .bearer_auth(api_key)
                .header("User-Agent", user_agent.as_str())
                .query(&query)
        })?;
        ensure_success(response, "Airtable")?
            .json()
            .context("failed to decode Airtable list response")
    }
}

impl RecordStore for AirtableClient {
    fn fetch_all(&mut self, table: &str, fields: &[String]) -> Result<Vec<Record>> {
        let url = self.table_url(table, None)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let page = self
                .list_page(&url, fields, offset.as_deref())
                .with_context(|| format!("failed to list records of `{table}`"))?;
            records.extend(page.records);
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        debug!("fetched {} records from `{table}`", records.len());
        Ok(records)
    }

    fn fetch_one(&mut self, table: &str, id: &str) -> Result<Option<Record>> {
        let url = self.table_url(table, Some(id))?;
        self.request_count += 1;
        let client = &self.client;
        let api_key = &self.config.api_key;
        let user_agent = &self.config.user_agent;
        let response = send_with_retry(&mut self.pacer, &self.retry, "Airtable", || {
            client
                .get(url.clone())
                .bearer_auth(api_key)
                .header("User-Agent", user_agent.as_str())
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = ensure_success(response, "Airtable")?
            .json::<Record>()
            .with_context(|| format!("failed to decode record {id} of `{table}`"))?;
        Ok(Some(record))
    }

    fn update(&mut self, table: &str, id: &str, fields: &Map<String, Value>) -> Result<()> {
        let url = self.table_url(table, Some(id))?;
        let body = json!({ "fields": fields });
        self.request_count += 1;
        let client = &self.client;
        let api_key = &self.config.api_key;
        let user_agent = &self.config.user_agent;
        let response = send_with_retry(&mut self.pacer, &self.retry, "Airtable", || {
            client
                .patch(url.clone())
                .bearer_auth(api_key)
                .header("User-Agent", user_agent.as_str())
                .json(&body)
        })?;
        ensure_success(response, "Airtable")
            .with_context(|| format!("failed to update record {id} of `{table}`"))?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
