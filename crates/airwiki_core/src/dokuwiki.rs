use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::{DEFAULT_USER_AGENT, TargetSection, env_value, env_value_u64, env_value_usize};
use crate::http::{RetryPolicy, ensure_success, send_with_retry};
use crate::pacing::Pacer;

pub const JSONRPC_PATH: &str = "lib/exe/jsonrpc.php";

/// Destination wiki. Page ids are full `namespace:page` identifiers.
pub trait WikiStore {
    /// Current page text; empty for a page that does not exist yet.
    fn get_page(&mut self, id: &str) -> Result<String>;
    fn set_page(&mut self, id: &str, content: &str, summary: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct DokuWikiClientConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl DokuWikiClientConfig {
    pub fn from_target(target: &TargetSection) -> Result<Self> {
        Ok(Self {
            endpoint: jsonrpc_endpoint(&target.url),
            username: target.username.clone(),
            password: target.password()?,
            user_agent: env_value("AIRWIKI_USER_AGENT", DEFAULT_USER_AGENT),
            timeout_ms: env_value_u64("DOKUWIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("DOKUWIKI_RATE_LIMIT_MS", 300),
            max_retries: env_value_usize("DOKUWIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("DOKUWIKI_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

pub fn jsonrpc_endpoint(wiki_url: &str) -> String {
    format!("{}/{JSONRPC_PATH}", wiki_url.trim().trim_end_matches('/'))
}

pub struct DokuWikiClient {
    client: Client,
    config: DokuWikiClientConfig,
    pacer: Pacer,
    retry: RetryPolicy,
    request_count: usize,
    next_call_id: u64,
}

impl DokuWikiClient {
    pub fn new(config: DokuWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build DokuWiki HTTP client")?;
        Ok(Self {
            client,
            pacer: Pacer::from_millis(config.rate_limit_ms),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                retry_delay_ms: config.retry_delay_ms,
            },
            config,
            request_count: 0,
            next_call_id: 0,
        })
    }

    fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_call_id += 1;
        self.request_count += 1;
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_call_id,
            "method": method,
            "params": params,
        });

        let client = &self.client;
        let config = &self.config;
        let response = send_with_retry(&mut self.pacer, &self.retry, "DokuWiki", || {
            let request = client
                .post(&config.endpoint)
                .header("User-Agent", config.user_agent.as_str())
                .json(&body);
            match &config.username {
                Some(username) => request.basic_auth(username, config.password.as_deref()),
                None => request,
            }
        })?;
        let payload: Value = ensure_success(response, "DokuWiki")?
            .json()
            .context("failed to decode DokuWiki JSON-RPC response")?;
        parse_rpc_response(payload, method)
    }
}

fn parse_rpc_response(mut payload: Value, method: &str) -> Result<Value> {
    if let Some(error) = payload.get("error")
        && !error.is_null()
    {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        // DokuWiki reports success as error code 0 alongside the result.
        if code != 0 {
            bail!("DokuWiki {method} failed [{code}]: {message}");
        }
    }
    Ok(payload
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

impl WikiStore for DokuWikiClient {
    fn get_page(&mut self, id: &str) -> Result<String> {
        let result = self
            .call("core.getPage", json!({ "page": id }))
            .with_context(|| format!("failed to read wiki page {id}"))?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    fn set_page(&mut self, id: &str, content: &str, summary: &str) -> Result<()> {
        let result = self
            .call(
                "core.savePage",
                json!({ "page": id, "text": content, "summary": summary, "isminor": false }),
            )
            .with_context(|| format!("failed to write wiki page {id}"))?;
        if result == Value::Bool(false) {
            bail!("DokuWiki refused to save page {id}");
        }
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
