use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::post::RawPost;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/";
pub const DEFAULT_LIST_PATH: &str = "/api/list";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub list_path: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResponse {
    pub data: Vec<RawPost>,
    pub total: Option<u64>,
}

#[derive(Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    data: Option<Vec<Value>>,
    #[serde(default)]
    total: Option<Value>,
}

/// Client for the archive list endpoint.
pub struct Client {
    http: HttpClient,
    user_agent: String,
    list_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("archive client user agent required");
        }
        let base = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url
        };
        let base_url =
            Url::parse(&base).with_context(|| format!("archive: invalid base url {base:?}"))?;
        let path = if config.list_path.trim().is_empty() {
            DEFAULT_LIST_PATH
        } else {
            config.list_path.as_str()
        };
        let list_url = base_url
            .join(path)
            .with_context(|| format!("archive: invalid list path {path:?}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            list_url,
        })
    }

    pub fn list_url(&self) -> &Url {
        &self.list_url
    }

    /// `GET <list>?limit=<limit>&offset=<offset>`.
    pub fn list(&self, limit: u32, offset: u64) -> Result<ListResponse> {
        let mut url = self.list_url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());

        tracing::debug!(%url, "archive: list request");
        let resp = self.request(url)?;
        let envelope: ListEnvelope = resp.json().context("archive: decode list response")?;
        Ok(ListResponse {
            data: decode_records(envelope.data.unwrap_or_default()),
            total: envelope.total.as_ref().and_then(decode_total),
        })
    }

    fn request(&self, url: Url) -> Result<Response> {
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json")
            .send()
            .context("archive: send request")?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            Err(anyhow!("archive: api error {}: {}", status, body.trim()))
        }
    }
}

/// Decodes each record on its own. A record that cannot be read at all is
/// dropped and logged; the rest of the page is kept.
fn decode_records(values: Vec<Value>) -> Vec<RawPost> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<RawPost>(value) {
            Ok(post) => Some(post),
            Err(err) => {
                tracing::warn!(index, error = %err, "archive: skip unreadable record");
                None
            }
        })
        .collect()
}

fn decode_total(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
