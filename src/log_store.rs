use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AccessToken;
use crate::error::Result;
use crate::gcp::ensure_success;
use crate::model::{LogEntry, LogQuery};

pub const LOGGING_URL: &str = "https://logging.googleapis.com";

/// Read side of Cloud Logging: one page of entries for a query.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn list_entries(&self, credential: &AccessToken, query: &LogQuery) -> Result<Vec<LogEntry>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesRequest<'a> {
    resource_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    order_by: &'static str,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<LogEntry>,
}

pub struct CloudLoggingClient {
    client: Client,
    base_url: String,
}

impl CloudLoggingClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, LOGGING_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LogStore for CloudLoggingClient {
    async fn list_entries(&self, credential: &AccessToken, query: &LogQuery) -> Result<Vec<LogEntry>> {
        let url = format!("{}/v2/entries:list", self.base_url.trim_end_matches('/'));
        let body = ListEntriesRequest {
            resource_names: vec![format!("projects/{}", query.project_id)],
            filter: query.filter.as_deref(),
            order_by: query.order.as_order_by(),
            page_size: query.page_size,
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&credential.token)
            .json(&body)
            .send()
            .await?;
        let page: ListEntriesResponse = ensure_success("cloud logging", resp).await?.json().await?;
        debug!(
            project = %query.project_id,
            returned = page.entries.len(),
            "log entries fetched"
        );
        Ok(page.entries)
    }
}
