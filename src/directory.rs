use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::{CredentialProvider, CLOUD_PLATFORM_SCOPE};
use crate::error::Result;
use crate::gcp::ensure_success;

pub const RESOURCE_MANAGER_URL: &str = "https://cloudresourcemanager.googleapis.com";

/// Enumerates the projects visible to the current credentials.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn search_projects(&self) -> Result<Vec<Value>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchProjectsPage {
    #[serde(default)]
    projects: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct ResourceManagerClient {
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
}

impl ResourceManagerClient {
    pub fn new(client: Client, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_base_url(client, credentials, RESOURCE_MANAGER_URL)
    }

    pub fn with_base_url(
        client: Client,
        credentials: Arc<dyn CredentialProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credentials,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DirectoryService for ResourceManagerClient {
    async fn search_projects(&self) -> Result<Vec<Value>> {
        let token = self.credentials.fetch_token(CLOUD_PLATFORM_SCOPE).await?;
        let mut projects = Vec::new();
        let mut page_token: Option<String> = None;

        let url = format!("{}/v3/projects:search", self.base_url.trim_end_matches('/'));
        loop {
            let mut request = self.client.get(&url).bearer_auth(&token.token);
            if let Some(t) = &page_token {
                request = request.query(&[("pageToken", t)]);
            }
            let resp = request.send().await?;
            let page: SearchProjectsPage = ensure_success("resource manager", resp).await?.json().await?;
            projects.extend(page.projects);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(count = projects.len(), "projects listed");
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::auth::AccessToken;
    use crate::error::CloudLoggingError;

    struct StaticToken;

    #[async_trait]
    impl CredentialProvider for StaticToken {
        async fn fetch_token(&self, _scope: &str) -> Result<AccessToken> {
            Ok(AccessToken::new("test-token", None))
        }
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn follows_page_tokens() {
        let app = Router::new().fallback(
            |uri: Uri, headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(uri.path(), "/v3/projects:search");
                assert_eq!(headers["authorization"], "Bearer test-token");
                match q.get("pageToken").map(String::as_str) {
                    None => Json(json!({
                        "projects": [{ "projectId": "alpha" }],
                        "nextPageToken": "p/2 +="
                    })),
                    Some("p/2 +=") => Json(json!({ "projects": [{ "projectId": "beta" }] })),
                    Some(other) => panic!("unexpected page token {other}"),
                }
            },
        );
        let base = spawn(app).await;
        let client = ResourceManagerClient::with_base_url(Client::new(), Arc::new(StaticToken), base);

        let projects = client.search_projects().await.unwrap();
        let ids: Vec<&str> = projects.iter().filter_map(|p| p["projectId"].as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn empty_response_is_an_empty_list() {
        let app = Router::new().fallback(|| async { Json(json!({})) });
        let base = spawn(app).await;
        let client = ResourceManagerClient::with_base_url(Client::new(), Arc::new(StaticToken), base);
        assert!(client.search_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_errors_carry_status() {
        let app = Router::new().fallback(|| async {
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": { "code": 403, "message": "caller lacks permission" } })),
            )
        });
        let base = spawn(app).await;
        let client = ResourceManagerClient::with_base_url(Client::new(), Arc::new(StaticToken), base);
        match client.search_projects().await.unwrap_err() {
            CloudLoggingError::Api { status, message, .. } => {
                assert_eq!(status, 403);
                assert_eq!(message, "caller lacks permission");
            }
            e => panic!("unexpected error: {e:?}"),
        }
    }
}
