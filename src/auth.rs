//! Google credential acquisition (Application Default Credentials).
//!
//! Sources are tried in order: `GOOGLE_OAUTH_ACCESS_TOKEN`, the key file named by
//! `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud well-known file, then the GCE
//! metadata server. Tokens are cached until shortly before they expire.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{CloudLoggingError, Result};
use crate::gcp::ensure_success;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_METADATA_BASE: &str = "http://metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const EXPIRY_SKEW_SECS: i64 = 60;
const METADATA_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// A token with no known expiry is treated as always usable.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => at - chrono::Duration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch_token(&self, scope: &str) -> Result<AccessToken>;
}

/// 带固定间隔的有界重试：首次尝试加最多 `max_retries` 次重试。
pub async fn acquire_with_retry(
    provider: &dyn CredentialProvider,
    scope: &str,
    policy: RetryPolicy,
) -> Result<AccessToken> {
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match provider.fetch_token(scope).await {
            Ok(token) => return Ok(token),
            Err(e) if attempt < max_attempts => {
                warn!(
                    error = %e,
                    attempts_left = max_attempts - attempt,
                    "credential acquisition failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                return Err(CloudLoggingError::CredentialsExhausted {
                    attempts: attempt,
                    source: Box::new(e),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    AuthorizedUser(AuthorizedUserKey),
    ServiceAccount(ServiceAccountKey),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUserKey {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum CredentialSource {
    StaticToken(String),
    File(CredentialsFile),
    Metadata { base_url: String },
}

/// Where the provider looks for credentials, captured once from the environment.
#[derive(Debug, Clone, Default)]
pub struct CredentialSearch {
    pub access_token: Option<String>,
    pub key_file: Option<PathBuf>,
    pub well_known_file: Option<PathBuf>,
    pub metadata_base: Option<String>,
}

impl CredentialSearch {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        let gcloud_dir = var("CLOUDSDK_CONFIG")
            .map(PathBuf::from)
            .or_else(|| var("HOME").map(|h| PathBuf::from(h).join(".config").join("gcloud")))
            .or_else(|| var("APPDATA").map(|a| PathBuf::from(a).join("gcloud")));
        Self {
            access_token: var("GOOGLE_OAUTH_ACCESS_TOKEN"),
            key_file: var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            well_known_file: gcloud_dir.map(|d| d.join("application_default_credentials.json")),
            metadata_base: var("GCE_METADATA_HOST").map(|h| format!("http://{h}")),
        }
    }

    /// 按顺序解析第一个可用的凭据来源。
    pub async fn resolve(&self) -> Result<CredentialSource> {
        if let Some(token) = &self.access_token {
            return Ok(CredentialSource::StaticToken(token.clone()));
        }
        if let Some(path) = &self.key_file {
            // An explicitly named key file must exist.
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                CloudLoggingError::NoCredentials(format!(
                    "cannot read GOOGLE_APPLICATION_CREDENTIALS {}: {e}",
                    path.display()
                ))
            })?;
            return Ok(CredentialSource::File(parse_credentials_file(&raw)?));
        }
        if let Some(path) = &self.well_known_file {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                let raw = tokio::fs::read_to_string(path).await?;
                return Ok(CredentialSource::File(parse_credentials_file(&raw)?));
            }
        }
        Ok(CredentialSource::Metadata {
            base_url: self
                .metadata_base
                .clone()
                .unwrap_or_else(|| DEFAULT_METADATA_BASE.to_string()),
        })
    }
}

pub fn parse_credentials_file(raw: &str) -> Result<CredentialsFile> {
    serde_json::from_str(raw).map_err(|e| {
        CloudLoggingError::NoCredentials(format!("unsupported credentials file: {e}"))
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

pub struct GoogleCredentials {
    client: Client,
    search: CredentialSearch,
    cache: Mutex<Option<AccessToken>>,
}

impl GoogleCredentials {
    pub fn new(client: Client, search: CredentialSearch) -> Self {
        Self {
            client,
            search,
            cache: Mutex::new(None),
        }
    }

    pub fn from_env(client: Client) -> Self {
        Self::new(client, CredentialSearch::from_env())
    }

    async fn request_token(&self, source: &CredentialSource, scope: &str) -> Result<AccessToken> {
        match source {
            CredentialSource::StaticToken(token) => Ok(AccessToken::new(token.clone(), None)),
            CredentialSource::File(CredentialsFile::AuthorizedUser(key)) => {
                let uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                let form = [
                    ("grant_type", "refresh_token"),
                    ("client_id", key.client_id.as_str()),
                    ("client_secret", key.client_secret.as_str()),
                    ("refresh_token", key.refresh_token.as_str()),
                ];
                self.post_token_form(uri, &form).await
            }
            CredentialSource::File(CredentialsFile::ServiceAccount(key)) => {
                let uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                let assertion = sign_assertion(key, scope, uri, Utc::now())?;
                let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
                self.post_token_form(uri, &form).await
            }
            CredentialSource::Metadata { base_url } => {
                let url = format!(
                    "{}/computeMetadata/v1/instance/service-accounts/default/token",
                    base_url.trim_end_matches('/')
                );
                let resp = self
                    .client
                    .get(&url)
                    .query(&[("scopes", scope)])
                    .header("Metadata-Flavor", "Google")
                    .timeout(METADATA_TIMEOUT)
                    .send()
                    .await
                    .map_err(|e| {
                        CloudLoggingError::NoCredentials(format!(
                            "no credentials configured and metadata server unreachable: {e}"
                        ))
                    })?;
                parse_token_response("metadata server", resp).await
            }
        }
    }

    async fn post_token_form(&self, uri: &str, form: &[(&str, &str)]) -> Result<AccessToken> {
        let resp = self.client.post(uri).form(form).send().await?;
        parse_token_response("oauth2 token endpoint", resp).await
    }
}

#[async_trait]
impl CredentialProvider for GoogleCredentials {
    async fn fetch_token(&self, scope: &str) -> Result<AccessToken> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
        }
        let source = self.search.resolve().await?;
        debug!(source = source_kind(&source), "requesting access token");
        let token = self.request_token(&source, scope).await?;
        *cache = Some(token.clone());
        Ok(token)
    }
}

fn source_kind(source: &CredentialSource) -> &'static str {
    match source {
        CredentialSource::StaticToken(_) => "env_access_token",
        CredentialSource::File(CredentialsFile::AuthorizedUser(_)) => "authorized_user",
        CredentialSource::File(CredentialsFile::ServiceAccount(_)) => "service_account",
        CredentialSource::Metadata { .. } => "metadata_server",
    }
}

fn sign_assertion(key: &ServiceAccountKey, scope: &str, aud: &str, now: DateTime<Utc>) -> Result<String> {
    let iat = now.timestamp();
    let claims = JwtClaims {
        iss: &key.client_email,
        scope,
        aud,
        iat,
        exp: iat + 3600,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(jsonwebtoken::encode(&header, &claims, &signing_key)?)
}

async fn parse_token_response(service: &'static str, resp: reqwest::Response) -> Result<AccessToken> {
    let body: TokenResponse = ensure_success(service, resp).await?.json().await?;
    let expires_at = body
        .expires_in
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
    Ok(AccessToken::new(body.access_token, expires_at))
}
