//! Shared HTTP plumbing for the Google REST APIs.

use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::{CloudLoggingError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(Into::into)
}

/// Turns a non-2xx response into `CloudLoggingError::Api`, preferring Google's
/// `error.message` over the raw body.
pub async fn ensure_success(service: &'static str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CloudLoggingError::Api {
        service,
        status: status.as_u16(),
        message: google_error_message(&body).unwrap_or(body),
    })
}

fn google_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match &value["error"] {
        Value::Object(err) => err.get("message")?.as_str().map(str::to_string),
        // oauth2 endpoints answer {"error": "invalid_grant", "error_description": "..."}
        Value::String(code) => Some(match value["error_description"].as_str() {
            Some(desc) => format!("{code}: {desc}"),
            None => code.clone(),
        }),
        _ => None,
    }
}
