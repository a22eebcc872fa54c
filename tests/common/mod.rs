#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use cloud_logging_mcp::auth::{AccessToken, CredentialProvider};
use cloud_logging_mcp::config::{ProjectListingFailure, RetryPolicy, ToolConfig};
use cloud_logging_mcp::directory::DirectoryService;
use cloud_logging_mcp::dispatcher::Dispatcher;
use cloud_logging_mcp::error::{CloudLoggingError, Result};
use cloud_logging_mcp::log_store::LogStore;
use cloud_logging_mcp::model::{LogEntry, LogQuery};

#[derive(Default)]
pub struct FakeCredentials {
    pub calls: AtomicU32,
    pub failing: AtomicBool,
    /// Lifetime of issued tokens; `None` means they never expire.
    pub lifetime: Mutex<Option<chrono::Duration>>,
}

impl FakeCredentials {
    pub fn set_lifetime(&self, lifetime: chrono::Duration) {
        *self.lifetime.lock().unwrap() = Some(lifetime);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn fetch_token(&self, _scope: &str) -> Result<AccessToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(CloudLoggingError::NoCredentials("token endpoint unavailable".into()));
        }
        let expires_at = self.lifetime.lock().unwrap().map(|l| Utc::now() + l);
        Ok(AccessToken::new(format!("token-{n}"), expires_at))
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub projects: Mutex<Vec<Value>>,
    pub failing: AtomicBool,
    pub calls: AtomicU32,
}

#[async_trait]
impl DirectoryService for FakeDirectory {
    async fn search_projects(&self) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CloudLoggingError::Api {
                service: "resource manager",
                status: 503,
                message: "backend unavailable".into(),
            });
        }
        Ok(self.projects.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeLogStore {
    pub entries: Mutex<Vec<LogEntry>>,
    pub failing: AtomicBool,
    pub panicking: AtomicBool,
    pub queries: Mutex<Vec<(String, LogQuery)>>,
}

impl FakeLogStore {
    pub fn queries(&self) -> Vec<(String, LogQuery)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogStore for FakeLogStore {
    async fn list_entries(&self, credential: &AccessToken, query: &LogQuery) -> Result<Vec<LogEntry>> {
        self.queries
            .lock()
            .unwrap()
            .push((credential.token.clone(), query.clone()));
        if self.panicking.load(Ordering::SeqCst) {
            panic!("log store blew up");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CloudLoggingError::Api {
                service: "cloud logging",
                status: 400,
                message: "Unparseable filter".into(),
            });
        }
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().take(query.page_size as usize).cloned().collect())
    }
}

pub struct Harness {
    pub credentials: Arc<FakeCredentials>,
    pub directory: Arc<FakeDirectory>,
    pub logs: Arc<FakeLogStore>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn fast_tool_config(listing: ProjectListingFailure) -> ToolConfig {
    ToolConfig {
        project_listing_failure: listing,
        credential_retry: RetryPolicy {
            max_retries: 3,
            delay: Duration::ZERO,
        },
    }
}

pub fn harness() -> Harness {
    harness_with(ProjectListingFailure::Empty)
}

pub fn harness_with(listing: ProjectListingFailure) -> Harness {
    let credentials = Arc::new(FakeCredentials::default());
    let directory = Arc::new(FakeDirectory::default());
    let logs = Arc::new(FakeLogStore::default());
    let dispatcher = Arc::new(Dispatcher::new(
        credentials.clone(),
        directory.clone(),
        logs.clone(),
        fast_tool_config(listing),
    ));
    Harness {
        credentials,
        directory,
        logs,
        dispatcher,
    }
}

pub fn error_entry(timestamp: &str, message: &str) -> LogEntry {
    serde_json::from_value(json!({
        "timestamp": timestamp,
        "severity": "ERROR",
        "resource": { "type": "cloud_run_revision", "labels": { "service_name": "api" } },
        "jsonPayload": { "message": message }
    }))
    .unwrap()
}
