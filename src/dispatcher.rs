//! Tool dispatch: argument validation, the three tool handlers, and envelope rendering.
//!
//! Every outcome is an [`Envelope`]; handler failures become error text, never a
//! protocol error.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::auth::{acquire_with_retry, AccessToken, CredentialProvider, GoogleCredentials, CLOUD_PLATFORM_SCOPE};
use crate::config::{ProjectListingFailure, ToolConfig};
use crate::directory::{DirectoryService, ResourceManagerClient};
use crate::error::{CloudLoggingError, Result};
use crate::gcp::http_client;
use crate::log_store::{CloudLoggingClient, LogStore};
use crate::model::{Envelope, LogOrder, LogQuery, LogsResponse, MappedLogEntry, ProjectsResponse, ToolDescriptor};
use crate::session::SessionState;
use crate::tools::{self, ToolRegistry, GET_LOGS, LIST_PROJECTS, SELECT_PROJECT};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
/// Cloud Logging rejects larger pages.
pub const MAX_PAGE_SIZE: u32 = 1000;

pub const PROJECT_SELECTED: &str = "Project selected successfully!";
pub const NO_PROJECT_SELECTED: &str = "No project selected. Please select a project first.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectProjectArgs {
    project_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetLogsArgs {
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    page_size: Option<f64>,
}

pub struct Dispatcher {
    registry: ToolRegistry,
    credentials: Arc<dyn CredentialProvider>,
    directory: Arc<dyn DirectoryService>,
    logs: Arc<dyn LogStore>,
    config: ToolConfig,
}

impl Dispatcher {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        directory: Arc<dyn DirectoryService>,
        logs: Arc<dyn LogStore>,
        config: ToolConfig,
    ) -> Self {
        Self {
            registry: ToolRegistry::new(),
            credentials,
            directory,
            logs,
            config,
        }
    }

    /// Wires the dispatcher to the real Google APIs using Application Default Credentials.
    pub fn google(config: ToolConfig) -> Result<Self> {
        let client = http_client()?;
        let credentials: Arc<dyn CredentialProvider> = Arc::new(GoogleCredentials::from_env(client.clone()));
        let directory = Arc::new(ResourceManagerClient::new(client.clone(), credentials.clone()));
        let logs = Arc::new(CloudLoggingClient::new(client));
        Ok(Self::new(credentials, directory, logs, config))
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        self.registry.list()
    }

    pub async fn invoke(&self, session: &mut SessionState, name: &str, args: &Value) -> Envelope {
        let Some(tool) = self.registry.get(name) else {
            warn!(tool = name, "unknown tool requested");
            return error_envelope(&CloudLoggingError::UnknownTool(name.to_string()));
        };

        let args = match tools::validate(tool, args) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = name, error = %e, "invalid tool arguments");
                return Envelope::error(format!("Error: invalid arguments for {name}: {e}"));
            }
        };

        match name {
            LIST_PROJECTS => self.list_projects().await,
            SELECT_PROJECT => self.select_project(session, args).await,
            GET_LOGS => self.get_logs(session, args).await,
            _ => error_envelope(&CloudLoggingError::UnknownTool(name.to_string())),
        }
    }

    async fn list_projects(&self) -> Envelope {
        let projects = match self.directory.search_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                error!(error = %e, "error listing projects");
                match self.config.project_listing_failure {
                    ProjectListingFailure::Empty => Vec::new(),
                    ProjectListingFailure::Error => {
                        return Envelope::error(format!("Error: failed to list projects: {e}"))
                    }
                }
            }
        };

        let rendered = projects
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()
            .and_then(|projects| serde_json::to_string(&ProjectsResponse { projects }));
        match rendered {
            Ok(text) => Envelope::text(text),
            Err(e) => error_envelope(&CloudLoggingError::from(e)),
        }
    }

    async fn select_project(&self, session: &mut SessionState, args: Map<String, Value>) -> Envelope {
        let args: SelectProjectArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return Envelope::error(format!("Error: invalid arguments for {SELECT_PROJECT}: {e}")),
        };
        if args.project_id.trim().is_empty() {
            return Envelope::error(format!(
                "Error: invalid arguments for {SELECT_PROJECT}: projectId must not be empty"
            ));
        }

        // The previous selection does not survive a failed attempt.
        session.clear();
        match acquire_with_retry(
            self.credentials.as_ref(),
            CLOUD_PLATFORM_SCOPE,
            self.config.credential_retry,
        )
        .await
        {
            Ok(credential) => {
                info!(project = %args.project_id, "project selected");
                session.select(args.project_id, credential);
                Envelope::text(PROJECT_SELECTED)
            }
            Err(e) => {
                error!(project = %args.project_id, error = %e, "failed to select project");
                error_envelope(&e)
            }
        }
    }

    async fn get_logs(&self, session: &mut SessionState, args: Map<String, Value>) -> Envelope {
        let args: GetLogsArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return Envelope::error(format!("Error: invalid arguments for {GET_LOGS}: {e}")),
        };
        let page_size = match resolve_page_size(args.page_size) {
            Ok(n) => n,
            Err(e) => return Envelope::error(format!("Error: invalid arguments for {GET_LOGS}: {e}")),
        };

        let Some(project_id) = session.selected_project().map(str::to_string) else {
            return Envelope::text(NO_PROJECT_SELECTED);
        };

        let query = LogQuery {
            project_id,
            filter: args.filter.filter(|f| !f.trim().is_empty()),
            page_size,
            order: LogOrder::NewestFirst,
        };

        match self.query_logs(session, &query).await {
            Ok(text) => Envelope::text(text),
            Err(e) => {
                error!(project = %query.project_id, error = %e, "error getting logs");
                Envelope::error(format!("Error getting logs: {e}"))
            }
        }
    }

    async fn query_logs(&self, session: &mut SessionState, query: &LogQuery) -> Result<String> {
        let credential = self.session_credential(session).await?;
        let entries = self.logs.list_entries(&credential, query).await?;
        let response = LogsResponse {
            entries: entries.into_iter().map(MappedLogEntry::from).collect(),
        };
        Ok(serde_json::to_string_pretty(&response)?)
    }

    /// The session's credential, re-acquired when it is about to expire.
    async fn session_credential(&self, session: &mut SessionState) -> Result<AccessToken> {
        if let Some(credential) = session.credential() {
            if credential.is_fresh(Utc::now()) {
                return Ok(credential.clone());
            }
        }
        let credential = acquire_with_retry(
            self.credentials.as_ref(),
            CLOUD_PLATFORM_SCOPE,
            self.config.credential_retry,
        )
        .await?;
        session.refresh_credential(credential.clone());
        Ok(credential)
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args)).map_err(|e| CloudLoggingError::InvalidArguments(e.to_string()))
}

/// 缺省或 0 使用默认值 10；负数和小数视为无效参数。
pub fn resolve_page_size(raw: Option<f64>) -> Result<u32> {
    let Some(n) = raw else {
        return Ok(DEFAULT_PAGE_SIZE);
    };
    if !n.is_finite() || n < 0.0 || n.fract() != 0.0 {
        return Err(CloudLoggingError::InvalidArguments(format!(
            "pageSize must be a non-negative integer, got {n}"
        )));
    }
    if n == 0.0 {
        return Ok(DEFAULT_PAGE_SIZE);
    }
    Ok(n.min(f64::from(MAX_PAGE_SIZE)) as u32)
}

fn error_envelope(err: &CloudLoggingError) -> Envelope {
    Envelope::error(format!("Error: {err}"))
}
