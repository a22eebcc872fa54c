use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::error::{CloudLoggingError, Result};

pub const ENV_TRANSPORT: &str = "MCP_TRANSPORT";
pub const ENV_PORT: &str = "PORT";
pub const ENV_HOST: &str = "MCP_HOST";
pub const ENV_STRICT_PROJECT_LISTING: &str = "MCP_STRICT_PROJECT_LISTING";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// HTTP with one SSE stream per client and a POST message endpoint.
    Sse,
}

impl FromStr for ServerMode {
    type Err = CloudLoggingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(ServerMode::Stdio),
            "sse" | "http" => Ok(ServerMode::Sse),
            other => Err(CloudLoggingError::ConfigError(format!(
                "unknown transport '{other}', expected 'stdio' or 'sse'"
            ))),
        }
    }
}

/// What `list-projects` reports when the directory call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectListingFailure {
    /// Log the fault and answer with an empty project list.
    #[default]
    Empty,
    /// Surface the fault to the caller as an error envelope.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: ServerMode,
    pub http_addr: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ToolConfig {
    pub project_listing_failure: ProjectListingFailure,
    pub credential_retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                mode: ServerMode::Stdio,
                http_addr: DEFAULT_HOST.to_string(),
                http_port: DEFAULT_PORT,
            },
            tools: ToolConfig::default(),
        }
    }
}

/// Command-line flags. Environment variables take precedence over them.
#[derive(Parser, Debug, Default)]
#[command(name = "cloud-logging-mcp", version, about = "MCP server for Google Cloud Logging")]
pub struct CliArgs {
    /// Transport to serve: `stdio` or `sse`.
    #[arg(long)]
    pub transport: Option<String>,

    /// Port for the SSE transport.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address for the SSE transport.
    #[arg(long)]
    pub host: Option<String>,

    /// Report project listing failures as errors instead of an empty list.
    #[arg(long)]
    pub strict_project_listing: bool,
}

impl Config {
    pub fn from_env_and_args(cli: &CliArgs) -> Result<Self> {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    /// Builds the config from an env lookup and parsed flags, env first.
    pub fn resolve<F>(cli: &CliArgs, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Config::default();

        if let Some(mode) = env(ENV_TRANSPORT).or_else(|| cli.transport.clone()) {
            cfg.server.mode = mode.parse()?;
        }

        if let Some(raw) = env(ENV_PORT) {
            cfg.server.http_port = raw.trim().parse().map_err(|e| {
                CloudLoggingError::ConfigError(format!("invalid {ENV_PORT} '{raw}': {e}"))
            })?;
        } else if let Some(port) = cli.port {
            cfg.server.http_port = port;
        }

        if let Some(host) = env(ENV_HOST).or_else(|| cli.host.clone()) {
            cfg.server.http_addr = host;
        }

        let strict = match env(ENV_STRICT_PROJECT_LISTING) {
            Some(raw) => parse_flag(ENV_STRICT_PROJECT_LISTING, &raw)?,
            None => cli.strict_project_listing,
        };
        if strict {
            cfg.tools.project_listing_failure = ProjectListingFailure::Error;
        }

        Ok(cfg)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CloudLoggingError::ConfigError(format!(
            "invalid {key} '{raw}', expected a boolean"
        ))),
    }
}
