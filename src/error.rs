use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloudLoggingError>;

#[derive(Debug, Error)]
pub enum CloudLoggingError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("no Google Cloud credentials found: {0}")]
    NoCredentials(String),

    #[error("credential acquisition failed after {attempts} attempts: {source}")]
    CredentialsExhausted {
        attempts: u32,
        #[source]
        source: Box<CloudLoggingError>,
    },

    #[error("{service} returned HTTP {status}: {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("jwt signing error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
