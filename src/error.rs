use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("HTTP request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("HTTP request to {url} failed with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Feed parsing failed: {0}")]
    Parse(String),

    #[error("Feed validation failed: {0}")]
    Validation(String),

    #[error("Not logged in: {0}")]
    Auth(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Persistence failures other than uniqueness violations.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Sqlite(_) | AppError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
