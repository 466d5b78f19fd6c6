use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Save failed: {0}")]
    Save(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortalError {
    pub fn missing_setting(name: &str) -> Self {
        PortalError::Configuration(format!("missing required environment variable: {name}"))
    }
}
