use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParleyError {
    /// A required setting (usually a credential) is not configured.
    #[error("Missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    /// Non-success response from the LLM endpoint or a tool server.
    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// True for errors caused by the caller's input or local setup rather
    /// than by a failing dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ParleyError::ConfigurationMissing(_) | ParleyError::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
