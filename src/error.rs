use std::io;

/// Error type for assembla_trigger operations
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Assembla lookup failed: {0}")]
    UpstreamLookup(String),

    #[error("Build scheduling failed for job '{job}': {message}")]
    Scheduling { job: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Webhook validation failed: {0}")]
    WebhookValidationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl TriggerError {
    pub fn malformed(message: impl Into<String>) -> Self {
        TriggerError::MalformedPayload(message.into())
    }

    pub fn scheduling(job: impl Into<String>, message: impl Into<String>) -> Self {
        TriggerError::Scheduling {
            job: job.into(),
            message: message.into(),
        }
    }
}

/// Helper type for Results that use TriggerError
pub type Result<T> = std::result::Result<T, TriggerError>;
