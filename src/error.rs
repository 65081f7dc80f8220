//! Error types for the chatbot core.

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Horde error: {0}")]
    Horde(#[from] HordeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read configuration: {0}")]
    ReadError(String),
}

/// Errors from the Horde job API.
///
/// Rate limiting is not represented here: 429 responses are retried inside
/// the client (sleeping out the server's wait hint) and never surface as an
/// error value.
#[derive(Debug, thiserror::Error)]
pub enum HordeError {
    /// The server answered with a non-accepted status and an error message.
    #[error("Horde rejected the request: {message}")]
    ServiceRejected { message: String },

    #[error("Invalid response from Horde: {reason}")]
    InvalidResponse { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
