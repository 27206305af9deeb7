use thiserror::Error;

/// Failures while assembling the runtime (configuration, bridges, logging).
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required host bridge was not supplied and has no default
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A default bridge could not be constructed
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
