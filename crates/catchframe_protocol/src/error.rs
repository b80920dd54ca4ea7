use thiserror::Error;

/// Errors raised while decoding protocol values at a boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid report status: '{0}'")]
    InvalidStatus(String),

    #[error("Invalid trigger payload: {0}")]
    InvalidTrigger(String),

    #[error("Invalid object location: {0}")]
    InvalidLocation(String),

    #[error("Public URL '{url}' is not under base '{base}'")]
    ForeignUrl { url: String, base: String },
}
