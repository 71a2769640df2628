//! Configuration errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration syntax error in {path}: {message}")]
    Syntax { path: String, message: String },

    #[error("configuration check failed: {0}")]
    Check(String),

    #[error("unknown destination type: {0}")]
    UnknownDestination(String),

    #[error("could not export configuration snapshot: {0}")]
    Export(String),
}
