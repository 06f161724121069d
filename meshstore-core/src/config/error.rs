//! Errors from loading, checking and saving a `Config`

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    /// An environment variable that does not parse as its setting's type
    #[error("{var}: invalid {what}: {reason}")]
    BadVariable {
        var: String,
        what: &'static str,
        reason: String,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
