//! Error types shared by the alarm lifecycle.
//!
//! Every layer below [`crate::service::AlarmService`] returns
//! [`AlarmError`]; the service turns these into plain booleans for the host.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = AlarmError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum AlarmError {
    /// The exact alarm capability has not been granted.
    #[error("exact alarm permission has not been granted")]
    PermissionDenied,

    /// A custom audio resource could not be used.
    #[error("audio resource {path} is unavailable: {reason}")]
    ResourceUnavailable { path: PathBuf, reason: String },

    /// Lookup of an id that has nothing registered.
    #[error("no alarm registered for '{0}'")]
    NotFound(String),

    /// A platform call failed. Caught at the step boundary and logged.
    #[error("{component} failed: {message}")]
    Platform {
        component: &'static str,
        message: String,
    },
}

impl AlarmError {
    pub fn platform(component: &'static str, message: impl Into<String>) -> Self {
        Self::Platform {
            component,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("couldn't determine the config directory")]
    NoProjectDirs,

    #[error("couldn't read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("couldn't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("couldn't decode message: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("message was not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("couldn't parse message: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("couldn't serialize message: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("connection closed")]
    Closed,

    #[error("unexpected reply: {0}")]
    Unexpected(String),
}
