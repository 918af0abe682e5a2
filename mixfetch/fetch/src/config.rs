//! Configuration of a [`FetchEngine`](crate::engine::FetchEngine).
//!
//! Read from JSON, with every field optional:
//!
//! ```json
//! {
//!   "origin": "https://app.example",
//!   "request_timeout": 60000,
//!   "connection_shutdown_timeout": 5000,
//!   "unsafe_ignore_cors": false,
//!   "trust_roots": ["/etc/ssl/certs"]
//! }
//! ```
//!
//! Each field can be overridden from the environment, see the `*_ENV` constants.

use std::{env, ffi::OsString, fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Origin, Url};

pub const ORIGIN_ENV: &str = "MIXFETCH_ORIGIN";
pub const REQUEST_TIMEOUT_ENV: &str = "MIXFETCH_REQUEST_TIMEOUT";
pub const CONNECTION_SHUTDOWN_TIMEOUT_ENV: &str = "MIXFETCH_CONNECTION_SHUTDOWN_TIMEOUT";
pub const UNSAFE_IGNORE_CORS_ENV: &str = "MIXFETCH_UNSAFE_IGNORE_CORS";
/// Paths separated the way `PATH` is on the platform.
pub const TRUST_ROOTS_ENV: &str = "MIXFETCH_TRUST_ROOTS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("`{value}` is not a valid origin: {error}")]
    InvalidOrigin {
        value: String,
        #[source]
        error: url::ParseError,
    },
    #[error("`{value}` is not a tuple origin, only http(s) URLs can be an origin")]
    OpaqueOrigin { value: String },
    #[error("invalid value `{value}` for environment variable `{name}`")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MixFetchConfig {
    /// ### origin
    ///
    /// Origin of the environment issuing fetches, e.g. `https://app.example`. It decides which
    /// requests are same-origin and what goes into `Origin` headers.
    ///
    /// Without it every request is cross-origin and no `Origin` header is sent.
    pub origin: Option<String>,

    /// ### request_timeout
    ///
    /// Milliseconds a whole fetch, redirects included, may take.
    ///
    /// Defaults to `60000`.
    pub request_timeout: u64,

    /// ### connection_shutdown_timeout
    ///
    /// Milliseconds to wait for a virtual connection to close gracefully once its response was
    /// read, before it is torn down.
    ///
    /// Defaults to `5000`.
    pub connection_shutdown_timeout: u64,

    /// ### unsafe_ignore_cors
    ///
    /// Runs every fetch in `unsafe-ignore-cors` mode, skipping every CORS rule and response
    /// filter.
    ///
    /// Defaults to `false`.
    pub unsafe_ignore_cors: bool,

    /// ### trust_roots
    ///
    /// PEM files, or directories of them, with the root certificates trusted for `https`
    /// fetches. Directories are not traversed recursively.
    ///
    /// When not set, the platform's certificate store is used.
    pub trust_roots: Option<Vec<PathBuf>>,
}

impl Default for MixFetchConfig {
    fn default() -> Self {
        Self {
            origin: None,
            request_timeout: 60_000,
            connection_shutdown_timeout: 5_000,
            unsafe_ignore_cors: false,
            trust_roots: None,
        }
    }
}

impl MixFetchConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let json = fs::read_to_string(&path).map_err(|error| ConfigError::Read { path, error })?;

        Self::from_json(&json)
    }

    /// Applies the `MIXFETCH_*` variables of the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| env::var_os(name))
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<OsString>,
    {
        fn utf8(name: &'static str, value: OsString) -> Result<String, ConfigError> {
            value.into_string().map_err(|value| ConfigError::InvalidEnv {
                name,
                value: value.to_string_lossy().into_owned(),
            })
        }

        fn millis(name: &'static str, value: OsString) -> Result<u64, ConfigError> {
            let value = utf8(name, value)?;
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name, value })
        }

        if let Some(value) = lookup(ORIGIN_ENV) {
            self.origin = Some(utf8(ORIGIN_ENV, value)?);
        }

        if let Some(value) = lookup(REQUEST_TIMEOUT_ENV) {
            self.request_timeout = millis(REQUEST_TIMEOUT_ENV, value)?;
        }

        if let Some(value) = lookup(CONNECTION_SHUTDOWN_TIMEOUT_ENV) {
            self.connection_shutdown_timeout = millis(CONNECTION_SHUTDOWN_TIMEOUT_ENV, value)?;
        }

        if let Some(value) = lookup(UNSAFE_IGNORE_CORS_ENV) {
            let value = utf8(UNSAFE_IGNORE_CORS_ENV, value)?;
            self.unsafe_ignore_cors = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: UNSAFE_IGNORE_CORS_ENV,
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup(TRUST_ROOTS_ENV) {
            self.trust_roots = Some(env::split_paths(&value).collect());
        }

        Ok(self)
    }

    /// Parsed [`MixFetchConfig::origin`].
    pub fn parsed_origin(&self) -> Result<Option<Origin>, ConfigError> {
        let Some(value) = self.origin.as_deref() else {
            return Ok(None);
        };

        let origin = Url::parse(value)
            .map_err(|error| ConfigError::InvalidOrigin {
                value: value.to_string(),
                error,
            })?
            .origin();

        if !origin.is_tuple() {
            return Err(ConfigError::OpaqueOrigin {
                value: value.to_string(),
            });
        }

        Ok(Some(origin))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn connection_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_shutdown_timeout)
    }
}
