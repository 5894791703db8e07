//! Client configuration.
//!
//! Values are layered: built-in defaults, then a TOML file, then environment
//! variables, then command-line overrides applied by the binary.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ArenaError;

pub const DEFAULT_CONFIG_FILE: &str = "arena.toml";
pub const CONFIG_PATH_ENV: &str = "ARENA_CONFIG";
pub const BASE_URL_ENV: &str = "ARENA_BASE_URL";
pub const CSRF_TOKEN_ENV: &str = "ARENA_CSRF_TOKEN";
pub const SESSION_COOKIE_ENV: &str = "ARENA_SESSION_COOKIE";

/// Backend endpoint paths, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub models: String,
    pub stream: String,
    pub retry: String,
    pub vote: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        EndpointPaths {
            models: "/get_available_models".to_string(),
            stream: "/stream-translate".to_string(),
            retry: "/retry-single".to_string(),
            vote: "/vote".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Backend root, e.g. `http://127.0.0.1:5000`.
    pub base_url: String,
    /// Sent as `X-CSRFToken` on every mutating request.
    pub csrf_token: Option<String>,
    /// Raw `Cookie` header value carrying the logged-in session.
    pub session_cookie: Option<String>,
    /// Highest star rating a translation can receive.
    pub rating_scale: u8,
    pub connect_timeout_secs: u64,
    /// Timeout for the non-streaming calls (models, retry, vote).
    pub request_timeout_secs: u64,
    /// Maximum silence on the translation stream before it is treated as lost.
    /// `0` waits forever.
    pub stream_idle_timeout_secs: u64,
    pub paths: EndpointPaths,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig {
            base_url: "http://127.0.0.1:5000".to_string(),
            csrf_token: None,
            session_cookie: None,
            rating_scale: 3,
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
            stream_idle_timeout_secs: 120,
            paths: EndpointPaths::default(),
        }
    }
}

impl ArenaConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ArenaError> {
        let mut config: ArenaConfig =
            toml::from_str(text).map_err(|e| ArenaError::Config(e.to_string()))?;
        config.csrf_token = non_blank(config.csrf_token);
        config.session_cookie = non_blank(config.session_cookie);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ArenaError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ArenaError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolve and load the configuration the binary runs with.
    ///
    /// An explicit path must exist. Without one, `$ARENA_CONFIG` is tried,
    /// then `./arena.toml`; if neither is present the defaults are used.
    /// Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ArenaError> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => ArenaConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Blank variables count as unset.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| non_blank(lookup(key));
        if let Some(url) = lookup(BASE_URL_ENV) {
            self.base_url = url;
        }
        if let Some(token) = lookup(CSRF_TOKEN_ENV) {
            self.csrf_token = Some(token);
        }
        if let Some(cookie) = lookup(SESSION_COOKIE_ENV) {
            self.session_cookie = Some(cookie);
        }
    }

    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.base_url.trim().is_empty() {
            return Err(ArenaError::Config("base_url must not be empty".to_string()));
        }
        if self.rating_scale == 0 {
            return Err(ArenaError::Config("rating_scale must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Join `base_url` and an endpoint path without doubling the slash.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        match self.stream_idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}
