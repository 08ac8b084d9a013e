//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Worker configuration, injected at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Site origin the worker serves.
    pub origin: Url,

    /// Cache namespace for this deployment
    pub cache_version: String,

    /// Root-relative paths fetched at install
    pub precache: Vec<String>,

    /// Root-relative path served when offline with no better match
    pub offline_fallback: String,

    /// Log and continue on precache / cache write failures
    pub swallow_cache_errors: bool,

    /// Take over from the previous version as soon as install finishes
    pub skip_waiting_on_install: bool,

    /// Sync tag that replays deferred submissions
    pub sync_tag: String,

    /// Push notification appearance
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification title
    pub title: String,

    /// Body used when the push carries no payload
    pub default_body: String,

    pub icon: String,

    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static origin parses"),
            cache_version: "portfolio-v1".to_string(),
            precache: [
                "/",
                "/index.html",
                "/styles.min.css",
                "/script.min.js",
                "/performance.js",
                "/manifest.json",
                "/favicon.ico",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            offline_fallback: "/index.html".to_string(),
            swallow_cache_errors: true,
            skip_waiting_on_install: true,
            sync_tag: "background-sync".to_string(),
            notification: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Portfolio Update".to_string(),
            default_body: "New content available!".to_string(),
            icon: "/favicon.ico".to_string(),
            badge: "/favicon.ico".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

impl WorkerConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ServiceWorkerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Same config under another cache version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Same config for another origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// Same config with a different precache manifest.
    pub fn with_precache<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Same config with the error policy set.
    pub fn with_swallow_cache_errors(mut self, swallow: bool) -> Self {
        self.swallow_cache_errors = swallow;
        self
    }

    /// Same config with install-time takeover set.
    pub fn with_skip_waiting_on_install(mut self, skip: bool) -> Self {
        self.skip_waiting_on_install = skip;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_version.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_version must not be empty".to_string(),
            ));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ServiceWorkerError::Config(format!(
                "origin must be http(s): {}",
                self.origin
            )));
        }
        for path in self.precache.iter().chain([&self.offline_fallback]) {
            if !path.starts_with('/') || path.starts_with("//") {
                return Err(ServiceWorkerError::Config(format!(
                    "asset path must be root-relative: {path}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| ServiceWorkerError::Config(format!("{path}: {e}")))
    }

    /// Precache manifest as absolute URLs, in manifest order.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn fallback_url(&self) -> Result<Url> {
        self.resolve(&self.offline_fallback)
    }
}
