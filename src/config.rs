// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Application configuration.
//!
//! Stored as JSON at `~/.catalock/config.json`. A missing file means
//! defaults; missing fields take their defaults too, so older config files
//! keep loading. `CATALOCK_API_URL` overrides the API base URL.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_API_URL;
use crate::cache::{DEFAULT_MAX_AGE, DEFAULT_STALE_TIME};
use crate::security::{AutoLockConfig, DEFAULT_PRIVILEGED_USERS};
use crate::storage::data_dir;
use crate::types::Route;

/// Environment variable overriding `api_base_url`.
pub const API_URL_ENV: &str = "CATALOCK_API_URL";

/// Shortest accepted inactivity timeout: 1 second.
pub const MIN_INACTIVITY_TIMEOUT_MS: u64 = 1_000;

/// Longest accepted inactivity timeout: 15 minutes.
pub const MAX_INACTIVITY_TIMEOUT_MS: u64 = 15 * 60 * 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Inactivity timeout on the sensitive screen (milliseconds)
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    /// Route on which auto-lock is armed
    #[serde(default = "default_sensitive_route")]
    pub sensitive_route: String,
    #[serde(default = "default_login_route")]
    pub login_route: String,
    /// Route shown after a biometric unlock
    #[serde(default = "default_main_route")]
    pub main_route: String,
    #[serde(default = "default_privileged_users")]
    pub privileged_users: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cache_stale_secs")]
    pub cache_stale_secs: u64,
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,
    /// Store file; `~/.catalock/store.json` when unset
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_api_base_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_inactivity_timeout_ms() -> u64 {
    10_000
}

fn default_sensitive_route() -> String {
    Route::AllProducts.name().to_string()
}

fn default_login_route() -> String {
    Route::Login.name().to_string()
}

fn default_main_route() -> String {
    Route::MainTabs.name().to_string()
}

fn default_privileged_users() -> Vec<String> {
    DEFAULT_PRIVILEGED_USERS.iter().map(|u| u.to_string()).collect()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cache_stale_secs() -> u64 {
    DEFAULT_STALE_TIME.as_secs()
}

fn default_cache_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE.as_secs()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            sensitive_route: default_sensitive_route(),
            login_route: default_login_route(),
            main_route: default_main_route(),
            privileged_users: default_privileged_users(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_stale_secs: default_cache_stale_secs(),
            cache_max_age_secs: default_cache_max_age_secs(),
            store_path: None,
        }
    }
}

impl AppConfig {
    /// Clamp and repair values. Returns one warning per change.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        let clamped = self
            .inactivity_timeout_ms
            .clamp(MIN_INACTIVITY_TIMEOUT_MS, MAX_INACTIVITY_TIMEOUT_MS);
        if clamped != self.inactivity_timeout_ms {
            warnings.push(format!(
                "inactivity_timeout_ms {} out of range, using {}",
                self.inactivity_timeout_ms, clamped
            ));
            self.inactivity_timeout_ms = clamped;
        }

        for (field, value, fallback) in [
            ("sensitive_route", &mut self.sensitive_route, default_sensitive_route()),
            ("login_route", &mut self.login_route, default_login_route()),
            ("main_route", &mut self.main_route, default_main_route()),
        ] {
            if Route::from_name(value).is_none() {
                warnings.push(format!("{} '{}' is not a known route, using {}", field, value, fallback));
                *value = fallback;
            }
        }

        if self.request_timeout_secs == 0 {
            warnings.push("request_timeout_secs must be positive, using 30".to_string());
            self.request_timeout_secs = default_request_timeout_secs();
        }

        if self.cache_stale_secs > self.cache_max_age_secs {
            warnings.push("cache_stale_secs exceeds cache_max_age_secs, using max age".to_string());
            self.cache_stale_secs = self.cache_max_age_secs;
        }

        let trimmed = self.api_base_url.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            warnings.push("api_base_url is empty, using default".to_string());
            self.api_base_url = default_api_base_url();
        } else {
            self.api_base_url = trimmed;
        }

        warnings
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_stale_time(&self) -> Duration {
        Duration::from_secs(self.cache_stale_secs)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    pub fn main_route(&self) -> Route {
        Route::from_name(&self.main_route).unwrap_or(Route::MainTabs)
    }

    /// Auto-lock settings derived from this config.
    pub fn autolock(&self) -> AutoLockConfig {
        AutoLockConfig {
            timeout: self.inactivity_timeout(),
            sensitive_route: Route::from_name(&self.sensitive_route).unwrap_or(Route::AllProducts),
            login_route: Route::from_name(&self.login_route).unwrap_or(Route::Login),
        }
    }

    /// Store file location.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("store.json")),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!(target: "config", url = %url, "API URL overridden from environment");
                self.api_base_url = url;
            }
        }
    }
}

/// Default config path (`~/.catalock/config.json`).
pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("config.json"))
}

/// Load the config from the default path, apply the environment override
/// and validate.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?
    } else {
        AppConfig::default()
    };

    config.apply_env();
    for warning in config.validate() {
        tracing::warn!(target: "config", "{}", warning);
    }
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &config_path()?)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).with_context(|| format!("Failed to write config {}", path.display()))?;
    Ok(())
}
