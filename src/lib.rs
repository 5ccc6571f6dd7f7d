// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! catalock - Session and auto-lock library for catalog clients
//!
//! Log in, browse, walk away: the session locks itself.
//!
//! catalock authenticates a user against a dummyjson-style REST service,
//! keeps the session token in a persistent store, and logs the user out
//! when they go idle on the sensitive screen or send the app to the
//! background. A stored session can be resumed with a biometric challenge.
//!
//! **Activity signals** -> **Inactivity monitor** -> **Auto-lock** ->
//! **Logout + navigation reset** -> **Store update**
//!
//! # Core Modules
//!
//! - [`security`] - Session state, inactivity monitor, auto-lock, biometric gate
//! - [`signals`] - Subscribe/unsubscribe signal sources and an event bus
//! - [`navigation`] - Navigation stack the auto-lock resets
//! - [`storage`] - Persistent key-value store
//! - [`api`] - REST client for the catalog service
//! - [`cache`] - Persisted cache of remote listings
//! - [`catalog`] - Listing, category filtering, privileged delete
//! - [`config`] - `~/.catalock/config.json`
//! - [`error`] - Error types and user-facing alert formatting

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod navigation;
pub mod security;
pub mod signals;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{AppLifecycleState, AuthUser, Category, DeletedProduct, Product, Route};

// Re-export session and auto-lock types
pub use security::{
    ActivityWindow, AllowListPolicy, AutoLockConfig, AutoLockController, BiometricGate,
    BiometricSensor, InactivityMonitor, LockCause, PrivilegePolicy, SessionEvent, SessionRecord,
    SessionStatus, SessionStore,
};

pub use signals::{ActivitySignal, EventBus, SignalSource, Subscription};
pub use navigation::{Navigator, StackNavigator};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use api::{ApiClient, AuthService, CatalogApi};
pub use cache::{CacheStats, QueryCache};
pub use catalog::CatalogService;
pub use config::{load_config, save_config, AppConfig};
pub use utils::{mask_sensitive, redact_secrets};

// Re-export error utilities
pub use error::{
    format_error, Alert, ApiError, BiometricError, CatalogError, IntoAlert, LoginError, RestoreError,
};
