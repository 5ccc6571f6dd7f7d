// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session security: state, auto-lock and biometric re-entry.
//!
//! ## Pieces
//!
//! - [`SessionStore`]: the authoritative session record and its transitions
//! - [`InactivityMonitor`]: activity and lifecycle driven timeout
//! - [`AutoLockController`]: logout plus navigation reset on timeout, armed
//!   only on the sensitive screen
//! - [`BiometricGate`]: resume a stored session after a biometric challenge
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use catalock::api::ApiClient;
//! use catalock::navigation::{Navigator, StackNavigator};
//! use catalock::security::{AutoLockConfig, AutoLockController, SessionStore};
//! use catalock::storage::MemoryStore;
//! use catalock::types::Route;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let api = Arc::new(ApiClient::new("https://dummyjson.com")?);
//! let session = Arc::new(SessionStore::new(Arc::new(MemoryStore::new()), api));
//! session.login("emilys", "emilyspass").await?;
//!
//! let navigator = Arc::new(StackNavigator::new(Route::MainTabs));
//! let autolock = AutoLockController::attach(
//!     AutoLockConfig::default(),
//!     session.clone(),
//!     navigator.clone(),
//!     Vec::new(),
//!     None,
//! )?;
//! navigator.navigate(Route::AllProducts);
//! # Ok(())
//! # }
//! ```

pub mod autolock;
pub mod biometric;
pub mod inactivity;
pub mod locks;
pub mod session;

pub use autolock::{AutoLockConfig, AutoLockController, DEFAULT_INACTIVITY_TIMEOUT};
pub use biometric::{BiometricGate, BiometricSensor, NoSensor};
pub use inactivity::{ActivityWindow, InactivityMonitor, LockCause};
pub use locks::{resilient_read, resilient_write};
pub use session::{
    AllowListPolicy, PrivilegePolicy, SessionEvent, SessionRecord, SessionStatus, SessionStore,
    DEFAULT_PRIVILEGED_USERS,
};
