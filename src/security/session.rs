// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session state
//!
//! [`SessionStore`] owns the authoritative [`SessionRecord`] and performs
//! every transition: login, restore, resume and logout. It is built once and
//! shared by `Arc` with the auto-lock controller, the biometric gate, the
//! catalog service and the API client (as its bearer-token source).
//!
//! ## Invariants
//!
//! - The token is present iff the status is [`SessionStatus::LoggedIn`].
//! - The privilege flag is false whenever the status is not `LoggedIn`.
//! - Logout removes the token and privilege keys from the persistent store
//!   and never touches the biometric enrollment marker.
//! - An async result (login or restore) is applied only if no other
//!   transition happened while it was in flight. Every transition bumps an
//!   epoch; a late result sees a different epoch and is discarded.
//!
//! All transitions are logged as audit lines (`SessionEvent::to_audit_string`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::api::{AuthService, TokenSource};
use crate::error::{LoginError, RestoreError};
use crate::security::locks::{resilient_read, resilient_write};
use crate::storage::{delete_logged, keys, set_logged, KeyValueStore};
use crate::utils::mask_sensitive;

/// Users granted the privileged role by default.
pub const DEFAULT_PRIVILEGED_USERS: &[&str] = &["michaelw", "michaelwpass"];

/// Characters of a token shown in logs.
const TOKEN_LOG_PREFIX: usize = 8;

/// Authentication status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    LoggedOut,
    /// A login or restore is in flight
    LoggingIn,
    LoggedIn,
    /// Last login attempt failed, with the reason shown to the user
    LoginFailed(String),
}

impl SessionStatus {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionStatus::LoggedIn)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SessionStatus::LoggingIn)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::LoggedOut => write!(f, "LOGGED_OUT"),
            SessionStatus::LoggingIn => write!(f, "LOGGING_IN"),
            SessionStatus::LoggedIn => write!(f, "LOGGED_IN"),
            SessionStatus::LoginFailed(reason) => write!(f, "LOGIN_FAILED ({})", reason),
        }
    }
}

/// Snapshot of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: Option<String>,
    pub username: Option<String>,
    pub is_privileged: bool,
    pub status: SessionStatus,
}

impl SessionRecord {
    fn logged_in(token: String, username: Option<String>, is_privileged: bool) -> Self {
        Self {
            token: Some(token),
            username,
            is_privileged,
            status: SessionStatus::LoggedIn,
        }
    }

    fn with_status(status: SessionStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Session events for audit logging
#[derive(Debug, Clone)]
pub enum SessionEvent {
    LoginStarted { username: String },
    LoggedIn { username: String, privileged: bool, token: String },
    LoginFailed { username: String, reason: String },
    Restored { username: Option<String>, privileged: bool },
    RestoreRejected,
    Resumed { username: Option<String> },
    LoggedOut { username: Option<String> },
    /// An in-flight result arrived after another transition
    Superseded { operation: &'static str },
}

impl SessionEvent {
    /// Format event for audit log
    pub fn to_audit_string(&self) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        match self {
            SessionEvent::LoginStarted { username } => {
                format!("{} | LOGIN_STARTED | user={}", timestamp, username)
            }
            SessionEvent::LoggedIn { username, privileged, token } => format!(
                "{} | LOGIN_SUCCEEDED | user={} privileged={} token={}",
                timestamp,
                username,
                privileged,
                mask_sensitive(token, TOKEN_LOG_PREFIX)
            ),
            SessionEvent::LoginFailed { username, reason } => {
                format!("{} | LOGIN_FAILED | user={} reason={}", timestamp, username, reason)
            }
            SessionEvent::Restored { username, privileged } => format!(
                "{} | SESSION_RESTORED | user={} privileged={}",
                timestamp,
                username.as_deref().unwrap_or("-"),
                privileged
            ),
            SessionEvent::RestoreRejected => {
                format!("{} | SESSION_RESTORE_REJECTED | reason=invalid_token", timestamp)
            }
            SessionEvent::Resumed { username } => format!(
                "{} | SESSION_RESUMED | user={} method=local",
                timestamp,
                username.as_deref().unwrap_or("-")
            ),
            SessionEvent::LoggedOut { username } => format!(
                "{} | SESSION_LOGGED_OUT | user={}",
                timestamp,
                username.as_deref().unwrap_or("-")
            ),
            SessionEvent::Superseded { operation } => {
                format!("{} | RESULT_DISCARDED | operation={}", timestamp, operation)
            }
        }
    }
}

fn audit(event: SessionEvent) {
    tracing::info!(target: "audit", "{}", event.to_audit_string());
}

/// Decides at login whether a user gets the privileged role.
pub trait PrivilegePolicy: Send + Sync {
    fn is_privileged(&self, username: &str) -> bool;
}

/// Privileged iff the username is on a fixed allow-list.
#[derive(Debug, Clone)]
pub struct AllowListPolicy {
    users: Vec<String>,
}

impl AllowListPolicy {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }
}

impl Default for AllowListPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_PRIVILEGED_USERS.iter().copied())
    }
}

impl PrivilegePolicy for AllowListPolicy {
    fn is_privileged(&self, username: &str) -> bool {
        self.users.iter().any(|u| u == username)
    }
}

struct SessionInner {
    record: SessionRecord,
    epoch: u64,
}

impl SessionInner {
    /// Start a transition. Returns the epoch it runs in.
    fn advance(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }

    /// True if a result started in `epoch` may still be applied.
    fn still_pending(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.record.status.is_pending()
    }
}

/// Authoritative session state.
pub struct SessionStore {
    inner: RwLock<SessionInner>,
    store: Arc<dyn KeyValueStore>,
    auth: Arc<dyn AuthService>,
    policy: Arc<dyn PrivilegePolicy>,
}

impl SessionStore {
    /// Create a logged-out session using the default privilege policy.
    pub fn new(store: Arc<dyn KeyValueStore>, auth: Arc<dyn AuthService>) -> Self {
        Self::with_policy(store, auth, Arc::new(AllowListPolicy::default()))
    }

    pub fn with_policy(
        store: Arc<dyn KeyValueStore>,
        auth: Arc<dyn AuthService>,
        policy: Arc<dyn PrivilegePolicy>,
    ) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                record: SessionRecord::default(),
                epoch: 0,
            }),
            store,
            auth,
            policy,
        }
    }

    /// Log in with username and password.
    ///
    /// Calling this while logged in re-authenticates: the in-memory session
    /// drops to `LoggingIn` for the duration of the call. If the attempt
    /// fails the previous session is put back, in memory and in the store
    /// alike.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionRecord, LoginError> {
        let username = username.trim();
        if username.is_empty() || password.trim().is_empty() {
            let mut inner = resilient_write(&self.inner);
            inner.advance();
            inner.record = Self::after_failure(
                inner.record.clone(),
                LoginError::InvalidCredentials.to_string(),
            );
            audit(SessionEvent::LoginFailed {
                username: username.to_string(),
                reason: "empty credentials".to_string(),
            });
            return Err(LoginError::InvalidCredentials);
        }

        let (epoch, previous) = {
            let mut inner = resilient_write(&self.inner);
            let epoch = inner.advance();
            let previous = std::mem::replace(
                &mut inner.record,
                SessionRecord::with_status(SessionStatus::LoggingIn),
            );
            (epoch, previous)
        };
        audit(SessionEvent::LoginStarted {
            username: username.to_string(),
        });

        let result = self.auth.login(username, password).await;

        let mut inner = resilient_write(&self.inner);
        if !inner.still_pending(epoch) {
            audit(SessionEvent::Superseded { operation: "login" });
            return Err(LoginError::Superseded);
        }

        let token = match result.and_then(|user| {
            user.access_token
                .filter(|t| !t.is_empty())
                .ok_or_else(|| LoginError::ServerError("No token returned from server".to_string()))
        }) {
            Ok(token) => token,
            Err(e) => {
                inner.record = Self::after_failure(previous, e.to_string());
                audit(SessionEvent::LoginFailed {
                    username: username.to_string(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let privileged = self.policy.is_privileged(username);
        set_logged(self.store.as_ref(), keys::USERNAME, username);
        set_logged(self.store.as_ref(), keys::PRIVILEGED, if privileged { "1" } else { "0" });
        set_logged(self.store.as_ref(), keys::TOKEN, &token);

        inner.record = SessionRecord::logged_in(token.clone(), Some(username.to_string()), privileged);
        audit(SessionEvent::LoggedIn {
            username: username.to_string(),
            privileged,
            token,
        });
        Ok(inner.record.clone())
    }

    /// Record to keep after a failed login that started from `previous`.
    ///
    /// A live session survives a failed re-authentication; anything else
    /// becomes `LoginFailed`.
    fn after_failure(previous: SessionRecord, reason: String) -> SessionRecord {
        if previous.status.is_logged_in() {
            previous
        } else {
            SessionRecord::with_status(SessionStatus::LoginFailed(reason))
        }
    }

    /// Rebuild the session from the persistent store after a restart.
    ///
    /// The stored token is checked against the server. The privilege flag
    /// comes from the store; the policy is not consulted again.
    pub async fn restore(&self) -> Result<SessionRecord, RestoreError> {
        let token = self
            .store
            .get(keys::TOKEN)
            .filter(|t| !t.is_empty())
            .ok_or(RestoreError::NoStoredSession)?;

        let epoch = {
            let mut inner = resilient_write(&self.inner);
            let epoch = inner.advance();
            inner.record = SessionRecord::with_status(SessionStatus::LoggingIn);
            epoch
        };

        let result = self.auth.validate(&token).await;

        let mut inner = resilient_write(&self.inner);
        if !inner.still_pending(epoch) {
            audit(SessionEvent::Superseded { operation: "restore" });
            return Err(RestoreError::Superseded);
        }

        if let Err(e) = result {
            tracing::debug!(target: "session", "Token validation failed: {}", e);
            delete_logged(self.store.as_ref(), keys::TOKEN);
            delete_logged(self.store.as_ref(), keys::PRIVILEGED);
            inner.record = SessionRecord::default();
            audit(SessionEvent::RestoreRejected);
            return Err(RestoreError::InvalidToken);
        }

        inner.record = self.record_from_store(token);
        audit(SessionEvent::Restored {
            username: inner.record.username.clone(),
            privileged: inner.record.is_privileged,
        });
        Ok(inner.record.clone())
    }

    /// Resume the stored session without asking the server.
    ///
    /// Used after a successful biometric challenge.
    pub fn resume_local(&self) -> Result<SessionRecord, RestoreError> {
        let token = self
            .store
            .get(keys::TOKEN)
            .filter(|t| !t.is_empty())
            .ok_or(RestoreError::NoStoredSession)?;

        let mut inner = resilient_write(&self.inner);
        inner.advance();
        inner.record = self.record_from_store(token);
        audit(SessionEvent::Resumed {
            username: inner.record.username.clone(),
        });
        Ok(inner.record.clone())
    }

    /// End the session. Safe to call when already logged out.
    pub fn logout(&self) {
        let mut inner = resilient_write(&self.inner);
        inner.advance();
        let username = inner.record.username.take();
        let was_logged_in = inner.record.status.is_logged_in();
        inner.record = SessionRecord::default();

        delete_logged(self.store.as_ref(), keys::TOKEN);
        delete_logged(self.store.as_ref(), keys::PRIVILEGED);

        if was_logged_in {
            audit(SessionEvent::LoggedOut { username });
        } else {
            tracing::debug!(target: "session", "Logout while not logged in");
        }
    }

    fn record_from_store(&self, token: String) -> SessionRecord {
        let username = self.store.get(keys::USERNAME);
        let privileged = self.store.get(keys::PRIVILEGED).as_deref() == Some("1");
        SessionRecord::logged_in(token, username, privileged)
    }

    pub fn snapshot(&self) -> SessionRecord {
        resilient_read(&self.inner).record.clone()
    }

    pub fn status(&self) -> SessionStatus {
        resilient_read(&self.inner).record.status.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        resilient_read(&self.inner).record.status.is_logged_in()
    }

    pub fn is_privileged(&self) -> bool {
        let inner = resilient_read(&self.inner);
        inner.record.status.is_logged_in() && inner.record.is_privileged
    }

    pub fn token(&self) -> Option<String> {
        resilient_read(&self.inner).record.token.clone()
    }

    pub fn username(&self) -> Option<String> {
        resilient_read(&self.inner).record.username.clone()
    }

    /// Persistent store backing this session.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

impl TokenSource for SessionStore {
    fn bearer_token(&self) -> Option<String> {
        self.token()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = resilient_read(&self.inner);
        f.debug_struct("SessionStore")
            .field("status", &inner.record.status)
            .field("username", &inner.record.username)
            .field("epoch", &inner.epoch)
            .finish()
    }
}
