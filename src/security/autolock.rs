// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Auto-lock controller
//!
//! Binds the [`InactivityMonitor`] to the session: when the timeout fires
//! while the sensitive screen is showing, the session is logged out and the
//! navigation stack is reset to the login route, so back-navigation cannot
//! reach an authenticated screen.
//!
//! Activity only rearms the timer while the sensitive screen is current.
//! A timeout that fires elsewhere is suppressed and the cycle is spent: it
//! is not deferred, and navigating back to the sensitive screen starts a
//! fresh window instead of replaying the missed lock.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::navigation::Navigator;
use crate::security::inactivity::{ActivityWindow, InactivityMonitor, LockCause};
use crate::security::session::SessionStore;
use crate::signals::{ActivitySignal, SignalSource};
use crate::types::{AppLifecycleState, Route};

/// Default inactivity timeout: 10 seconds.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Auto-lock settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoLockConfig {
    pub timeout: Duration,
    /// Screen on which the lock is armed
    pub sensitive_route: Route,
    /// Route the stack is reset to on lock
    pub login_route: Route,
}

impl Default for AutoLockConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_INACTIVITY_TIMEOUT,
            sensitive_route: Route::AllProducts,
            login_route: Route::Login,
        }
    }
}

#[derive(Debug, Default)]
struct LockCounters {
    locks: AtomicU64,
    suppressed: AtomicU64,
}

/// Logs the session out on inactivity while the sensitive screen shows.
pub struct AutoLockController {
    monitor: InactivityMonitor,
    counters: Arc<LockCounters>,
    config: AutoLockConfig,
}

impl AutoLockController {
    /// Build the monitor and start watching.
    ///
    /// The navigator's state-change signal is always an activity source in
    /// addition to `activity_sources`.
    pub fn attach(
        config: AutoLockConfig,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        activity_sources: Vec<Arc<dyn SignalSource<ActivitySignal>>>,
        lifecycle_source: Option<Arc<dyn SignalSource<AppLifecycleState>>>,
    ) -> Result<Self> {
        let counters = Arc::new(LockCounters::default());

        let monitor = {
            let navigator = Arc::clone(&navigator);
            let counters = Arc::clone(&counters);
            let sensitive = config.sensitive_route.clone();
            let login = config.login_route.clone();
            InactivityMonitor::new(move |cause| {
                if !navigator.is_on(&sensitive) {
                    counters.suppressed.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(
                        target: "autolock",
                        %cause,
                        current = ?navigator.current_route(),
                        "Lock suppressed: sensitive screen not showing"
                    );
                    return;
                }
                lock(&session, navigator.as_ref(), &login, cause);
                counters.locks.fetch_add(1, Ordering::SeqCst);
            })?
        };

        {
            let navigator = Arc::clone(&navigator);
            let sensitive = config.sensitive_route.clone();
            monitor.set_activity_gate(move || navigator.is_on(&sensitive));
        }

        let mut sources = activity_sources;
        sources.push(navigator.state_changes());
        monitor.configure(config.timeout, sources, lifecycle_source);

        tracing::info!(
            target: "autolock",
            timeout_ms = config.timeout.as_millis() as u64,
            sensitive = %config.sensitive_route,
            "Auto-lock attached"
        );

        Ok(Self {
            monitor,
            counters,
            config,
        })
    }

    /// Number of times the session was locked.
    pub fn lock_count(&self) -> u64 {
        self.counters.locks.load(Ordering::SeqCst)
    }

    /// Number of timeouts that fired off the sensitive screen.
    pub fn suppressed_count(&self) -> u64 {
        self.counters.suppressed.load(Ordering::SeqCst)
    }

    pub fn window(&self) -> ActivityWindow {
        self.monitor.window()
    }

    pub fn config(&self) -> &AutoLockConfig {
        &self.config
    }

    /// Monitor driving this controller, for hosts that forward activity or
    /// lifecycle changes by hand.
    pub fn monitor(&self) -> &InactivityMonitor {
        &self.monitor
    }

    /// Stop watching. Pending timeouts are cancelled.
    pub fn detach(&self) {
        self.monitor.teardown();
    }
}

fn lock(session: &SessionStore, navigator: &dyn Navigator, login: &Route, cause: LockCause) {
    let user = session.username().unwrap_or_else(|| "-".to_string());
    tracing::warn!(target: "autolock", %cause, user = %user, "Session locked");
    session.logout();
    navigator.reset(login.clone());
}

impl std::fmt::Debug for AutoLockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoLockController")
            .field("config", &self.config)
            .field("locks", &self.lock_count())
            .field("suppressed", &self.suppressed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthService;
    use crate::error::{ApiError, LoginError};
    use crate::navigation::StackNavigator;
    use crate::signals::EventBus;
    use crate::storage::{keys, KeyValueStore, MemoryStore};
    use crate::types::AuthUser;
    use async_trait::async_trait;
    use tokio::time::sleep;

    struct AcceptAll;

    #[async_trait]
    impl AuthService for AcceptAll {
        async fn login(&self, username: &str, _password: &str) -> Result<AuthUser, LoginError> {
            Ok(AuthUser {
                username: username.to_string(),
                access_token: Some("tok".to_string()),
                ..AuthUser::default()
            })
        }

        async fn validate(&self, _token: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    async fn setup() -> (AutoLockController, Arc<SessionStore>, Arc<StackNavigator>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(SessionStore::new(store.clone(), Arc::new(AcceptAll)));
        session.login("emilys", "emilyspass").await.unwrap();

        let navigator = Arc::new(StackNavigator::new(Route::MainTabs));
        navigator.navigate(Route::AllProducts);

        let controller = AutoLockController::attach(
            AutoLockConfig::default(),
            session.clone(),
            navigator.clone(),
            Vec::new(),
            None,
        )
        .unwrap();
        (controller, session, navigator, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_after_timeout_on_sensitive_screen() {
        let (controller, session, navigator, store) = setup().await;

        sleep(Duration::from_secs(11)).await;
        assert_eq!(controller.lock_count(), 1);
        assert!(!session.is_logged_in());
        assert_eq!(navigator.history(), vec![Route::Login]);
        assert!(store.get(keys::TOKEN).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigating_away_suppresses_lock() {
        let (controller, session, navigator, _) = setup().await;

        sleep(Duration::from_secs(3)).await;
        navigator.navigate(Route::AllCategories);
        sleep(Duration::from_secs(20)).await;

        assert_eq!(controller.lock_count(), 0);
        assert_eq!(controller.suppressed_count(), 1);
        assert!(session.is_logged_in());

        // Coming back starts a fresh window; nothing is replayed
        navigator.back();
        assert_eq!(controller.lock_count(), 0);
        assert!(controller.window().armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_locking() {
        let (controller, session, _, _) = setup().await;
        controller.detach();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(controller.lock_count(), 0);
        assert!(session.is_logged_in());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_locks_immediately() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(SessionStore::new(store, Arc::new(AcceptAll)));
        session.login("emilys", "emilyspass").await.unwrap();
        let navigator = Arc::new(StackNavigator::new(Route::AllProducts));
        let lifecycle = Arc::new(EventBus::<AppLifecycleState>::new());

        let controller = AutoLockController::attach(
            AutoLockConfig::default(),
            session.clone(),
            navigator.clone(),
            Vec::new(),
            Some(lifecycle.clone()),
        )
        .unwrap();

        lifecycle.emit(AppLifecycleState::Background);
        assert_eq!(controller.lock_count(), 1);
        assert!(navigator.is_on(&Route::Login));
    }
}
