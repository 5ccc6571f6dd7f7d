// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end session lifecycle tests
//!
//! Login, restart + restore, auto-lock on inactivity and backgrounding,
//! biometric re-entry. Timer tests run on a paused tokio clock, so
//! "10 seconds of inactivity" takes no wall time.
//!
//! ```bash
//! cargo test --test session_lifecycle_test
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::sleep;

use catalock::api::AuthService;
use catalock::error::{ApiError, BiometricError, LoginError, RestoreError};
use catalock::navigation::{Navigator, StackNavigator};
use catalock::security::{
    AllowListPolicy, AutoLockConfig, AutoLockController, BiometricGate, BiometricSensor,
    PrivilegePolicy, SessionStatus, SessionStore,
};
use catalock::signals::{ActivitySignal, EventBus, SignalSource};
use catalock::storage::{keys, FileStore, KeyValueStore, MemoryStore};
use catalock::types::{AppLifecycleState, AuthUser, Route};

// =============================================================================
// FIXTURES
// =============================================================================

/// Auth service accepting "<username>pass". Logins for "slow" wait for
/// `release` before answering.
struct MockAuth {
    valid_tokens: bool,
    release: Notify,
    logins: AtomicUsize,
}

impl MockAuth {
    fn new(valid_tokens: bool) -> Arc<Self> {
        Arc::new(Self {
            valid_tokens,
            release: Notify::new(),
            logins: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AuthService for MockAuth {
    async fn login(&self, username: &str, password: &str) -> Result<AuthUser, LoginError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if username == "slow" {
            self.release.notified().await;
        }
        if password != format!("{}pass", username) {
            return Err(LoginError::InvalidCredentials);
        }
        Ok(AuthUser {
            id: 1,
            username: username.to_string(),
            access_token: Some(format!("token-{}", username)),
            ..AuthUser::default()
        })
    }

    async fn validate(&self, _token: &str) -> Result<(), ApiError> {
        if self.valid_tokens {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

struct CountingPolicy {
    inner: AllowListPolicy,
    calls: AtomicUsize,
}

impl PrivilegePolicy for CountingPolicy {
    fn is_privileged(&self, username: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.is_privileged(username)
    }
}

struct AlwaysYes;

#[async_trait]
impl BiometricSensor for AlwaysYes {
    async fn is_sensor_available(&self) -> bool {
        true
    }

    async fn prompt(&self, _message: &str) -> bool {
        true
    }
}

struct Screen {
    session: Arc<SessionStore>,
    navigator: Arc<StackNavigator>,
    touches: Arc<EventBus<ActivitySignal>>,
    lifecycle: Arc<EventBus<AppLifecycleState>>,
    autolock: AutoLockController,
    store: Arc<MemoryStore>,
}

/// Logged-in user looking at the product list with auto-lock attached.
async fn on_product_list() -> Screen {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::BIOMETRIC_ENROLLED, "1").unwrap();
    let session = Arc::new(SessionStore::new(store.clone(), MockAuth::new(true)));
    session.login("emilys", "emilyspass").await.unwrap();

    let navigator = Arc::new(StackNavigator::new(Route::MainTabs));
    let touches = Arc::new(EventBus::<ActivitySignal>::new());
    let lifecycle = Arc::new(EventBus::<AppLifecycleState>::new());
    let sources: Vec<Arc<dyn SignalSource<ActivitySignal>>> = vec![touches.clone()];

    let autolock = AutoLockController::attach(
        AutoLockConfig::default(),
        session.clone(),
        navigator.clone(),
        sources,
        Some(lifecycle.clone() as Arc<dyn SignalSource<AppLifecycleState>>),
    )
    .unwrap();
    navigator.navigate(Route::AllProducts);

    Screen {
        session,
        navigator,
        touches,
        lifecycle,
        autolock,
        store,
    }
}

// =============================================================================
// AUTO-LOCK
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_steady_activity_never_locks() {
    let screen = on_product_list().await;

    // Ten minutes of scrolling, a touch every 9.9 seconds
    for i in 0..60 {
        sleep(Duration::from_millis(9_900)).await;
        let signal = if i % 2 == 0 { ActivitySignal::PointerMove } else { ActivitySignal::KeyboardFrameChanged };
        screen.touches.emit(signal);
    }

    assert_eq!(screen.autolock.lock_count(), 0);
    assert!(screen.session.is_logged_in());
    assert!(screen.navigator.is_on(&Route::AllProducts));
}

#[tokio::test(start_paused = true)]
async fn test_idle_on_product_list_locks_exactly_once() {
    let screen = on_product_list().await;

    sleep(Duration::from_secs(4)).await;
    screen.touches.emit(ActivitySignal::PointerStart);
    sleep(Duration::from_secs(10) + Duration::from_millis(100)).await;

    assert_eq!(screen.autolock.lock_count(), 1);
    assert_eq!(screen.session.status(), SessionStatus::LoggedOut);
    assert_eq!(screen.navigator.history(), vec![Route::Login]);
    assert!(screen.store.get(keys::TOKEN).is_none());
    assert!(screen.store.get(keys::PRIVILEGED).is_none());
    assert_eq!(screen.store.get(keys::BIOMETRIC_ENROLLED).as_deref(), Some("1"));

    // Nothing more fires, however long we wait
    sleep(Duration::from_secs(120)).await;
    assert_eq!(screen.autolock.lock_count(), 1);
    assert_eq!(screen.navigator.history(), vec![Route::Login]);
}

#[tokio::test(start_paused = true)]
async fn test_backgrounding_locks_immediately() {
    let screen = on_product_list().await;

    sleep(Duration::from_secs(1)).await;
    screen.lifecycle.emit(AppLifecycleState::Background);

    assert_eq!(screen.autolock.lock_count(), 1);
    assert!(screen.navigator.is_on(&Route::Login));

    // The pending timer of that cycle must not add a second lock
    sleep(Duration::from_secs(30)).await;
    assert_eq!(screen.autolock.lock_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inactive_then_background_locks_once() {
    let screen = on_product_list().await;

    screen.lifecycle.emit(AppLifecycleState::Inactive);
    screen.lifecycle.emit(AppLifecycleState::Background);
    sleep(Duration::from_secs(30)).await;

    assert_eq!(screen.autolock.lock_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_other_screen_suppresses_lock_without_replay() {
    let screen = on_product_list().await;

    sleep(Duration::from_secs(2)).await;
    screen.navigator.navigate(Route::SpecificCategory { category: "laptops".into() });

    // Idle well past the timeout on a non-sensitive screen
    sleep(Duration::from_secs(60)).await;
    assert_eq!(screen.autolock.lock_count(), 0);
    assert!(screen.session.is_logged_in());

    // Back on the product list: a fresh window, no immediate lock
    screen.navigator.back();
    assert!(screen.navigator.is_on(&Route::AllProducts));
    sleep(Duration::from_secs(5)).await;
    assert_eq!(screen.autolock.lock_count(), 0);

    sleep(Duration::from_secs(6)).await;
    assert_eq!(screen.autolock.lock_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_biometric_reentry_after_background() {
    let screen = on_product_list().await;
    // Auto-lock removed the token: nothing to resume
    screen.lifecycle.emit(AppLifecycleState::Background);
    assert!(screen.store.get(keys::TOKEN).is_none());

    let gate = BiometricGate::new(Arc::new(AlwaysYes), screen.session.clone(), screen.navigator.clone());
    assert_eq!(gate.attempt().await.unwrap_err(), BiometricError::NoStoredSession);

    // A token stored again by the host can be resumed without the server
    screen.store.set(keys::TOKEN, "token-emilys").unwrap();
    gate.attempt().await.unwrap();
    assert!(screen.session.is_logged_in());
    assert_eq!(screen.navigator.history(), vec![Route::MainTabs]);
}

// =============================================================================
// PERSISTENCE ACROSS RESTARTS
// =============================================================================

#[tokio::test]
async fn test_privilege_survives_restart_without_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let policy = Arc::new(CountingPolicy {
        inner: AllowListPolicy::default(),
        calls: AtomicUsize::new(0),
    });

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let session = SessionStore::with_policy(store, MockAuth::new(true), policy.clone());
        let record = session.login("michaelw", "michaelwpass").await.unwrap();
        assert!(record.is_privileged);
    }
    assert_eq!(policy.calls.load(Ordering::SeqCst), 1);

    // Restart
    let store = Arc::new(FileStore::open(&path).unwrap());
    let session = SessionStore::with_policy(store, MockAuth::new(true), policy.clone());
    let record = session.restore().await.unwrap();

    assert!(record.is_privileged);
    assert_eq!(record.username.as_deref(), Some("michaelw"));
    assert_eq!(policy.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_token_on_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    {
        let store = FileStore::open(&path).unwrap();
        store.set(keys::TOKEN, "revoked").unwrap();
        store.set(keys::USERNAME, "emilys").unwrap();
        store.set(keys::PRIVILEGED, "0").unwrap();
        store.set(keys::BIOMETRIC_ENROLLED, "1").unwrap();
    }

    let store = Arc::new(FileStore::open(&path).unwrap());
    let session = SessionStore::new(store.clone(), MockAuth::new(false));
    assert_eq!(session.restore().await.unwrap_err(), RestoreError::InvalidToken);
    assert_eq!(session.status(), SessionStatus::LoggedOut);

    let reopened = FileStore::open(&path).unwrap();
    assert!(reopened.get(keys::TOKEN).is_none());
    assert!(reopened.get(keys::PRIVILEGED).is_none());
    assert_eq!(reopened.get(keys::BIOMETRIC_ENROLLED).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_biometric_marker_survives_login_logout_cycles() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::BIOMETRIC_ENROLLED, "1").unwrap();
    let session = SessionStore::new(store.clone(), MockAuth::new(true));

    for user in ["emilys", "michaelw", "emilys"] {
        session.login(user, &format!("{}pass", user)).await.unwrap();
        session.logout();
        assert!(store.get(keys::TOKEN).is_none());
        assert_eq!(store.get(keys::BIOMETRIC_ENROLLED).as_deref(), Some("1"));
    }
}

// =============================================================================
// STALE RESULTS
// =============================================================================

#[tokio::test]
async fn test_login_response_after_logout_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let auth = MockAuth::new(true);
    let session = Arc::new(SessionStore::new(store.clone(), auth.clone()));

    let pending = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.login("slow", "slowpass").await })
    };
    while auth.logins.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.status(), SessionStatus::LoggingIn);

    session.logout();
    auth.release.notify_one();

    assert_eq!(pending.await.unwrap().unwrap_err(), LoginError::Superseded);
    assert_eq!(session.status(), SessionStatus::LoggedOut);
    assert!(store.get(keys::TOKEN).is_none());
    assert!(store.get(keys::USERNAME).is_none());
}

#[tokio::test]
async fn test_older_login_loses_to_newer() {
    let store = Arc::new(MemoryStore::new());
    let auth = MockAuth::new(true);
    let session = Arc::new(SessionStore::new(store.clone(), auth.clone()));

    let slow = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.login("slow", "slowpass").await })
    };
    while auth.logins.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    session.login("emilys", "emilyspass").await.unwrap();
    auth.release.notify_one();

    assert_eq!(slow.await.unwrap().unwrap_err(), LoginError::Superseded);
    assert_eq!(session.username().as_deref(), Some("emilys"));
    assert_eq!(store.get(keys::TOKEN).as_deref(), Some("token-emilys"));
}
