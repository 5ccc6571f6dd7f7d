// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inactivity monitor
//!
//! Listens to user-activity signals and app lifecycle transitions, and
//! raises a timeout when no activity was seen for the configured duration
//! or when the app leaves the foreground.
//!
//! ## Arming cycles
//!
//! Each call to `notify_activity` starts a new arming cycle: the pending
//! timer (if any) is aborted and a new one is scheduled `timeout` from now.
//! Every cycle carries a generation number. Whichever path reaches the
//! cycle first (the timer or a backgrounding transition) bumps the
//! generation under the monitor lock before invoking the callback, so the
//! callback runs at most once per cycle and a late timer sees a stale
//! generation and does nothing.
//!
//! Timers are tokio tasks on the runtime the monitor was created in and use
//! the tokio clock, so tests can drive them with a paused clock.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::security::locks::{resilient_read, resilient_write};
use crate::signals::{ActivitySignal, SignalSource, Subscription};
use crate::types::AppLifecycleState;

/// Why the timeout callback ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockCause {
    /// No activity for the full timeout
    Inactivity,
    /// The app went from active to inactive or background
    Backgrounded,
}

impl fmt::Display for LockCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockCause::Inactivity => write!(f, "inactivity"),
            LockCause::Backgrounded => write!(f, "backgrounded"),
        }
    }
}

/// Callback run on timeout.
pub type TimeoutCallback = Arc<dyn Fn(LockCause) + Send + Sync>;

/// Predicate deciding whether activity may (re)arm the timer.
pub type ActivityGate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Snapshot of the current arming cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindow {
    /// When the pending timeout fires, absent further activity
    pub deadline: Option<Instant>,
    pub armed: bool,
}

impl ActivityWindow {
    /// Time left until the deadline, zero once it passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

struct MonitorState {
    /// Unset until `configure`
    timeout: Option<Duration>,
    generation: u64,
    armed: bool,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
    /// Last lifecycle state reported by the lifecycle source
    lifecycle: AppLifecycleState,
    gate: Option<ActivityGate>,
    torn_down: bool,
}

impl MonitorState {
    /// Cancel the pending timer and close the current cycle.
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        self.armed = false;
        self.deadline = None;
    }
}

struct Shared {
    state: RwLock<MonitorState>,
    on_timeout: TimeoutCallback,
    runtime: Handle,
}

impl Shared {
    fn arm(self: &Arc<Self>, state: &mut MonitorState) {
        let Some(timeout) = state.timeout else {
            tracing::trace!(target: "inactivity", "Activity before configure ignored");
            return;
        };
        state.disarm();
        let generation = state.generation;
        let deadline = Instant::now() + timeout;
        state.armed = true;
        state.deadline = Some(deadline);

        let weak: Weak<Shared> = Arc::downgrade(self);
        state.timer = Some(self.runtime.spawn(async move {
            sleep_until(deadline).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire(generation, LockCause::Inactivity);
            }
        }));
    }

    /// Run the callback if cycle `generation` is still pending.
    fn fire(&self, generation: u64, cause: LockCause) {
        {
            let mut state = resilient_write(&self.state);
            if state.torn_down || !state.armed || state.generation != generation {
                tracing::trace!(target: "inactivity", generation, "Stale timeout ignored");
                return;
            }
            // The timer being fired is this task; drop its handle instead
            // of aborting it.
            state.timer.take();
            state.generation = state.generation.wrapping_add(1);
            state.armed = false;
            state.deadline = None;
        }

        tracing::info!(target: "inactivity", cause = %cause, "Inactivity timeout raised");
        (self.on_timeout)(cause);
    }

    fn gate_allows(&self) -> bool {
        let gate = resilient_read(&self.state).gate.clone();
        gate.map_or(true, |gate| gate())
    }

    fn notify_activity(self: &Arc<Self>) {
        if !self.gate_allows() {
            tracing::trace!(target: "inactivity", "Activity outside gate ignored");
            return;
        }
        let mut state = resilient_write(&self.state);
        if state.torn_down {
            return;
        }
        self.arm(&mut state);
    }

    fn notify_lifecycle_transition(self: &Arc<Self>, previous: AppLifecycleState, current: AppLifecycleState) {
        tracing::debug!(target: "inactivity", %previous, %current, "App state changed");

        if previous == AppLifecycleState::Active && current.is_away() {
            let generation = {
                let state = resilient_read(&self.state);
                if state.torn_down || !state.armed {
                    tracing::debug!(target: "inactivity", "Backgrounded with no armed cycle");
                    return;
                }
                state.generation
            };
            self.fire(generation, LockCause::Backgrounded);
        } else if previous.is_away() && current == AppLifecycleState::Active {
            self.notify_activity();
        }
    }

    fn on_lifecycle_signal(self: &Arc<Self>, current: AppLifecycleState) {
        let previous = {
            let mut state = resilient_write(&self.state);
            if state.torn_down {
                return;
            }
            std::mem::replace(&mut state.lifecycle, current)
        };
        if previous != current {
            self.notify_lifecycle_transition(previous, current);
        }
    }
}

/// Watches activity and lifecycle signals and raises a timeout.
pub struct InactivityMonitor {
    shared: Arc<Shared>,
}

impl InactivityMonitor {
    /// Create an unconfigured monitor. Activity is ignored until the first
    /// [`configure`](Self::configure).
    ///
    /// Must be called from inside a tokio runtime; timers are spawned on it.
    pub fn new<F>(on_timeout: F) -> Result<Self>
    where
        F: Fn(LockCause) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current()
            .context("Inactivity monitor must be created inside a tokio runtime")?;

        Ok(Self {
            shared: Arc::new(Shared {
                state: RwLock::new(MonitorState {
                    timeout: None,
                    generation: 0,
                    armed: false,
                    deadline: None,
                    timer: None,
                    subscriptions: Vec::new(),
                    lifecycle: AppLifecycleState::Active,
                    gate: None,
                    torn_down: false,
                }),
                on_timeout: Arc::new(on_timeout),
                runtime,
            }),
        })
    }

    /// Subscribe to `activity_sources` and `lifecycle_source` and arm the
    /// first window.
    ///
    /// Replaces any earlier configuration: old subscriptions and the old
    /// timer are gone before the new ones exist. Also revives a monitor
    /// that was torn down.
    pub fn configure(
        &self,
        timeout: Duration,
        activity_sources: Vec<Arc<dyn SignalSource<ActivitySignal>>>,
        lifecycle_source: Option<Arc<dyn SignalSource<AppLifecycleState>>>,
    ) {
        let allowed = self.shared.gate_allows();
        let mut state = resilient_write(&self.shared.state);

        state.disarm();
        for mut subscription in state.subscriptions.drain(..) {
            subscription.cancel();
        }
        state.timeout = Some(timeout);
        state.torn_down = false;
        state.lifecycle = AppLifecycleState::Active;

        for source in activity_sources {
            let weak = Arc::downgrade(&self.shared);
            state.subscriptions.push(Subscription::attach(
                source,
                Arc::new(move |signal: &ActivitySignal| {
                    if let Some(shared) = weak.upgrade() {
                        tracing::trace!(target: "inactivity", %signal, "Activity");
                        shared.notify_activity();
                    }
                }),
            ));
        }

        if let Some(source) = lifecycle_source {
            let weak = Arc::downgrade(&self.shared);
            state.subscriptions.push(Subscription::attach(
                source,
                Arc::new(move |current: &AppLifecycleState| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_lifecycle_signal(*current);
                    }
                }),
            ));
        }

        tracing::debug!(
            target: "inactivity",
            timeout_ms = timeout.as_millis() as u64,
            sources = state.subscriptions.len(),
            "Inactivity monitor configured"
        );

        if allowed {
            self.shared.arm(&mut state);
        }
    }

    /// Restrict activity-driven arming to when `gate` returns true.
    pub fn set_activity_gate<F>(&self, gate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        resilient_write(&self.shared.state).gate = Some(Arc::new(gate));
    }

    /// Record user activity: restart the timeout window.
    pub fn notify_activity(&self) {
        self.shared.notify_activity();
    }

    /// Handle an app state change from `previous` to `current`.
    ///
    /// Leaving the foreground fires the callback at once if a cycle is
    /// armed. Returning to the foreground counts as activity.
    pub fn notify_lifecycle_transition(&self, previous: AppLifecycleState, current: AppLifecycleState) {
        {
            let mut state = resilient_write(&self.shared.state);
            if state.torn_down {
                return;
            }
            state.lifecycle = current;
        }
        self.shared.notify_lifecycle_transition(previous, current);
    }

    /// Cancel the pending timeout without unsubscribing.
    pub fn suspend(&self) {
        resilient_write(&self.shared.state).disarm();
        tracing::debug!(target: "inactivity", "Inactivity monitor suspended");
    }

    pub fn window(&self) -> ActivityWindow {
        let state = resilient_read(&self.shared.state);
        ActivityWindow {
            deadline: state.deadline,
            armed: state.armed,
        }
    }

    /// Configured timeout, `None` before the first `configure`.
    pub fn timeout(&self) -> Option<Duration> {
        resilient_read(&self.shared.state).timeout
    }

    pub fn is_torn_down(&self) -> bool {
        resilient_read(&self.shared.state).torn_down
    }

    /// Unsubscribe from every source and cancel the pending timeout.
    /// Safe to call more than once.
    pub fn teardown(&self) {
        let subscriptions = {
            let mut state = resilient_write(&self.shared.state);
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.disarm();
            std::mem::take(&mut state.subscriptions)
        };
        // Unsubscribe outside the monitor lock.
        for mut subscription in subscriptions {
            subscription.cancel();
        }
        tracing::debug!(target: "inactivity", "Inactivity monitor torn down");
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for InactivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = resilient_read(&self.shared.state);
        f.debug_struct("InactivityMonitor")
            .field("timeout", &state.timeout)
            .field("armed", &state.armed)
            .field("subscriptions", &state.subscriptions.len())
            .field("torn_down", &state.torn_down)
            .finish()
    }
}
