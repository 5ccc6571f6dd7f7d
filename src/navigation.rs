// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Navigation surface.
//!
//! The auto-lock controller needs three things from navigation: the current
//! route (to decide whether the sensitive screen is showing), a way to reset
//! the stack to the login route (so back-navigation cannot reach
//! authenticated screens), and a "state changed" signal that counts as user
//! activity.

use std::sync::{Arc, RwLock};

use crate::security::locks::{resilient_read, resilient_write};
use crate::signals::{ActivitySignal, EventBus, SignalSource};
use crate::types::Route;

/// Maximum history depth kept by [`StackNavigator`].
const MAX_HISTORY_DEPTH: usize = 20;

/// Navigation collaborator.
pub trait Navigator: Send + Sync {
    /// Route currently on top of the stack.
    fn current_route(&self) -> Option<Route>;

    /// Replace the whole stack with `route`.
    fn reset(&self, route: Route);

    /// Push `route` (with its params) on top of the stack.
    fn navigate(&self, route: Route);

    /// Pop the top route. Returns the new current route; the root is never
    /// popped.
    fn back(&self) -> Option<Route>;

    /// Stack contents, bottom first.
    fn history(&self) -> Vec<Route>;

    /// Emits [`ActivitySignal::NavigationChanged`] after every change.
    fn state_changes(&self) -> Arc<dyn SignalSource<ActivitySignal>>;

    fn is_on(&self, route: &Route) -> bool {
        self.current_route().as_ref() == Some(route)
    }
}

/// In-process navigation stack.
pub struct StackNavigator {
    history: RwLock<Vec<Route>>,
    max_depth: usize,
    changes: Arc<EventBus<ActivitySignal>>,
}

impl StackNavigator {
    /// Create a navigator showing `initial`.
    pub fn new(initial: Route) -> Self {
        Self {
            history: RwLock::new(vec![initial]),
            max_depth: MAX_HISTORY_DEPTH,
            changes: Arc::new(EventBus::new()),
        }
    }

    /// Breadcrumb trail of route titles.
    pub fn breadcrumb(&self) -> Vec<String> {
        resilient_read(&self.history).iter().map(|r| r.title()).collect()
    }

    pub fn can_go_back(&self) -> bool {
        resilient_read(&self.history).len() > 1
    }

    fn changed(&self) {
        // Emit after the history lock is released: listeners read the
        // current route.
        self.changes.emit(ActivitySignal::NavigationChanged);
    }
}

impl Navigator for StackNavigator {
    fn current_route(&self) -> Option<Route> {
        resilient_read(&self.history).last().cloned()
    }

    fn reset(&self, route: Route) {
        {
            let mut history = resilient_write(&self.history);
            history.clear();
            history.push(route.clone());
        }
        tracing::debug!(target: "navigation", route = %route, "Navigation reset");
        self.changed();
    }

    fn navigate(&self, route: Route) {
        {
            let mut history = resilient_write(&self.history);
            if history.len() >= self.max_depth {
                history.remove(0);
            }
            history.push(route.clone());
        }
        tracing::debug!(target: "navigation", route = %route, "Navigated");
        self.changed();
    }

    fn back(&self) -> Option<Route> {
        let current = {
            let mut history = resilient_write(&self.history);
            if history.len() > 1 {
                history.pop();
            }
            history.last().cloned()
        };
        self.changed();
        current
    }

    fn history(&self) -> Vec<Route> {
        resilient_read(&self.history).clone()
    }

    fn state_changes(&self) -> Arc<dyn SignalSource<ActivitySignal>> {
        self.changes.clone()
    }
}

impl Default for StackNavigator {
    fn default() -> Self {
        Self::new(Route::Login)
    }
}
