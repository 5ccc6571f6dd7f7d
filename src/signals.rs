// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Signal sources: the event inputs of the inactivity monitor.
//!
//! A [`SignalSource`] is anything a consumer can subscribe a listener to and
//! later unsubscribe from. The monitor holds one [`Subscription`] per source
//! it listens to; dropping or cancelling the subscription unsubscribes.
//!
//! [`EventBus`] is the stock implementation. Hosts feed platform events
//! (touches, key presses, keyboard frame changes, app state changes) into a
//! bus with [`EventBus::emit`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::security::locks::{resilient_read, resilient_write};

/// Identifier handed out by [`SignalSource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Listener callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Something that emits events of type `E` to subscribed listeners.
pub trait SignalSource<E>: Send + Sync {
    fn subscribe(&self, listener: Listener<E>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// User activity events that keep a session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    PointerStart,
    PointerMove,
    PointerEnd,
    KeyPress,
    KeyDown,
    KeyUp,
    KeyboardShown,
    KeyboardHidden,
    KeyboardFrameChanged,
    NavigationChanged,
}

impl ActivitySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointerStart => "pointer_start",
            Self::PointerMove => "pointer_move",
            Self::PointerEnd => "pointer_end",
            Self::KeyPress => "key_press",
            Self::KeyDown => "key_down",
            Self::KeyUp => "key_up",
            Self::KeyboardShown => "keyboard_shown",
            Self::KeyboardHidden => "keyboard_hidden",
            Self::KeyboardFrameChanged => "keyboard_frame_changed",
            Self::NavigationChanged => "navigation_changed",
        }
    }
}

impl fmt::Display for ActivitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle to one listener registration.
///
/// Unsubscribes on [`Subscription::cancel`] or on drop, whichever comes first.
pub struct Subscription {
    id: SubscriptionId,
    cancel: Option<Box<dyn FnOnce(SubscriptionId) + Send + Sync>>,
}

impl Subscription {
    /// Subscribe `listener` to `source` and keep the registration alive.
    pub fn attach<E: 'static>(source: Arc<dyn SignalSource<E>>, listener: Listener<E>) -> Self {
        let id = source.subscribe(listener);
        Self {
            id,
            cancel: Some(Box::new(move |id| source.unsubscribe(id))),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Unsubscribe. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Thread-safe broadcast of events to listeners.
///
/// Listeners are invoked in subscription order, outside the bus lock, so a
/// listener may subscribe or unsubscribe (itself included) while handling
/// an event.
pub struct EventBus<E> {
    listeners: RwLock<BTreeMap<SubscriptionId, Listener<E>>>,
    next_id: AtomicU64,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver `event` to every current listener.
    pub fn emit(&self, event: E) {
        let listeners: Vec<Listener<E>> = resilient_read(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        resilient_read(&self.listeners).len()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + Sync> SignalSource<E> for EventBus<E> {
    fn subscribe(&self, listener: Listener<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        resilient_write(&self.listeners).insert(id, listener);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        resilient_write(&self.listeners).remove(&id);
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
