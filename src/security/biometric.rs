// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Biometric re-entry
//!
//! Resumes a stored session with a biometric challenge instead of the
//! password, for example after a restart. It never creates a session: an
//! auto-lock logs out and deletes the token, so after one the gate reports
//! `NoStoredSession` and the user logs in again. The gate checks in a fixed
//! order:
//! stored session first (without touching the sensor), then sensor
//! availability, then the challenge itself.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::BiometricError;
use crate::navigation::Navigator;
use crate::security::session::{SessionRecord, SessionStore};
use crate::storage::keys;
use crate::types::Route;

/// Prompt shown when unlocking.
pub const UNLOCK_PROMPT: &str = "Login with biometrics";

/// Prompt shown when enrolling.
pub const ENROLL_PROMPT: &str = "Confirm biometrics to enable quick login";

/// Device biometric sensor.
#[async_trait]
pub trait BiometricSensor: Send + Sync {
    /// Capability probe.
    async fn is_sensor_available(&self) -> bool;

    /// Show the system prompt. True only on a successful match; a cancel or
    /// a mismatch is false.
    async fn prompt(&self, message: &str) -> bool;
}

/// Biometric re-entry gate.
pub struct BiometricGate {
    sensor: Arc<dyn BiometricSensor>,
    session: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    main_route: Route,
    available: OnceCell<bool>,
}

impl BiometricGate {
    pub fn new(
        sensor: Arc<dyn BiometricSensor>,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            sensor,
            session,
            navigator,
            main_route: Route::MainTabs,
            available: OnceCell::new(),
        }
    }

    /// Route shown after a successful unlock.
    pub fn with_main_route(mut self, route: Route) -> Self {
        self.main_route = route;
        self
    }

    /// Whether the device has a usable sensor. Probed once.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let available = self.sensor.is_sensor_available().await;
                tracing::debug!(target: "biometric", available, "Biometric sensor probed");
                available
            })
            .await
    }

    pub fn is_enrolled(&self) -> bool {
        self.session.store().get(keys::BIOMETRIC_ENROLLED).as_deref() == Some("1")
    }

    /// Unlock the stored session with a biometric challenge.
    ///
    /// On success the session resumes from the store without asking the
    /// server, and navigation resets to the main route.
    pub async fn attempt(&self) -> Result<SessionRecord, BiometricError> {
        if !self.session.store().contains(keys::TOKEN) {
            tracing::info!(target: "biometric", "Biometric unlock refused: no stored session");
            return Err(BiometricError::NoStoredSession);
        }

        if !self.is_available().await {
            return Err(BiometricError::NotAvailable);
        }

        if !self.sensor.prompt(UNLOCK_PROMPT).await {
            tracing::warn!(target: "biometric", "Biometric challenge failed");
            return Err(BiometricError::AuthenticationFailed);
        }

        // The token can vanish while the prompt is up (logout elsewhere).
        let record = self
            .session
            .resume_local()
            .map_err(|_| BiometricError::NoStoredSession)?;
        self.navigator.reset(self.main_route.clone());
        tracing::info!(target: "biometric", "Session unlocked with biometrics");
        Ok(record)
    }

    /// Enable biometric re-entry on this device.
    pub async fn enroll(&self) -> Result<(), BiometricError> {
        if !self.is_available().await {
            return Err(BiometricError::NotAvailable);
        }
        if !self.sensor.prompt(ENROLL_PROMPT).await {
            return Err(BiometricError::AuthenticationFailed);
        }
        crate::storage::set_logged(self.session.store().as_ref(), keys::BIOMETRIC_ENROLLED, "1");
        tracing::info!(target: "biometric", "Biometric login enabled");
        Ok(())
    }
}

impl std::fmt::Debug for BiometricGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricGate")
            .field("main_route", &self.main_route)
            .field("available", &self.available.get())
            .finish()
    }
}

/// Sensor for hosts without biometric hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSensor;

#[async_trait]
impl BiometricSensor for NoSensor {
    async fn is_sensor_available(&self) -> bool {
        false
    }

    async fn prompt(&self, _message: &str) -> bool {
        false
    }
}
