// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy and user-facing alert formatting for catalock.
//!
//! Login, restore, biometric and catalog failures are never fatal. Each
//! error maps to an [`Alert`] that a host shows as a dismissable dialog,
//! and the `[✗] title / causes / fixes` formatter renders the same alert
//! for terminals.

use std::fmt;

/// Support URL appended to formatted errors.
pub const SUPPORT_URL: &str = "https://github.com/catalock/catalock/issues";

/// Formats an error message with title, causes, fixes, and help link.
///
/// # Example
///
/// ```
/// use catalock::error::format_error;
///
/// let error = format_error(
///     "Login Failed",
///     &["Username or password is wrong"],
///     &["Check your credentials and try again"],
/// );
/// assert!(error.contains("[✗] Login Failed"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n\n", title));

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", SUPPORT_URL));

    output
}

/// A dismissable alert: what the user sees when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    /// Render for a terminal using the standard error layout.
    pub fn render(&self) -> String {
        format_error(&self.title, &[self.message.as_str()], &[])
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Anything that can be surfaced to the user as an alert.
pub trait IntoAlert {
    fn to_alert(&self) -> Alert;
}

// =============================================================================
// LOGIN
// =============================================================================

/// Failure of a credential login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// The server rejected the username/password (or they were empty).
    InvalidCredentials,
    /// The request never produced a response.
    NetworkFailure(String),
    /// The server answered with something other than a token.
    ServerError(String),
    /// The response arrived after the session moved on (logout or a newer
    /// attempt) and was discarded.
    Superseded,
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid credentials. Please try again."),
            Self::NetworkFailure(msg) => write!(f, "Network error: {}", msg),
            Self::ServerError(msg) => write!(f, "{}", msg),
            Self::Superseded => write!(f, "Login attempt was cancelled"),
        }
    }
}

impl std::error::Error for LoginError {}

impl IntoAlert for LoginError {
    fn to_alert(&self) -> Alert {
        match self {
            Self::NetworkFailure(_) => Alert::new("Login Error", self.to_string()),
            _ => Alert::new("Login Failed", self.to_string()),
        }
    }
}

// =============================================================================
// RESTORE
// =============================================================================

/// Failure to resume a persisted session at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// No token in the persistent store.
    NoStoredSession,
    /// The stored token was rejected; it has been deleted.
    InvalidToken,
    /// The result arrived after the session moved on and was discarded.
    Superseded,
}

impl fmt::Display for RestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStoredSession => write!(f, "No stored session"),
            Self::InvalidToken => write!(f, "Stored session is no longer valid"),
            Self::Superseded => write!(f, "Session restore was cancelled"),
        }
    }
}

impl std::error::Error for RestoreError {}

impl IntoAlert for RestoreError {
    fn to_alert(&self) -> Alert {
        // Invalid tokens are recovered silently; the host routes to manual
        // login. The alert exists for hosts that want to explain why.
        Alert::new("Please log in", self.to_string())
    }
}

// =============================================================================
// BIOMETRIC
// =============================================================================

/// Failure of biometric re-entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiometricError {
    NotAvailable,
    NoStoredSession,
    AuthenticationFailed,
}

impl fmt::Display for BiometricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => write!(f, "Biometric authentication is not available on this device"),
            Self::NoStoredSession => write!(f, "Please login manually first."),
            Self::AuthenticationFailed => write!(f, "Try again or use password login."),
        }
    }
}

impl std::error::Error for BiometricError {}

impl IntoAlert for BiometricError {
    fn to_alert(&self) -> Alert {
        let title = match self {
            Self::NotAvailable => "Biometrics unavailable",
            Self::NoStoredSession => "No session found",
            Self::AuthenticationFailed => "Authentication failed",
        };
        Alert::new(title, self.to_string())
    }
}

// =============================================================================
// REMOTE API
// =============================================================================

/// Failure of a catalog API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401/403: bearer token missing, expired or rejected.
    Unauthorized,
    /// 404.
    NotFound(String),
    /// 429.
    RateLimited,
    /// 5xx response.
    Server(String),
    /// Any other non-2xx response.
    Rejected(u16, String),
    /// Transport-level failure (connect, timeout, DNS).
    Network(String),
    /// 2xx response whose body did not parse.
    Decode(String),
}

impl ApiError {
    /// Whether a read request should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Server(_) | Self::Network(_))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "Not authorized"),
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::RateLimited => write!(f, "Too many requests"),
            Self::Server(msg) => write!(f, "Server error: {}", msg),
            Self::Rejected(status, msg) => write!(f, "Request rejected (HTTP {}): {}", status, msg),
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Decode(msg) => write!(f, "Unexpected response: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoAlert for ApiError {
    fn to_alert(&self) -> Alert {
        Alert::new("Error", self.to_string())
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Failure of a catalog operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Destructive action attempted without the privilege flag.
    NotPermitted,
    Api(ApiError),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPermitted => write!(f, "You are not allowed to delete products"),
            Self::Api(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Api(err) => Some(err),
            Self::NotPermitted => None,
        }
    }
}

impl From<ApiError> for CatalogError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl IntoAlert for CatalogError {
    fn to_alert(&self) -> Alert {
        match self {
            Self::NotPermitted => Alert::new("Not allowed", self.to_string()),
            Self::Api(_) => Alert::new("Error", format!("Failed to load catalog: {}", self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = format_error(
            "Test Error",
            &["Cause 1", "Cause 2"],
            &["Fix 1", "Fix 2"],
        );

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("  - Cause 1"));
        assert!(error.contains("  2. Fix 2"));
        assert!(error.contains(SUPPORT_URL));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_login_alerts() {
        let alert = LoginError::InvalidCredentials.to_alert();
        assert_eq!(alert.title, "Login Failed");
        assert!(alert.message.contains("Invalid credentials"));

        let alert = LoginError::NetworkFailure("timed out".to_string()).to_alert();
        assert_eq!(alert.title, "Login Error");
        assert!(alert.render().contains("timed out"));
    }

    #[test]
    fn test_biometric_alerts_match_prompts() {
        assert_eq!(BiometricError::NoStoredSession.to_alert().title, "No session found");
        assert_eq!(
            BiometricError::AuthenticationFailed.to_alert().message,
            "Try again or use password login."
        );
    }

    #[test]
    fn test_api_error_transience() {
        assert!(ApiError::Network("reset".into()).is_transient());
        assert!(ApiError::RateLimited.is_transient());
        assert!(ApiError::Server("502".into()).is_transient());
        assert!(!ApiError::Unauthorized.is_transient());
        assert!(!ApiError::NotFound("x".into()).is_transient());
        assert!(!ApiError::Rejected(400, "bad".into()).is_transient());
    }

    #[test]
    fn test_catalog_error_from_api() {
        let err: CatalogError = ApiError::Unauthorized.into();
        assert_eq!(err, CatalogError::Api(ApiError::Unauthorized));
        assert!(std::error::Error::source(&err).is_some());
    }
}
