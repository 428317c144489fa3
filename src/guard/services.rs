//! Collaborator boundaries consumed by the auth flow.
//!
//! Everything here is owned by excluded layers of the app (HTTP/repository,
//! rendering, tenant branding, biometric hardware). The guard core only
//! observes these interfaces; real implementations live with their layers,
//! test doubles live with the tests.

use async_trait::async_trait;
use thiserror::Error;

/// Post-login navigation destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Main,
    MainCards,
}

impl Route {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::MainCards => "main/cards",
        }
    }
}

/// Why a biometric unlock did not produce a session.
///
/// Surfaced as a value, never thrown; the rendering layer maps these to
/// localized copy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BiometricFailure {
    #[error("biometric authentication is not available on this device")]
    NotAvailable,
    #[error("no saved session to unlock")]
    NoSavedSession,
    #[error("biometric authentication failed")]
    AuthFailed,
    #[error("biometric authentication was cancelled")]
    UserCancelled,
}

/// External auth collaborator (session storage + biometric enrollment).
#[async_trait]
pub trait AuthService: Send + Sync {
    /// A session exists in storage (not necessarily re-confirmed this launch).
    fn is_authenticated(&self) -> bool;

    fn is_loading(&self) -> bool;

    fn is_biometric_enabled(&self) -> bool;

    fn is_biometric_available(&self) -> bool;

    /// Enroll biometric unlock for the current session.
    ///
    /// # Errors
    /// Returns the typed reason when enrollment does not complete.
    async fn enable_biometric(&self) -> Result<(), BiometricFailure>;
}

/// Opaque biometric hardware capability.
#[async_trait]
pub trait BiometricAuthenticator: Send + Sync {
    /// # Errors
    /// Returns the typed reason when the prompt does not succeed.
    async fn authenticate(&self) -> Result<(), BiometricFailure>;
}

/// Tenant branding collaborator; `current_theme` doubles as "tenant selected".
pub trait TenantService: Send + Sync {
    fn current_theme(&self) -> Option<String>;

    fn is_loading(&self) -> bool;
}

/// In-app guided tour collaborator.
pub trait TourService: Send + Sync {
    fn pause_tour(&self);

    fn resume_tour(&self);

    fn set_app_ready(&self);
}

/// Navigation sink.
pub trait Navigator: Send + Sync {
    fn replace(&self, route: Route);
}
