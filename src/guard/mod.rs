pub mod auth_flow;
pub mod clock;
pub mod rate_limiter;
pub mod services;
pub mod session_timeout;

/// App lifecycle states reported by the host platform.
///
/// `Inactive` is the transient state mobile platforms report during app
/// switches and permission dialogs; the guards only act on the
/// `Active`/`Background` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycleState {
    Active,
    Inactive,
    Background,
}
