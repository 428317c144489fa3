//! # Vigil (Client Session Guard)
//!
//! `vigil` is the security core of a multi-tenant card-management client. It
//! owns the three pieces of session hygiene that have to agree with each
//! other across timers, persistence and app-lifecycle changes:
//!
//! 1. **Rate limiting:** failed login attempts trigger a progressively longer
//!    lockout (`guard::rate_limiter`). The lockout survives process restarts
//!    via a persisted record and decays after a long idle gap.
//! 2. **Inactivity timeout:** a session guard fires a per-second warning
//!    countdown and a one-shot hard expiry (`guard::session_timeout`),
//!    measuring background time by wall clock because platform timers do not
//!    fire while suspended.
//! 3. **Auth flow:** a screen state machine over
//!    onboarding / login / biometric re-entry / authenticated
//!    (`guard::auth_flow`), driven by a pure transition function and reacting
//!    to the two guards above.
//!
//! Transport, rendering, tenant branding and the biometric hardware itself
//! are collaborators behind the traits in `guard::services`; the persisted
//! key-value store behind `store::KeyValueStore`.

pub mod cli;
pub mod guard;
pub mod store;
