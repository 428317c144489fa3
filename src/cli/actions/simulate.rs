//! Scripted end-to-end walk through the guard core against a real
//! `FileStore`. Drives the same components the host app embeds; run with
//! short values (e.g. `-t 10 -w 5 -l 3 -vv`) to watch a full cycle.

use crate::{
    guard::{
        auth_flow::{AuthFlowConfig, AuthFlowController},
        clock::Clock,
        rate_limiter::{RateLimitConfig, RateLimiter},
        services::{
            AuthService, BiometricAuthenticator, BiometricFailure, Navigator, Route,
            TenantService, TourService,
        },
        session_timeout::{SessionTimeoutConfig, SessionTimeoutGuard},
    },
    store::FileStore,
};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    sync::Notify,
    time::{sleep, Duration},
};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub state_dir: PathBuf,
    pub timeout_ms: u64,
    pub warning_threshold_secs: u64,
    pub max_attempts: u32,
    pub initial_lockout_ms: u64,
}

/// Auth collaborator stub: a session appears after the scripted login.
#[derive(Default)]
struct ScriptedAuth {
    authenticated: AtomicBool,
    biometric_enabled: AtomicBool,
}

#[async_trait]
impl AuthService for ScriptedAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn is_loading(&self) -> bool {
        false
    }

    fn is_biometric_enabled(&self) -> bool {
        self.biometric_enabled.load(Ordering::SeqCst)
    }

    fn is_biometric_available(&self) -> bool {
        true
    }

    async fn enable_biometric(&self) -> Result<(), BiometricFailure> {
        self.biometric_enabled.store(true, Ordering::SeqCst);
        info!("Biometric unlock enrolled");
        Ok(())
    }
}

/// Biometric hardware stub: the prompt always succeeds.
struct ScriptedBiometric;

#[async_trait]
impl BiometricAuthenticator for ScriptedBiometric {
    async fn authenticate(&self) -> Result<(), BiometricFailure> {
        info!("Biometric prompt accepted");
        Ok(())
    }
}

struct ScriptedTenant;

impl TenantService for ScriptedTenant {
    fn current_theme(&self) -> Option<String> {
        None
    }

    fn is_loading(&self) -> bool {
        false
    }
}

struct LoggingTour;

impl TourService for LoggingTour {
    fn pause_tour(&self) {
        info!("Tour paused");
    }

    fn resume_tour(&self) {
        info!("Tour resumed");
    }

    fn set_app_ready(&self) {
        info!("App ready signal fired");
    }
}

struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn replace(&self, route: Route) {
        info!("Navigating to {}", route.as_str());
    }
}

/// Execute the simulate action.
/// # Errors
/// Returns an error if the state directory cannot be used.
pub async fn execute(args: Args) -> Result<()> {
    info!("State directory: {}", args.state_dir.display());

    let store = Arc::new(FileStore::new(&args.state_dir));
    let clock = Clock::new();

    // Phase 1: rate limiting up to a lockout and through natural expiry.
    let limiter = RateLimiter::load(
        store.clone(),
        clock,
        RateLimitConfig {
            max_attempts: args.max_attempts,
            initial_lockout_ms: args.initial_lockout_ms,
            ..RateLimitConfig::default()
        },
    )
    .await;

    if limiter.is_locked() {
        info!(
            "Loaded a live lockout from a previous run: {}",
            limiter.lockout_message().unwrap_or_default()
        );
    }

    while limiter.can_attempt_login() {
        limiter.record_failed_attempt().await;
        info!(
            "Failed attempt {}/{}",
            limiter.current_attempts(),
            limiter.max_attempts()
        );
    }

    if let Some(message) = limiter.lockout_message() {
        warn!("{message}");
    }

    while limiter.is_locked() {
        sleep(Duration::from_secs(1)).await;
        if let Some(secs) = limiter.lockout_seconds_remaining() {
            info!("Locked out, {secs}s remaining");
        }
    }
    info!(
        "Lockout expired naturally; attempts reset to {}, lockout count kept at {}",
        limiter.current_attempts(),
        limiter.state().lockout_count
    );

    limiter.reset_on_success().await;
    info!("Successful login, limiter fully reset");

    // Phase 2: auth flow from onboarding to the landing screen.
    let auth = Arc::new(ScriptedAuth::default());
    let controller = AuthFlowController::new(
        clock,
        AuthFlowConfig::default(),
        store.clone(),
        auth.clone(),
        Arc::new(ScriptedTenant),
        Arc::new(LoggingTour),
        Arc::new(LoggingNavigator),
    );

    controller.initialize().await;
    info!("Initial screen: {:?}", controller.screen());

    controller.handle_onboarding_finish().await;
    info!("After onboarding: {:?}", controller.screen());

    auth.authenticated.store(true, Ordering::SeqCst);
    controller.handle_login_success();
    if controller.show_biometric_modal() {
        info!("Biometric hardware available, offering enrollment");
        controller.handle_biometric_modal_enable().await;
    }
    info!("After login: {:?}", controller.screen());

    // Phase 3: inactivity timeout with warning countdown.
    let expired = Arc::new(Notify::new());
    let notify = expired.clone();
    let guard = SessionTimeoutGuard::new(
        clock,
        SessionTimeoutConfig {
            timeout_ms: args.timeout_ms,
            warning_threshold_secs: args.warning_threshold_secs,
            enabled: true,
        },
        Arc::new(move || notify.notify_one()),
        Some(Arc::new(|secs| info!("Session expires in {secs}s"))),
    );

    info!(
        "Waiting out the {}s inactivity budget",
        args.timeout_ms / 1_000
    );
    expired.notified().await;
    warn!("{}", guard.expired_message());
    controller.handle_session_expired();
    info!("After expiry: {:?}", controller.screen());

    // Re-enter through the biometric prompt.
    let biometric = ScriptedBiometric;
    match biometric.authenticate().await {
        Ok(()) => controller.handle_biometric_success(),
        Err(failure) => {
            warn!("{failure}");
            controller.handle_biometric_use_password();
        }
    }
    info!("After re-entry: {:?}", controller.screen());

    guard.dispose();
    controller.dispose();
    limiter.dispose();

    Ok(())
}
