//! Cross-component scenarios: the auth flow controller reacting to the
//! session timeout guard and the rate limiter, plus persistence through a
//! real file-backed store.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use tokio::time::{advance, Duration};
use vigil::{
    guard::{
        auth_flow::{AuthFlowConfig, AuthFlowController, Screen},
        clock::Clock,
        rate_limiter::{RateLimitConfig, RateLimiter},
        services::{AuthService, BiometricFailure, Navigator, Route, TenantService, TourService},
        session_timeout::{SessionTimeoutConfig, SessionTimeoutGuard},
        AppLifecycleState,
    },
    store::{FileStore, KeyValueStore, MemoryStore, ONBOARDING_COMPLETED_KEY},
};

#[derive(Default)]
struct StubAuth {
    authenticated: AtomicBool,
    loading: AtomicBool,
    biometric_enabled: AtomicBool,
    biometric_available: AtomicBool,
    enroll_calls: AtomicU32,
    enroll_fails: AtomicBool,
}

impl StubAuth {
    fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    fn set_biometric(&self, enabled: bool, available: bool) {
        self.biometric_enabled.store(enabled, Ordering::SeqCst);
        self.biometric_available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthService for StubAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn is_biometric_enabled(&self) -> bool {
        self.biometric_enabled.load(Ordering::SeqCst)
    }

    fn is_biometric_available(&self) -> bool {
        self.biometric_available.load(Ordering::SeqCst)
    }

    async fn enable_biometric(&self) -> Result<(), BiometricFailure> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        if self.enroll_fails.load(Ordering::SeqCst) {
            return Err(BiometricFailure::UserCancelled);
        }
        self.biometric_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Auth stub that runs a hook on every biometric-enabled check; the hook
/// re-enters the controller to show collaborator reads happen unlocked.
#[derive(Default)]
struct ReentrantAuth {
    base: StubAuth,
    on_check: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

#[async_trait]
impl AuthService for ReentrantAuth {
    fn is_authenticated(&self) -> bool {
        self.base.is_authenticated()
    }

    fn is_loading(&self) -> bool {
        self.base.is_loading()
    }

    fn is_biometric_enabled(&self) -> bool {
        if let Some(hook) = self.on_check.lock().as_ref() {
            hook();
        }
        self.base.is_biometric_enabled()
    }

    fn is_biometric_available(&self) -> bool {
        self.base.is_biometric_available()
    }

    async fn enable_biometric(&self) -> Result<(), BiometricFailure> {
        self.base.enable_biometric().await
    }
}

/// Store whose reads can be toggled to fail; writes always land.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("storage unavailable");
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

#[derive(Default)]
struct StubTenant {
    theme: Mutex<Option<String>>,
    loading: AtomicBool,
}

impl TenantService for StubTenant {
    fn current_theme(&self) -> Option<String> {
        self.theme.lock().clone()
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct CountingTour {
    pauses: AtomicU32,
    resumes: AtomicU32,
    ready: AtomicU32,
}

impl TourService for CountingTour {
    fn pause_tour(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_tour(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn set_app_ready(&self) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl Navigator for RecordingNavigator {
    fn replace(&self, route: Route) {
        self.routes.lock().push(route);
    }
}

struct Fixture {
    auth: Arc<StubAuth>,
    tenant: Arc<StubTenant>,
    tour: Arc<CountingTour>,
    navigator: Arc<RecordingNavigator>,
    controller: AuthFlowController,
}

fn fixture(store: Arc<dyn KeyValueStore>) -> Fixture {
    let auth = Arc::new(StubAuth::default());
    let tenant = Arc::new(StubTenant::default());
    let tour = Arc::new(CountingTour::default());
    let navigator = Arc::new(RecordingNavigator::default());

    let controller = AuthFlowController::new(
        Clock::new(),
        AuthFlowConfig::default(),
        store,
        auth.clone(),
        tenant.clone(),
        tour.clone(),
        navigator.clone(),
    );

    Fixture {
        auth,
        tenant,
        tour,
        navigator,
        controller,
    }
}

async fn settle() {
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn first_launch_walks_onboarding_login_and_enrollment() {
    let store = Arc::new(MemoryStore::new());
    let f = fixture(store.clone());

    assert_eq!(f.controller.screen(), Screen::Loading);

    f.controller.initialize().await;
    assert_eq!(f.controller.screen(), Screen::Onboarding);

    // No stored session, so finishing onboarding lands on credential login.
    f.controller.handle_onboarding_finish().await;
    assert_eq!(f.controller.screen(), Screen::Login);
    assert_eq!(
        store.get(ONBOARDING_COMPLETED_KEY).await.unwrap().as_deref(),
        Some("true")
    );

    // Hardware available but not enrolled: prompt instead of navigating.
    f.auth.set_biometric(false, true);
    f.auth.set_authenticated(true);
    f.controller.handle_login_success();
    assert!(f.controller.show_biometric_modal());
    assert_eq!(f.controller.screen(), Screen::Login);

    f.controller.handle_biometric_modal_enable().await;
    assert!(!f.controller.show_biometric_modal());
    assert_eq!(f.auth.enroll_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.controller.screen(), Screen::AuthenticatedTransitioning);
    assert_eq!(f.navigator.routes.lock().as_slice(), &[Route::Main]);
    assert_eq!(f.tour.resumes.load(Ordering::SeqCst), 1);

    // App-ready is deferred; no tenant selected means the short delay.
    assert_eq!(f.tour.ready.load(Ordering::SeqCst), 0);
    settle().await;
    advance(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(f.tour.ready.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn enrollment_failure_still_navigates() {
    let f = fixture(Arc::new(MemoryStore::new()));
    f.controller.initialize().await;
    f.controller.handle_onboarding_finish().await;

    f.auth.set_biometric(false, true);
    f.auth.set_authenticated(true);
    f.auth.enroll_fails.store(true, Ordering::SeqCst);

    f.controller.handle_login_success();
    f.controller.handle_biometric_modal_enable().await;

    assert_eq!(f.controller.screen(), Screen::AuthenticatedTransitioning);
    assert_eq!(f.navigator.routes.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn skip_prompt_navigates_without_enrollment() {
    let f = fixture(Arc::new(MemoryStore::new()));
    f.controller.initialize().await;
    f.controller.handle_onboarding_finish().await;

    f.auth.set_biometric(false, true);
    f.auth.set_authenticated(true);
    f.controller.handle_login_success();
    f.controller.handle_biometric_modal_skip();

    assert_eq!(f.auth.enroll_calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.controller.screen(), Screen::AuthenticatedTransitioning);
}

#[tokio::test(start_paused = true)]
async fn tenant_selection_routes_to_cards_with_longer_ready_delay() {
    let f = fixture(Arc::new(MemoryStore::new()));
    *f.tenant.theme.lock() = Some("acme-bank".to_string());

    f.controller.initialize().await;
    f.controller.handle_onboarding_finish().await;
    f.auth.set_authenticated(true);
    f.controller.handle_login_success();

    assert_eq!(f.navigator.routes.lock().as_slice(), &[Route::MainCards]);

    // Tenant entrance animation gets the longer delay.
    settle().await;
    advance(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(f.tour.ready.load(Ordering::SeqCst), 0);
    advance(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(f.tour.ready.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn onboarding_finish_with_enrolled_session_goes_to_biometric() {
    let f = fixture(Arc::new(MemoryStore::new()));
    f.auth.set_authenticated(true);
    f.auth.set_biometric(true, true);

    f.controller.initialize().await;
    assert_eq!(f.controller.screen(), Screen::Onboarding);

    f.controller.handle_onboarding_finish().await;
    assert_eq!(f.controller.screen(), Screen::BiometricAccess);
    assert_eq!(f.tour.pauses.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn biometric_success_confirms_the_session() {
    let store = Arc::new(MemoryStore::new());
    store.put(ONBOARDING_COMPLETED_KEY, "true").await.unwrap();

    let f = fixture(store);
    f.auth.set_authenticated(true);
    f.auth.set_biometric(true, true);

    f.controller.initialize().await;
    assert_eq!(f.controller.screen(), Screen::BiometricAccess);

    f.controller.handle_biometric_success();
    assert_eq!(f.controller.screen(), Screen::AuthenticatedTransitioning);
    assert_eq!(f.tour.resumes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn use_password_opts_out_of_biometric() {
    let store = Arc::new(MemoryStore::new());
    store.put(ONBOARDING_COMPLETED_KEY, "true").await.unwrap();

    let f = fixture(store);
    f.auth.set_authenticated(true);
    f.auth.set_biometric(true, true);

    f.controller.initialize().await;
    assert_eq!(f.controller.screen(), Screen::BiometricAccess);

    f.controller.handle_biometric_use_password();
    assert_eq!(f.controller.screen(), Screen::Login);
}

#[tokio::test(start_paused = true)]
async fn background_past_grace_forces_biometric_reentry() {
    let store = Arc::new(MemoryStore::new());
    store.put(ONBOARDING_COMPLETED_KEY, "true").await.unwrap();

    let f = fixture(store);
    f.auth.set_authenticated(true);
    f.auth.set_biometric(true, true);

    f.controller.initialize().await;
    f.controller.handle_biometric_success();
    assert_eq!(f.controller.screen(), Screen::AuthenticatedTransitioning);
    assert_eq!(f.tour.pauses.load(Ordering::SeqCst), 1);

    f.controller.on_app_state_change(AppLifecycleState::Background);
    advance(Duration::from_millis(31_000)).await;
    f.controller.on_app_state_change(AppLifecycleState::Active);

    assert_eq!(f.controller.screen(), Screen::BiometricAccess);
    assert_eq!(f.tour.pauses.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn background_within_grace_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    store.put(ONBOARDING_COMPLETED_KEY, "true").await.unwrap();

    let f = fixture(store);
    f.auth.set_authenticated(true);
    f.auth.set_biometric(true, true);

    f.controller.initialize().await;
    f.controller.handle_biometric_success();

    f.controller.on_app_state_change(AppLifecycleState::Background);
    advance(Duration::from_millis(5_000)).await;
    f.controller.on_app_state_change(AppLifecycleState::Active);

    assert_eq!(f.controller.screen(), Screen::AuthenticatedTransitioning);
    assert_eq!(f.tour.pauses.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn session_expiry_forces_reentry_through_the_controller() {
    let store = Arc::new(MemoryStore::new());
    store.put(ONBOARDING_COMPLETED_KEY, "true").await.unwrap();

    let f = fixture(store);
    f.auth.set_authenticated(true);
    f.auth.set_biometric(true, true);

    f.controller.initialize().await;
    f.controller.handle_biometric_success();
    assert_eq!(f.controller.screen(), Screen::AuthenticatedTransitioning);

    let expired = Arc::new(AtomicBool::new(false));
    let flag = expired.clone();
    let guard = SessionTimeoutGuard::new(
        Clock::new(),
        SessionTimeoutConfig {
            timeout_ms: 60_000,
            warning_threshold_secs: 10,
            enabled: true,
        },
        Arc::new(move || flag.store(true, Ordering::SeqCst)),
        None,
    );
    settle().await;

    advance(Duration::from_millis(60_000)).await;
    settle().await;
    assert!(expired.load(Ordering::SeqCst));

    f.controller.handle_session_expired();
    assert_eq!(f.controller.screen(), Screen::BiometricAccess);
    assert_eq!(f.tour.pauses.load(Ordering::SeqCst), 2);

    guard.dispose();
}

#[tokio::test(start_paused = true)]
async fn loading_is_preserved_while_auth_resolves() {
    let f = fixture(Arc::new(MemoryStore::new()));
    f.auth.loading.store(true, Ordering::SeqCst);

    f.controller.initialize().await;
    assert_eq!(f.controller.screen(), Screen::Loading);

    f.auth.loading.store(false, Ordering::SeqCst);
    f.controller.refresh();
    assert_eq!(f.controller.screen(), Screen::Onboarding);
}

#[tokio::test(start_paused = true)]
async fn onboarding_read_failure_keeps_loading_until_a_retry_succeeds() {
    let store = Arc::new(FlakyStore::default());
    store.fail_reads.store(true, Ordering::SeqCst);

    let f = fixture(store.clone());
    f.controller.initialize().await;
    // Unresolved flag: the controller must not guess past onboarding.
    assert_eq!(f.controller.screen(), Screen::Loading);

    store.fail_reads.store(false, Ordering::SeqCst);
    f.controller.initialize().await;
    assert_eq!(f.controller.screen(), Screen::Onboarding);
}

#[tokio::test(start_paused = true)]
async fn background_hook_reads_collaborators_outside_the_state_lock() {
    let store = Arc::new(MemoryStore::new());
    store.put(ONBOARDING_COMPLETED_KEY, "true").await.unwrap();

    let auth = Arc::new(ReentrantAuth::default());
    auth.base.set_authenticated(true);
    auth.base.set_biometric(true, true);

    let controller = Arc::new(AuthFlowController::new(
        Clock::new(),
        AuthFlowConfig::default(),
        store,
        auth.clone(),
        Arc::new(StubTenant::default()),
        Arc::new(CountingTour::default()),
        Arc::new(RecordingNavigator::default()),
    ));
    controller.initialize().await;
    controller.handle_biometric_success();
    assert_eq!(controller.screen(), Screen::AuthenticatedTransitioning);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer = controller.clone();
    *auth.on_check.lock() = Some(Box::new(move || sink.lock().push(observer.screen())));

    // A hook that re-enters the controller would deadlock if the
    // biometric check ran under the state lock.
    controller.on_app_state_change(AppLifecycleState::Background);
    assert_eq!(seen.lock().as_slice(), &[Screen::AuthenticatedTransitioning]);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_flag_feeds_the_transition_inputs() {
    let f = fixture(Arc::new(MemoryStore::new()));
    f.controller.initialize().await;
    f.controller.handle_onboarding_finish().await;
    assert_eq!(f.controller.screen(), Screen::Login);

    f.controller.set_rate_limited(true);
    assert_eq!(f.controller.screen(), Screen::Login);

    f.controller.set_rate_limited(false);
    assert_eq!(f.controller.screen(), Screen::Login);
}

#[tokio::test(start_paused = true)]
async fn lockout_persists_across_restart_via_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    let clock = Clock::new();

    let limiter = RateLimiter::load(store.clone(), clock, RateLimitConfig::default()).await;
    for _ in 0..5 {
        limiter.record_failed_attempt().await;
    }
    assert!(limiter.is_locked());
    drop(limiter);

    // "Restart": a fresh limiter over the same directory sees the lockout.
    let reloaded = RateLimiter::load(store.clone(), clock, RateLimitConfig::default()).await;
    assert!(reloaded.is_locked());
    assert!(!reloaded.can_attempt_login());
    assert_eq!(reloaded.lockout_seconds_remaining(), Some(30));

    reloaded.reset_on_success().await;
    let third = RateLimiter::load(store, clock, RateLimitConfig::default()).await;
    assert!(!third.is_locked());
}

#[tokio::test(start_paused = true)]
async fn second_lockout_doubles_after_expiry_and_five_more_failures() {
    let limiter = RateLimiter::load(
        Arc::new(MemoryStore::new()),
        Clock::new(),
        RateLimitConfig::default(),
    )
    .await;

    for _ in 0..5 {
        limiter.record_failed_attempt().await;
    }
    assert_eq!(limiter.lockout_seconds_remaining(), Some(30));

    advance(Duration::from_millis(30_000)).await;
    settle().await;
    assert!(!limiter.is_locked());

    for _ in 0..5 {
        limiter.record_failed_attempt().await;
    }
    assert_eq!(limiter.lockout_seconds_remaining(), Some(60));
}
