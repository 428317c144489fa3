//! Authentication-flow state machine.
//!
//! The active [`Screen`] is a pure function of the watched inputs
//! ([`evaluate`]); the controller gathers those inputs from its
//! collaborators, applies the transition, and performs the entry/exit side
//! effects (tour pause/resume, navigation, the deferred app-ready signal).
//! Keeping the transition table pure keeps it testable in isolation from any
//! rendering cycle.

use crate::{
    guard::{
        clock::Clock,
        services::{AuthService, Navigator, Route, TenantService, TourService},
        AppLifecycleState,
    },
    store::{KeyValueStore, ONBOARDING_COMPLETED_KEY},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{sleep, Duration},
};
use tracing::{debug, warn};

/// Grace period after backgrounding before biometric re-entry is forced;
/// keeps trivial app-switcher taps from re-prompting.
pub const BIOMETRIC_GRACE_MS: u64 = 30_000;

/// App-ready delay when a tenant is selected (richer entrance animation).
pub const TENANT_READY_DELAY_MS: u64 = 1_200;
pub const DEFAULT_READY_DELAY_MS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Loading,
    Onboarding,
    Login,
    BiometricAccess,
    AuthenticatedTransitioning,
}

/// Watched inputs of the transition function. `onboarding_completed` stays
/// `None` until the persisted flag resolves, so a storage glitch can never
/// skip onboarding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowInputs {
    pub onboarding_completed: Option<bool>,
    pub auth_loading: bool,
    pub is_authenticated: bool,
    pub biometric_enabled: bool,
    pub tenant_loading: bool,
    /// The stored session has been re-confirmed this launch (credentials or
    /// biometric), and not invalidated since.
    pub session_confirmed: bool,
    /// The user chose "use password" over biometric for this session.
    pub use_password_opt_out: bool,
    /// Login attempts are currently locked out. The lockout renders on the
    /// login screen; it never blocks biometric re-entry.
    pub rate_limited: bool,
}

/// Transition table, priority order, first match wins.
#[must_use]
pub fn evaluate(inputs: &FlowInputs) -> Screen {
    if inputs.onboarding_completed.is_none() || inputs.auth_loading || inputs.tenant_loading {
        return Screen::Loading;
    }
    if inputs.onboarding_completed == Some(false) {
        return Screen::Onboarding;
    }
    if inputs.is_authenticated
        && inputs.biometric_enabled
        && !inputs.session_confirmed
        && !inputs.use_password_opt_out
    {
        return Screen::BiometricAccess;
    }
    if inputs.is_authenticated && inputs.session_confirmed {
        return Screen::AuthenticatedTransitioning;
    }
    Screen::Login
}

#[derive(Debug, Clone)]
pub struct AuthFlowConfig {
    pub biometric_grace_ms: u64,
    pub tenant_ready_delay_ms: u64,
    pub default_ready_delay_ms: u64,
}

impl Default for AuthFlowConfig {
    fn default() -> Self {
        Self {
            biometric_grace_ms: BIOMETRIC_GRACE_MS,
            tenant_ready_delay_ms: TENANT_READY_DELAY_MS,
            default_ready_delay_ms: DEFAULT_READY_DELAY_MS,
        }
    }
}

#[derive(Debug)]
struct FlowState {
    screen: Screen,
    onboarding_completed: Option<bool>,
    session_confirmed: bool,
    use_password_opt_out: bool,
    rate_limited: bool,
    show_biometric_modal: bool,
    background_at: Option<u64>,
}

struct Inner {
    clock: Clock,
    config: AuthFlowConfig,
    store: Arc<dyn KeyValueStore>,
    auth: Arc<dyn AuthService>,
    tenant: Arc<dyn TenantService>,
    tour: Arc<dyn TourService>,
    navigator: Arc<dyn Navigator>,
    state: Mutex<FlowState>,
    ready_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.ready_task.lock().take() {
            handle.abort();
        }
    }
}

pub struct AuthFlowController {
    inner: Arc<Inner>,
}

impl AuthFlowController {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: AuthFlowConfig,
        store: Arc<dyn KeyValueStore>,
        auth: Arc<dyn AuthService>,
        tenant: Arc<dyn TenantService>,
        tour: Arc<dyn TourService>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                config,
                store,
                auth,
                tenant,
                tour,
                navigator,
                state: Mutex::new(FlowState {
                    screen: Screen::Loading,
                    onboarding_completed: None,
                    session_confirmed: false,
                    use_password_opt_out: false,
                    rate_limited: false,
                    show_biometric_modal: false,
                    background_at: None,
                }),
                ready_task: Mutex::new(None),
            }),
        }
    }

    /// Resolve the persisted onboarding flag and apply the first transition.
    ///
    /// A read failure keeps the flag unresolved (screen stays `Loading`), so
    /// onboarding is never skipped because of a storage glitch; calling
    /// `initialize` again retries the read.
    pub async fn initialize(&self) {
        match self.inner.store.get(ONBOARDING_COMPLETED_KEY).await {
            Ok(Some(raw)) => {
                let completed = serde_json::from_str::<bool>(&raw).unwrap_or(false);
                self.inner.state.lock().onboarding_completed = Some(completed);
            }
            Ok(None) => {
                self.inner.state.lock().onboarding_completed = Some(false);
            }
            Err(err) => {
                warn!("Could not read onboarding flag, staying on loading: {err:#}");
            }
        }
        self.refresh();
    }

    /// Recompute the active screen from the current inputs and run the
    /// entry side effects. Call whenever any watched input changes.
    pub fn refresh(&self) {
        let auth_loading = self.inner.auth.is_loading();
        let is_authenticated = self.inner.auth.is_authenticated();
        let biometric_enabled = self.inner.auth.is_biometric_enabled();
        let tenant_loading = self.inner.tenant.is_loading();

        let (previous, next) = {
            let mut state = self.inner.state.lock();
            let inputs = FlowInputs {
                onboarding_completed: state.onboarding_completed,
                auth_loading,
                is_authenticated,
                biometric_enabled,
                tenant_loading,
                session_confirmed: state.session_confirmed,
                use_password_opt_out: state.use_password_opt_out,
                rate_limited: state.rate_limited,
            };
            let previous = state.screen;
            state.screen = evaluate(&inputs);
            (previous, state.screen)
        };

        if next == Screen::BiometricAccess && previous != Screen::BiometricAccess {
            debug!("Entering biometric re-entry, pausing tour");
            self.inner.tour.pause_tour();
        }
    }

    /// Persist onboarding completion (best-effort) and move on: biometric
    /// re-entry when enabled, credential login otherwise.
    pub async fn handle_onboarding_finish(&self) {
        if let Err(err) = self.inner.store.put(ONBOARDING_COMPLETED_KEY, "true").await {
            warn!("Could not persist onboarding completion: {err:#}");
        }
        self.inner.state.lock().onboarding_completed = Some(true);
        self.refresh();
    }

    /// After a successful credential login: offer biometric enrollment when
    /// the hardware is there but not yet enrolled, otherwise navigate.
    pub fn handle_login_success(&self) {
        if self.inner.auth.is_biometric_available() && !self.inner.auth.is_biometric_enabled() {
            self.inner.state.lock().show_biometric_modal = true;
            return;
        }
        self.complete_authentication();
    }

    /// "Enable" on the biometric prompt: enroll, then navigate. Enrollment
    /// failure is logged and does not block entry.
    pub async fn handle_biometric_modal_enable(&self) {
        if let Err(failure) = self.inner.auth.enable_biometric().await {
            warn!("Could not enable biometric unlock: {failure}");
        }
        self.inner.state.lock().show_biometric_modal = false;
        self.complete_authentication();
    }

    /// "Skip" on the biometric prompt: just navigate.
    pub fn handle_biometric_modal_skip(&self) {
        self.inner.state.lock().show_biometric_modal = false;
        self.complete_authentication();
    }

    /// Biometric re-entry succeeded.
    pub fn handle_biometric_success(&self) {
        self.complete_authentication();
    }

    /// Explicit opt-out of biometric for this session; credential login is
    /// shown regardless of the stored session.
    pub fn handle_biometric_use_password(&self) {
        {
            let mut state = self.inner.state.lock();
            state.use_password_opt_out = true;
            state.session_confirmed = false;
        }
        self.refresh();
    }

    /// Reaction to the session-timeout guard: force re-entry.
    pub fn handle_session_expired(&self) {
        {
            let mut state = self.inner.state.lock();
            state.session_confirmed = false;
            state.use_password_opt_out = false;
            state.background_at = None;
        }
        self.refresh();
    }

    /// Observer hook for the rate limiter's output.
    pub fn set_rate_limited(&self, rate_limited: bool) {
        self.inner.state.lock().rate_limited = rate_limited;
        self.refresh();
    }

    /// Background re-entry rule: beyond the grace period, a confirmed
    /// session guarded by biometric must be re-confirmed.
    pub fn on_app_state_change(&self, next: AppLifecycleState) {
        match next {
            AppLifecycleState::Background => {
                // Collaborator reads stay outside the state lock, as in
                // `refresh`.
                let biometric_enabled = self.inner.auth.is_biometric_enabled();
                let mut state = self.inner.state.lock();
                if state.screen == Screen::AuthenticatedTransitioning && biometric_enabled {
                    state.background_at = Some(self.inner.clock.now_ms());
                }
            }
            AppLifecycleState::Active => {
                let invalidate = {
                    let mut state = self.inner.state.lock();
                    let Some(at) = state.background_at.take() else {
                        return;
                    };
                    self.inner.clock.now_ms().saturating_sub(at)
                        > self.inner.config.biometric_grace_ms
                };

                if invalidate {
                    debug!("Background grace exceeded, forcing biometric re-entry");
                    self.inner.state.lock().session_confirmed = false;
                    self.refresh();
                }
            }
            AppLifecycleState::Inactive => {}
        }
    }

    #[must_use]
    pub fn screen(&self) -> Screen {
        self.inner.state.lock().screen
    }

    #[must_use]
    pub fn show_biometric_modal(&self) -> bool {
        self.inner.state.lock().show_biometric_modal
    }

    /// Abort the deferred app-ready signal.
    pub fn dispose(&self) {
        if let Some(handle) = self.inner.ready_task.lock().take() {
            handle.abort();
        }
    }

    /// Terminal navigation: confirm the session, resume any paused tour,
    /// route to the landing destination, and schedule the one-shot app-ready
    /// signal (longer when a tenant is selected).
    fn complete_authentication(&self) {
        {
            let mut state = self.inner.state.lock();
            state.session_confirmed = true;
            state.use_password_opt_out = false;
            state.background_at = None;
        }
        self.inner.tour.resume_tour();

        let tenant_selected = self.inner.tenant.current_theme().is_some();
        let route = if tenant_selected {
            Route::MainCards
        } else {
            Route::Main
        };
        debug!("Authenticated, navigating to {}", route.as_str());
        self.inner.navigator.replace(route);
        self.refresh();

        let delay = if tenant_selected {
            self.inner.config.tenant_ready_delay_ms
        } else {
            self.inner.config.default_ready_delay_ms
        };
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(delay)).await;
            if let Some(inner) = weak.upgrade() {
                inner.tour.set_app_ready();
            }
        });
        if let Some(previous) = self.inner.ready_task.lock().replace(handle) {
            previous.abort();
        }
    }
}
