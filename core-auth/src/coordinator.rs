//! # Authentication Coordinator
//!
//! Owns the session state and serializes login/logout redirects.
//!
//! ## Overview
//!
//! [`AuthCoordinator::spawn`] starts a single task, the interactive
//! context, that drains a command queue and is the only code that touches
//! the session state. Everything else talks to it through a cloneable
//! [`CoordinatorHandle`]. Long-running work (the authorization code
//! exchange) runs on the Tokio pool and reports back with a command, so no
//! lock ever guards the session.
//!
//! ## Single flight
//!
//! At most one redirect, login or logout, is outstanding. A `start_*` that
//! arrives while one is pending is ignored: its continuations are dropped
//! without being called. Whatever way a redirect ends (success, failure,
//! cancellation) the pending slot is emptied and the phase returns to
//! [`SessionPhase::Idle`] in the same step.
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = AuthCoordinator::spawn();
//! coordinator.initialize(Arc::new(authenticator));
//!
//! coordinator.start_login(
//!     host.clone(),
//!     Box::new(|| println!("logged in")),
//!     Box::new(|error| println!("login failed: {}", error)),
//! );
//!
//! // Later, when the browser returns to the app:
//! coordinator.complete_redirect(RedirectCompletion::completed(RedirectKind::Login, response));
//! ```

use bridge_traits::{HostContext, RedirectCompletion, RedirectKind, RedirectResponse};
use futures::FutureExt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::authenticator::Authenticator;
use crate::error::{AuthError, ErrorCode};
use crate::translate::ErrorHandler;

/// Called once when a redirect operation succeeds.
pub type SuccessCallback = Box<dyn FnOnce() + Send + 'static>;

/// Called once with the translated error when a redirect operation fails.
pub type FailureCallback = Box<dyn FnOnce(AuthError) + Send + 'static>;

/// Work scheduled on the interactive context.
pub type InteractiveJob = Box<dyn FnOnce() + Send + 'static>;

/// Observable session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    LoginInFlight,
    LogoutInFlight,
}

impl SessionPhase {
    fn in_flight(kind: RedirectKind) -> Self {
        match kind {
            RedirectKind::Login => SessionPhase::LoginInFlight,
            RedirectKind::Logout => SessionPhase::LogoutInFlight,
        }
    }
}

/// Result of the awaitable [`CoordinatorHandle::login`] and
/// [`CoordinatorHandle::logout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Completed,
    Failed(AuthError),
    /// Another redirect was already in flight, the user cancelled, or the
    /// coordinator has stopped.
    NotStarted,
}

#[derive(Debug, Error)]
enum CoordinatorError {
    #[error("The authenticator has not been initialised")]
    NotInitialised,

    #[error("Background authentication work stopped unexpectedly: {0}")]
    BackgroundTask(String),

    #[error("The authenticator panicked while starting the {0} redirect")]
    StartPanicked(RedirectKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// The browser is showing the redirect
    Redirecting,
    /// The response is being processed in the background
    Completing,
}

struct PendingOperation {
    id: Uuid,
    kind: RedirectKind,
    stage: Stage,
    on_success: SuccessCallback,
    on_failure: FailureCallback,
}

enum Command {
    Start {
        kind: RedirectKind,
        host: HostContext,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    },
    Complete(RedirectCompletion),
    LoginFinished {
        id: Uuid,
        result: Result<(), AuthError>,
    },
    Run(InteractiveJob),
}

type SharedAuthenticator = Arc<OnceLock<Arc<dyn Authenticator>>>;

/// Entry point for creating the coordinator.
pub struct AuthCoordinator;

impl AuthCoordinator {
    /// Spawns the interactive context on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like `tokio::spawn`.
    pub fn spawn() -> CoordinatorHandle {
        let runtime = Handle::current();
        let (sender, receiver) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let authenticator: SharedAuthenticator = Arc::new(OnceLock::new());

        let handle = CoordinatorHandle {
            commands: sender,
            phase: phase_rx,
            authenticator: Arc::clone(&authenticator),
            runtime: runtime.clone(),
        };

        let actor = CoordinatorActor {
            receiver,
            handle: handle.downgrade(),
            phase: phase_tx,
            authenticator,
            pending: None,
        };

        runtime.spawn(actor.run());
        handle
    }
}

/// Cloneable access to the coordinator.
///
/// Every method only enqueues a command; none of them block.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<SessionPhase>,
    authenticator: SharedAuthenticator,
    runtime: Handle,
}

impl CoordinatorHandle {
    /// Installs the authenticator. Only the first call has any effect.
    pub fn initialize(&self, authenticator: Arc<dyn Authenticator>) -> bool {
        if self.authenticator.set(authenticator).is_err() {
            warn!("Authenticator already initialised; ignoring second initialisation");
            return false;
        }
        info!("Authenticator initialised");
        true
    }

    /// The installed authenticator, or a general UI error before
    /// [`initialize`](Self::initialize).
    pub fn authenticator(&self) -> Result<Arc<dyn Authenticator>, AuthError> {
        load_authenticator(&self.authenticator)
    }

    /// Requests a login redirect.
    ///
    /// The authenticator's `start_login`, including any provider discovery
    /// it performs, runs on the interactive context. Jobs queued with
    /// [`run_interactive`](Self::run_interactive) wait until it returns,
    /// which for a slow provider can be the HTTP timeout times the retries.
    pub fn start_login(
        &self,
        host: HostContext,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) {
        self.send(Command::Start {
            kind: RedirectKind::Login,
            host,
            on_success,
            on_failure,
        });
    }

    /// Delivers the login redirect result. `None` means the browser UI was
    /// closed without a response.
    pub fn finish_login(&self, response: Option<RedirectResponse>) {
        self.complete_redirect(RedirectCompletion {
            kind: RedirectKind::Login,
            response,
        });
    }

    pub fn start_logout(
        &self,
        host: HostContext,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) {
        self.send(Command::Start {
            kind: RedirectKind::Logout,
            host,
            on_success,
            on_failure,
        });
    }

    pub fn finish_logout(&self) {
        self.complete_redirect(RedirectCompletion::dismissed(RedirectKind::Logout));
    }

    /// The redirect-completion channel. Completions whose kind does not
    /// match the pending redirect are ignored.
    pub fn complete_redirect(&self, completion: RedirectCompletion) {
        self.send(Command::Complete(completion));
    }

    /// Runs `job` on the interactive context after every command already
    /// queued. Returns `false` if the coordinator has stopped; the job is
    /// then dropped.
    pub fn run_interactive<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.commands.send(Command::Run(Box::new(job))).is_ok()
    }

    /// Spawns background work on the coordinator's runtime.
    pub fn spawn_background<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    /// Waits until every command sent before this call has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.run_interactive(move || {
            let _ = tx.send(());
        }) {
            let _ = rx.await;
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// `true` when no redirect is pending.
    pub fn is_top_most(&self) -> bool {
        self.phase() == SessionPhase::Idle
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Starts a login and waits for it to end.
    pub async fn login(&self, host: HostContext) -> RedirectOutcome {
        let (on_success, on_failure, outcome) = outcome_channel();
        self.start_login(host, on_success, on_failure);
        outcome.await.unwrap_or(RedirectOutcome::NotStarted)
    }

    /// Starts a logout and waits for it to end.
    pub async fn logout(&self, host: HostContext) -> RedirectOutcome {
        let (on_success, on_failure, outcome) = outcome_channel();
        self.start_logout(host, on_success, on_failure);
        outcome.await.unwrap_or(RedirectOutcome::NotStarted)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Coordinator has stopped; command dropped");
        }
    }

    fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            commands: self.commands.downgrade(),
            runtime: self.runtime.clone(),
        }
    }
}

/// The actor's route back to itself. Weak, so the actor stops once every
/// [`CoordinatorHandle`] is gone.
struct WeakHandle {
    commands: mpsc::WeakUnboundedSender<Command>,
    runtime: Handle,
}

fn outcome_channel() -> (
    SuccessCallback,
    FailureCallback,
    oneshot::Receiver<RedirectOutcome>,
) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let failure_slot = Arc::clone(&slot);

    let on_success: SuccessCallback = Box::new(move || {
        if let Some(tx) = slot.lock().ok().and_then(|mut s| s.take()) {
            let _ = tx.send(RedirectOutcome::Completed);
        }
    });

    let on_failure: FailureCallback = Box::new(move |error| {
        if let Some(tx) = failure_slot.lock().ok().and_then(|mut s| s.take()) {
            let _ = tx.send(RedirectOutcome::Failed(error));
        }
    });

    (on_success, on_failure, rx)
}

fn load_authenticator(slot: &SharedAuthenticator) -> Result<Arc<dyn Authenticator>, AuthError> {
    slot.get()
        .cloned()
        .ok_or_else(|| ErrorHandler::from_failure(&CoordinatorError::NotInitialised))
}

struct CoordinatorActor {
    receiver: mpsc::UnboundedReceiver<Command>,
    handle: WeakHandle,
    phase: watch::Sender<SessionPhase>,
    authenticator: SharedAuthenticator,
    pending: Option<PendingOperation>,
}

impl CoordinatorActor {
    async fn run(mut self) {
        debug!("Coordinator started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                Command::Start {
                    kind,
                    host,
                    on_success,
                    on_failure,
                } => self.start(kind, host, on_success, on_failure).await,
                Command::Complete(completion) => self.complete(completion),
                Command::LoginFinished { id, result } => self.login_finished(id, result),
                Command::Run(job) => {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Interactive job panicked");
                    }
                }
            }
        }

        debug!("Coordinator stopped");
    }

    #[instrument(skip_all, fields(kind = %kind))]
    async fn start(
        &mut self,
        kind: RedirectKind,
        host: HostContext,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) {
        if let Some(pending) = &self.pending {
            debug!(
                pending_kind = %pending.kind,
                operation_id = %pending.id,
                "Redirect already in flight; ignoring start"
            );
            return;
        }

        let authenticator = match load_authenticator(&self.authenticator) {
            Ok(authenticator) => authenticator,
            Err(error) => {
                warn!("Redirect requested before initialisation");
                invoke_failure(on_failure, error);
                return;
            }
        };

        let launch = async {
            match kind {
                RedirectKind::Login => authenticator.start_login(&host, kind).await,
                RedirectKind::Logout => authenticator.start_logout(&host, kind).await,
            }
        };

        let result = match AssertUnwindSafe(launch).catch_unwind().await {
            Ok(result) => result.map_err(|err| start_error(kind, &err)),
            Err(_) => {
                error!("Authenticator panicked while starting the redirect");
                Err(start_error(kind, &CoordinatorError::StartPanicked(kind)))
            }
        };

        match result {
            Ok(()) => {
                let id = Uuid::new_v4();
                info!(operation_id = %id, "Redirect started");
                self.pending = Some(PendingOperation {
                    id,
                    kind,
                    stage: Stage::Redirecting,
                    on_success,
                    on_failure,
                });
                self.phase.send_replace(SessionPhase::in_flight(kind));
            }
            Err(error) => {
                warn!(error_code = %error.error_code(), "Redirect could not be started");
                invoke_failure(on_failure, error);
            }
        }
    }

    fn complete(&mut self, completion: RedirectCompletion) {
        let Some(pending) = self.pending.as_mut() else {
            debug!(kind = %completion.kind, "No redirect pending; ignoring completion");
            return;
        };

        if pending.kind != completion.kind || pending.stage != Stage::Redirecting {
            debug!(
                kind = %completion.kind,
                pending_kind = %pending.kind,
                "Completion does not match the pending redirect; ignoring"
            );
            return;
        }

        match completion.kind {
            RedirectKind::Login => match completion.response {
                None => {
                    if let Some(operation) = self.release() {
                        info!(operation_id = %operation.id, "Login redirect cancelled");
                    }
                }
                Some(response) => {
                    pending.stage = Stage::Completing;
                    let id = pending.id;
                    self.finish_login_in_background(id, response);
                }
            },
            RedirectKind::Logout => self.finish_logout(),
        }
    }

    fn finish_login_in_background(&mut self, id: Uuid, response: RedirectResponse) {
        let authenticator = match load_authenticator(&self.authenticator) {
            Ok(authenticator) => authenticator,
            Err(error) => {
                self.login_finished(id, Err(error));
                return;
            }
        };

        let Some(commands) = self.handle.commands.upgrade() else {
            return;
        };
        let runtime = self.handle.runtime.clone();

        self.handle.runtime.spawn(async move {
            let exchange = runtime.spawn(async move {
                authenticator.finish_login(response).await.map_err(|err| {
                    ErrorHandler::from_login_operation_error(&err, ErrorCode::LoginResponseFailed)
                })
            });

            let result = match exchange.await {
                Ok(result) => result,
                Err(join_error) => Err(ErrorHandler::from_login_operation_error(
                    &CoordinatorError::BackgroundTask(join_error.to_string()),
                    ErrorCode::LoginResponseFailed,
                )),
            };

            if commands.send(Command::LoginFinished { id, result }).is_err() {
                warn!(operation_id = %id, "Coordinator stopped before login completed");
            }
        });
    }

    fn login_finished(&mut self, id: Uuid, result: Result<(), AuthError>) {
        if self.pending.as_ref().map(|p| p.id) != Some(id) {
            debug!(operation_id = %id, "Stale login completion ignored");
            return;
        }

        let Some(operation) = self.pending.take() else {
            return;
        };

        match result {
            Ok(()) => {
                info!(operation_id = %id, "Login completed");
                invoke_success(operation.on_success);
            }
            Err(error) => {
                warn!(operation_id = %id, error_code = %error.error_code(), "Login failed");
                invoke_failure(operation.on_failure, error);
            }
        }

        self.phase.send_replace(SessionPhase::Idle);
    }

    fn finish_logout(&mut self) {
        let Some(operation) = self.pending.take() else {
            return;
        };

        let result = load_authenticator(&self.authenticator).and_then(|authenticator| {
            authenticator
                .finish_logout()
                .map_err(|err| ErrorHandler::from_logout_operation_error(&err))
        });

        match result {
            Ok(()) => {
                info!(operation_id = %operation.id, "Logout completed");
                invoke_success(operation.on_success);
            }
            Err(error) => {
                warn!(operation_id = %operation.id, "Logout failed");
                invoke_failure(operation.on_failure, error);
            }
        }

        self.phase.send_replace(SessionPhase::Idle);
    }

    /// Empties the slot and publishes `Idle` without calling either
    /// continuation.
    fn release(&mut self) -> Option<PendingOperation> {
        let operation = self.pending.take();
        self.phase.send_replace(SessionPhase::Idle);
        operation
    }
}

fn start_error<E>(kind: RedirectKind, err: &E) -> AuthError
where
    E: std::error::Error + 'static,
{
    match kind {
        RedirectKind::Login => {
            ErrorHandler::from_login_operation_error(err, ErrorCode::LoginRequestFailed)
        }
        RedirectKind::Logout => ErrorHandler::from_logout_operation_error(err),
    }
}

fn invoke_success(callback: SuccessCallback) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("Success continuation panicked");
    }
}

fn invoke_failure(callback: FailureCallback, error: AuthError) {
    if panic::catch_unwind(AssertUnwindSafe(move || callback(error))).is_err() {
        error!("Failure continuation panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::{AuthenticatorError, MockAuthenticator};
    use bridge_traits::{BrowserLauncher, RedirectRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopLauncher;

    impl BrowserLauncher for NoopLauncher {
        fn launch(&self, _request: &RedirectRequest) -> bridge_traits::error::Result<()> {
            Ok(())
        }
    }

    fn host() -> HostContext {
        Arc::new(NoopLauncher)
    }

    fn counters() -> (Arc<AtomicUsize>, SuccessCallback, FailureCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&count);
        let f = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                s.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |_: AuthError| {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[tokio::test]
    async fn test_authenticator_missing_before_initialise() {
        let coordinator = AuthCoordinator::spawn();
        let error = coordinator.authenticator().err().unwrap();
        assert_eq!(error.error_code(), ErrorCode::GeneralUiError);
        assert_eq!(
            error.details(),
            Some("The authenticator has not been initialised")
        );
    }

    #[tokio::test]
    async fn test_start_before_initialise_fails_through_continuation() {
        let coordinator = AuthCoordinator::spawn();
        let outcome = coordinator.login(host()).await;

        match outcome {
            RedirectOutcome::Failed(error) => {
                assert_eq!(error.error_code(), ErrorCode::GeneralUiError)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(coordinator.is_top_most());
    }

    #[tokio::test]
    async fn test_second_initialise_is_ignored() {
        let coordinator = AuthCoordinator::spawn();
        assert!(coordinator.initialize(Arc::new(MockAuthenticator::new())));
        assert!(!coordinator.initialize(Arc::new(MockAuthenticator::new())));
    }

    #[tokio::test]
    async fn test_concurrent_starts_launch_once() {
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_start_login()
            .times(1)
            .returning(|_, _| Ok(()));

        let coordinator = AuthCoordinator::spawn();
        coordinator.initialize(Arc::new(authenticator));

        let (count, on_success, on_failure) = counters();
        coordinator.start_login(host(), on_success, on_failure);
        for _ in 0..4 {
            let (_, s, f) = counters();
            coordinator.start_login(host(), s, f);
        }
        coordinator.flush().await;

        assert_eq!(coordinator.phase(), SessionPhase::LoginInFlight);
        assert!(!coordinator.is_top_most());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_failure_translates_and_stays_idle() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_start_login().returning(|_, _| {
            Err(AuthenticatorError::other(std::io::Error::other(
                "metadata lookup failed",
            )))
        });

        let coordinator = AuthCoordinator::spawn();
        coordinator.initialize(Arc::new(authenticator));

        match coordinator.login(host()).await {
            RedirectOutcome::Failed(error) => {
                assert_eq!(error.error_code(), ErrorCode::LoginRequestFailed);
                assert_eq!(error.details(), Some("metadata lookup failed"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(coordinator.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_login_invokes_nothing() {
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_start_login()
            .times(2)
            .returning(|_, _| Ok(()));
        authenticator.expect_finish_login().never();

        let coordinator = AuthCoordinator::spawn();
        coordinator.initialize(Arc::new(authenticator));

        let (count, on_success, on_failure) = counters();
        coordinator.start_login(host(), on_success, on_failure);
        coordinator.finish_login(None);
        coordinator.flush().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(coordinator.is_top_most());

        // The guard is released, so the next start launches again
        let (_, s, f) = counters();
        coordinator.start_login(host(), s, f);
        coordinator.flush().await;
        assert_eq!(coordinator.phase(), SessionPhase::LoginInFlight);
    }

    #[tokio::test]
    async fn test_mismatched_completion_is_ignored() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_start_login().returning(|_, _| Ok(()));
        authenticator.expect_finish_logout().never();

        let coordinator = AuthCoordinator::spawn();
        coordinator.initialize(Arc::new(authenticator));

        let (_, s, f) = counters();
        coordinator.start_login(host(), s, f);
        coordinator.finish_logout();
        coordinator.flush().await;

        assert_eq!(coordinator.phase(), SessionPhase::LoginInFlight);
    }

    #[tokio::test]
    async fn test_panicking_continuation_still_releases_guard() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_start_logout().returning(|_, _| Ok(()));
        authenticator.expect_finish_logout().returning(|| Ok(()));

        let coordinator = AuthCoordinator::spawn();
        coordinator.initialize(Arc::new(authenticator));

        coordinator.start_logout(
            host(),
            Box::new(|| panic!("continuation failure")),
            Box::new(|_: AuthError| {}),
        );
        coordinator.flush().await;
        assert_eq!(coordinator.phase(), SessionPhase::LogoutInFlight);

        coordinator.finish_logout();
        coordinator.flush().await;
        assert!(coordinator.is_top_most());
    }

    #[tokio::test]
    async fn test_run_interactive_is_serial() {
        let coordinator = AuthCoordinator::spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            assert!(coordinator.run_interactive(move || order.lock().unwrap().push(i)));
        }
        coordinator.flush().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
