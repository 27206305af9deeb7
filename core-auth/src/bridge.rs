//! # Web Content Bridge
//!
//! The capability surface exposed to embedded web content. Every operation
//! takes the name of a global callback and answers exactly once with
//! `window[name](result, error)`: the result on success, the serialized
//! [`AuthError`] on failure.
//!
//! State-only operations run on the interactive context. Token retrieval
//! runs on the Tokio pool and delivers back through the interactive
//! context. Login and logout go through the coordinator's single-flight
//! guard; when the coordinator drops the request (another redirect is in
//! flight, or the user closed the browser) the callback receives
//! `redirect_cancelled`.

use bridge_traits::{callback_script, HostContext, ScriptHost};
use core_runtime::CoreConfig;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::coordinator::{CoordinatorHandle, FailureCallback, SuccessCallback};
use crate::error::{AuthError, ErrorReporter};
use crate::translate::ErrorHandler;

/// Operation names as called from web content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMethod {
    IsLoggedIn,
    GetAccessToken,
    RefreshAccessToken,
    Login,
    Logout,
    ExpireAccessToken,
    ExpireRefreshToken,
}

impl BridgeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMethod::IsLoggedIn => "isLoggedIn",
            BridgeMethod::GetAccessToken => "getAccessToken",
            BridgeMethod::RefreshAccessToken => "refreshAccessToken",
            BridgeMethod::Login => "login",
            BridgeMethod::Logout => "logout",
            BridgeMethod::ExpireAccessToken => "expireAccessToken",
            BridgeMethod::ExpireRefreshToken => "expireRefreshToken",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown bridge method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for BridgeMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isLoggedIn" => Ok(BridgeMethod::IsLoggedIn),
            "getAccessToken" => Ok(BridgeMethod::GetAccessToken),
            "refreshAccessToken" => Ok(BridgeMethod::RefreshAccessToken),
            "login" => Ok(BridgeMethod::Login),
            "logout" => Ok(BridgeMethod::Logout),
            "expireAccessToken" => Ok(BridgeMethod::ExpireAccessToken),
            "expireRefreshToken" => Ok(BridgeMethod::ExpireRefreshToken),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("The authentication coordinator has stopped")]
struct CoordinatorStopped;

#[derive(Debug, Error)]
#[error("The {0} request panicked")]
struct RequestPanicked(&'static str);

/// What a callback receives if it is dropped without an answer.
#[derive(Debug, Clone, Copy)]
enum Unanswered {
    Cancelled,
    Stopped,
}

/// Owns one callback name and answers it exactly once, falling back to an
/// error on drop.
struct CallbackGuard {
    callback: String,
    script_host: Arc<dyn ScriptHost>,
    unanswered: Unanswered,
    answered: bool,
}

impl CallbackGuard {
    fn new(callback: &str, script_host: Arc<dyn ScriptHost>, unanswered: Unanswered) -> Self {
        Self {
            callback: callback.to_string(),
            script_host,
            unanswered,
            answered: false,
        }
    }

    fn success(mut self, payload: &str) {
        self.answered = true;
        self.evaluate(&callback_script(&self.callback, Some(payload), None));
    }

    fn failure(mut self, error: AuthError) {
        self.answered = true;
        self.send_error(&error);
    }

    fn deliver(self, result: Result<String, AuthError>) {
        match result {
            Ok(payload) => self.success(&payload),
            Err(error) => self.failure(error),
        }
    }

    fn send_error(&self, error: &AuthError) {
        ErrorReporter::report(error);
        self.evaluate(&callback_script(&self.callback, None, Some(&error.to_json())));
    }

    fn evaluate(&self, script: &str) {
        if let Err(e) = self.script_host.evaluate_script(script) {
            warn!(callback = %self.callback, error = %e, "Bridge callback could not be delivered");
        }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        debug!(callback = %self.callback, "Bridge callback dropped without an answer");
        let error = match self.unanswered {
            Unanswered::Cancelled => ErrorHandler::redirect_cancelled(),
            Unanswered::Stopped => ErrorHandler::from_failure(&CoordinatorStopped),
        };
        self.send_error(&error);
    }
}

/// Entry points called from embedded web content.
#[derive(Clone)]
pub struct WebContentBridge {
    coordinator: CoordinatorHandle,
    host: HostContext,
    script_host: Arc<dyn ScriptHost>,
}

impl WebContentBridge {
    pub fn new(
        coordinator: CoordinatorHandle,
        host: HostContext,
        script_host: Arc<dyn ScriptHost>,
    ) -> Self {
        Self {
            coordinator,
            host,
            script_host,
        }
    }

    /// Presents redirects with the launcher configured in `config`.
    pub fn from_config(
        coordinator: CoordinatorHandle,
        config: &CoreConfig,
        script_host: Arc<dyn ScriptHost>,
    ) -> Self {
        Self::new(coordinator, Arc::clone(&config.browser_launcher), script_host)
    }

    /// Routes a call by method name, for hosts whose messaging transport
    /// delivers `(method, callback)` pairs.
    pub fn dispatch(&self, method: &str, callback: &str) {
        match method.parse::<BridgeMethod>() {
            Ok(BridgeMethod::IsLoggedIn) => self.is_logged_in(callback),
            Ok(BridgeMethod::GetAccessToken) => self.get_access_token(callback),
            Ok(BridgeMethod::RefreshAccessToken) => self.refresh_access_token(callback),
            Ok(BridgeMethod::Login) => self.login(callback),
            Ok(BridgeMethod::Logout) => self.logout(callback),
            Ok(BridgeMethod::ExpireAccessToken) => self.expire_access_token(callback),
            Ok(BridgeMethod::ExpireRefreshToken) => self.expire_refresh_token(callback),
            Err(unknown) => {
                warn!(method = %unknown.0, "Web content called an unknown bridge method");
                let guard = self.guard(callback, Unanswered::Stopped);
                self.coordinator
                    .run_interactive(move || guard.failure(ErrorHandler::from_failure(&unknown)));
            }
        }
    }

    pub fn is_logged_in(&self, callback: &str) {
        let guard = self.guard(callback, Unanswered::Stopped);
        let coordinator = self.coordinator.clone();

        self.coordinator.run_interactive(move || {
            let result = coordinator
                .authenticator()
                .map(|authenticator| authenticator.is_logged_in().to_string());
            guard.deliver(result);
        });
    }

    pub fn get_access_token(&self, callback: &str) {
        let guard = self.guard(callback, Unanswered::Stopped);
        let coordinator = self.coordinator.clone();

        self.coordinator.spawn_background(async move {
            let request = async {
                match coordinator.authenticator() {
                    Ok(authenticator) => authenticator
                        .get_access_token()
                        .await
                        .map_err(|err| ErrorHandler::from_failure(&err)),
                    Err(error) => Err(error),
                }
            };
            let result = catch_panic(BridgeMethod::GetAccessToken, request).await;
            coordinator.run_interactive(move || guard.deliver(result));
        });
    }

    pub fn refresh_access_token(&self, callback: &str) {
        let guard = self.guard(callback, Unanswered::Stopped);
        let coordinator = self.coordinator.clone();

        self.coordinator.spawn_background(async move {
            let request = async {
                match coordinator.authenticator() {
                    Ok(authenticator) => authenticator
                        .refresh_access_token()
                        .await
                        .map_err(|err| ErrorHandler::from_failure(&err)),
                    Err(error) => Err(error),
                }
            };
            let result = catch_panic(BridgeMethod::RefreshAccessToken, request).await;
            coordinator.run_interactive(move || guard.deliver(result));
        });
    }

    pub fn login(&self, callback: &str) {
        let (on_success, on_failure) = self.redirect_continuations(callback);
        self.coordinator
            .start_login(self.host.clone(), on_success, on_failure);
    }

    pub fn logout(&self, callback: &str) {
        let (on_success, on_failure) = self.redirect_continuations(callback);
        self.coordinator
            .start_logout(self.host.clone(), on_success, on_failure);
    }

    pub fn expire_access_token(&self, callback: &str) {
        let guard = self.guard(callback, Unanswered::Stopped);
        let coordinator = self.coordinator.clone();

        self.coordinator.run_interactive(move || {
            let result = coordinator.authenticator().and_then(|authenticator| {
                authenticator
                    .expire_access_token()
                    .map(|_| String::new())
                    .map_err(|err| ErrorHandler::from_failure(&err))
            });
            guard.deliver(result);
        });
    }

    pub fn expire_refresh_token(&self, callback: &str) {
        let guard = self.guard(callback, Unanswered::Stopped);
        let coordinator = self.coordinator.clone();

        self.coordinator.run_interactive(move || {
            let result = coordinator.authenticator().and_then(|authenticator| {
                authenticator
                    .expire_refresh_token()
                    .map(|_| String::new())
                    .map_err(|err| ErrorHandler::from_failure(&err))
            });
            guard.deliver(result);
        });
    }

    /// Translates and reports a failure to load the web content itself.
    /// The host calls this from its page-load error hook.
    pub fn content_load_failed(&self, url: Option<&str>, details: &str) -> AuthError {
        let error = ErrorHandler::from_web_content_load_error(url, details);
        ErrorReporter::report(&error);
        error
    }

    fn guard(&self, callback: &str, unanswered: Unanswered) -> CallbackGuard {
        CallbackGuard::new(callback, Arc::clone(&self.script_host), unanswered)
    }

    /// Both continuations share one guard; whichever runs first answers.
    /// If the coordinator drops both, the guard answers `redirect_cancelled`.
    fn redirect_continuations(
        &self,
        callback: &str,
    ) -> (SuccessCallback, FailureCallback) {
        let shared = Arc::new(Mutex::new(Some(self.guard(callback, Unanswered::Cancelled))));
        let for_failure = Arc::clone(&shared);

        let on_success: SuccessCallback = Box::new(move || {
            if let Some(guard) = shared.lock().ok().and_then(|mut g| g.take()) {
                guard.success("");
            }
        });

        let on_failure: FailureCallback = Box::new(move |error| {
            if let Some(guard) = for_failure.lock().ok().and_then(|mut g| g.take()) {
                guard.failure(error);
            }
        });

        (on_success, on_failure)
    }
}

/// Keeps the guard out of the unwinding path, so a panicking request is
/// still answered on the interactive context.
async fn catch_panic<F>(method: BridgeMethod, request: F) -> Result<String, AuthError>
where
    F: Future<Output = Result<String, AuthError>>,
{
    AssertUnwindSafe(request)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!(method = method.as_str(), "Bridge request panicked");
            Err(ErrorHandler::from_failure(&RequestPanicked(method.as_str())))
        })
}
