//! Failure translation
//!
//! One function per originating context. Each builds an [`AuthError`] with a
//! fixed area, code and message. Failures that are already translated pass
//! through unchanged, so translating twice is harmless.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use crate::authenticator::{short_type_name, AuthenticatorError, ProviderError};
use crate::error::{area, AuthError, ErrorCode};

/// Maps failures into [`AuthError`] records.
pub struct ErrorHandler;

impl ErrorHandler {
    /// The app could not start (bad configuration, authenticator setup).
    pub fn from_startup_error<E>(err: &E) -> AuthError
    where
        E: StdError + 'static,
    {
        translate(err, || {
            AuthError::new(
                area::STARTUP,
                ErrorCode::GeneralUiError,
                "A problem was encountered starting the app",
            )
        })
    }

    /// Any failure without a more specific context.
    pub fn from_failure<E>(err: &E) -> AuthError
    where
        E: StdError + 'static,
    {
        translate(err, || {
            AuthError::new(
                area::NATIVE_UI,
                ErrorCode::GeneralUiError,
                "A technical problem was encountered in the native UI",
            )
        })
    }

    pub fn from_system_browser_load_error<E>(err: &E, url: &str) -> AuthError
    where
        E: StdError + 'static,
    {
        translate(err, || {
            AuthError::new(
                area::NATIVE_UI,
                ErrorCode::LoadSystemBrowser,
                format!(
                    "A problem was encountered loading the system browser at {}",
                    url
                ),
            )
        })
    }

    pub fn from_in_app_browser_load_error<E>(err: &E, url: &str) -> AuthError
    where
        E: StdError + 'static,
    {
        translate(err, || {
            AuthError::new(
                area::NATIVE_UI,
                ErrorCode::LoadCustomTab,
                format!(
                    "A problem was encountered loading an in-app browser tab for URL: {}",
                    url
                ),
            )
        })
    }

    /// The embedded web content failed to load. There is no underlying
    /// error value, only the host's description.
    pub fn from_web_content_load_error(url: Option<&str>, details: &str) -> AuthError {
        AuthError::new(
            area::NATIVE_UI,
            ErrorCode::LoadWebView,
            format!(
                "A problem was encountered loading web content for URL: {}",
                url.unwrap_or("(none)")
            ),
        )
        .with_details(details)
    }

    /// Short-circuits an API call when there is no session.
    pub fn login_required() -> AuthError {
        AuthError::new(
            area::LOGIN,
            ErrorCode::LoginRequired,
            "A login is required so the API call was aborted",
        )
    }

    pub fn redirect_cancelled() -> AuthError {
        AuthError::new(
            area::REDIRECT,
            ErrorCode::RedirectCancelled,
            "The login request was cancelled",
        )
    }

    /// `code` is `login_request_failed`, `login_response_failed` or
    /// `authorization_code_grant` depending on the step that failed.
    pub fn from_login_operation_error<E>(err: &E, code: ErrorCode) -> AuthError
    where
        E: StdError + 'static,
    {
        translate(err, || {
            AuthError::new(
                area::LOGIN,
                code,
                "A technical problem occurred during login processing",
            )
        })
    }

    pub fn logout_not_supported() -> AuthError {
        AuthError::new(
            area::LOGOUT,
            ErrorCode::LogoutNotSupported,
            "Logout cannot be invoked because there is no end session endpoint",
        )
    }

    pub fn from_logout_operation_error<E>(err: &E) -> AuthError
    where
        E: StdError + 'static,
    {
        translate(err, || {
            AuthError::new(
                area::LOGOUT,
                ErrorCode::LogoutRequestFailed,
                "A technical problem occurred during logout processing",
            )
        })
    }

    pub fn from_token_error<E>(err: &E, code: ErrorCode) -> AuthError
    where
        E: StdError + 'static,
    {
        translate(err, || {
            AuthError::new(
                area::TOKEN,
                code,
                "A technical problem occurred during token processing",
            )
        })
    }
}

fn translate<E, F>(err: &E, base: F) -> AuthError
where
    E: StdError + 'static,
    F: FnOnce() -> AuthError,
{
    let dyn_err: &(dyn StdError + 'static) = err;

    if let Some(existing) = already_translated(dyn_err) {
        return existing;
    }

    let mut error = base();

    if let Some(code) = provider_error(dyn_err).and_then(ProviderError::provider_error_code) {
        error = error.with_provider_error_code(code);
    }

    let details = describe(dyn_err).unwrap_or_else(|| category_of(err).to_string());

    error
        .with_details(details)
        .with_stack_trace(diagnostic_trace(dyn_err))
}

fn already_translated(err: &(dyn StdError + 'static)) -> Option<AuthError> {
    if let Some(auth) = err.downcast_ref::<AuthError>() {
        return Some(auth.clone());
    }

    match err.downcast_ref::<AuthenticatorError>() {
        Some(AuthenticatorError::Translated(auth)) => Some(auth.clone()),
        _ => None,
    }
}

fn provider_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ProviderError> {
    if let Some(provider) = err.downcast_ref::<ProviderError>() {
        return Some(provider);
    }

    match err.downcast_ref::<AuthenticatorError>() {
        Some(AuthenticatorError::Provider(provider)) => Some(provider),
        _ => None,
    }
}

fn category_of<E: StdError + 'static>(err: &E) -> &'static str {
    let dyn_err: &(dyn StdError + 'static) = err;
    match dyn_err.downcast_ref::<AuthenticatorError>() {
        Some(inner) => inner.category(),
        None => short_type_name::<E>(),
    }
}

fn describe(err: &(dyn StdError + 'static)) -> Option<String> {
    let message = err.to_string();
    (!message.trim().is_empty()).then_some(message)
}

/// The error's source chain, followed by a backtrace when capture is enabled.
fn diagnostic_trace(err: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();

    while let Some(cause) = current {
        let text = cause.to_string();
        if lines.last() != Some(&text) {
            lines.push(format!("Caused by: {}", text));
        }
        current = cause.source();
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        lines.push(backtrace.to_string());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct Transport;

    #[derive(Debug, Error)]
    #[error("")]
    struct Silent;

    #[derive(Debug, Error)]
    #[error("token request failed")]
    struct Wrapped(#[source] Transport);

    #[test]
    fn test_startup_error() {
        let error = ErrorHandler::from_startup_error(&Transport);
        assert_eq!(error.area(), "Startup");
        assert_eq!(error.error_code(), ErrorCode::GeneralUiError);
        assert_eq!(error.details(), Some("connection reset"));
        assert!(error.stack_trace().is_some());
    }

    #[test]
    fn test_translation_is_idempotent() {
        let first = ErrorHandler::from_token_error(&Transport, ErrorCode::TokenRenewalError);
        let second = ErrorHandler::from_failure(&first);
        let third = ErrorHandler::from_login_operation_error(
            &AuthenticatorError::Translated(second.clone()),
            ErrorCode::LoginRequestFailed,
        );

        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn test_missing_message_uses_category() {
        let error = ErrorHandler::from_failure(&Silent);
        assert_eq!(error.details(), Some("Silent"));

        let wrapped = AuthenticatorError::other(Silent);
        let error = ErrorHandler::from_failure(&wrapped);
        assert_eq!(error.details(), Some("Silent"));
    }

    #[test]
    fn test_provider_code_is_attached() {
        let provider = AuthenticatorError::Provider(ProviderError::authorization(
            "access_denied",
            Some("User declined consent"),
        ));
        let error =
            ErrorHandler::from_login_operation_error(&provider, ErrorCode::LoginResponseFailed);

        assert_eq!(error.area(), "Login");
        assert_eq!(error.error_code(), ErrorCode::LoginResponseFailed);
        assert_eq!(error.provider_error_code(), Some("AUTHORIZATION/1002"));
        assert_eq!(
            error.details(),
            Some("access_denied: User declined consent")
        );
    }

    #[test]
    fn test_source_chain_in_stack() {
        let error = ErrorHandler::from_token_error(&Wrapped(Transport), ErrorCode::TokenRenewalError);
        let stack = error.stack_trace().unwrap();
        assert!(stack.starts_with("token request failed"));
        assert!(stack.contains("Caused by: connection reset"));
    }

    #[test]
    fn test_fixed_errors_have_no_details() {
        for error in [
            ErrorHandler::login_required(),
            ErrorHandler::redirect_cancelled(),
            ErrorHandler::logout_not_supported(),
        ] {
            assert!(error.details().is_none());
            assert!(error.stack_trace().is_none());
        }
        assert_eq!(ErrorHandler::redirect_cancelled().area(), "Redirect");
    }

    #[test]
    fn test_browser_load_errors() {
        let system = ErrorHandler::from_system_browser_load_error(&Transport, "https://idp/auth");
        assert_eq!(system.error_code(), ErrorCode::LoadSystemBrowser);
        assert!(system.user_message().contains("https://idp/auth"));

        let in_app = ErrorHandler::from_in_app_browser_load_error(&Transport, "https://idp/auth");
        assert_eq!(in_app.error_code(), ErrorCode::LoadCustomTab);

        let content = ErrorHandler::from_web_content_load_error(None, "net::ERR_NAME_NOT_RESOLVED");
        assert_eq!(content.error_code(), ErrorCode::LoadWebView);
        assert_eq!(content.details(), Some("net::ERR_NAME_NOT_RESOLVED"));
    }
}
