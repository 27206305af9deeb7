//! Authentication error record
//!
//! Every failure that leaves the core, whether towards native UI or towards
//! embedded web content, is an [`AuthError`]. Records are built by
//! [`ErrorHandler`](crate::translate::ErrorHandler) and never change after
//! construction.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

/// Coarse subsystem names used as [`AuthError::area`].
pub mod area {
    pub const STARTUP: &str = "Startup";
    pub const NATIVE_UI: &str = "Native UI";
    pub const LOGIN: &str = "Login";
    pub const REDIRECT: &str = "Redirect";
    pub const LOGOUT: &str = "Logout";
    pub const TOKEN: &str = "Token";
}

/// Stable, machine-readable error codes shared with web content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// General failure in native UI or core plumbing
    #[serde(rename = "mobile_ui_error")]
    GeneralUiError,
    LoadWebView,
    LoadCustomTab,
    LoadSystemBrowser,
    LoginRequired,
    RedirectCancelled,
    LoginRequestFailed,
    LoginResponseFailed,
    AuthorizationCodeGrant,
    TokenRenewalError,
    LogoutNotSupported,
    LogoutRequestFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::GeneralUiError => "mobile_ui_error",
            ErrorCode::LoadWebView => "load_web_view",
            ErrorCode::LoadCustomTab => "load_custom_tab",
            ErrorCode::LoadSystemBrowser => "load_system_browser",
            ErrorCode::LoginRequired => "login_required",
            ErrorCode::RedirectCancelled => "redirect_cancelled",
            ErrorCode::LoginRequestFailed => "login_request_failed",
            ErrorCode::LoginResponseFailed => "login_response_failed",
            ErrorCode::AuthorizationCodeGrant => "authorization_code_grant",
            ErrorCode::TokenRenewalError => "token_renewal_error",
            ErrorCode::LogoutNotSupported => "logout_not_supported",
            ErrorCode::LogoutRequestFailed => "logout_request_failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A translated authentication failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{area}: {user_message}")]
pub struct AuthError {
    area: String,
    error_code: ErrorCode,
    user_message: String,
    utc_time: DateTime<Utc>,
    details: Option<String>,
    provider_error_code: Option<String>,
    stack_trace: Option<String>,
}

impl AuthError {
    pub(crate) fn new(
        area: impl Into<String>,
        error_code: ErrorCode,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            area: area.into(),
            error_code,
            user_message: user_message.into(),
            utc_time: Utc::now(),
            details: None,
            provider_error_code: None,
            stack_trace: None,
        }
    }

    pub(crate) fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub(crate) fn with_provider_error_code(mut self, code: impl Into<String>) -> Self {
        self.provider_error_code = Some(code.into());
        self
    }

    pub(crate) fn with_stack_trace(mut self, stack: impl Into<String>) -> Self {
        self.stack_trace = Some(stack.into());
        self
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn utc_time(&self) -> DateTime<Utc> {
        self.utc_time
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn provider_error_code(&self) -> Option<&str> {
        self.provider_error_code.as_deref()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Capture time formatted for support staff, e.g. `Mar 07 2025 14:05`.
    pub fn display_time(&self) -> String {
        self.utc_time.format("%b %d %Y %H:%M").to_string()
    }

    /// Serializes the fields web content may see.
    ///
    /// `details` and `stack` are standard base64 so arbitrary text survives
    /// the script callback transport. Empty optional fields are omitted.
    pub fn to_json(&self) -> String {
        let mut data = Map::new();
        data.insert("area".into(), Value::String(self.area.clone()));
        data.insert(
            "errorCode".into(),
            Value::String(self.error_code.as_str().to_string()),
        );
        data.insert(
            "userMessage".into(),
            Value::String(self.user_message.clone()),
        );

        if let Some(code) = non_blank(&self.provider_error_code) {
            data.insert("appAuthCode".into(), Value::String(code.to_string()));
        }

        if let Some(details) = non_blank(&self.details) {
            data.insert("details".into(), Value::String(STANDARD.encode(details)));
        }

        if let Some(stack) = non_blank(&self.stack_trace) {
            data.insert("stack".into(), Value::String(STANDARD.encode(stack)));
        }

        Value::Object(data).to_string()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Writes translated errors to the log for developers and support staff.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Logs the error and returns whether it should be shown to the user.
    ///
    /// A cancelled redirect is an expected user action and is not surfaced.
    pub fn report(error: &AuthError) -> bool {
        if error.error_code == ErrorCode::RedirectCancelled {
            debug!(area = %error.area, "Redirect cancelled by the user");
            return false;
        }

        error!(
            area = %error.area,
            error_code = %error.error_code,
            utc_time = %error.display_time(),
            details = error.details.as_deref().unwrap_or_default(),
            app_auth_code = error.provider_error_code.as_deref().unwrap_or_default(),
            "{}",
            error.user_message
        );

        if let Some(stack) = &error.stack_trace {
            debug!(area = %error.area, stack = %stack, "Error diagnostics");
        }

        true
    }
}
