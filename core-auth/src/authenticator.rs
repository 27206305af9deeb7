//! # Authenticator Contract
//!
//! The OAuth/OIDC library the coordinator drives. The core ships one
//! implementation ([`OidcAuthenticator`](crate::oidc::OidcAuthenticator));
//! hosts may supply their own.
//!
//! ## Failures
//!
//! Implementations report failures as an [`AuthenticatorError`], decided at
//! the boundary:
//!
//! - `Translated` - already a final [`AuthError`], passed through untouched
//! - `Provider` - an OAuth protocol error with a numeric sub-code
//! - `Other` - anything else, carried with its category name

use async_trait::async_trait;
use bridge_traits::{BridgeError, HostContext, RedirectKind, RedirectResponse};
use std::fmt;
use thiserror::Error;

use crate::error::AuthError;

pub type Result<T> = std::result::Result<T, AuthenticatorError>;

/// Which protocol phase produced a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Authorization,
    Token,
    General,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Authorization => "AUTHORIZATION",
            ProviderErrorKind::Token => "TOKEN",
            ProviderErrorKind::General => "GENERAL",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An OAuth error response, classified by phase and numeric code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{description}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// Zero means the provider gave no classifiable code
    pub code: u32,
    pub description: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, code: u32, description: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            description: description.into(),
        }
    }

    /// Maps an `error` value from an authorization response (RFC 6749 4.1.2.1).
    pub fn authorization(error: &str, description: Option<&str>) -> Self {
        let code = match error {
            "invalid_request" => 1000,
            "unauthorized_client" => 1001,
            "access_denied" => 1002,
            "unsupported_response_type" => 1003,
            "invalid_scope" => 1004,
            "server_error" => 1005,
            "temporarily_unavailable" => 1006,
            "client_error" => 1007,
            _ => 1008,
        };
        Self::new(
            ProviderErrorKind::Authorization,
            code,
            Self::describe(error, description),
        )
    }

    /// Maps an `error` value from a token endpoint response (RFC 6749 5.2).
    pub fn token(error: &str, description: Option<&str>) -> Self {
        let code = match error {
            "invalid_request" => 2000,
            "invalid_client" => 2001,
            "invalid_grant" => 2002,
            "unauthorized_client" => 2003,
            "unsupported_grant_type" => 2004,
            "invalid_scope" => 2005,
            "client_error" => 2006,
            _ => 2007,
        };
        Self::new(ProviderErrorKind::Token, code, Self::describe(error, description))
    }

    /// The response `state` did not match the one sent with the request.
    pub fn state_mismatch() -> Self {
        Self::new(
            ProviderErrorKind::General,
            9,
            "The authorization response state does not match the request",
        )
    }

    /// `"<KIND>/<code>"`, or `None` when there is no code.
    pub fn provider_error_code(&self) -> Option<String> {
        (self.code != 0).then(|| format!("{}/{}", self.kind, self.code))
    }

    fn describe(error: &str, description: Option<&str>) -> String {
        match description {
            Some(text) if !text.is_empty() => format!("{}: {}", error, text),
            _ => error.to_string(),
        }
    }
}

/// Failure reported by an [`Authenticator`].
#[derive(Error, Debug)]
pub enum AuthenticatorError {
    #[error(transparent)]
    Translated(#[from] AuthError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{source}")]
    Other {
        /// Short type name of the original failure
        category: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl AuthenticatorError {
    /// Wraps any error, recording its type name as the category.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other {
            category: short_type_name::<E>(),
            source: anyhow::Error::new(error),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            AuthenticatorError::Translated(_) => "AuthError",
            AuthenticatorError::Provider(_) => "ProviderError",
            AuthenticatorError::Other { category, .. } => category,
        }
    }
}

impl From<BridgeError> for AuthenticatorError {
    fn from(error: BridgeError) -> Self {
        Self::other(error)
    }
}

/// `core_auth::oidc::OidcError` becomes `OidcError`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// OAuth/OIDC operations the coordinator drives.
///
/// Redirect operations (`start_*`) return once the browser has been launched.
/// The outcome comes back later as a [`RedirectResponse`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether a session exists. No side effects.
    fn is_logged_in(&self) -> bool;

    /// Prepares and launches the login redirect. May perform discovery first.
    async fn start_login(&self, host: &HostContext, kind: RedirectKind) -> Result<()>;

    /// Processes the login response, typically exchanging a code for tokens.
    ///
    /// A response that carries neither a code nor an error is a user
    /// cancellation and fails with `redirect_cancelled`.
    async fn finish_login(&self, response: RedirectResponse) -> Result<()>;

    /// A valid access token, refreshing first when stale.
    ///
    /// Fails with `login_required` when there is no session.
    async fn get_access_token(&self) -> Result<String>;

    /// Forces a refresh regardless of the current token's validity.
    async fn refresh_access_token(&self) -> Result<String>;

    /// Test support: make the access token look expired. No network.
    fn expire_access_token(&self) -> Result<()>;

    /// Test support: make the next refresh be rejected. No network.
    fn expire_refresh_token(&self) -> Result<()>;

    /// Clears local tokens and launches the end-session redirect.
    ///
    /// Fails with `logout_not_supported` when the provider has no
    /// end-session capability.
    async fn start_logout(&self, host: &HostContext, kind: RedirectKind) -> Result<()>;

    /// Finalises logout after the redirect returns. Idempotent.
    fn finish_logout(&self) -> Result<()>;
}
