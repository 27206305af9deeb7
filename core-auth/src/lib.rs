//! # Authentication Core
//!
//! Coordinates OAuth/OIDC login and logout for web content embedded in a
//! native host.
//!
//! ## Overview
//!
//! The host presents redirects in a browser and runs the web application in
//! an embedded view. This crate sits between the two:
//!
//! - [`AuthCoordinator`] serializes login/logout redirects and owns the
//!   session phase
//! - [`WebContentBridge`] answers calls from the web content through named
//!   script callbacks
//! - [`ErrorHandler`] turns every failure into an [`AuthError`] with a stable
//!   code and a JSON shape the web content understands
//! - [`OidcAuthenticator`] is the reference [`Authenticator`]
//!
//! ## Features
//!
//! - Single-flight redirects shared by native and web callers
//! - Authorization code flow with PKCE and in-memory tokens
//! - Token refresh with `login_required` when the session has ended
//! - Exactly-once delivery of every bridge callback

pub mod authenticator;
pub mod bridge;
pub mod coordinator;
pub mod error;
pub mod oidc;
pub mod startup;
pub mod translate;

pub use authenticator::{Authenticator, AuthenticatorError, ProviderError, ProviderErrorKind};
pub use bridge::{BridgeMethod, WebContentBridge};
pub use coordinator::{
    AuthCoordinator, CoordinatorHandle, FailureCallback, RedirectOutcome, SessionPhase,
    SuccessCallback,
};
pub use error::{AuthError, ErrorCode, ErrorReporter};
pub use oidc::{OidcAuthenticator, PkceVerifier, ProviderMetadata};
pub use startup::initialise;
pub use translate::ErrorHandler;
