//! App startup: validate configuration and install the authenticator.

use core_runtime::CoreConfig;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::coordinator::CoordinatorHandle;
use crate::error::AuthError;
use crate::oidc::OidcAuthenticator;
use crate::translate::ErrorHandler;

/// Validates `config`, installs an [`OidcAuthenticator`] into the
/// coordinator and returns the initial logged-in state.
///
/// Calling this on a coordinator that already has an authenticator leaves
/// the existing one in place and reports its state.
#[instrument(skip_all)]
pub fn initialise(coordinator: &CoordinatorHandle, config: &CoreConfig) -> Result<bool, AuthError> {
    config
        .validate()
        .map_err(|e| ErrorHandler::from_startup_error(&e))?;

    let authenticator = OidcAuthenticator::new(
        config.oauth.clone(),
        Arc::clone(&config.http_client),
        Arc::clone(&config.clock),
    );

    coordinator.initialize(Arc::new(authenticator));

    let logged_in = coordinator
        .authenticator()
        .map_err(|e| ErrorHandler::from_startup_error(&e))?
        .is_logged_in();

    info!(logged_in, "Authentication core started");
    Ok(logged_in)
}
