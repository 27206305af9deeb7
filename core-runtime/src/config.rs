//! # Core Configuration Module
//!
//! Provides configuration management for the authentication core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding the OAuth settings plus every host bridge the authenticator needs.
//! It enforces fail-fast validation so a missing capability is reported at
//! startup rather than on the first login attempt.
//!
//! ## Required Dependencies
//!
//! - `OAuthConfig` - Authority, client and redirect settings
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - Discovery and token calls (desktop default: reqwest)
//! - `BrowserLauncher` - Presents login/logout redirects (desktop default: system browser)
//! - `Clock` - Token expiry time source (default: `SystemClock`)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! `HttpClient` and `BrowserLauncher` are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, OAuthConfig};
//!
//! let oauth = OAuthConfig::from_json_str(settings_json)?;
//! let config = CoreConfig::builder()
//!     .oauth(oauth)
//!     .http_client(Arc::new(MyHttpClient))
//!     .browser_launcher(Arc::new(MyCustomTabs))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{BrowserLauncher, Clock, HttpClient, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// OAuth/OIDC client settings.
///
/// Field names follow the camelCase JSON the host ships with the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// The authority base URL, used for OpenID Connect discovery
    pub authority: String,

    /// The identifier of the native client
    pub client_id: String,

    /// Where the authorization server sends the login response
    pub redirect_uri: String,

    /// Where the authorization server sends the user after logout
    pub post_logout_redirect_uri: String,

    /// Space separated scopes requested at login
    pub scope: String,

    /// End-session endpoint for providers whose metadata does not publish one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_logout_endpoint: Option<String>,

    /// Identity provider hint parameter appended to authorization requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_parameter_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_parameter_value: Option<String>,
}

impl OAuthConfig {
    /// Parses the `oauth` settings object from JSON text the host has
    /// already loaded.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: OAuthConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid OAuth configuration JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates URLs and required values.
    pub fn validate(&self) -> Result<()> {
        validate_url("authority", &self.authority, true)?;
        validate_url("redirectUri", &self.redirect_uri, false)?;
        validate_url("postLogoutRedirectUri", &self.post_logout_redirect_uri, false)?;

        if let Some(endpoint) = &self.custom_logout_endpoint {
            validate_url("customLogoutEndpoint", endpoint, true)?;
        }

        if self.client_id.trim().is_empty() {
            return Err(Error::Config("clientId cannot be empty".to_string()));
        }

        if self.scope.split_whitespace().next().is_none() {
            return Err(Error::Config("scope cannot be empty".to_string()));
        }

        match (&self.idp_parameter_name, &self.idp_parameter_value) {
            (Some(_), None) | (None, Some(_)) => Err(Error::Config(
                "idpParameterName and idpParameterValue must be configured together".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// The identity provider parameter, when both halves are configured.
    pub fn idp_parameter(&self) -> Option<(&str, &str)> {
        match (&self.idp_parameter_name, &self.idp_parameter_value) {
            (Some(name), Some(value)) if !name.is_empty() => Some((name, value)),
            _ => None,
        }
    }
}

fn validate_url(field: &str, value: &str, require_http: bool) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("{} is not a valid URL ({}): {}", field, value, e)))?;

    // Redirect URIs may use private-use schemes such as com.example.app:/callback
    if require_http && url.scheme() != "https" && url.scheme() != "http" {
        return Err(Error::Config(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }

    Ok(())
}

/// Core configuration for the authentication core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// OAuth client settings
    pub oauth: OAuthConfig,

    /// HTTP client for discovery and token requests
    pub http_client: Arc<dyn HttpClient>,

    /// Presents login and logout redirects
    pub browser_launcher: Arc<dyn BrowserLauncher>,

    /// Time source for token expiry
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("oauth", &self.oauth)
            .field("http_client", &"HttpClient { ... }")
            .field("browser_launcher", &"BrowserLauncher { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Builds a configuration from the host's JSON `oauth` object, using
    /// the default providers for every bridge.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::builder().oauth_json(json)?.build()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.oauth.validate()
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for discovery and token requests. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Mobile: inject a platform-native HTTP adapter."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn browser_launcher_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "BrowserLauncher".to_string(),
        message: "BrowserLauncher implementation is required to present login and logout redirects. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default SystemBrowserLauncher. \
                 Mobile: inject a Custom Tabs / ASWebAuthenticationSession adapter."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_browser_launcher() -> Result<Arc<dyn BrowserLauncher>> {
    use bridge_desktop::SystemBrowserLauncher;

    let launcher: Arc<dyn BrowserLauncher> = Arc::new(SystemBrowserLauncher::new());
    Ok(launcher)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_browser_launcher() -> Result<Arc<dyn BrowserLauncher>> {
    Err(browser_launcher_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    oauth: Option<OAuthConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    browser_launcher: Option<Arc<dyn BrowserLauncher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the OAuth client settings (required).
    pub fn oauth(mut self, oauth: OAuthConfig) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Sets the OAuth client settings from the JSON `oauth` object.
    pub fn oauth_json(self, json: &str) -> Result<Self> {
        Ok(self.oauth(OAuthConfig::from_json_str(json)?))
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not set and `desktop-shims` is enabled, `ReqwestHttpClient` is used.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the browser launcher used for redirects.
    ///
    /// If not set and `desktop-shims` is enabled, the system browser is used.
    pub fn browser_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.browser_launcher = Some(launcher);
        self
    }

    /// Overrides the time source (tests use a manual clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the OAuth settings are missing or invalid
    /// - `Error::CapabilityMissing` when a required bridge has no default
    pub fn build(self) -> Result<CoreConfig> {
        let oauth = self.oauth.ok_or_else(|| {
            Error::Config("OAuth configuration is required. Use .oauth() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let browser_launcher = match self.browser_launcher {
            Some(launcher) => launcher,
            None => provide_default_browser_launcher()?,
        };

        let config = CoreConfig {
            oauth,
            http_client,
            browser_launcher,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
