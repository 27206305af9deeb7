//! OpenID Connect Authenticator with PKCE Support
//!
//! This module implements the authorization code flow (RFC 6749) with PKCE
//! (RFC 7636) on top of the host's [`HttpClient`] and redirect launcher.
//!
//! # Overview
//!
//! - Discovers endpoints from `{authority}/.well-known/openid-configuration`
//! - Builds authorization and end-session URLs
//! - Exchanges authorization codes and refreshes tokens
//! - Keeps tokens in memory, with expiry read from an injectable [`Clock`]
//!
//! # Security
//!
//! - A fresh code verifier and state are generated for every login
//! - The response state is checked before the code is exchanged
//! - Never logs sensitive values (tokens, codes, verifiers)

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::{
    BridgeError, BrowserPresentation, Clock, HostContext, HttpClient, HttpMethod, HttpRequest,
    HttpResponse, RedirectKind, RedirectRequest, RedirectResponse, RetryPolicy,
};
use chrono::{DateTime, Duration, Utc};
use core_runtime::config::OAuthConfig;
use core_runtime::logging::redact_query;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::authenticator::{Authenticator, AuthenticatorError, ProviderError, Result};
use crate::error::ErrorCode;
use crate::translate::ErrorHandler;

/// Access tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECONDS: i64 = 30;

/// Token endpoint `invalid_grant`: the refresh token is no longer accepted.
const INVALID_GRANT: u32 = 2002;

/// Used when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Internal failures of the OIDC flow.
#[derive(Error, Debug)]
pub enum OidcError {
    #[error("Metadata request to {url} returned HTTP {status}")]
    Discovery { url: String, status: u16 },

    #[error("Token endpoint returned HTTP {status}")]
    TokenEndpoint { status: u16 },

    #[error("Unexpected response from {endpoint}: {reason}")]
    InvalidResponse {
        endpoint: &'static str,
        reason: String,
    },

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("A login response was received but no login is in progress")]
    NoLoginInProgress,

    #[error("Failed to encode token request: {0}")]
    Encoding(#[from] serde_urlencoded::ser::Error),

    #[error(transparent)]
    Transport(#[from] BridgeError),
}

/// Endpoints published by the provider's discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// PKCE (Proof Key for Code Exchange) verifier.
///
/// Contains the code verifier that must be kept during the authorization
/// flow and used when exchanging the authorization code.
#[derive(Debug, Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// Create a new PKCE verifier with cryptographically secure random values.
    ///
    /// Generates a 32-byte code verifier and a 16-byte state, both
    /// base64url-encoded without padding.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        let mut verifier_bytes = [0u8; 32];
        rng.fill(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let mut state_bytes = [0u8; 16];
        rng.fill(&mut state_bytes);
        let state = URL_SAFE_NO_PAD.encode(state_bytes);

        Self { verifier, state }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 method: BASE64URL(SHA256(code_verifier))
    pub fn challenge(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Token response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Error body from the token endpoint (RFC 6749 5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct TokenSet {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct OidcState {
    metadata: Option<ProviderMetadata>,
    tokens: Option<TokenSet>,
    login_in_progress: Option<PkceVerifier>,
}

/// Reference [`Authenticator`] for OpenID Connect providers.
pub struct OidcAuthenticator {
    config: OAuthConfig,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    state: Mutex<OidcState>,
}

impl OidcAuthenticator {
    pub fn new(config: OAuthConfig, http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            http_client,
            clock,
            state: Mutex::new(OidcState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, OidcState> {
        // State updates never panic midway, so a poisoned lock still holds consistent data
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetches the discovery document once and caches it.
    #[instrument(skip(self))]
    pub async fn metadata(&self) -> std::result::Result<ProviderMetadata, OidcError> {
        let cached = self.state().metadata.clone();
        if let Some(metadata) = cached {
            return Ok(metadata);
        }

        let url = format!(
            "{}/.well-known/openid-configuration",
            self.config.authority.trim_end_matches('/')
        );

        debug!(url = %url, "Downloading provider metadata");

        let request = HttpRequest::new(HttpMethod::Get, url.clone()).accept_json();
        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::default())
            .await?;

        if !response.is_success() {
            return Err(OidcError::Discovery {
                url,
                status: response.status,
            });
        }

        let metadata: ProviderMetadata =
            response
                .json()
                .map_err(|e| OidcError::InvalidResponse {
                    endpoint: "discovery",
                    reason: e.to_string(),
                })?;

        self.state().metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// Build the authorization URL with PKCE challenge.
    pub fn build_auth_url(
        &self,
        metadata: &ProviderMetadata,
        verifier: &PkceVerifier,
    ) -> std::result::Result<String, OidcError> {
        let mut url = parse_url(&metadata.authorization_endpoint)?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &self.config.scope);
            query.append_pair("state", verifier.state());
            query.append_pair("code_challenge", &verifier.challenge());
            query.append_pair("code_challenge_method", "S256");

            if let Some((name, value)) = self.config.idp_parameter() {
                query.append_pair(name, value);
            }
        }

        Ok(url.to_string())
    }

    fn end_session_url(
        &self,
        endpoint: &str,
        id_token: Option<&str>,
    ) -> std::result::Result<String, OidcError> {
        let mut url = parse_url(endpoint)?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair(
                "post_logout_redirect_uri",
                &self.config.post_logout_redirect_uri,
            );
            if let Some(token) = id_token {
                query.append_pair("id_token_hint", token);
            }
        }

        Ok(url.to_string())
    }

    fn launch(&self, host: &HostContext, request: RedirectRequest) -> Result<()> {
        host.launch(&request).map_err(|e| {
            let error = match host.presentation() {
                BrowserPresentation::SystemBrowser => {
                    ErrorHandler::from_system_browser_load_error(&e, &request.url)
                }
                BrowserPresentation::InAppBrowser => {
                    ErrorHandler::from_in_app_browser_load_error(&e, &request.url)
                }
            };
            AuthenticatorError::Translated(error)
        })
    }

    async fn post_token_request(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<HttpResponse, OidcError> {
        let body = serde_urlencoded::to_string(params)?;
        let request = HttpRequest::new(HttpMethod::Post, token_endpoint)
            .accept_json()
            .form_body(body);

        Ok(self.http_client.execute(request).await?)
    }

    /// Parses a token response, or returns the provider's error.
    fn read_token_response(
        response: HttpResponse,
    ) -> std::result::Result<TokenResponse, TokenFailure> {
        if response.is_success() {
            return response.json().map_err(|e| {
                TokenFailure::Other(OidcError::InvalidResponse {
                    endpoint: "token",
                    reason: e.to_string(),
                })
            });
        }

        match response.json::<TokenErrorResponse>() {
            Ok(body) => Err(TokenFailure::Provider(ProviderError::token(
                &body.error,
                body.error_description.as_deref(),
            ))),
            Err(_) => Err(TokenFailure::Other(OidcError::TokenEndpoint {
                status: response.status,
            })),
        }
    }

    fn store_tokens(&self, response: TokenResponse, previous: Option<TokenSet>) {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let previous = previous.unwrap_or_else(|| TokenSet {
            access_token: String::new(),
            refresh_token: None,
            id_token: None,
            expires_at: self.clock.now(),
        });

        let tokens = TokenSet {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous.refresh_token),
            id_token: response.id_token.or(previous.id_token),
            expires_at: self.clock.now() + Duration::seconds(expires_in),
        };

        self.state().tokens = Some(tokens);
    }

    fn clear_tokens(&self) {
        self.state().tokens = None;
    }
}

enum TokenFailure {
    Provider(ProviderError),
    Other(OidcError),
}

fn grant_failed<E: std::error::Error + 'static>(error: &E) -> AuthenticatorError {
    AuthenticatorError::Translated(ErrorHandler::from_login_operation_error(
        error,
        ErrorCode::AuthorizationCodeGrant,
    ))
}

fn renewal_failed<E: std::error::Error + 'static>(error: &E) -> AuthenticatorError {
    AuthenticatorError::Translated(ErrorHandler::from_token_error(
        error,
        ErrorCode::TokenRenewalError,
    ))
}

fn parse_url(value: &str) -> std::result::Result<Url, OidcError> {
    Url::parse(value).map_err(|source| OidcError::InvalidUrl {
        url: value.to_string(),
        source,
    })
}

impl From<OidcError> for AuthenticatorError {
    fn from(error: OidcError) -> Self {
        AuthenticatorError::other(error)
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    fn is_logged_in(&self) -> bool {
        self.state().tokens.is_some()
    }

    #[instrument(skip(self, host), fields(kind = %kind))]
    async fn start_login(&self, host: &HostContext, kind: RedirectKind) -> Result<()> {
        let metadata = self.metadata().await?;
        let verifier = PkceVerifier::new();
        let url = self.build_auth_url(&metadata, &verifier)?;

        self.state().login_in_progress = Some(verifier);

        debug!(url = %redact_query(&url), "Launching authorization redirect");
        self.launch(host, RedirectRequest::new(kind, url))
    }

    #[instrument(skip(self, response))]
    async fn finish_login(&self, response: RedirectResponse) -> Result<()> {
        let params = response.parameters();

        let verifier = self
            .state()
            .login_in_progress
            .take()
            .ok_or(OidcError::NoLoginInProgress)?;

        if let Some(error) = params.get("error") {
            warn!(error = %error, "Authorization server returned an error");
            return Err(ProviderError::authorization(
                error,
                params.get("error_description").map(String::as_str),
            )
            .into());
        }

        let Some(code) = params.get("code") else {
            info!("Login response carried no code; treating as cancelled");
            return Err(ErrorHandler::redirect_cancelled().into());
        };

        if params.get("state").map(String::as_str) != Some(verifier.state()) {
            warn!("Authorization response state mismatch");
            return Err(ProviderError::state_mismatch().into());
        }

        let metadata = self.metadata().await.map_err(|e| grant_failed(&e))?;

        debug!("Exchanging authorization code for tokens");

        let response = self
            .post_token_request(
                &metadata.token_endpoint,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("client_id", self.config.client_id.as_str()),
                    ("code_verifier", verifier.verifier()),
                ],
            )
            .await
            .map_err(|e| grant_failed(&e))?;

        let tokens = Self::read_token_response(response).map_err(|failure| match failure {
            TokenFailure::Provider(e) => grant_failed(&e),
            TokenFailure::Other(e) => grant_failed(&e),
        })?;

        self.store_tokens(tokens, None);
        info!("Login completed; tokens stored");
        Ok(())
    }

    async fn get_access_token(&self) -> Result<String> {
        let now = self.clock.now();

        let current = match &self.state().tokens {
            None => return Err(ErrorHandler::login_required().into()),
            Some(tokens) => {
                (tokens.expires_at - Duration::seconds(EXPIRY_SKEW_SECONDS) > now)
                    .then(|| tokens.access_token.clone())
            }
        };

        match current {
            Some(token) => Ok(token),
            None => {
                debug!("Access token expired; refreshing");
                self.refresh_access_token().await
            }
        }
    }

    #[instrument(skip(self))]
    async fn refresh_access_token(&self) -> Result<String> {
        let previous = self.state().tokens.clone();

        let Some(refresh_token) = previous.as_ref().and_then(|t| t.refresh_token.clone()) else {
            self.clear_tokens();
            return Err(ErrorHandler::login_required().into());
        };

        let metadata = self.metadata().await.map_err(|e| renewal_failed(&e))?;

        let response = self
            .post_token_request(
                &metadata.token_endpoint,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("client_id", self.config.client_id.as_str()),
                ],
            )
            .await
            .map_err(|e| renewal_failed(&e))?;

        match Self::read_token_response(response) {
            Ok(tokens) => {
                let access_token = tokens.access_token.clone();
                self.store_tokens(tokens, previous);
                info!("Access token refreshed");
                Ok(access_token)
            }
            Err(TokenFailure::Provider(e)) if e.code == INVALID_GRANT => {
                info!("Refresh token rejected; session ended");
                self.clear_tokens();
                Err(ErrorHandler::login_required().into())
            }
            Err(TokenFailure::Provider(e)) => Err(renewal_failed(&e)),
            Err(TokenFailure::Other(e)) => Err(renewal_failed(&e)),
        }
    }

    fn expire_access_token(&self) -> Result<()> {
        let past = self.clock.now() - Duration::hours(1);
        if let Some(tokens) = self.state().tokens.as_mut() {
            tokens.expires_at = past;
        }
        Ok(())
    }

    fn expire_refresh_token(&self) -> Result<()> {
        let past = self.clock.now() - Duration::hours(1);
        if let Some(tokens) = self.state().tokens.as_mut() {
            if let Some(refresh) = tokens.refresh_token.as_mut() {
                refresh.insert(0, 'x');
            }
            tokens.expires_at = past;
        }
        Ok(())
    }

    #[instrument(skip(self, host), fields(kind = %kind))]
    async fn start_logout(&self, host: &HostContext, kind: RedirectKind) -> Result<()> {
        let metadata = self.metadata().await?;

        let Some(endpoint) = metadata
            .end_session_endpoint
            .or_else(|| self.config.custom_logout_endpoint.clone())
        else {
            return Err(ErrorHandler::logout_not_supported().into());
        };

        let id_token = self
            .state()
            .tokens
            .take()
            .and_then(|tokens| tokens.id_token);

        let url = self.end_session_url(&endpoint, id_token.as_deref())?;

        debug!(url = %redact_query(&url), "Launching end-session redirect");
        self.launch(host, RedirectRequest::new(kind, url))
    }

    fn finish_logout(&self) -> Result<()> {
        let mut state = self.state();
        state.tokens = None;
        state.login_in_progress = None;
        Ok(())
    }
}
