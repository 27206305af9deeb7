//! Hand-written host and authenticator stubs shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, BrowserLauncher, HostContext, HttpClient, HttpRequest, HttpResponse,
    RedirectKind, RedirectRequest, RedirectResponse, ScriptHost, SystemClock,
};
use core_auth::authenticator::Result;
use core_auth::{Authenticator, ErrorHandler, ProviderError};
use core_runtime::{CoreConfig, OAuthConfig};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every redirect the core asks the host to present.
#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<RedirectRequest>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<RedirectRequest> {
        self.launched.lock().unwrap().clone()
    }
}

impl BrowserLauncher for RecordingLauncher {
    fn launch(&self, request: &RedirectRequest) -> BridgeResult<()> {
        self.launched.lock().unwrap().push(request.clone());
        Ok(())
    }
}

pub fn host(launcher: &Arc<RecordingLauncher>) -> HostContext {
    Arc::clone(launcher) as HostContext
}

struct OfflineHttpClient;

#[async_trait]
impl HttpClient for OfflineHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable("offline".to_string()))
    }
}

/// A configuration whose redirects go to `launcher`.
pub fn config(launcher: &Arc<RecordingLauncher>) -> CoreConfig {
    CoreConfig {
        oauth: OAuthConfig {
            authority: "https://login.example.com".to_string(),
            client_id: "desktop-app".to_string(),
            redirect_uri: "com.example.app:/callback".to_string(),
            post_logout_redirect_uri: "com.example.app:/loggedout".to_string(),
            scope: "openid offline_access".to_string(),
            custom_logout_endpoint: None,
            idp_parameter_name: None,
            idp_parameter_value: None,
        },
        http_client: Arc::new(OfflineHttpClient),
        browser_launcher: host(launcher),
        clock: Arc::new(SystemClock),
    }
}

/// Authenticator whose outcomes are set by the test.
pub struct StubAuthenticator {
    logged_in: AtomicBool,
    supports_logout: bool,
    authorization_error: Mutex<Option<ProviderError>>,
    panic_on_start: AtomicBool,
    panic_on_token: AtomicBool,
    pub finish_login_calls: AtomicUsize,
    pub finish_logout_calls: AtomicUsize,
}

impl StubAuthenticator {
    pub fn new() -> Self {
        Self {
            logged_in: AtomicBool::new(false),
            supports_logout: true,
            authorization_error: Mutex::new(None),
            panic_on_start: AtomicBool::new(false),
            panic_on_token: AtomicBool::new(false),
            finish_login_calls: AtomicUsize::new(0),
            finish_logout_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_logout() -> Self {
        Self {
            supports_logout: false,
            ..Self::new()
        }
    }

    pub fn logged_in(self) -> Self {
        self.logged_in.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_authorization(&self, error: ProviderError) {
        *self.authorization_error.lock().unwrap() = Some(error);
    }

    /// The next `start_login` panics instead of launching.
    pub fn panic_on_next_start(&self) {
        self.panic_on_start.store(true, Ordering::SeqCst);
    }

    /// Token requests panic until further notice.
    pub fn panic_on_token_requests(&self) {
        self.panic_on_token.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Authenticator for StubAuthenticator {
    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn start_login(&self, host: &HostContext, kind: RedirectKind) -> Result<()> {
        if self.panic_on_start.swap(false, Ordering::SeqCst) {
            panic!("browser launcher crashed");
        }
        host.launch(&RedirectRequest::new(
            kind,
            "https://login.example.com/authorize?client_id=test",
        ))?;
        Ok(())
    }

    async fn finish_login(&self, response: RedirectResponse) -> Result<()> {
        self.finish_login_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.authorization_error.lock().unwrap().take() {
            return Err(error.into());
        }

        if !response.parameters().contains_key("code") {
            return Err(ErrorHandler::redirect_cancelled().into());
        }

        self.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_access_token(&self) -> Result<String> {
        if self.panic_on_token.load(Ordering::SeqCst) {
            panic!("token cache corrupted");
        }
        if self.is_logged_in() {
            Ok("access-token".to_string())
        } else {
            Err(ErrorHandler::login_required().into())
        }
    }

    async fn refresh_access_token(&self) -> Result<String> {
        if self.is_logged_in() {
            Ok("refreshed-token".to_string())
        } else {
            Err(ErrorHandler::login_required().into())
        }
    }

    fn expire_access_token(&self) -> Result<()> {
        Ok(())
    }

    fn expire_refresh_token(&self) -> Result<()> {
        Ok(())
    }

    async fn start_logout(&self, host: &HostContext, kind: RedirectKind) -> Result<()> {
        if !self.supports_logout {
            return Err(ErrorHandler::logout_not_supported().into());
        }
        self.logged_in.store(false, Ordering::SeqCst);
        host.launch(&RedirectRequest::new(
            kind,
            "https://login.example.com/logout?client_id=test",
        ))?;
        Ok(())
    }

    fn finish_logout(&self) -> Result<()> {
        self.finish_logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn login_response() -> RedirectResponse {
    RedirectResponse::new("com.example.app:/callback?code=auth-code&state=abc")
}

/// A script callback as seen by web content.
#[derive(Debug, Clone, PartialEq)]
pub struct Callback {
    pub name: String,
    pub result: Option<String>,
    /// The parsed error JSON object
    pub error: Option<Value>,
}

/// Records and decodes every script the bridge evaluates.
#[derive(Default)]
pub struct RecordingScriptHost {
    scripts: Mutex<Vec<String>>,
}

impl RecordingScriptHost {
    pub fn callbacks(&self) -> Vec<Callback> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .map(|script| parse_callback(script))
            .collect()
    }

    /// Waits until at least `count` callbacks have arrived.
    pub async fn wait_for_callbacks(&self, count: usize) -> Vec<Callback> {
        for _ in 0..200 {
            let callbacks = self.callbacks();
            if callbacks.len() >= count {
                return callbacks;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} callbacks, got {:?}",
            count,
            self.callbacks()
        );
    }
}

impl ScriptHost for RecordingScriptHost {
    fn evaluate_script(&self, script: &str) -> BridgeResult<()> {
        self.scripts.lock().unwrap().push(script.to_string());
        Ok(())
    }
}

/// Parses `window["name"](result, error)`.
fn parse_callback(script: &str) -> Callback {
    let rest = script.strip_prefix("window[").expect("callback script prefix");
    let split = rest.find("](").expect("callback script call");
    let name: String = serde_json::from_str(&rest[..split]).unwrap();

    let args = &rest[split + 2..rest.len() - 1];
    let values: Vec<Value> = serde_json::from_str(&format!("[{}]", args)).unwrap();

    let result = values[0].as_str().map(str::to_string);
    let error = values[1]
        .as_str()
        .map(|json| serde_json::from_str(json).unwrap());

    Callback {
        name,
        result,
        error,
    }
}
