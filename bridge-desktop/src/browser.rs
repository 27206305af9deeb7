//! System browser launcher

use bridge_traits::{
    error::{BridgeError, Result},
    redirect::{BrowserLauncher, RedirectRequest},
};
use tracing::{debug, warn};

/// Presents redirects in the user's default browser.
///
/// The desktop host is responsible for receiving the callback URL (a loopback
/// listener or a registered URI scheme) and feeding it back as a
/// `RedirectCompletion`.
#[derive(Debug, Clone, Default)]
pub struct SystemBrowserLauncher;

impl SystemBrowserLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl BrowserLauncher for SystemBrowserLauncher {
    fn launch(&self, request: &RedirectRequest) -> Result<()> {
        debug!(kind = %request.kind, "Opening system browser");

        webbrowser::open(&request.url).map_err(|e| {
            warn!(kind = %request.kind, error = %e, "System browser could not be opened");
            BridgeError::LaunchFailed {
                url: request.url.clone(),
                reason: e.to_string(),
            }
        })
    }
}
