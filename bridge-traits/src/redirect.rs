//! Browser Redirect Abstraction
//!
//! Login and logout both run as browser redirects presented by the host (a
//! system browser, an in-app browser tab, ...). The core hands the host a
//! [`RedirectRequest`] through [`BrowserLauncher`]; the host later reports
//! the outcome as a [`RedirectCompletion`] tagged with the same
//! [`RedirectKind`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::Result;

/// The two redirect kinds. They share one single-flight guard, so at most
/// one of either kind is outstanding at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectKind {
    Login,
    Logout,
}

impl RedirectKind {
    /// Stable request code hosts use to tag redirect results.
    pub fn request_code(&self) -> u32 {
        match self {
            RedirectKind::Login => 1,
            RedirectKind::Logout => 2,
        }
    }

    pub fn from_request_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(RedirectKind::Login),
            2 => Some(RedirectKind::Logout),
            _ => None,
        }
    }
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectKind::Login => write!(f, "login"),
            RedirectKind::Logout => write!(f, "logout"),
        }
    }
}

/// A redirect the host should present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRequest {
    pub kind: RedirectKind,
    pub url: String,
}

impl RedirectRequest {
    pub fn new(kind: RedirectKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

/// The raw result of a redirect: the callback URL the browser landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectResponse {
    pub url: String,
}

impl RedirectResponse {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Query (and fragment) parameters of the callback URL.
    ///
    /// Returns an empty map when the URL cannot be parsed.
    pub fn parameters(&self) -> HashMap<String, String> {
        let Ok(url) = Url::parse(&self.url) else {
            return HashMap::new();
        };

        let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        // Some providers answer with response_mode=fragment
        if let Some(fragment) = url.fragment() {
            for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
                params
                    .entry(key.into_owned())
                    .or_insert_with(|| value.into_owned());
            }
        }

        params
    }
}

/// Delivered by the host once per outstanding redirect.
///
/// `response` is `None` when the redirect UI was dismissed or destroyed
/// without producing a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectCompletion {
    pub kind: RedirectKind,
    pub response: Option<RedirectResponse>,
}

impl RedirectCompletion {
    pub fn completed(kind: RedirectKind, response: RedirectResponse) -> Self {
        Self {
            kind,
            response: Some(response),
        }
    }

    pub fn dismissed(kind: RedirectKind) -> Self {
        Self {
            kind,
            response: None,
        }
    }
}

/// How a launcher presents redirects. Launch failures are reported
/// differently for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserPresentation {
    /// The user's default browser app
    SystemBrowser,
    /// A browser tab hosted by the app (Custom Tabs, SFSafariViewController)
    InAppBrowser,
}

/// Host surface able to present a redirect URL.
///
/// Implementations return once the browser UI has been launched; the
/// outcome arrives later through the redirect-completion channel.
pub trait BrowserLauncher: Send + Sync {
    fn launch(&self, request: &RedirectRequest) -> Result<()>;

    fn presentation(&self) -> BrowserPresentation {
        BrowserPresentation::SystemBrowser
    }
}

/// The host context handed to authenticator redirect operations.
pub type HostContext = Arc<dyn BrowserLauncher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes_round_trip() {
        for kind in [RedirectKind::Login, RedirectKind::Logout] {
            assert_eq!(RedirectKind::from_request_code(kind.request_code()), Some(kind));
        }
        assert_eq!(RedirectKind::from_request_code(7), None);
    }

    #[test]
    fn test_response_parameters_from_query() {
        let response =
            RedirectResponse::new("com.example.app:/callback?code=abc&state=xyz%20123");
        let params = response.parameters();
        assert_eq!(params.get("code"), Some(&"abc".to_string()));
        assert_eq!(params.get("state"), Some(&"xyz 123".to_string()));
    }

    #[test]
    fn test_response_parameters_from_fragment() {
        let response = RedirectResponse::new("https://app.example.com/cb#error=access_denied");
        assert_eq!(
            response.parameters().get("error"),
            Some(&"access_denied".to_string())
        );
    }

    #[test]
    fn test_unparseable_response_has_no_parameters() {
        assert!(RedirectResponse::new("not a url").parameters().is_empty());
    }

    #[test]
    fn test_completion_constructors() {
        let dismissed = RedirectCompletion::dismissed(RedirectKind::Login);
        assert!(dismissed.response.is_none());

        let completed = RedirectCompletion::completed(
            RedirectKind::Logout,
            RedirectResponse::new("https://app.example.com/loggedout"),
        );
        assert_eq!(completed.kind, RedirectKind::Logout);
        assert!(completed.response.is_some());
    }
}
