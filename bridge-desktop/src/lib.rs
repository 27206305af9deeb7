//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `BrowserLauncher` opening the system browser through `webbrowser`
//!
//! Mobile hosts do not use this crate; they inject their own adapters
//! (Custom Tabs, `ASWebAuthenticationSession`, platform HTTP stacks).
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SystemBrowserLauncher};
//!
//! let config = CoreConfig::builder()
//!     .oauth(oauth)
//!     .http_client(Arc::new(ReqwestHttpClient::new()?))
//!     .browser_launcher(Arc::new(SystemBrowserLauncher::new()))
//!     .build()?;
//! ```

mod browser;
mod http;

pub use browser::SystemBrowserLauncher;
pub use http::ReqwestHttpClient;
