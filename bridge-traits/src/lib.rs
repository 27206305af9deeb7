//! # Host Bridge Traits
//!
//! Capability contracts the authentication core needs from its host.
//!
//! ## Overview
//!
//! The core never talks to a browser, a web view or the network directly.
//! Each capability it requires is expressed as a trait here and implemented
//! per platform (`bridge-desktop` ships the desktop adapters, mobile hosts
//! inject their own).
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Discovery and token endpoint calls
//! - [`BrowserLauncher`](redirect::BrowserLauncher) - Present login/logout redirects
//! - [`ScriptHost`](script::ScriptHost) - Call back into embedded web content
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it with actionable messages (the URL
//! that failed to open, the HTTP status, ...).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! between the interactive context and background tasks.

pub mod error;
pub mod http;
pub mod redirect;
pub mod script;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use redirect::{
    BrowserLauncher, BrowserPresentation, HostContext, RedirectCompletion, RedirectKind,
    RedirectRequest, RedirectResponse,
};
pub use script::{callback_script, ScriptHost};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
