//! Workspace facade crate.
//!
//! Host applications depend on `webauth-workspace` and enable the documented
//! features instead of wiring each crate individually. The `desktop-shims`
//! feature pulls in the reqwest HTTP client and system browser launcher so a
//! `CoreConfig` can be built without supplying those bridges.

pub use bridge_traits;
pub use core_auth;
pub use core_runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
