//! Chrome automation over the DevTools protocol.
//!
//! - `cdp`: WebSocket JSON-RPC client
//! - `session`: Chrome process launch and teardown
//! - `driver`: the `BrowserDriver` capability the login flow is written against

pub mod cdp;
pub mod driver;
pub mod session;

pub use driver::{BrowserDriver, BrowserLauncher, CdpDriver, ChromeLauncher, Cookie, Locator, Strategy};
pub use session::BrowserSession;
