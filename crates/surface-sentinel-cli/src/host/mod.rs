//! Real-page hosts.

pub mod chromium;

pub use chromium::{find_chromium, ChromiumHost, PageBindings};
