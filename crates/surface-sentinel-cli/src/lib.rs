//! surface-sentinel CLI: config resolution, a file-backed emergency store,
//! session running, an HTTP monitoring sink, and (with `chromium`) a
//! headless-browser host.

pub mod config;
#[cfg(feature = "chromium")]
pub mod host;
pub mod monitor;
pub mod session;
pub mod store;

pub use config::{default_store_path, load_config, resolve_config_path};
pub use monitor::HttpReportSink;
pub use session::{open_engine, run_session, SessionPlan, SessionSummary};
pub use store::FileStore;
