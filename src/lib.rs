//! SecureFill: fills web forms from a personal data store.
//!
//! A browser extension scans the page and hands the form fields to the
//! native-messaging [`relay`]. The relay passes them to the orchestrator's
//! [`listener`]; the [`coordinator`] asks the [`planner`] for an action plan,
//! runs it through [`sanitize`] and sends it back through the relay for the
//! extension to execute.

pub mod config;
pub mod coordinator;
pub mod listener;
pub mod logging;
pub mod planner;
pub mod protocol;
pub mod relay;
pub mod sanitize;
pub mod store;
pub mod wire;

pub use config::Config;
pub use protocol::{Action, ActionPlan, ActionType, ActionValue, Command, ScanResult};
pub use sanitize::sanitize;
pub use store::{DataStore, Record};
