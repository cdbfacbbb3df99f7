//! Alerting and anomaly detection service for the agent orchestration
//! platform.
//!
//! [`manager::AlertManager`] ties the rule engine and the anomaly service to
//! a shared store and event bus and runs both on independent schedules.

pub mod config;
pub mod defaults;
pub mod manager;
pub mod scheduler;

pub use config::ManagerConfig;
pub use manager::{AlertManager, ManagerStats};
