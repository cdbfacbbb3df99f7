//! Shared types for the hivemon alerting core: metric samples, alert and
//! anomaly records, the ID generator, and the event bus.

pub mod events;
pub mod id;
pub mod types;
