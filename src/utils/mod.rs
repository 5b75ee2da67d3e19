//! # Utility Modules
//!
//! Supporting utilities for logging, timing, and per-session observability.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from [`crate::config::LoggingConfig`]
//! - **Timeout**: Default budget constants and deadline-bound async wrappers
//! - **Metrics**: Per-session counters and phase timings

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{MetricsSnapshot, SessionMetrics};
