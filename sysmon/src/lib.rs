//! Local system-monitoring dashboard.
//!
//! Samples host metrics on demand, keeps a bounded history, captures the
//! process's own console output, and serves both to a polling browser page.

pub mod config;
pub mod console;
pub mod dashboard;
pub mod hardware;
pub mod history;
pub mod interceptor;
pub mod lock_utils;
pub mod logging;
pub mod metrics;
pub mod sampler;
pub mod server;

pub use config::{DashboardConfig, Settings};
pub use console::{ConsoleLine, ConsoleSink, ConsoleSource, LineSink};
pub use dashboard::DashboardFacade;
pub use history::HistoryBuffer;
pub use metrics::{MetricSample, MetricsSnapshot, Reading};
pub use sampler::{MetricSampler, MetricSource};
