use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// Marker emitted in place of a value the OS layer could not provide.
pub const UNAVAILABLE: &str = "unavailable";

/// A single metric value, or a tag saying it could not be read.
///
/// Serializes as a plain number, or as the string `"unavailable"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Available(f64),
    Unavailable,
}

impl Reading {
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Available(v) => Some(*v),
            Reading::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Available(_))
    }

    /// Clamp to `[0, 100]`; non-finite values become unavailable.
    pub fn percent(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Reading::Available(v.clamp(0.0, 100.0)),
            _ => Reading::Unavailable,
        }
    }
}

impl From<Option<f64>> for Reading {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Reading::Available(v),
            _ => Reading::Unavailable,
        }
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Available(v) => serializer.serialize_f64(*v),
            Reading::Unavailable => serializer.serialize_str(UNAVAILABLE),
        }
    }
}

/// Cumulative byte counters summed over every interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub sent_bytes: u64,
    pub recv_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkThroughput {
    pub sent_bytes_per_sec: Reading,
    pub recv_bytes_per_sec: Reading,
}

impl NetworkThroughput {
    pub fn idle() -> Self {
        Self {
            sent_bytes_per_sec: Reading::Available(0.0),
            recv_bytes_per_sec: Reading::Available(0.0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            sent_bytes_per_sec: Reading::Unavailable,
            recv_bytes_per_sec: Reading::Unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Local>,
    pub cpu_percent: Reading,
    pub memory_percent: Reading,
    pub disk_percent: Reading,
    pub network: NetworkThroughput,
}

/// Payload of the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub current: MetricSample,
    pub history: Vec<MetricSample>,
}
