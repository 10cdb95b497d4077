pub mod classify;
pub mod disk;
pub mod process;
pub mod services;
pub mod system;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

pub type Timestamp = DateTime<Local>;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("system metrics are not supported on this platform")]
    Unsupported,
    #[error("{what} query failed: {detail}")]
    Query { what: &'static str, detail: String },
    #[error("service manager query failed: {detail}")]
    ServiceManager { detail: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemRead<T> {
    Read(T),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Vanished,
    AccessDenied,
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusLevel {
    Critical,
    High,
    Moderate,
    Good,
}

/// Thresholds are exclusive lower bounds, evaluated top-down.
#[derive(Debug, Clone, Copy)]
pub struct Ladder {
    pub critical: f64,
    pub high: f64,
    pub moderate: f64,
}

impl Ladder {
    pub const MEMORY: Ladder = Ladder {
        critical: 90.0,
        high: 80.0,
        moderate: 60.0,
    };

    pub const DISK: Ladder = Ladder {
        critical: 95.0,
        high: 85.0,
        moderate: 70.0,
    };

    pub fn classify(&self, usage_percent: f64) -> StatusLevel {
        if usage_percent > self.critical {
            StatusLevel::Critical
        } else if usage_percent > self.high {
            StatusLevel::High
        } else if usage_percent > self.moderate {
            StatusLevel::Moderate
        } else {
            StatusLevel::Good
        }
    }
}

pub fn now() -> Timestamp {
    Local::now()
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    round_to(bytes as f64 / BYTES_PER_GB, 2)
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    round_to(bytes as f64 / BYTES_PER_MB, 1)
}

pub fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_to(part as f64 / whole as f64 * 100.0, 1)
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
