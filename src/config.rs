use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::*;
use crate::model::Ms;

/// Opening hours a freshly created business starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultWeek {
    /// Monday–Friday 09:00–17:00, Saturday and Sunday closed.
    #[default]
    Weekdays,
    /// Every day 09:00–17:00.
    AllWeek,
}

impl FromStr for DefaultWeek {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekdays" => Ok(DefaultWeek::Weekdays),
            "all_week" | "all-week" | "allweek" => Ok(DefaultWeek::AllWeek),
            other => Err(format!("unknown default week {other:?}")),
        }
    }
}

/// Engine settings, read from `APPOINTD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Distance between candidate slot starts.
    pub slot_step_minutes: u32,
    pub default_week: DefaultWeek,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            slot_step_minutes: 30,
            default_week: DefaultWeek::Weekdays,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_dir = std::env::var("APPOINTD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let slot_step_minutes: u32 = std::env::var("APPOINTD_SLOT_STEP_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|m| (MIN_SLOT_STEP_MINUTES..=MAX_SLOT_STEP_MINUTES).contains(m))
            .unwrap_or(defaults.slot_step_minutes);
        let default_week = match std::env::var("APPOINTD_DEFAULT_WEEK") {
            Ok(s) => s.parse().unwrap_or_else(|e| {
                tracing::warn!("APPOINTD_DEFAULT_WEEK: {e}, using weekdays");
                DefaultWeek::Weekdays
            }),
            Err(_) => defaults.default_week,
        };
        let compact_threshold: u64 = std::env::var("APPOINTD_COMPACT_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        let metrics_port: Option<u16> = std::env::var("APPOINTD_METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok());

        Self {
            data_dir,
            slot_step_minutes,
            default_week,
            compact_threshold,
            metrics_port,
        }
    }

    pub fn slot_step_ms(&self) -> Ms {
        Ms::from(self.slot_step_minutes) * 60_000
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("appointd.wal")
    }
}
