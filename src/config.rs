use std::time::Duration;

use crate::model::Ms;

/// Policy knobs with documented defaults. Every field can be overridden
/// through a `VACANCY_*` environment variable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a notified waitlist requester has to confirm.
    pub confirmation_window_ms: Ms,
    /// Coincidence window for CONCURRENT_REQUEST detection: how long a
    /// clear conflict check reserves its claim against competing requests.
    pub coincidence_window_ms: Ms,
    /// Tick interval of the expiry sweeper.
    pub sweep_interval: Duration,
    /// Average turnover per room, used only for advisory wait estimates.
    pub avg_turnover_ms: Ms,
    /// Cap on the alternatives list attached to a rejection.
    pub max_alternatives: usize,
    /// Attempts against the external alternative-room ranker.
    pub detection_retries: u32,
    /// WAL appends since last compaction that trigger the compactor.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmation_window_ms: 4 * 3_600_000, // 4 hours
            coincidence_window_ms: 30_000,         // 30 seconds
            sweep_interval: Duration::from_secs(5),
            avg_turnover_ms: 24 * 3_600_000, // one night
            max_alternatives: 5,
            detection_retries: 3,
            compact_threshold: 1000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl EngineConfig {
    /// Defaults overridden by `VACANCY_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("VACANCY_CONFIRMATION_WINDOW_MS") {
            cfg.confirmation_window_ms = v;
        }
        if let Some(v) = env_parse("VACANCY_COINCIDENCE_WINDOW_MS") {
            cfg.coincidence_window_ms = v;
        }
        if let Some(v) = env_parse::<u64>("VACANCY_SWEEP_INTERVAL_MS") {
            cfg.sweep_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("VACANCY_AVG_TURNOVER_MS") {
            cfg.avg_turnover_ms = v;
        }
        if let Some(v) = env_parse("VACANCY_MAX_ALTERNATIVES") {
            cfg.max_alternatives = v;
        }
        if let Some(v) = env_parse("VACANCY_DETECTION_RETRIES") {
            cfg.detection_retries = v;
        }
        if let Some(v) = env_parse("VACANCY_COMPACT_THRESHOLD") {
            cfg.compact_threshold = v;
        }
        cfg
    }
}
