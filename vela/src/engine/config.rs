use serde::{Deserialize, Serialize};

/// Memory-saving scheme for line storage.
///
/// The four levels trade history retention for memory; each level
/// documents what it disables downstream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
pub enum ExactBars {
    /// Keep everything in memory. Preloading and vectorized runs stay
    /// available.
    #[default]
    Full,
    /// Ring every buffer at its minimum period. Disables preloading,
    /// vectorized evaluation and any retention-based output (full-history
    /// writers see only the tail).
    Minimal,
    /// Feeds keep full history, indicator lines ring. Vectorized
    /// evaluation is disabled; preloading stays available.
    KeepData,
    /// As [`ExactBars::KeepData`], additionally ringing observer lines.
    KeepDataAndLines,
}

impl ExactBars {
    /// Legacy integer encoding: `0`, `1`, `-1`, `-2`.
    pub fn from_level(level: i8) -> Option<Self> {
        match level {
            0 => Some(Self::Full),
            1 => Some(Self::Minimal),
            -1 => Some(Self::KeepData),
            -2 => Some(Self::KeepDataAndLines),
            _ => None,
        }
    }

    pub fn allows_preload(&self) -> bool {
        !matches!(self, Self::Minimal)
    }

    pub fn allows_runonce(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Engine run options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Load all history into memory before running.
    pub preload: bool,
    /// Vectorized indicator evaluation where possible.
    pub runonce: bool,
    /// Force event mode regardless of feed kinds.
    pub live: bool,
    /// Worker parallelism for parameter sweeps; `None` uses all cores.
    pub max_cpus: Option<usize>,
    pub exact_bars: ExactBars,
    /// Evaluate `next_open` before the broker each bar, seeing the open.
    pub cheat_on_open: bool,
    /// Propagate cheat-on-open to the broker's matching.
    pub broker_coo: bool,
    /// Deliver broker notifications as soon as they are available instead
    /// of batching them before the strategy stage.
    pub quicknotify: bool,
    /// Legacy synchronisation: feed 0 is the master clock.
    pub old_sync: bool,
    /// Timezone (IANA name) for strategy datetime output.
    pub tz: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preload: true,
            runonce: true,
            live: false,
            max_cpus: None,
            exact_bars: ExactBars::Full,
            cheat_on_open: false,
            broker_coo: true,
            quicknotify: false,
            old_sync: false,
            tz: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_levels_map_onto_the_enum() {
        assert_eq!(ExactBars::from_level(0), Some(ExactBars::Full));
        assert_eq!(ExactBars::from_level(1), Some(ExactBars::Minimal));
        assert_eq!(ExactBars::from_level(-1), Some(ExactBars::KeepData));
        assert_eq!(ExactBars::from_level(-2), Some(ExactBars::KeepDataAndLines));
        assert_eq!(ExactBars::from_level(3), None);
    }

    #[test]
    fn memory_levels_gate_preload_and_runonce() {
        assert!(ExactBars::Full.allows_runonce());
        assert!(!ExactBars::KeepData.allows_runonce());
        assert!(ExactBars::KeepData.allows_preload());
        assert!(!ExactBars::Minimal.allows_preload());
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = EngineConfig {
            cheat_on_open: true,
            tz: Some("America/New_York".to_string()),
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<EngineConfig>(&json).unwrap(), config);
    }
}
