//! Persistent application configuration model and defaults.

use crate::rodio_engine::DEFAULT_POLL_INTERVAL;
use crate::session::MAX_VOLUME;

/// Root configuration persisted to `slickplay.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Audio output preferences.
    #[serde(default)]
    pub output: OutputConfig,
    /// Playback behavior.
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Output sink preferences.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OutputConfig {
    /// Preferred output sink name; empty selects the system default.
    /// Overridden by the `--vo` command-line option.
    #[serde(default)]
    pub sink_name: String,
}

/// Playback behavior preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    /// Volume multiplier applied at session start.
    #[serde(default = "default_volume")]
    pub volume: f64,
    /// Playback progress poll interval in milliseconds.
    #[serde(default = "default_progress_poll_ms")]
    pub progress_poll_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            progress_poll_ms: default_progress_poll_ms(),
        }
    }
}

fn default_volume() -> f64 {
    1.0
}

fn default_progress_poll_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

/// Clamp every loaded field into its supported range.
pub fn sanitize_config(config: Config) -> Config {
    let volume = if config.playback.volume.is_finite() {
        config.playback.volume.clamp(0.0, MAX_VOLUME)
    } else {
        default_volume()
    };
    let progress_poll_ms = config.playback.progress_poll_ms.clamp(10, 1_000);

    Config {
        output: config.output,
        playback: PlaybackConfig {
            volume,
            progress_poll_ms,
        },
    }
}
