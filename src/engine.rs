//! Playback engine boundary.
//!
//! The engine is the external collaborator that actually decodes and renders
//! media. The orchestration core only ever talks to it through this trait;
//! notifications flow back asynchronously over the bus as
//! [`crate::protocol::EngineMessage`] values.

use std::time::Duration;

use thiserror::Error;

/// A category of selectable stream within one media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    /// Subtitle/text streams.
    Text,
}

/// Coarse pipeline state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No pipeline is active.
    #[default]
    Idle,
    Paused,
    Playing,
}

/// Position report for the active item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPosition {
    /// Elapsed playback time of the current item.
    pub position: Duration,
    /// Total duration, when the engine knows it.
    pub duration: Option<Duration>,
}

/// Failures surfaced at the engine boundary.
///
/// Everything but a construction failure is absorbed by the orchestrator:
/// logged, then either skipped past or ignored.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open {uri}: {reason}")]
    OpenFailed { uri: String, reason: String },
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),
    /// The engine lacks the requested property. Callers treat this as a
    /// logged no-op, never as a session failure.
    #[error("engine does not support {0}")]
    Unsupported(&'static str),
    #[error("playback thread is not running")]
    Disconnected,
}

/// Operations the orchestration core issues against the engine.
///
/// Implementations must not block on these calls beyond a channel handoff:
/// long-running work happens on the engine's own execution context, and
/// completion or failure is reported through the notification stream.
pub trait Engine: Send {
    /// Prepare the given location for playback, replacing any current item.
    fn load(&mut self, uri: &str) -> Result<(), EngineError>;

    fn play(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    /// Tear down the active item and return to [`EngineState::Idle`].
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Jump to an absolute position in the current item. A flushing seek
    /// discards buffered output for an immediate response.
    fn seek_absolute(&mut self, position_ns: u64, flush: bool) -> Result<(), EngineError>;

    fn set_volume(&mut self, level: f64) -> Result<(), EngineError>;

    fn volume(&self) -> f64;

    fn set_muted(&mut self, muted: bool) -> Result<(), EngineError>;

    fn muted(&self) -> bool;

    /// Number of selectable tracks of the given kind in the current item.
    /// Zero or negative means there is nothing to switch.
    fn track_count(&self, kind: TrackKind) -> i32;

    /// Zero-based index of the active track of the given kind.
    fn current_track(&self, kind: TrackKind) -> i32;

    fn set_current_track(&mut self, kind: TrackKind, index: i32) -> Result<(), EngineError>;

    /// Current position of the active item, or `None` when the pipeline is
    /// not in a queryable state. Must never block pipeline teardown.
    fn query_position(&self) -> Option<StreamPosition>;

    fn state(&self) -> EngineState;

    /// Request graceful termination of the active pipeline by injecting an
    /// end-of-stream notification into the engine's own event path, so
    /// teardown is observed the same way a natural end of stream is.
    fn post_end_of_stream(&mut self);

    /// Configure the render window once the engine reports it ready, e.g.
    /// to preserve the aspect ratio.
    fn configure_window(&mut self, handle: u64) -> Result<(), EngineError>;
}
