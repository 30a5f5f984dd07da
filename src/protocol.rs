//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between the input pump,
//! the session orchestrator, and the playback engine adapter.

use crate::engine::TrackKind;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    /// A transport command on its way to the session orchestrator.
    Control(TransportCommand),
    /// A notification produced by the playback engine.
    Engine(EngineMessage),
    /// A session lifecycle announcement from the orchestrator.
    Session(SessionMessage),
}

/// One decoded user request against the running session.
///
/// Constructed once per input event by the transport mapping and consumed
/// once by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    /// Seek relative to the current position, in whole seconds.
    Seek(i64),
    TogglePause,
    /// Multiply the current volume by the given factor.
    AdjustVolume(f64),
    ToggleMute,
    /// Advance to the next selectable track of the given kind.
    SwitchTrack(TrackKind),
    Quit,
    /// An input the transport mapping has no binding for. Accepted and
    /// reported, never fatal.
    Unknown(String),
}

/// Asynchronous notifications from the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// The current item finished normally.
    EndOfStream,
    /// The current item failed mid-stream; carries the engine diagnostic.
    Error(String),
    /// User input delivered through the render surface.
    Navigation(NavigationEvent),
    /// The output window exists and can be configured; carries the raw
    /// window handle.
    WindowReady(u64),
}

/// Key events originating from the render surface rather than the terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationEvent {
    KeyPress(String),
    KeyRelease(String),
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    /// Playback of a playlist entry has been started.
    TrackStarted {
        /// Zero-based position of the entry in the playlist.
        index: usize,
        uri: String,
    },
    /// The session is over; subscribers stop pumping and shut down.
    Terminated,
}
