//! Mapping from named input keys to transport commands.
//!
//! Pure and side-effect free; both the terminal pump and render-surface
//! navigation events funnel through this single table.

use crate::engine::TrackKind;
use crate::protocol::TransportCommand;

/// Decode one key identifier into the transport command it is bound to.
///
/// Key identifiers are UTF-8 key names ("Left", "space", "q", ...). The
/// page keys are also accepted under their X11 names "Prior" and "Next",
/// which is what render-surface navigation events deliver.
pub fn command_for_key(key: &str) -> TransportCommand {
    match key {
        "Left" => TransportCommand::Seek(-10),
        "Right" => TransportCommand::Seek(10),
        "Down" => TransportCommand::Seek(-60),
        "Up" => TransportCommand::Seek(60),
        "PageDown" | "Next" => TransportCommand::Seek(-600),
        "PageUp" | "Prior" => TransportCommand::Seek(600),
        "space" => TransportCommand::TogglePause,
        "9" => TransportCommand::AdjustVolume(0.9),
        "0" => TransportCommand::AdjustVolume(1.2),
        "m" => TransportCommand::ToggleMute,
        "a" => TransportCommand::SwitchTrack(TrackKind::Audio),
        "j" => TransportCommand::SwitchTrack(TrackKind::Text),
        "q" => TransportCommand::Quit,
        other => TransportCommand::Unknown(other.to_string()),
    }
}
