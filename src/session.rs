// Owns the playback session: playlist cursor, playback state, volume, and
// the engine handle. All mutation is serialized through this component's
// bus-consumer thread, which is the single writer of session state.

use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::engine::{Engine, EngineState, TrackKind};
use crate::playlist::Playlist;
use crate::protocol::{EngineMessage, Message, NavigationEvent, SessionMessage, TransportCommand};
use crate::transport;

/// Upper bound for the volume multiplier. More than 500% volume is usually
/// not a good idea; factors past it are clamped, not rejected.
pub const MAX_VOLUME: f64 = 5.0;

/// Session lifecycle state. `Terminated` is absorbing: once reached, no
/// further commands or notifications have any effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    /// Quit was requested; the posted end-of-stream is still in flight.
    Draining,
    Terminated,
}

#[derive(Debug, Clone, Copy)]
struct VolumeState {
    level: f64,
    muted: bool,
}

pub struct SessionManager {
    engine: Box<dyn Engine>,
    playlist: Playlist,
    state: PlaybackState,
    volume: VolumeState,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
}

impl SessionManager {
    pub fn new(
        engine: Box<dyn Engine>,
        playlist: Playlist,
        initial_volume: f64,
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
    ) -> Self {
        Self {
            engine,
            playlist,
            state: PlaybackState::Idle,
            volume: VolumeState {
                level: initial_volume.clamp(0.0, MAX_VOLUME),
                muted: false,
            },
            bus_consumer,
            bus_producer,
        }
    }

    pub fn run(&mut self) {
        if let Err(err) = self.engine.set_volume(self.volume.level) {
            warn!("SessionManager: failed to apply initial volume: {}", err);
        }

        // Load the first entry before touching the bus, so an empty playlist
        // terminates immediately.
        self.advance();

        while self.state != PlaybackState::Terminated {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Control(command)) => self.apply_command(command),
                Ok(Message::Engine(notification)) => self.handle_engine_message(notification),
                Ok(Message::Session(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SessionManager: bus lagged, {} messages dropped", skipped);
                }
                Err(RecvError::Closed) => {
                    warn!("SessionManager: bus closed, terminating session");
                    self.terminate();
                }
            }
        }
    }

    fn apply_command(&mut self, command: TransportCommand) {
        if self.state == PlaybackState::Terminated {
            debug!("SessionManager: session over, dropping {:?}", command);
            return;
        }

        match command {
            TransportCommand::Seek(offset_secs) => self.seek_relative(offset_secs),
            TransportCommand::TogglePause => self.toggle_pause(),
            TransportCommand::AdjustVolume(factor) => self.adjust_volume(factor),
            TransportCommand::ToggleMute => self.toggle_mute(),
            TransportCommand::SwitchTrack(kind) => self.switch_track(kind),
            TransportCommand::Quit => self.quit(),
            TransportCommand::Unknown(key) => {
                info!("SessionManager: no binding for key \"{}\"", key);
            }
        }
    }

    fn handle_engine_message(&mut self, notification: EngineMessage) {
        if self.state == PlaybackState::Terminated {
            debug!("SessionManager: session over, dropping {:?}", notification);
            return;
        }

        match notification {
            EngineMessage::EndOfStream => self.finish_current_item(),
            EngineMessage::Error(message) => {
                // A broken item is not a broken session: log the diagnostic
                // and move on exactly as if the item had ended.
                error!("SessionManager: playback error: {}", message);
                self.finish_current_item();
            }
            EngineMessage::Navigation(NavigationEvent::KeyRelease(key)) => {
                let command = transport::command_for_key(&key);
                debug!(
                    "SessionManager: navigation key \"{}\" -> {:?}",
                    key, command
                );
                self.apply_command(command);
            }
            EngineMessage::Navigation(NavigationEvent::KeyPress(_)) => {}
            EngineMessage::WindowReady(handle) => {
                if let Err(err) = self.engine.configure_window(handle) {
                    warn!("SessionManager: could not configure video output: {}", err);
                }
            }
        }
    }

    /// Idle the engine and decide what comes next: another playlist entry
    /// or the end of the session.
    fn finish_current_item(&mut self) {
        if let Err(err) = self.engine.stop() {
            warn!("SessionManager: failed to idle engine: {}", err);
        }
        self.state = PlaybackState::Idle;
        self.advance();
    }

    /// Start the next unplayed entry, skipping entries whose load fails.
    ///
    /// The playlist cursor moves before each load attempt, so every entry
    /// gets at most one attempt and a failing item can never be retried.
    fn advance(&mut self) {
        while let Some(entry) = self.playlist.next_entry() {
            let index = self.playlist.cursor() - 1;
            self.state = PlaybackState::Loading;
            debug!("SessionManager: loading {}", entry.uri());

            match self
                .engine
                .load(entry.uri())
                .and_then(|()| self.engine.play())
            {
                Ok(()) => {
                    self.state = PlaybackState::Playing;
                    let _ = self.bus_producer.send(Message::Session(
                        SessionMessage::TrackStarted {
                            index,
                            uri: entry.uri().to_string(),
                        },
                    ));
                    return;
                }
                Err(err) => {
                    warn!("SessionManager: skipping {}: {}", entry.uri(), err);
                    let _ = self.engine.stop();
                }
            }
        }
        self.terminate();
    }

    fn terminate(&mut self) {
        if self.state == PlaybackState::Terminated {
            return;
        }
        info!("SessionManager: playlist exhausted, session over");
        self.state = PlaybackState::Terminated;
        let _ = self
            .bus_producer
            .send(Message::Session(SessionMessage::Terminated));
    }

    fn seek_relative(&mut self, offset_secs: i64) {
        let Some(report) = self.engine.query_position() else {
            debug!("SessionManager: position unknown, ignoring seek");
            return;
        };

        let target =
            report.position.as_nanos() as i128 + offset_secs as i128 * 1_000_000_000;
        let target_ns = target.max(0) as u64;

        if let Err(err) = self.engine.seek_absolute(target_ns, true) {
            warn!("SessionManager: seek failed: {}", err);
        }
    }

    fn toggle_pause(&mut self) {
        // Only an engine that explicitly reports Paused resumes; any other
        // state (including a still-loading item) requests pause. Initial
        // playback always starts un-paused, so the first toggle pauses it.
        if self.engine.state() == EngineState::Paused {
            match self.engine.play() {
                Ok(()) => self.state = PlaybackState::Playing,
                Err(err) => warn!("SessionManager: resume failed: {}", err),
            }
        } else {
            match self.engine.pause() {
                Ok(()) => self.state = PlaybackState::Paused,
                Err(err) => warn!("SessionManager: pause failed: {}", err),
            }
        }
    }

    fn adjust_volume(&mut self, factor: f64) {
        let level = (self.engine.volume() * factor).clamp(0.0, MAX_VOLUME);
        self.volume.level = level;
        debug!("SessionManager: volume -> {:.2}", level);
        if let Err(err) = self.engine.set_volume(level) {
            warn!("SessionManager: failed to set volume: {}", err);
        }
    }

    fn toggle_mute(&mut self) {
        let muted = !self.engine.muted();
        self.volume.muted = muted;
        if let Err(err) = self.engine.set_muted(muted) {
            warn!("SessionManager: failed to toggle mute: {}", err);
        }
    }

    fn switch_track(&mut self, kind: TrackKind) {
        let count = self.engine.track_count(kind);
        if count <= 0 {
            // There aren't multiple tracks of this kind, nothing to switch.
            debug!("SessionManager: no {:?} tracks to switch between", kind);
            return;
        }

        // The tracks count from zero; wrapping past the last one cycles
        // through all of them.
        let mut next = self.engine.current_track(kind) + 1;
        if next >= count {
            next = 0;
        }
        if let Err(err) = self.engine.set_current_track(kind, next) {
            warn!("SessionManager: track switch failed: {}", err);
        }
    }

    fn quit(&mut self) {
        info!("SessionManager: quit requested");
        // Clear the playlist first so the end-of-stream that comes back has
        // nothing left to advance to, then let teardown ride the normal
        // end-of-stream path instead of short-circuiting it.
        self.playlist.clear();
        self.engine.post_end_of_stream();
        self.state = PlaybackState::Draining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError};

    use crate::engine::{EngineError, StreamPosition};

    #[derive(Debug, Clone, PartialEq)]
    enum EngineCall {
        Load(String),
        Play,
        Pause,
        Stop,
        Seek { position_ns: u64, flush: bool },
        SetVolume(f64),
        SetMuted(bool),
        SetCurrentTrack(TrackKind, i32),
        PostEndOfStream,
        ConfigureWindow(u64),
    }

    /// In-memory engine that records every call and answers from a script.
    struct ScriptedEngine {
        calls: Arc<Mutex<Vec<EngineCall>>>,
        load_results: VecDeque<Result<(), EngineError>>,
        position: Option<StreamPosition>,
        state: EngineState,
        track_counts: HashMap<TrackKind, i32>,
        current_tracks: HashMap<TrackKind, i32>,
        window_result: Result<(), &'static str>,
        /// When wired to the bus, posted end-of-stream notifications travel
        /// the same channel natural ones do.
        bus: Option<Sender<Message>>,
        volume: f64,
        muted: bool,
    }

    impl ScriptedEngine {
        fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                load_results: VecDeque::new(),
                position: None,
                state: EngineState::Idle,
                track_counts: HashMap::new(),
                current_tracks: HashMap::new(),
                window_result: Ok(()),
                bus: None,
                volume: 1.0,
                muted: false,
            }
        }

        fn calls(&self) -> Arc<Mutex<Vec<EngineCall>>> {
            Arc::clone(&self.calls)
        }

        fn record(&self, call: EngineCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Engine for ScriptedEngine {
        fn load(&mut self, uri: &str) -> Result<(), EngineError> {
            self.record(EngineCall::Load(uri.to_string()));
            self.load_results.pop_front().unwrap_or(Ok(()))
        }

        fn play(&mut self) -> Result<(), EngineError> {
            self.record(EngineCall::Play);
            self.state = EngineState::Playing;
            Ok(())
        }

        fn pause(&mut self) -> Result<(), EngineError> {
            self.record(EngineCall::Pause);
            self.state = EngineState::Paused;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), EngineError> {
            self.record(EngineCall::Stop);
            self.state = EngineState::Idle;
            Ok(())
        }

        fn seek_absolute(&mut self, position_ns: u64, flush: bool) -> Result<(), EngineError> {
            self.record(EngineCall::Seek { position_ns, flush });
            Ok(())
        }

        fn set_volume(&mut self, level: f64) -> Result<(), EngineError> {
            self.volume = level;
            self.record(EngineCall::SetVolume(level));
            Ok(())
        }

        fn volume(&self) -> f64 {
            self.volume
        }

        fn set_muted(&mut self, muted: bool) -> Result<(), EngineError> {
            self.muted = muted;
            self.record(EngineCall::SetMuted(muted));
            Ok(())
        }

        fn muted(&self) -> bool {
            self.muted
        }

        fn track_count(&self, kind: TrackKind) -> i32 {
            self.track_counts.get(&kind).copied().unwrap_or(0)
        }

        fn current_track(&self, kind: TrackKind) -> i32 {
            self.current_tracks.get(&kind).copied().unwrap_or(0)
        }

        fn set_current_track(&mut self, kind: TrackKind, index: i32) -> Result<(), EngineError> {
            self.current_tracks.insert(kind, index);
            self.record(EngineCall::SetCurrentTrack(kind, index));
            Ok(())
        }

        fn query_position(&self) -> Option<StreamPosition> {
            self.position
        }

        fn state(&self) -> EngineState {
            self.state
        }

        fn post_end_of_stream(&mut self) {
            self.record(EngineCall::PostEndOfStream);
            if let Some(ref bus) = self.bus {
                let _ = bus.send(Message::Engine(EngineMessage::EndOfStream));
            }
        }

        fn configure_window(&mut self, handle: u64) -> Result<(), EngineError> {
            self.record(EngineCall::ConfigureWindow(handle));
            self.window_result
                .map_err(EngineError::Unsupported)
        }
    }

    fn session_with(
        engine: ScriptedEngine,
        inputs: &[&str],
    ) -> (SessionManager, Arc<Mutex<Vec<EngineCall>>>, Receiver<Message>) {
        let calls = engine.calls();
        let (bus_sender, _) = broadcast::channel(256);
        let receiver = bus_sender.subscribe();
        let session = SessionManager::new(
            Box::new(engine),
            Playlist::from_inputs(inputs),
            1.0,
            bus_sender.subscribe(),
            bus_sender,
        );
        (session, calls, receiver)
    }

    fn drain_messages(receiver: &mut Receiver<Message>) -> Vec<Message> {
        let mut messages = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        messages
    }

    fn count_terminated(messages: &[Message]) -> usize {
        messages
            .iter()
            .filter(|message| {
                matches!(message, Message::Session(SessionMessage::Terminated))
            })
            .count()
    }

    fn loads(calls: &Arc<Mutex<Vec<EngineCall>>>) -> Vec<String> {
        calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Load(uri) => Some(uri.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_seek_is_clamped_at_zero() {
        let mut engine = ScriptedEngine::new();
        engine.position = Some(StreamPosition {
            position: Duration::from_secs(5),
            duration: None,
        });
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.apply_command(TransportCommand::Seek(-10));

        let recorded = calls.lock().unwrap();
        assert!(recorded.contains(&EngineCall::Seek {
            position_ns: 0,
            flush: true
        }));
    }

    #[test]
    fn test_seek_adds_offset_in_nanoseconds() {
        let mut engine = ScriptedEngine::new();
        engine.position = Some(StreamPosition {
            position: Duration::from_secs(30),
            duration: None,
        });
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.apply_command(TransportCommand::Seek(600));

        let recorded = calls.lock().unwrap();
        assert!(recorded.contains(&EngineCall::Seek {
            position_ns: 630_000_000_000,
            flush: true
        }));
    }

    #[test]
    fn test_seek_without_position_is_ignored() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.apply_command(TransportCommand::Seek(10));

        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_volume_saturates_at_maximum() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        for _ in 0..20 {
            session.apply_command(TransportCommand::AdjustVolume(1.2));
        }
        assert_eq!(session.volume.level, MAX_VOLUME);

        // Saturated volume stays saturated
        session.apply_command(TransportCommand::AdjustVolume(1.2));
        assert_eq!(session.volume.level, MAX_VOLUME);

        let recorded = calls.lock().unwrap();
        assert!(recorded.contains(&EngineCall::SetVolume(MAX_VOLUME)));
    }

    #[test]
    fn test_volume_never_leaves_valid_range() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        for _ in 0..50 {
            session.apply_command(TransportCommand::AdjustVolume(0.9));
        }
        assert!(session.volume.level >= 0.0);

        for call in calls.lock().unwrap().iter() {
            if let EngineCall::SetVolume(level) = call {
                assert!((0.0..=MAX_VOLUME).contains(level));
            }
        }
    }

    #[test]
    fn test_mute_toggles_flag_and_engine_property() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.apply_command(TransportCommand::ToggleMute);
        assert!(session.volume.muted);
        session.apply_command(TransportCommand::ToggleMute);
        assert!(!session.volume.muted);

        let recorded = calls.lock().unwrap();
        assert_eq!(
            *recorded,
            vec![EngineCall::SetMuted(true), EngineCall::SetMuted(false)]
        );
    }

    #[test]
    fn test_switch_track_is_noop_without_tracks() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.apply_command(TransportCommand::SwitchTrack(TrackKind::Audio));
        session.apply_command(TransportCommand::SwitchTrack(TrackKind::Text));

        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_switch_track_cycles_through_all_tracks() {
        let mut engine = ScriptedEngine::new();
        engine.track_counts.insert(TrackKind::Audio, 3);
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        for _ in 0..6 {
            session.apply_command(TransportCommand::SwitchTrack(TrackKind::Audio));
        }

        let selected: Vec<i32> = calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                EngineCall::SetCurrentTrack(TrackKind::Audio, index) => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(selected, vec![1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_toggle_pause_pauses_anything_not_paused() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        // Engine idle (e.g. still loading): the toggle requests pause
        session.apply_command(TransportCommand::TogglePause);
        assert_eq!(session.state, PlaybackState::Paused);

        // Now explicitly paused: the toggle resumes
        session.apply_command(TransportCommand::TogglePause);
        assert_eq!(session.state, PlaybackState::Playing);

        let recorded = calls.lock().unwrap();
        assert_eq!(*recorded, vec![EngineCall::Pause, EngineCall::Play]);
    }

    #[test]
    fn test_playlist_advances_exactly_once_per_entry() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, mut receiver) =
            session_with(engine, &["a.mp4", "b.mp4", "c.mp4"]);

        session.advance();
        session.handle_engine_message(EngineMessage::EndOfStream);
        session.handle_engine_message(EngineMessage::EndOfStream);
        session.handle_engine_message(EngineMessage::EndOfStream);

        assert_eq!(loads(&calls), vec!["a.mp4", "b.mp4", "c.mp4"]);
        assert_eq!(session.state, PlaybackState::Terminated);

        let messages = drain_messages(&mut receiver);
        assert_eq!(count_terminated(&messages), 1);
    }

    #[test]
    fn test_error_behaves_like_end_of_stream() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, mut receiver) =
            session_with(engine, &["a.mp4", "bad.mp4", "c.mp4"]);

        session.advance();
        session.handle_engine_message(EngineMessage::EndOfStream);
        session.handle_engine_message(EngineMessage::Error("decode failed".to_string()));
        session.handle_engine_message(EngineMessage::EndOfStream);

        assert_eq!(loads(&calls), vec!["a.mp4", "bad.mp4", "c.mp4"]);
        assert_eq!(session.state, PlaybackState::Terminated);

        let messages = drain_messages(&mut receiver);
        assert_eq!(count_terminated(&messages), 1);
    }

    #[test]
    fn test_failed_load_is_skipped_without_retry() {
        let mut engine = ScriptedEngine::new();
        engine.load_results = VecDeque::from([
            Ok(()),
            Err(EngineError::OpenFailed {
                uri: "bad.mp4".to_string(),
                reason: "no such file".to_string(),
            }),
            Ok(()),
        ]);
        let (mut session, calls, _receiver) =
            session_with(engine, &["a.mp4", "bad.mp4", "c.mp4"]);

        session.advance();
        assert_eq!(loads(&calls), vec!["a.mp4"]);

        // bad.mp4 fails synchronously during the advance, so this single
        // end-of-stream already lands on c.mp4
        session.handle_engine_message(EngineMessage::EndOfStream);
        assert_eq!(loads(&calls), vec!["a.mp4", "bad.mp4", "c.mp4"]);
        assert_eq!(session.state, PlaybackState::Playing);

        session.handle_engine_message(EngineMessage::EndOfStream);
        assert_eq!(session.state, PlaybackState::Terminated);
    }

    #[test]
    fn test_quit_clears_playlist_and_terminates_once() {
        let mut engine = ScriptedEngine::new();
        let (bus_sender, _) = broadcast::channel(256);
        engine.bus = Some(bus_sender.clone());
        let calls = engine.calls();
        let mut receiver = bus_sender.subscribe();
        let mut engine_events = bus_sender.subscribe();

        let mut session = SessionManager::new(
            Box::new(engine),
            Playlist::from_inputs(["only.mp4", "never.mp4"]),
            1.0,
            bus_sender.subscribe(),
            bus_sender,
        );

        session.advance();
        session.apply_command(TransportCommand::Quit);

        assert!(session.playlist.is_empty());
        assert_eq!(session.state, PlaybackState::Draining);
        assert!(calls
            .lock()
            .unwrap()
            .contains(&EngineCall::PostEndOfStream));

        // The posted end-of-stream arrives through the notification channel
        // like any natural one
        let mut saw_posted_eos = false;
        while let Ok(message) = engine_events.try_recv() {
            if matches!(message, Message::Engine(EngineMessage::EndOfStream)) {
                saw_posted_eos = true;
            }
        }
        assert!(saw_posted_eos, "expected the posted EndOfStream on the bus");
        session.handle_engine_message(EngineMessage::EndOfStream);

        assert_eq!(session.state, PlaybackState::Terminated);
        assert_eq!(loads(&calls), vec!["only.mp4"]);

        // A stray second end-of-stream after termination changes nothing
        session.handle_engine_message(EngineMessage::EndOfStream);
        assert_eq!(loads(&calls), vec!["only.mp4"]);

        let messages = drain_messages(&mut receiver);
        assert_eq!(count_terminated(&messages), 1);
    }

    #[test]
    fn test_terminated_state_absorbs_commands() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.advance();
        assert_eq!(session.state, PlaybackState::Terminated);
        calls.lock().unwrap().clear();

        session.apply_command(TransportCommand::Seek(10));
        session.apply_command(TransportCommand::TogglePause);
        session.apply_command(TransportCommand::Quit);
        session.handle_engine_message(EngineMessage::EndOfStream);

        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_command_has_no_effect() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.apply_command(TransportCommand::Unknown("F1".to_string()));

        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_navigation_key_release_reuses_command_path() {
        let engine = ScriptedEngine::new();
        let (mut session, calls, _receiver) = session_with(engine, &[]);

        session.handle_engine_message(EngineMessage::Navigation(
            NavigationEvent::KeyRelease("space".to_string()),
        ));
        assert_eq!(session.state, PlaybackState::Paused);

        // Key presses are acknowledged but not acted upon
        session.handle_engine_message(EngineMessage::Navigation(
            NavigationEvent::KeyPress("space".to_string()),
        ));

        assert_eq!(*calls.lock().unwrap(), vec![EngineCall::Pause]);
    }

    #[test]
    fn test_window_ready_failure_is_not_fatal() {
        let mut engine = ScriptedEngine::new();
        engine.window_result = Err("video output configuration");
        let (mut session, calls, _receiver) = session_with(engine, &["a.mp4"]);

        session.advance();
        session.handle_engine_message(EngineMessage::WindowReady(42));

        assert!(calls
            .lock()
            .unwrap()
            .contains(&EngineCall::ConfigureWindow(42)));
        // Playback continues unaffected
        assert_eq!(session.state, PlaybackState::Playing);
    }

    // Bus-driven coverage of the full run() loop, with the session on its
    // own thread like in the real process.

    fn wait_for_message<F>(
        receiver: &mut Receiver<Message>,
        timeout: Duration,
        mut predicate: F,
    ) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed while waiting for message"),
            }
        }
    }

    #[test]
    fn test_run_loop_plays_playlist_to_completion() {
        let engine = ScriptedEngine::new();
        let calls = engine.calls();
        let (bus_sender, _) = broadcast::channel(256);
        let mut receiver = bus_sender.subscribe();

        let session_receiver = bus_sender.subscribe();
        let session_sender = bus_sender.clone();
        thread::spawn(move || {
            let mut session = SessionManager::new(
                Box::new(engine),
                Playlist::from_inputs(["first.ogg", "second.ogg"]),
                1.0,
                session_receiver,
                session_sender,
            );
            session.run();
        });

        let _ = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Session(SessionMessage::TrackStarted { index: 0, .. })
            )
        });

        bus_sender
            .send(Message::Engine(EngineMessage::EndOfStream))
            .unwrap();
        let _ = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Session(SessionMessage::TrackStarted { index: 1, .. })
            )
        });

        bus_sender
            .send(Message::Engine(EngineMessage::EndOfStream))
            .unwrap();
        let _ = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(message, Message::Session(SessionMessage::Terminated))
        });

        assert_eq!(loads(&calls), vec!["first.ogg", "second.ogg"]);
    }

    #[test]
    fn test_run_loop_quit_before_end_of_stream() {
        let engine = ScriptedEngine::new();
        let calls = engine.calls();
        let (bus_sender, _) = broadcast::channel(256);
        let mut receiver = bus_sender.subscribe();

        let session_receiver = bus_sender.subscribe();
        let session_sender = bus_sender.clone();
        let engine_bus = bus_sender.clone();
        thread::spawn(move || {
            let mut engine = engine;
            engine.bus = Some(engine_bus);
            let mut session = SessionManager::new(
                Box::new(engine),
                Playlist::from_inputs(["only.ogg"]),
                1.0,
                session_receiver,
                session_sender,
            );
            session.run();
        });

        let _ = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Session(SessionMessage::TrackStarted { index: 0, .. })
            )
        });

        bus_sender
            .send(Message::Control(TransportCommand::Quit))
            .unwrap();
        let _ = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(message, Message::Session(SessionMessage::Terminated))
        });

        assert_eq!(loads(&calls), vec!["only.ogg"]);
    }
}
