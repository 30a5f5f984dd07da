//! Default playback engine adapter built on rodio.
//!
//! Decoding and audio output run on a dedicated playback thread that owns
//! the device sink; the handle talks to it over an mpsc command channel and
//! never blocks beyond that handoff. End-of-stream detection and position
//! snapshots come from a bounded poll on the playback thread, so the
//! notification producer is never blocked by consumers and a position query
//! can never stall teardown.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use rodio::{Decoder, DeviceSinkBuilder, MixerDeviceSink, Source};
use tokio::sync::broadcast::Sender;

use crate::engine::{Engine, EngineError, EngineState, StreamPosition, TrackKind};
use crate::protocol::{EngineMessage, Message};

/// How often the playback thread polls for end-of-stream and refreshes the
/// position snapshot when no command is pending.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

enum EngineCommand {
    Load(String),
    Play,
    Pause,
    Stop,
    Seek(Duration),
    SetVolume(f32),
    SetMuted(bool),
    PostEndOfStream,
    Shutdown,
}

#[derive(Debug, Default)]
struct Snapshot {
    state: EngineState,
    position: Option<StreamPosition>,
}

/// Handle to the playback thread. Construction is the only fatal failure
/// point of the engine; afterwards decode and output problems surface as
/// [`EngineMessage::Error`] notifications on the bus.
pub struct RodioEngine {
    cmd_tx: mpsc::Sender<EngineCommand>,
    snapshot: Arc<Mutex<Snapshot>>,
    volume: f64,
    muted: bool,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioEngine {
    /// Open the output sink (optionally a named one) and start the playback
    /// thread. Blocks until the audio output is initialized or fails.
    pub fn new(
        sink_name: Option<String>,
        poll_interval: Duration,
        bus: Sender<Message>,
    ) -> Result<Self, EngineError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<(), EngineError>>(1);

        let snapshot = Arc::new(Mutex::new(Snapshot::default()));
        let snapshot_thread = Arc::clone(&snapshot);

        let thread = thread::Builder::new()
            .name("playback-engine".to_string())
            .spawn(move || {
                run_loop(cmd_rx, init_tx, sink_name, poll_interval, snapshot_thread, bus);
            })
            .map_err(|err| EngineError::OutputUnavailable(err.to_string()))?;

        init_rx.recv().map_err(|_| EngineError::Disconnected)??;

        Ok(Self {
            cmd_tx,
            snapshot,
            volume: 1.0,
            muted: false,
            thread: Some(thread),
        })
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }
}

impl Engine for RodioEngine {
    fn load(&mut self, uri: &str) -> Result<(), EngineError> {
        self.send(EngineCommand::Load(uri.to_string()))
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.send(EngineCommand::Play)
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.send(EngineCommand::Pause)
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop)
    }

    fn seek_absolute(&mut self, position_ns: u64, _flush: bool) -> Result<(), EngineError> {
        // rodio always discards buffered output on seek, so every seek has
        // flush semantics.
        self.send(EngineCommand::Seek(Duration::from_nanos(position_ns)))
    }

    fn set_volume(&mut self, level: f64) -> Result<(), EngineError> {
        self.volume = level;
        self.send(EngineCommand::SetVolume(level as f32))
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), EngineError> {
        self.muted = muted;
        self.send(EngineCommand::SetMuted(muted))
    }

    fn muted(&self) -> bool {
        self.muted
    }

    fn track_count(&self, _kind: TrackKind) -> i32 {
        // Single-stream sources expose no alternate audio or text tracks.
        0
    }

    fn current_track(&self, _kind: TrackKind) -> i32 {
        0
    }

    fn set_current_track(&mut self, _kind: TrackKind, _index: i32) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("track selection"))
    }

    fn query_position(&self) -> Option<StreamPosition> {
        self.snapshot.lock().ok()?.position
    }

    fn state(&self) -> EngineState {
        self.snapshot
            .lock()
            .map(|snapshot| snapshot.state)
            .unwrap_or_default()
    }

    fn post_end_of_stream(&mut self) {
        let _ = self.send(EngineCommand::PostEndOfStream);
    }

    fn configure_window(&mut self, _handle: u64) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("video output configuration"))
    }
}

impl Drop for RodioEngine {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The playback thread's main loop.
fn run_loop(
    cmd_rx: mpsc::Receiver<EngineCommand>,
    init_tx: mpsc::SyncSender<Result<(), EngineError>>,
    sink_name: Option<String>,
    poll_interval: Duration,
    snapshot: Arc<Mutex<Snapshot>>,
    bus: Sender<Message>,
) {
    // The device sink must live on this thread; cpal streams may be !Send.
    let mut device_sink = match open_device_sink(sink_name.as_deref()) {
        Ok(sink) => sink,
        Err(err) => {
            let _ = init_tx.send(Err(err));
            return;
        }
    };
    device_sink.log_on_drop(false);
    let _ = init_tx.send(Ok(()));

    let mut player: Option<rodio::Player> = None;
    let mut duration: Option<Duration> = None;
    // True while a loaded item has not yet delivered its end-of-stream.
    let mut active = false;
    let mut volume: f32 = 1.0;
    let mut muted = false;

    loop {
        match cmd_rx.recv_timeout(poll_interval) {
            Ok(EngineCommand::Load(uri)) => {
                if let Some(ref current) = player {
                    current.stop();
                }
                player = None;
                duration = None;
                active = false;

                match open_source(&uri) {
                    Ok(source) => {
                        duration = source.total_duration();
                        let new_player = rodio::Player::connect_new(device_sink.mixer());
                        new_player.set_volume(if muted { 0.0 } else { volume });
                        // Hold until an explicit play request
                        new_player.pause();
                        new_player.append(source);
                        player = Some(new_player);
                        active = true;
                        debug!("RodioEngine: loaded {}", uri);
                        set_snapshot(
                            &snapshot,
                            EngineState::Paused,
                            Some(StreamPosition {
                                position: Duration::ZERO,
                                duration,
                            }),
                        );
                    }
                    Err(err) => {
                        error!("RodioEngine: {}", err);
                        set_snapshot(&snapshot, EngineState::Idle, None);
                        let _ = bus.send(Message::Engine(EngineMessage::Error(err.to_string())));
                    }
                }
            }
            Ok(EngineCommand::Play) => {
                if let Some(ref current) = player {
                    current.play();
                    set_state(&snapshot, EngineState::Playing);
                }
            }
            Ok(EngineCommand::Pause) => {
                if let Some(ref current) = player {
                    current.pause();
                    set_state(&snapshot, EngineState::Paused);
                }
            }
            Ok(EngineCommand::Stop) => {
                if let Some(ref current) = player {
                    current.stop();
                }
                player = None;
                duration = None;
                active = false;
                set_snapshot(&snapshot, EngineState::Idle, None);
            }
            Ok(EngineCommand::Seek(position)) => {
                if let Some(ref current) = player {
                    match current.try_seek(position) {
                        Ok(()) => set_position(
                            &snapshot,
                            Some(StreamPosition { position, duration }),
                        ),
                        Err(err) => warn!("RodioEngine: seek failed: {}", err),
                    }
                }
            }
            Ok(EngineCommand::SetVolume(level)) => {
                volume = level;
                if !muted {
                    if let Some(ref current) = player {
                        current.set_volume(volume);
                    }
                }
            }
            Ok(EngineCommand::SetMuted(new_muted)) => {
                // No native mute on the sink: emulate by zeroing the applied
                // volume and keeping the requested level for unmute.
                muted = new_muted;
                if let Some(ref current) = player {
                    current.set_volume(if muted { 0.0 } else { volume });
                }
            }
            Ok(EngineCommand::PostEndOfStream) => {
                if let Some(ref current) = player {
                    current.stop();
                }
                player = None;
                duration = None;
                active = false;
                set_snapshot(&snapshot, EngineState::Idle, None);
                let _ = bus.send(Message::Engine(EngineMessage::EndOfStream));
            }
            Ok(EngineCommand::Shutdown) => {
                if let Some(ref current) = player {
                    current.stop();
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                let Some(current) = player.as_ref() else {
                    continue;
                };
                let finished = active && current.empty();
                let position = current.get_pos();
                if finished {
                    // The item drained naturally
                    player = None;
                    duration = None;
                    active = false;
                    set_snapshot(&snapshot, EngineState::Idle, None);
                    let _ = bus.send(Message::Engine(EngineMessage::EndOfStream));
                } else {
                    set_position(&snapshot, Some(StreamPosition { position, duration }));
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn set_snapshot(
    snapshot: &Arc<Mutex<Snapshot>>,
    state: EngineState,
    position: Option<StreamPosition>,
) {
    if let Ok(mut guard) = snapshot.lock() {
        guard.state = state;
        guard.position = position;
    }
}

fn set_state(snapshot: &Arc<Mutex<Snapshot>>, state: EngineState) {
    if let Ok(mut guard) = snapshot.lock() {
        guard.state = state;
    }
}

fn set_position(snapshot: &Arc<Mutex<Snapshot>>, position: Option<StreamPosition>) {
    if let Ok(mut guard) = snapshot.lock() {
        guard.position = position;
    }
}

/// Open a decoder for the given location. Only local files are playable;
/// everything else is rejected here and surfaces as an error notification.
fn open_source(uri: &str) -> Result<Decoder<BufReader<File>>, EngineError> {
    let path = uri.strip_prefix("file://").unwrap_or(uri);

    let file = File::open(path).map_err(|err| EngineError::OpenFailed {
        uri: uri.to_string(),
        reason: err.to_string(),
    })?;
    let byte_len = file.metadata().map(|metadata| metadata.len()).ok();

    let mut builder = Decoder::builder()
        .with_data(BufReader::new(file))
        .with_seekable(true);
    if let Some(len) = byte_len {
        builder = builder.with_byte_len(len);
    }
    if let Some(extension) = Path::new(path).extension().and_then(|ext| ext.to_str()) {
        builder = builder.with_hint(extension);
    }

    builder.build().map_err(|err| EngineError::OpenFailed {
        uri: uri.to_string(),
        reason: err.to_string(),
    })
}

fn find_output_device(name: &str) -> Option<rodio::Device> {
    use rodio::cpal::traits::HostTrait;
    use rodio::DeviceTrait;

    let host = rodio::cpal::default_host();
    host.output_devices().ok()?.find(|device| {
        device
            .description()
            .ok()
            .map(|description| description.name() == name)
            .unwrap_or(false)
    })
}

fn open_device_sink(sink_name: Option<&str>) -> Result<MixerDeviceSink, EngineError> {
    if let Some(name) = sink_name.filter(|name| !name.is_empty() && *name != "default") {
        if let Some(device) = find_output_device(name) {
            return DeviceSinkBuilder::from_device(device)
                .map_err(|err| {
                    EngineError::OutputUnavailable(format!(
                        "cannot configure sink \"{}\": {}",
                        name, err
                    ))
                })?
                .open_stream()
                .map_err(|err| {
                    EngineError::OutputUnavailable(format!(
                        "cannot open sink \"{}\": {}",
                        name, err
                    ))
                });
        }
        warn!(
            "RodioEngine: output sink \"{}\" not found, falling back to default",
            name
        );
    }
    DeviceSinkBuilder::open_default_sink()
        .map_err(|err| EngineError::OutputUnavailable(err.to_string()))
}
