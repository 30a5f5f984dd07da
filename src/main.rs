mod config;
mod engine;
mod input;
mod playlist;
mod protocol;
mod rodio_engine;
mod session;
mod transport;

use std::thread;
use std::time::Duration;

use clap::Parser;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::{info, warn};
use tokio::sync::broadcast;

use config::{sanitize_config, Config};
use input::InputPump;
use playlist::Playlist;
use protocol::{Message, SessionMessage};
use rodio_engine::RodioEngine;
use session::SessionManager;

/// Plays the given media locations in order; transport keys (seek, pause,
/// volume, mute, track switch, quit) work while something is playing.
#[derive(Parser, Debug)]
#[command(name = "slickplay")]
#[command(about = "Slick command-line media player")]
#[command(version)]
struct Args {
    /// Overwrite the default output sink
    #[arg(short = 'o', long = "vo", value_name = "OUTPUT_SINK")]
    output_sink: Option<String>,

    /// Media which should be played
    #[arg(value_name = "MEDIUM", required = true)]
    medium: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let _ = disable_raw_mode();
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let args = Args::parse();
    let config = load_config();

    let playlist = Playlist::from_inputs(&args.medium);
    info!("Starting playback session with {} entries", playlist.len());

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    // Command-line override wins over the configured sink
    let sink_name = args.output_sink.or_else(|| {
        let name = config.output.sink_name.clone();
        (!name.is_empty()).then_some(name)
    });

    // Engine construction is the one fatal failure of the process
    let engine = RodioEngine::new(
        sink_name,
        Duration::from_millis(config.playback.progress_poll_ms),
        bus_sender.clone(),
    )?;

    // All receivers subscribe before any component runs, so nothing posted
    // during session startup can be missed.
    let mut process_receiver = bus_sender.subscribe();
    let session_receiver = bus_sender.subscribe();

    // Setup input pump; without a terminal the player still runs through
    // its playlist, it just cannot take transport keys.
    let raw_mode = match enable_raw_mode() {
        Ok(()) => true,
        Err(err) => {
            warn!("Transport keys disabled, no terminal available: {}", err);
            false
        }
    };
    if raw_mode {
        let input_receiver = bus_sender.subscribe();
        let input_sender = bus_sender.clone();
        thread::spawn(move || {
            let mut pump = InputPump::new(input_receiver, input_sender);
            pump.run();
        });
    }

    // Setup session manager
    let session_sender = bus_sender.clone();
    let initial_volume = config.playback.volume;
    thread::spawn(move || {
        let mut session = SessionManager::new(
            Box::new(engine),
            playlist,
            initial_volume,
            session_receiver,
            session_sender,
        );
        session.run();
    });

    // Process loop: wait for the session to announce its end
    loop {
        match process_receiver.blocking_recv() {
            Ok(Message::Session(SessionMessage::Terminated)) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    if raw_mode {
        let _ = disable_raw_mode();
    }
    info!("Application exiting");
    Ok(())
}

fn load_config() -> Config {
    let Some(config_dir) = dirs::config_dir() else {
        warn!("Could not determine the config directory, using defaults");
        return Config::default();
    };
    let config_file = config_dir.join("slickplay.toml");

    if !config_file.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        match toml::to_string(&default_config) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&config_file, text) {
                    warn!("Failed to write default config: {}", err);
                }
            }
            Err(err) => warn!("Failed to serialize default config: {}", err),
        }
    }

    let content = std::fs::read_to_string(&config_file).unwrap_or_default();
    sanitize_config(toml::from_str::<Config>(&content).unwrap_or_default())
}
