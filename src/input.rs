//! Terminal input pump: raw-mode key events translated into transport
//! commands on the bus.

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use log::{debug, warn};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{Message, SessionMessage, TransportCommand};
use crate::transport;

/// How long one poll for a terminal event may block before the pump checks
/// the bus for termination again.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct InputPump {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
}

impl InputPump {
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>) -> Self {
        Self {
            bus_consumer,
            bus_producer,
        }
    }

    /// Pump terminal keys onto the bus until the session terminates.
    pub fn run(&mut self) {
        loop {
            if self.session_is_over() {
                debug!("InputPump: session over, input pump stopping");
                return;
            }

            match event::poll(INPUT_POLL_INTERVAL) {
                Ok(false) => {}
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        if let Some(command) = command_for_event(key) {
                            debug!("InputPump: {:?}", command);
                            if self.bus_producer.send(Message::Control(command)).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("InputPump: failed to read terminal event: {}", err);
                        return;
                    }
                },
                Err(err) => {
                    warn!("InputPump: terminal unavailable: {}", err);
                    return;
                }
            }
        }
    }

    fn session_is_over(&mut self) -> bool {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(Message::Session(SessionMessage::Terminated)) => return true,
                Ok(_) => {}
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => return true,
            }
        }
    }
}

/// Translate one terminal key event into a transport command, if any.
fn command_for_event(key: KeyEvent) -> Option<TransportCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    // Ctrl+C quits like "q": teardown still rides the normal session path
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char('c') = key.code {
            return Some(TransportCommand::Quit);
        }
        return None;
    }

    let name = match key.code {
        KeyCode::Left => "Left".to_string(),
        KeyCode::Right => "Right".to_string(),
        KeyCode::Up => "Up".to_string(),
        KeyCode::Down => "Down".to_string(),
        KeyCode::PageUp => "PageUp".to_string(),
        KeyCode::PageDown => "PageDown".to_string(),
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char(c) => c.to_string(),
        _ => return None,
    };
    Some(transport::command_for_key(&name))
}
