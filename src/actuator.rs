//! Alarm actuator: the buzzer board on the other end of a serial line.
//!
//! The board understands three newline-terminated ASCII commands and sends
//! nothing back. Writes can block on a slow or wedged port, so commands are
//! queued to a dedicated worker thread ([`ActuatorWorker`]) and the rest of
//! the monitor only ever talks to an [`ActuatorLink`].

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::error::ActuatorError;

/// Read/write timeout on the serial port.
const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Commands understood by the alarm board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmCommand {
    On,
    Off,
    Test,
}

impl AlarmCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmCommand::On => "ALARM_ON",
            AlarmCommand::Off => "ALARM_OFF",
            AlarmCommand::Test => "TEST",
        }
    }

    /// The bytes put on the wire, terminator included.
    pub fn line(&self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl fmt::Display for AlarmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device that accepts alarm commands. Calls may block.
pub trait Actuator: Send {
    fn send(&mut self, command: AlarmCommand) -> Result<(), ActuatorError>;
    fn is_connected(&self) -> bool;
}

/// Fire-and-forget line protocol over any writer.
pub struct LineActuator<W> {
    writer: W,
    label: String,
}

impl<W: Write + Send> LineActuator<W> {
    pub fn new(writer: W, label: impl Into<String>) -> Self {
        Self {
            writer,
            label: label.into(),
        }
    }
}

impl<W: Write + Send> Actuator for LineActuator<W> {
    fn send(&mut self, command: AlarmCommand) -> Result<(), ActuatorError> {
        self.writer.write_all(command.line().as_bytes())?;
        self.writer.flush()?;
        debug!(device = %self.label, %command, "Actuator command written");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

pub type SerialActuator = LineActuator<Box<dyn SerialPort>>;

/// Open the alarm board's serial port and wait for it to settle.
///
/// Boards that reset on connect ignore anything written during the settle
/// window, so this blocks for `settle` before returning.
pub fn open_serial(path: &str, baud: u32, settle: Duration) -> Result<SerialActuator, ActuatorError> {
    let port = serialport::new(path, baud)
        .timeout(SERIAL_TIMEOUT)
        .open()
        .map_err(|source| ActuatorError::Open {
            port: path.to_string(),
            source,
        })?;

    thread::sleep(settle);
    info!(port = %path, baud, "Alarm actuator connected");

    Ok(LineActuator::new(port, path))
}

/// Stand-in used when no board is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedActuator;

impl Actuator for DisconnectedActuator {
    fn send(&mut self, _command: AlarmCommand) -> Result<(), ActuatorError> {
        Err(ActuatorError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// Non-blocking handle to whatever carries commands to the board.
pub trait ActuatorLink: Send + Sync {
    /// Queue a command. Never blocks; delivery failures are logged by the
    /// link, not reported to the caller.
    fn submit(&self, command: AlarmCommand);

    fn is_connected(&self) -> bool;

    /// Stop accepting commands. Returns the worker thread, if any, so the
    /// caller can wait for queued commands to drain.
    fn close(&self) -> Option<JoinHandle<()>> {
        None
    }
}

/// Owns an [`Actuator`] on a dedicated thread and feeds it queued commands
/// in order.
pub struct ActuatorWorker {
    tx: Mutex<Option<Sender<AlarmCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl ActuatorWorker {
    pub fn spawn(mut actuator: Box<dyn Actuator>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<AlarmCommand>();
        let connected = Arc::new(AtomicBool::new(actuator.is_connected()));
        let link_state = connected.clone();

        let thread = thread::Builder::new()
            .name("alarm-actuator".to_string())
            .spawn(move || {
                let mut reported_offline = false;
                for command in rx {
                    match actuator.send(command) {
                        Ok(()) => {
                            link_state.store(true, Ordering::Relaxed);
                            reported_offline = false;
                        }
                        Err(ActuatorError::NotConnected) if reported_offline => {
                            debug!(%command, "Actuator offline, command dropped");
                        }
                        Err(e) => {
                            // One warning per outage; the rest go to debug
                            if !reported_offline {
                                warn!(%command, error = %e, "Alarm command not delivered");
                                reported_offline = true;
                            } else {
                                debug!(%command, error = %e, "Alarm command not delivered");
                            }
                            link_state.store(false, Ordering::Relaxed);
                        }
                    }
                }
                debug!("Actuator worker stopped");
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            connected,
        })
    }
}

impl ActuatorLink for ActuatorWorker {
    fn submit(&self, command: AlarmCommand) {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(command).is_err() {
                    warn!(%command, "Actuator worker gone, command dropped");
                }
            }
            None => debug!(%command, "Actuator closed, command dropped"),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn close(&self) -> Option<JoinHandle<()>> {
        // Dropping the sender ends the worker loop once the queue drains
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.thread.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
