//! Provides an asynchronous device session on top of a notification based
//! transport, suitable for applications built on the Tokio runtime.
//!
//! The session owns the discharge state tracker of one device. Frames are
//! pulled from the [`Transport`] one at a time, so a session never decodes two
//! notifications concurrently.
//!
//! # Example
//!
//! ```no_run
//! use redodobms_lib::redodo::Redodo;
//! use redodobms_lib::session::{BmsSession, ChannelTransport, Error};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Error> {
//!     // the peer end is fed by the Bluetooth stack of the host
//!     let (transport, _peer) = ChannelTransport::pair(16);
//!     let mut bms = BmsSession::new(Redodo, transport);
//!
//!     let sample = bms.async_update().await?;
//!     println!("{sample}");
//!
//!     if !bms.disable_discharge().await {
//!         eprintln!("Cannot switch off discharge");
//!     }
//!     Ok(())
//! }
//! ```

use crate::bms::{BmsProtocol, DischargeCommands, DischargeTracker};
use crate::protocol::{Command, ValidFrame};
use crate::sample::Sample;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

#[cfg(feature = "serde")]
use serde::Deserialize;

/// Errors of the asynchronous session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A received buffer was not a valid frame.
    #[error("Redodo error: {0}")]
    Protocol(#[from] crate::Error),
    /// The transport failed to send or receive.
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The other end of the transport is gone.
    #[error("Transport channel closed")]
    ChannelClosed,
    /// No frame arrived within the reply timeout.
    #[error("Tokio timeout elapsed: {0}")]
    TokioElapsed(#[from] tokio::time::error::Elapsed),
    #[error("No frame received for the last request")]
    NoFrame,
}

/// A specialized `Result` type for operations within the `session` module.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default))]
pub struct SessionConfig {
    /// How long to wait for a frame after a request.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub reply_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(5),
        }
    }
}

/// The link to one device, already set up by the host.
#[async_trait]
pub trait Transport: Send {
    /// Makes sure the link is usable, called before every poll and every
    /// discharge command.
    async fn connect(&mut self) -> Result<()>;

    /// Writes to the command characteristic.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Waits for the next notification, `None` once the link is closed.
    async fn notification(&mut self) -> Result<Option<Vec<u8>>>;

    /// A notification that already arrived, without waiting.
    fn pending_notification(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// [`Transport`] over Tokio channels.
///
/// The host forwards GATT notifications into [`ChannelPeer::notifications`]
/// and writes whatever arrives on [`ChannelPeer::writes`] to the device.
#[derive(Debug)]
pub struct ChannelTransport {
    writes: mpsc::Sender<Vec<u8>>,
    notifications: mpsc::Receiver<Vec<u8>>,
}

/// Host side of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelPeer {
    pub writes: mpsc::Receiver<Vec<u8>>,
    pub notifications: mpsc::Sender<Vec<u8>>,
}

impl ChannelTransport {
    pub fn new(writes: mpsc::Sender<Vec<u8>>, notifications: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            writes,
            notifications,
        }
    }

    /// Creates a transport and its peer, each channel holding `capacity` buffers.
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let (write_tx, write_rx) = mpsc::channel(capacity);
        let (notify_tx, notify_rx) = mpsc::channel(capacity);
        (
            Self::new(write_tx, notify_rx),
            ChannelPeer {
                writes: write_rx,
                notifications: notify_tx,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.writes.is_closed() {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writes
            .send(data.to_vec())
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    async fn notification(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.notifications.recv().await)
    }

    fn pending_notification(&mut self) -> Option<Vec<u8>> {
        self.notifications.try_recv().ok()
    }
}

/// One connected BMS: protocol variant, transport and the per device state.
#[derive(Debug)]
pub struct BmsSession<P, T> {
    protocol: P,
    transport: T,
    config: SessionConfig,
    tracker: DischargeTracker,
    discharge: Option<DischargeCommands>, // decided once, at construction
    frame: Option<ValidFrame>,
}

impl<P: BmsProtocol, T: Transport> BmsSession<P, T> {
    pub fn new(protocol: P, transport: T) -> Self {
        Self::with_config(protocol, transport, SessionConfig::default())
    }

    pub fn with_config(protocol: P, transport: T, config: SessionConfig) -> Self {
        let discharge = protocol.discharge_commands();
        Self {
            protocol,
            transport,
            config,
            tracker: DischargeTracker::new(),
            discharge,
            frame: None,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Last known discharge relay state, including optimistic updates.
    pub fn discharge_state(&self) -> bool {
        self.tracker.state()
    }

    pub fn supports_discharge_control(&self) -> bool {
        self.discharge.is_some()
    }

    /// Validates one notification and keeps it as the latest frame, see
    /// [`BmsSession::decode_latest`].
    ///
    /// Invalid buffers are dropped, the previous frame stays in place.
    /// [`BmsSession::async_update`] replaces the latest frame with its reply.
    pub fn handle_notification(&mut self, data: &[u8]) -> bool {
        self.accept(data).is_ok()
    }

    fn accept(&mut self, data: &[u8]) -> std::result::Result<(), crate::Error> {
        log::trace!("RX BLE data: {data:02X?}");
        match self.protocol.validate(data) {
            Ok(frame) => {
                self.frame = Some(frame);
                Ok(())
            }
            Err(err) => {
                log::debug!("discarding notification: {err}");
                Err(err)
            }
        }
    }

    /// Decodes the latest valid frame with the session's discharge state,
    /// calculated values included. `None` before the first frame.
    pub fn decode_latest(&mut self) -> Option<Sample> {
        let frame = self.frame.as_ref()?;
        let mut sample = self.protocol.decode(frame, &mut self.tracker);
        sample.add_calculated(self.protocol.calc_values());
        Some(sample)
    }

    async fn connect(&mut self) -> Result<()> {
        tokio::time::timeout(self.config.reply_timeout, self.transport.connect()).await?
    }

    /// Writes `command`; with `wait_for_notify` returns only after a valid
    /// frame arrived or the reply timeout elapsed.
    ///
    /// The write itself is bounded by the reply timeout as well.
    pub async fn await_reply(&mut self, command: &[u8], wait_for_notify: bool) -> Result<()> {
        // Drop notifications from earlier requests so they are not taken
        // as the reply to this one.
        let mut stale = 0;
        while self.transport.pending_notification().is_some() {
            stale += 1;
        }
        if stale > 0 {
            log::trace!("{stale} pending notifications consumed");
        }

        log::trace!("write bytes: {command:02X?}");
        let reply_timeout = self.config.reply_timeout;
        tokio::time::timeout(reply_timeout, self.transport.write(command)).await??;
        if !wait_for_notify {
            return Ok(());
        }
        tokio::time::timeout(reply_timeout, self.wait_for_frame()).await?
    }

    async fn wait_for_frame(&mut self) -> Result<()> {
        self.frame = None;
        let mut rejected = None;
        loop {
            match self.transport.notification().await? {
                Some(data) => match self.accept(&data) {
                    Ok(()) => return Ok(()),
                    Err(err) => rejected = Some(err),
                },
                // report why the last notification was dropped, if there was one
                None => return Err(rejected.map_or(Error::ChannelClosed, Error::from)),
            }
        }
    }

    /// Polls the BMS and decodes its answer, calculated values included.
    pub async fn async_update(&mut self) -> Result<Sample> {
        log::trace!("poll status");
        self.connect().await?;
        self.await_reply(self.protocol.poll_command().bytes(), true).await?;
        let sample = self.decode_latest().ok_or(Error::NoFrame)?;
        log::debug!("decoded: {sample}");
        Ok(sample)
    }

    /// Switches the discharge relay on, `false` if the command could not be sent.
    pub async fn enable_discharge(&mut self) -> bool {
        self.switch_discharge(true).await
    }

    /// Switches the discharge relay off, `false` if the command could not be sent.
    pub async fn disable_discharge(&mut self) -> bool {
        self.switch_discharge(false).await
    }

    async fn switch_discharge(&mut self, enable: bool) -> bool {
        let Some(commands) = self.discharge else {
            log::warn!(
                "{} does not support discharge control",
                self.protocol.device_info().manufacturer
            );
            return false;
        };
        let command = if enable {
            commands.enable
        } else {
            commands.disable
        };
        match self.send_discharge(command, enable).await {
            Ok(()) => {
                log::info!("{command} sent");
                true
            }
            Err(err) => {
                log::error!("Failed to {command}: {err}");
                false
            }
        }
    }

    async fn send_discharge(&mut self, command: Command, enable: bool) -> Result<()> {
        log::debug!("{command} command bytes: {:02X?}", command.bytes());
        self.connect().await?;
        // The next decoded frame corrects this if the relay did not follow.
        self.tracker.set(enable);
        self.await_reply(command.bytes(), false).await
    }
}
