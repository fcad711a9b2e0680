//! Softbus-style session between a source and a sink device
//!
//! A session owns one transport connection. Byte-mode sessions fragment every
//! message with the 21-byte header and reassemble on receive; stream-mode
//! sessions pass whole frames through untouched. All receive processing for a
//! session runs on its own task, so reassembly state needs no locking.

use crate::frame::{FrameHeader, MAX_TOTAL_LEN, fragment};
use crate::reassembly::Reassembler;
use crate::transport::{AsyncReader, AsyncWriter};
use dcamera_core::{DCStreamType, DCameraError, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Prefix shared by every distributed camera session name
pub const SESSION_NAME_PREFIX: &str = "ohos.dhardware.dcamera_";

/// How a session carries messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Fragmented messages with reassembly
    Bytes,
    /// Whole frames, framing left to the transport
    Stream,
}

/// Which of the three per-device channels a session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionFlag {
    Control,
    DataContinue,
    DataSnapshot,
}

impl SessionFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionFlag::Control => "control",
            SessionFlag::DataContinue => "dataContinue",
            SessionFlag::DataSnapshot => "dataSnapshot",
        }
    }

    /// Value written into the header `dataType` field
    pub fn data_type(self) -> u32 {
        match self {
            SessionFlag::Control => 0,
            SessionFlag::DataContinue => 1,
            SessionFlag::DataSnapshot => 2,
        }
    }

    /// Data channel carrying frames of the given stream kind
    pub fn for_stream(stream_type: DCStreamType) -> Self {
        match stream_type {
            DCStreamType::ContinuousFrame => SessionFlag::DataContinue,
            DCStreamType::SnapshotFrame => SessionFlag::DataSnapshot,
        }
    }
}

impl std::str::FromStr for SessionFlag {
    type Err = DCameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control" => Ok(SessionFlag::Control),
            "dataContinue" => Ok(SessionFlag::DataContinue),
            "dataSnapshot" => Ok(SessionFlag::DataSnapshot),
            other => Err(DCameraError::InvalidArgument(format!(
                "unknown session flag {}",
                other
            ))),
        }
    }
}

/// Build the session name for a hardware id and channel
pub fn session_name(dh_id: &str, flag: SessionFlag) -> String {
    format!("{}{}_{}", SESSION_NAME_PREFIX, dh_id, flag.as_str())
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// Extra attempts after a transient write failure
    pub send_retries: u32,
    pub retry_backoff: Duration,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Bytes,
            send_retries: 3,
            retry_backoff: Duration::from_millis(20),
            event_capacity: 64,
        }
    }
}

/// Everything a session reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    /// One complete message
    Data(Vec<u8>),
    Error(DCameraError),
}

/// One open session
pub struct SoftbusSession {
    name: String,
    flag: SessionFlag,
    config: SessionConfig,
    writer: Mutex<Box<dyn AsyncWriter>>,
    seq: AtomicU32,
    closed: AtomicBool,
    recv_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SoftbusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftbusSession")
            .field("name", &self.name)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl SoftbusSession {
    /// Start a session over a connected transport
    ///
    /// Spawns the receive task on the current runtime. The first event on
    /// the returned receiver is always `Connected`.
    pub fn open<R, W>(
        dh_id: &str,
        flag: SessionFlag,
        config: SessionConfig,
        reader: R,
        writer: W,
    ) -> (Arc<Self>, mpsc::Receiver<ChannelEvent>)
    where
        R: AsyncReader + 'static,
        W: AsyncWriter + 'static,
    {
        let name = session_name(dh_id, flag);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let mode = config.mode;

        let session = Arc::new(Self {
            name: name.clone(),
            flag,
            config,
            writer: Mutex::new(Box::new(writer)),
            seq: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            recv_task: std::sync::Mutex::new(None),
        });

        info!(session = %name, ?mode, "Session opened");
        let handle = tokio::spawn(receive_task(name, mode, reader, event_tx));
        *session
            .recv_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        (session, event_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flag(&self) -> SessionFlag {
        self.flag
    }

    pub fn mode(&self) -> SessionMode {
        self.config.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one logical message
    pub async fn send_data(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(DCameraError::WrongState(format!(
                "session {} is closed",
                self.name
            )));
        }
        match self.config.mode {
            SessionMode::Bytes => self.send_bytes(data).await,
            SessionMode::Stream => self.send_stream(data).await,
        }
    }

    async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let packets = fragment(data, self.flag.data_type(), seq)?;
        debug!(session = %self.name, seq, packets = packets.len(), "Sending message");

        // Hold the writer across all fragments so messages never interleave
        let mut writer = self.writer.lock().await;
        for packet in &packets {
            self.write_with_retry(writer.as_mut(), packet).await?;
        }
        Ok(())
    }

    async fn send_stream(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > MAX_TOTAL_LEN {
            return Err(DCameraError::InvalidArgument(format!(
                "stream frame of {} bytes",
                data.len()
            )));
        }
        let mut writer = self.writer.lock().await;
        self.write_with_retry(writer.as_mut(), data).await
    }

    async fn write_with_retry(&self, writer: &mut dyn AsyncWriter, packet: &[u8]) -> Result<()> {
        let mut attempt = 0;
        loop {
            match writer.write_message(packet).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && !writer.is_atomic() => {
                    // A partial packet may be on the wire, resending would desync the peer
                    error!(session = %self.name, "Send failed mid-packet, closing session: {}", e);
                    self.close();
                    return Err(e);
                }
                Err(e) if e.is_retryable() && attempt < self.config.send_retries => {
                    attempt += 1;
                    warn!(session = %self.name, attempt, "Send failed, retrying: {}", e);
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    error!(session = %self.name, "Send failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Stop receiving and refuse further sends
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self
            .recv_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        info!(session = %self.name, "Session closed");
    }
}

impl Drop for SoftbusSession {
    fn drop(&mut self) {
        if let Some(handle) = self
            .recv_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Background receive loop for one session
///
/// Exits when the transport fails or the event receiver is dropped.
async fn receive_task<R: AsyncReader>(
    name: String,
    mode: SessionMode,
    mut reader: R,
    event_tx: mpsc::Sender<ChannelEvent>,
) {
    if event_tx.send(ChannelEvent::Connected).await.is_err() {
        return;
    }
    let mut reassembler = Reassembler::new();

    loop {
        let packet = match reader.read_message().await {
            Ok(packet) => packet,
            Err(e) => {
                info!(session = %name, "Session transport ended: {}", e);
                let _ = event_tx.send(ChannelEvent::Disconnected).await;
                break;
            }
        };

        let message = match mode {
            SessionMode::Stream if packet.is_empty() => {
                warn!(session = %name, "Dropping empty stream frame");
                continue;
            }
            SessionMode::Stream => packet,
            SessionMode::Bytes => match unpack(&mut reassembler, &packet) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    warn!(session = %name, "Dropping packet: {}", e);
                    continue;
                }
            },
        };

        if event_tx.send(ChannelEvent::Data(message)).await.is_err() {
            debug!(session = %name, "Event receiver dropped, receive task exiting");
            break;
        }
    }
}

fn unpack(reassembler: &mut Reassembler, packet: &[u8]) -> Result<Option<Vec<u8>>> {
    let (header, payload) = FrameHeader::decode(packet)?;
    reassembler.push(&header, payload)
}
