//! Codec node: hardware decode (source side) or encode (sink side)
//!
//! The node owns a `VideoCodec` and a worker task. The codec reports free
//! input slots, finished output and errors through a `CodecCallback` from its
//! own thread; the worker serializes those with incoming buffers, feeds the
//! codec, and forwards output to the next node. Codec lifecycle calls go
//! through a dedicated mutex so release never races a feed.

use crate::buffer::{DataBuffer, FrameMeta};
use crate::config::{VideoCodecType, VideoConfig, VideoPixelFormat};
use crate::node::{EventSender, NodeLink, PipelineEvent, ProcessNode};
use dcamera_core::{DCameraError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Most input buffers waiting for a codec slot
pub const DECODE_INPUT_QUEUE_MAX: usize = 1000;
/// Highest frame rate a codec session accepts
pub const MAX_CODEC_FRAME_RATE: u32 = 30;
pub const MIN_CODEC_WIDTH: u32 = 320;
pub const MIN_CODEC_HEIGHT: u32 = 240;
pub const MAX_CODEC_WIDTH: u32 = 1920;
pub const MAX_CODEC_HEIGHT: u32 = 1080;

const FEED_RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecDirection {
    Encode,
    Decode,
}

/// Parameters a codec is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub direction: CodecDirection,
    pub codec: VideoCodecType,
    pub pixel_format: VideoPixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Output frame still living in codec-owned memory
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    pub index: u32,
    pub data: Arc<[u8]>,
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

enum CodecMsg {
    Input(DataBuffer),
    InputAvailable(u32),
    Output(SurfaceFrame),
    Error(String),
}

/// Handle a codec uses to report back to its node
///
/// Safe to call from any thread.
#[derive(Clone)]
pub struct CodecCallback(mpsc::UnboundedSender<CodecMsg>);

impl CodecCallback {
    pub fn on_input_available(&self, index: u32) {
        let _ = self.0.send(CodecMsg::InputAvailable(index));
    }

    pub fn on_output(&self, frame: SurfaceFrame) {
        let _ = self.0.send(CodecMsg::Output(frame));
    }

    pub fn on_error(&self, message: impl Into<String>) {
        let _ = self.0.send(CodecMsg::Error(message.into()));
    }
}

/// Hardware (or software) codec instance
pub trait VideoCodec: Send {
    fn configure(&mut self, config: &CodecConfig, callback: CodecCallback) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    /// Submit one buffer into a free input slot
    fn queue_input(&mut self, index: u32, data: &[u8], timestamp_us: i64) -> Result<()>;
    /// Hand an output slot back once its frame has been copied out
    fn release_output(&mut self, index: u32) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

/// Creates codec instances for codec nodes
pub trait CodecFactory: Send + Sync {
    fn create(&self, direction: CodecDirection, codec: VideoCodecType) -> Result<Box<dyn VideoCodec>>;
}

/// Whether a configuration is within what the codec supports
///
/// All bounds must hold at once.
pub fn is_in_codec_range(config: &VideoConfig) -> bool {
    config.frame_rate <= MAX_CODEC_FRAME_RATE
        && (MIN_CODEC_WIDTH..=MAX_CODEC_WIDTH).contains(&config.width)
        && (MIN_CODEC_HEIGHT..=MAX_CODEC_HEIGHT).contains(&config.height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Uninitialized,
    Ready,
    Releasing,
}

struct CodecShared {
    codec: Mutex<Option<Box<dyn VideoCodec>>>,
    queued: AtomicUsize,
    failed: AtomicBool,
}

impl CodecShared {
    /// Stop and release the codec, if it is still present
    fn shutdown(&self) {
        let codec = self
            .codec
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut codec) = codec {
            if let Err(e) = codec.flush() {
                debug!("Codec flush failed: {}", e);
            }
            if let Err(e) = codec.stop() {
                warn!("Codec stop failed: {}", e);
            }
            if let Err(e) = codec.release() {
                warn!("Codec release failed: {}", e);
            }
        }
    }
}

/// Pipeline node wrapping a codec
pub struct CodecNode {
    direction: CodecDirection,
    factory: Arc<dyn CodecFactory>,
    events: EventSender,
    next: NodeLink,
    state: NodeState,
    passthrough: bool,
    shared: Arc<CodecShared>,
    input_tx: Option<mpsc::UnboundedSender<CodecMsg>>,
    worker: Option<JoinHandle<()>>,
}

impl CodecNode {
    pub fn new(direction: CodecDirection, factory: Arc<dyn CodecFactory>, events: EventSender) -> Self {
        Self {
            direction,
            factory,
            next: NodeLink::terminal(events.clone()),
            events,
            state: NodeState::Uninitialized,
            passthrough: false,
            shared: Arc::new(CodecShared {
                codec: Mutex::new(None),
                queued: AtomicUsize::new(0),
                failed: AtomicBool::new(false),
            }),
            input_tx: None,
            worker: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Input buffers waiting for a codec slot
    pub fn queued_inputs(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    fn output_config(&self, source: &VideoConfig, target: &VideoConfig) -> Result<VideoConfig> {
        match self.direction {
            CodecDirection::Decode => {
                if source.codec == VideoCodecType::NoCodec {
                    return Err(DCameraError::InvalidArgument(
                        "decoder source must be encoded".into(),
                    ));
                }
                // Decoders emit NV12; any further conversion is a later node's job
                Ok(VideoConfig {
                    codec: VideoCodecType::NoCodec,
                    pixel_format: VideoPixelFormat::Nv12,
                    ..*source
                })
            }
            CodecDirection::Encode => {
                if source.codec != VideoCodecType::NoCodec || target.codec == VideoCodecType::NoCodec {
                    return Err(DCameraError::InvalidArgument(
                        "encoder needs raw input and an encoded target".into(),
                    ));
                }
                Ok(VideoConfig {
                    codec: target.codec,
                    ..*source
                })
            }
        }
    }

    fn start_codec(&mut self, source: &VideoConfig, output: &VideoConfig) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| DCameraError::WrongState("codec node needs a tokio runtime".into()))?;

        let codec_type = match self.direction {
            CodecDirection::Decode => source.codec,
            CodecDirection::Encode => output.codec,
        };
        let config = CodecConfig {
            direction: self.direction,
            codec: codec_type,
            pixel_format: match self.direction {
                CodecDirection::Decode => output.pixel_format,
                CodecDirection::Encode => source.pixel_format,
            },
            width: source.width,
            height: source.height,
            frame_rate: source.frame_rate,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut codec = self.factory.create(self.direction, codec_type)?;
        let started = codec
            .configure(&config, CodecCallback(tx.clone()))
            .and_then(|_| codec.start());
        if let Err(e) = started {
            error!(?config, "Codec start failed: {}", e);
            let _ = codec.release();
            return Err(DCameraError::Device(format!("codec start failed: {}", e)));
        }
        *self
            .shared
            .codec
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(codec);

        let worker = CodecWorker {
            shared: self.shared.clone(),
            next: self.next.clone(),
            events: self.events.clone(),
            output: *output,
            inputs: VecDeque::new(),
            slots: VecDeque::new(),
            retry_at: None,
        };
        self.worker = Some(runtime.spawn(worker.run(rx)));
        self.input_tx = Some(tx);
        Ok(())
    }
}

impl ProcessNode for CodecNode {
    fn node_name(&self) -> &'static str {
        match self.direction {
            CodecDirection::Decode => "DecodeNode",
            CodecDirection::Encode => "EncodeNode",
        }
    }

    fn init_node(&mut self, source: &VideoConfig, target: &VideoConfig) -> Result<VideoConfig> {
        if self.state != NodeState::Uninitialized {
            return Err(DCameraError::WrongState(format!(
                "{} already initialized",
                self.node_name()
            )));
        }
        if !is_in_codec_range(source) || !is_in_codec_range(target) {
            return Err(DCameraError::InvalidArgument(format!(
                "codec range exceeded: source {}x{}@{} target {}x{}@{}",
                source.width,
                source.height,
                source.frame_rate,
                target.width,
                target.height,
                target.frame_rate
            )));
        }

        if source.codec == target.codec {
            info!(node = self.node_name(), "Codec types match, passing frames through");
            self.passthrough = true;
            self.state = NodeState::Ready;
            return Ok(*source);
        }

        let output = self.output_config(source, target)?;
        self.start_codec(source, &output)?;
        self.state = NodeState::Ready;
        info!(node = self.node_name(), ?output, "Codec node ready");
        Ok(output)
    }

    fn process_data(&mut self, buffers: Vec<DataBuffer>) -> Result<()> {
        if self.state != NodeState::Ready {
            return Err(DCameraError::WrongState(format!(
                "{} is not ready",
                self.node_name()
            )));
        }
        if buffers.is_empty() {
            return Err(DCameraError::InvalidArgument("no buffers to process".into()));
        }
        if self.passthrough {
            for buffer in buffers {
                self.next.forward(buffer)?;
            }
            return Ok(());
        }
        if self.shared.failed.load(Ordering::SeqCst) {
            return Err(DCameraError::Device("codec has failed".into()));
        }
        let tx = self
            .input_tx
            .as_ref()
            .ok_or_else(|| DCameraError::WrongState("codec worker missing".into()))?;

        for buffer in buffers {
            if buffer.is_empty() {
                return Err(DCameraError::InvalidArgument("empty input buffer".into()));
            }
            let queued = self.shared.queued.fetch_add(1, Ordering::SeqCst);
            if queued >= DECODE_INPUT_QUEUE_MAX {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(DCameraError::ResourceExhausted(format!(
                    "codec input queue full ({} buffers)",
                    DECODE_INPUT_QUEUE_MAX
                )));
            }
            if tx.send(CodecMsg::Input(buffer)).is_err() {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(DCameraError::WrongState("codec worker stopped".into()));
            }
        }
        Ok(())
    }

    fn release_process_node(&mut self) {
        if self.state == NodeState::Releasing {
            return;
        }
        self.state = NodeState::Releasing;
        debug!(node = self.node_name(), "Releasing codec node");

        self.input_tx = None;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.shared.shutdown();
        self.shared.queued.store(0, Ordering::SeqCst);
        self.next.release();
    }

    fn set_next(&mut self, next: Box<dyn ProcessNode>) {
        self.next.set_next(next);
    }
}

impl Drop for CodecNode {
    fn drop(&mut self) {
        self.release_process_node();
    }
}

/// Event loop owning the input and free-slot queues
struct CodecWorker {
    shared: Arc<CodecShared>,
    next: NodeLink,
    events: EventSender,
    output: VideoConfig,
    inputs: VecDeque<DataBuffer>,
    slots: VecDeque<u32>,
    retry_at: Option<Instant>,
}

impl CodecWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CodecMsg>) {
        loop {
            let msg = match self.retry_at {
                Some(at) => tokio::select! {
                    msg = rx.recv() => msg,
                    _ = tokio::time::sleep_until(at) => {
                        self.retry_at = None;
                        self.feed();
                        continue;
                    }
                },
                None => rx.recv().await,
            };
            let Some(msg) = msg else {
                break;
            };

            match msg {
                CodecMsg::Input(buffer) => {
                    self.inputs.push_back(buffer);
                    self.feed();
                }
                CodecMsg::InputAvailable(index) => {
                    self.slots.push_back(index);
                    self.feed();
                }
                CodecMsg::Output(frame) => self.deliver(frame),
                CodecMsg::Error(message) => {
                    error!("Codec reported error: {}", message);
                    self.shared.failed.store(true, Ordering::SeqCst);
                    self.shared.shutdown();
                    let _ = self
                        .events
                        .send(PipelineEvent::Error(DCameraError::Device(message)));
                    break;
                }
            }
        }
        debug!("Codec worker exiting");
    }

    /// Submit queued inputs while free slots remain
    fn feed(&mut self) {
        if self.retry_at.is_some() {
            return;
        }
        while let (Some(buffer), Some(&index)) = (self.inputs.front(), self.slots.front()) {
            let result = {
                let mut codec = self.shared.codec.lock().unwrap_or_else(PoisonError::into_inner);
                match codec.as_mut() {
                    Some(codec) => codec.queue_input(index, &buffer.data, buffer.meta.timestamp_us),
                    None => return,
                }
            };
            match result {
                Ok(()) => {
                    self.inputs.pop_front();
                    self.slots.pop_front();
                    self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                }
                Err(e) if e.is_retryable() => {
                    debug!(index, "Codec feed failed, retrying: {}", e);
                    self.retry_at = Some(Instant::now() + FEED_RETRY_DELAY);
                    return;
                }
                Err(e) => {
                    warn!(index, "Dropping input rejected by codec: {}", e);
                    self.inputs.pop_front();
                    self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                    let _ = self.events.send(PipelineEvent::Error(e));
                }
            }
        }
    }

    /// Copy a finished frame out of codec memory and pass it on
    fn deliver(&mut self, frame: SurfaceFrame) {
        let meta = FrameMeta {
            timestamp_us: frame.timestamp_us,
            frame_index: 0,
            width: frame.width,
            height: frame.height,
            stride: frame.stride,
            slice_height: 0,
            pixel_format: match self.output.codec {
                VideoCodecType::NoCodec => Some(self.output.pixel_format),
                _ => None,
            },
        };
        let buffer = DataBuffer::with_meta(frame.data.to_vec(), meta);

        if let Some(codec) = self
            .shared
            .codec
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            if let Err(e) = codec.release_output(frame.index) {
                warn!(index = frame.index, "Release output failed: {}", e);
            }
        }

        if let Err(e) = self.next.forward(buffer) {
            warn!("Forwarding codec output failed: {}", e);
            let _ = self.events.send(PipelineEvent::Error(e));
        }
    }
}
