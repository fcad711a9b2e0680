//! Source data path: data session → pipeline → producer → HAL buffers
//!
//! One data path serves one HAL stream. Messages from the data session are
//! tagged with the negotiated geometry and pushed into the processing
//! pipeline; processed frames go to the stream producer. A frame the
//! pipeline rejects is dropped. Fatal pipeline failures and loss of the
//! session are reported once, as a device error.

use crate::producer::{ProducerConfig, StreamProducer};
use dcamera_channel::ChannelEvent;
use dcamera_core::{DCStreamType, DCameraError, DHBase, ErrorKind, Result};
use dcamera_hdi::{BufferProvider, DCameraHost};
use dcamera_pipeline::{
    CodecFactory, DataBuffer, DataProcessPipeline, EventReceiver, FrameMeta, PipelineEvent,
    PipelineType, VideoCodecType, VideoConfig,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one data path carries
#[derive(Debug, Clone)]
pub struct DataPathConfig {
    pub dh_base: DHBase,
    pub stream_id: i32,
    pub stream_type: DCStreamType,
    /// Frames as they arrive from the sink
    pub source: VideoConfig,
    /// Frames as the HAL stream expects them
    pub target: VideoConfig,
    pub producer: ProducerConfig,
}

struct PathShared {
    dh_base: DHBase,
    source: VideoConfig,
    host: Arc<DCameraHost>,
    pipeline: Mutex<DataProcessPipeline>,
    producer: StreamProducer,
    received: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicBool,
}

impl PathShared {
    /// Report the first failure to the device; later ones are only logged
    async fn fail(&self, error: DCameraError) {
        if self.failed.swap(true, Ordering::SeqCst) {
            debug!(dh = %self.dh_base, "Further data path error: {}", error);
            return;
        }
        error!(dh = %self.dh_base, "Data path failed: {}", error);
        if let Err(e) = self.host.notify_dcamera_error(&self.dh_base, error).await {
            warn!(dh = %self.dh_base, "Reporting data path error failed: {}", e);
        }
    }

    /// Drop the frame for recoverable errors, fail the path for fatal ones
    async fn on_error(&self, error: DCameraError) {
        if error.kind() == ErrorKind::Fatal {
            self.fail(error).await;
            return;
        }
        let rejected = self.rejected.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(dh = %self.dh_base, rejected, "Frame dropped: {}", error);
    }

    fn tag(&self, data: Vec<u8>) -> DataBuffer {
        let frame_index = self.received.fetch_add(1, Ordering::SeqCst);
        let raw = self.source.codec == VideoCodecType::NoCodec;
        DataBuffer::with_meta(
            data,
            FrameMeta {
                frame_index,
                width: self.source.width,
                height: self.source.height,
                pixel_format: raw.then_some(self.source.pixel_format),
                ..FrameMeta::default()
            },
        )
    }

    fn process(&self, data: Vec<u8>) -> Result<()> {
        let buffer = self.tag(data);
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process_data(vec![buffer])
    }
}

/// A running source data path
pub struct SourceDataPath {
    shared: Arc<PathShared>,
    input: JoinHandle<()>,
    output: JoinHandle<()>,
}

impl SourceDataPath {
    /// Build the pipeline, start the producer and begin consuming `events`
    pub fn start(
        config: DataPathConfig,
        factory: Arc<dyn CodecFactory>,
        host: Arc<DCameraHost>,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> Result<Self> {
        let pipeline_type = match config.stream_type {
            DCStreamType::ContinuousFrame => PipelineType::Video,
            DCStreamType::SnapshotFrame => PipelineType::PhotoJpeg,
        };
        let (mut pipeline, pipeline_events) = DataProcessPipeline::new(factory);
        pipeline.create_process_pipeline(pipeline_type, &config.source, &config.target)?;

        let provider: Arc<dyn BufferProvider> = host.clone();
        let producer = StreamProducer::new(
            config.dh_base.clone(),
            config.stream_id,
            config.stream_type,
            config.producer.clone(),
            provider,
        );
        producer.start()?;

        let shared = Arc::new(PathShared {
            dh_base: config.dh_base.clone(),
            source: config.source,
            host,
            pipeline: Mutex::new(pipeline),
            producer,
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        });
        let input = tokio::spawn(input_loop(shared.clone(), events));
        let output = tokio::spawn(output_loop(shared.clone(), pipeline_events));
        info!(
            dh = %config.dh_base,
            stream_id = config.stream_id,
            ?pipeline_type,
            "Data path started"
        );
        Ok(Self {
            shared,
            input,
            output,
        })
    }

    /// Messages received from the data session
    pub fn received(&self) -> u64 {
        self.shared.received.load(Ordering::SeqCst)
    }

    /// Frames dropped after a recoverable pipeline error
    pub fn rejected(&self) -> u64 {
        self.shared.rejected.load(Ordering::SeqCst)
    }

    pub fn producer(&self) -> &StreamProducer {
        &self.shared.producer
    }

    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Tear down in dependency order: input, pipeline, producer
    pub async fn stop(self) {
        self.input.abort();
        let _ = self.input.await;
        self.shared
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .destroy_pipeline();
        self.shared.producer.stop().await;
        self.output.abort();
        let _ = self.output.await;
        info!(
            dh = %self.shared.dh_base,
            received = self.shared.received.load(Ordering::SeqCst),
            "Data path stopped"
        );
    }
}

async fn input_loop(shared: Arc<PathShared>, mut events: mpsc::Receiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Connected => debug!(dh = %shared.dh_base, "Data session connected"),
            ChannelEvent::Data(data) => {
                if let Err(e) = shared.process(data) {
                    shared.on_error(e).await;
                }
            }
            ChannelEvent::Error(e) => warn!(dh = %shared.dh_base, "Data session error: {}", e),
            ChannelEvent::Disconnected => {
                shared
                    .fail(DCameraError::Transport("data session lost".into()))
                    .await;
                break;
            }
        }
    }
}

async fn output_loop(shared: Arc<PathShared>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Processed(buffer) => shared.producer.feed_stream(buffer),
            PipelineEvent::Error(e) => shared.on_error(e).await,
        }
    }
}
