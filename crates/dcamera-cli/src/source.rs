//! Source end: exposes the sink's camera as a local HAL device

use crate::config::RelayConfig;
use anyhow::{Context, Result};
use dcamera_channel::tcp::{self, TcpReadWrapper, TcpWriteWrapper};
use dcamera_channel::{ChannelEvent, SessionConfig, SessionFlag, SoftbusSession};
use dcamera_core::{
    BufferQueueHandle, CaptureInfo, DCStreamType, DCameraError, DHBase, EncodeType, PixelFormat,
    StreamInfo, StreamIntent,
};
use dcamera_hdi::{DCameraHost, DeviceEvent, MemoryBufferQueue, StreamOperatorEvent};
use dcamera_pipeline::{
    CodecDirection, CodecFactory, VideoCodec, VideoCodecType, VideoConfig, VideoPixelFormat,
};
use dcamera_service::{
    ControlDispatcher, DataPathConfig, ProducerConfig, SourceDataPath, run_control_events,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const STREAM_ID: i32 = 1;
const CAPTURE_ID: i32 = 1;

/// The relay streams raw frames, so no codec is ever available
struct RawOnly;

impl CodecFactory for RawOnly {
    fn create(
        &self,
        _direction: CodecDirection,
        codec: VideoCodecType,
    ) -> dcamera_core::Result<Box<dyn VideoCodec>> {
        Err(DCameraError::Device(format!("{:?} codec not available", codec)))
    }
}

/// Ability advertised for the sink: one NV21 preview at the configured size
pub fn ability_json(width: u32, height: u32) -> String {
    let nv21 = PixelFormat::Ycrcb420Sp.as_i32();
    serde_json::json!({
        "CodecType": [],
        "OutputFormat": { "Preview": [nv21] },
        "Resolution": { nv21.to_string(): [format!("{}*{}", width, height)] },
    })
    .to_string()
}

async fn connect_with_retry(addr: &str) -> Result<(TcpReadWrapper, TcpWriteWrapper)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match tcp::connect(addr).await {
            Ok(halves) => return Ok(halves),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, "Sink not reachable at {}: {}", addr, e);
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e).with_context(|| format!("connecting to {}", addr)),
        }
    }
}

async fn open_session(
    config: &RelayConfig,
    addr: &str,
    flag: SessionFlag,
) -> Result<(Arc<SoftbusSession>, mpsc::Receiver<ChannelEvent>)> {
    let (reader, writer) = connect_with_retry(addr).await?;
    Ok(SoftbusSession::open(&config.dh_id, flag, SessionConfig::default(), reader, writer))
}

/// Connect, capture for the configured duration, then tear everything down
pub async fn run(config: RelayConfig) -> Result<()> {
    let dh_base = DHBase::new("relay-sink", config.dh_id.clone());

    let (control, control_events) =
        open_session(&config, &config.control_addr(), SessionFlag::Control).await?;
    let (continuous, continuous_events) =
        open_session(&config, &config.continuous_addr(), SessionFlag::DataContinue).await?;
    let (snapshot, _snapshot_events) =
        open_session(&config, &config.snapshot_addr(), SessionFlag::DataSnapshot).await?;
    info!(dh = %dh_base, "Sessions open");

    let host = Arc::new(DCameraHost::default());
    let (device, mut device_events) = host.add_dcamera_device(
        dh_base.clone(),
        &ability_json(config.width, config.height),
        Arc::new(ControlDispatcher::new(control.clone())),
    )?;
    let control_task = tokio::spawn(run_control_events(device.clone(), control_events));
    let device_task = tokio::spawn(async move {
        while let Some(event) = device_events.recv().await {
            match event {
                DeviceEvent::Error(e) => warn!("Device error: {}", e),
                DeviceEvent::MetadataResult { timestamp, results } => {
                    info!(timestamp, tags = ?results.keys().collect::<Vec<_>>(), "Metadata result")
                }
            }
        }
    });

    let (operator, mut operator_events) = device.open_dcamera()?;
    let queue = Arc::new(MemoryBufferQueue::default());
    operator.create_streams(&[StreamInfo {
        stream_id: STREAM_ID,
        width: config.width,
        height: config.height,
        format: PixelFormat::Ycrcb420Sp,
        data_space: 0,
        intent: StreamIntent::Preview,
        tunneled_mode: true,
        min_frame_duration: 0,
        encode_type: EncodeType::Null,
        buffer_queue: Some(BufferQueueHandle::new(queue.clone())),
    }])?;
    operator.commit_streams(0, &[])?;

    let path = SourceDataPath::start(
        DataPathConfig {
            dh_base: dh_base.clone(),
            stream_id: STREAM_ID,
            stream_type: DCStreamType::ContinuousFrame,
            source: VideoConfig::new(
                VideoCodecType::NoCodec,
                VideoPixelFormat::Nv12,
                config.width,
                config.height,
                config.fps,
            ),
            target: VideoConfig::new(
                VideoCodecType::NoCodec,
                VideoPixelFormat::Nv21,
                config.width,
                config.height,
                config.fps,
            ),
            producer: ProducerConfig {
                fps: config.fps,
                ..ProducerConfig::default()
            },
        },
        Arc::new(RawOnly),
        host.clone(),
        continuous_events,
    )?;

    let consumed = Arc::new(AtomicU64::new(0));
    let report_every = u64::from(config.fps);
    let consumer = tokio::spawn({
        let queue = queue.clone();
        let consumed = consumed.clone();
        async move {
            loop {
                let frame = queue.next_flushed().await;
                let n = consumed.fetch_add(1, Ordering::SeqCst) + 1;
                if n % report_every == 0 {
                    info!(frames = n, size = frame.data.len(), "Frames consumed");
                }
            }
        }
    });

    operator
        .capture(
            CAPTURE_ID,
            &CaptureInfo {
                stream_ids: vec![STREAM_ID],
                ..CaptureInfo::default()
            },
            true,
        )
        .await?;
    info!(duration = ?config.duration, "Capturing");
    sleep(config.duration).await;

    operator.cancel_capture(CAPTURE_ID).await?;
    while let Ok(event) = operator_events.try_recv() {
        if let StreamOperatorEvent::CaptureEnded { capture_id, infos } = event {
            for info in infos {
                info!(
                    capture_id,
                    stream_id = info.stream_id,
                    frames = info.frame_count,
                    "Capture ended"
                );
            }
        }
    }

    path.stop().await;
    consumer.abort();
    info!(consumed = consumed.load(Ordering::SeqCst), "Frames consumed in total");

    host.remove_dcamera_device(&dh_base).await?;
    control.close();
    continuous.close();
    snapshot.close();
    control_task.abort();
    device_task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcamera_core::CameraAbility;

    #[test]
    fn test_ability_advertises_configured_preview() {
        let ability = CameraAbility::parse(&ability_json(1280, 720)).unwrap();
        assert!(ability.has_format(PixelFormat::Ycrcb420Sp));
        assert!(ability.codec_types.is_empty());
    }

    #[test]
    fn test_raw_only_has_no_codecs() {
        assert!(
            RawOnly
                .create(CodecDirection::Decode, VideoCodecType::H264)
                .is_err()
        );
    }
}
