//! Stream operator: stream configuration and capture negotiation
//!
//! HAL clients configure logical streams and start captures on them. Each
//! capture request is merged with the configured streams into at most two
//! physical capture descriptors, which a [`CaptureDispatcher`] forwards to
//! the sink device.

use crate::callback::{StreamOperatorEvent, StreamOperatorEvents};
use crate::stream::DCameraStream;
use async_trait::async_trait;
use dcamera_core::{
    BufferQueueHandle, CameraAbility, CaptureEndedInfo, CaptureInfo, DCCaptureInfo,
    DCSettingsType, DCStreamInfo, DCStreamType, DCameraBuffer, DCameraError, DCameraSettings,
    DHBase, EncodeType, OperationMode, PixelFormat, Resolution, Result, StreamAttribute,
    StreamInfo, StreamSupportType,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Resolution used when no supported resolution matches a request
pub const MAX_PREVIEW_RESOLUTION: Resolution = Resolution::new(1920, 1080);

/// How long a cancelled capture waits for outstanding buffers
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Forwards physical capture requests to the sink device
#[async_trait]
pub trait CaptureDispatcher: Send + Sync {
    /// Start (or restart) capturing with the given descriptors
    async fn start_capture(&self, dh_base: &DHBase, captures: Vec<DCCaptureInfo>) -> Result<()>;

    /// Stop every capture on the device
    async fn stop_capture(&self, dh_base: &DHBase) -> Result<()>;

    /// Push settings to the device
    async fn update_settings(
        &self,
        dh_base: &DHBase,
        settings: Vec<DCameraSettings>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
struct CaptureRecord {
    stream_ids: Vec<i32>,
    enable_shutter_callback: bool,
}

#[derive(Default)]
struct CaptureState {
    captures: HashMap<i32, CaptureRecord>,
    /// Descriptors last dispatched, at most one per stream kind
    cached: Vec<DCCaptureInfo>,
}

/// HAL stream operator for one distributed camera
pub struct DStreamOperator {
    dh_base: DHBase,
    ability: CameraAbility,
    dispatcher: Arc<dyn CaptureDispatcher>,
    events: mpsc::UnboundedSender<StreamOperatorEvent>,
    streams: Mutex<HashMap<i32, Arc<DCameraStream>>>,
    capturing: Mutex<bool>,
    request: tokio::sync::Mutex<CaptureState>,
    /// stream id → capture id, for captures with shutter callbacks
    shutter: Mutex<HashMap<i32, i32>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DStreamOperator {
    pub fn new(
        dh_base: DHBase,
        ability: CameraAbility,
        dispatcher: Arc<dyn CaptureDispatcher>,
    ) -> (Arc<Self>, StreamOperatorEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let operator = Arc::new(Self {
            dh_base,
            ability,
            dispatcher,
            events,
            streams: Mutex::new(HashMap::new()),
            capturing: Mutex::new(false),
            request: tokio::sync::Mutex::new(CaptureState::default()),
            shutter: Mutex::new(HashMap::new()),
        });
        (operator, rx)
    }

    pub fn dh_base(&self) -> &DHBase {
        &self.dh_base
    }

    pub fn is_capturing(&self) -> bool {
        *lock(&self.capturing)
    }

    fn ensure_idle(&self, operation: &str) -> Result<()> {
        if self.is_capturing() {
            return Err(DCameraError::Busy(format!("{} while capturing", operation)));
        }
        Ok(())
    }

    fn emit(&self, event: StreamOperatorEvent) {
        if self.events.send(event).is_err() {
            debug!(dh = %self.dh_base, "Stream operator listener gone");
        }
    }

    fn stream(&self, stream_id: i32) -> Result<Arc<DCameraStream>> {
        lock(&self.streams)
            .get(&stream_id)
            .cloned()
            .ok_or_else(|| DCameraError::InvalidArgument(format!("unknown stream {}", stream_id)))
    }

    /// Check whether the streams could be created in this operation mode
    pub fn is_streams_supported(
        &self,
        mode: i32,
        infos: &[StreamInfo],
    ) -> Result<StreamSupportType> {
        if infos.is_empty() {
            return Err(DCameraError::InvalidArgument("no stream infos".into()));
        }
        if OperationMode::try_from(mode).is_err() {
            return Ok(StreamSupportType::NotSupported);
        }
        for info in infos {
            let requested = Resolution::new(info.width, info.height);
            if !self.ability.resolutions_for(info.format).contains(&requested) {
                debug!(
                    stream_id = info.stream_id,
                    format = ?info.format,
                    %requested,
                    "Stream not supported"
                );
                return Ok(StreamSupportType::NotSupported);
            }
        }
        if self.is_capturing() {
            Ok(StreamSupportType::ReConfigurable)
        } else {
            Ok(StreamSupportType::DynamicSupported)
        }
    }

    /// Create streams; all are validated before any is created
    pub fn create_streams(&self, infos: &[StreamInfo]) -> Result<()> {
        self.ensure_idle("create streams")?;
        if infos.is_empty() {
            return Err(DCameraError::InvalidArgument("no stream infos".into()));
        }

        let mut streams = lock(&self.streams);
        let mut seen = HashSet::new();
        for info in infos {
            if streams.contains_key(&info.stream_id) || !seen.insert(info.stream_id) {
                return Err(DCameraError::InvalidArgument(format!(
                    "stream {} already exists",
                    info.stream_id
                )));
            }
        }

        let created = infos
            .iter()
            .map(|info| DCameraStream::new(self.dh_base.clone(), info).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        for stream in created {
            info!(dh = %self.dh_base, stream_id = stream.stream_id(), "Stream created");
            streams.insert(stream.stream_id(), stream);
        }
        Ok(())
    }

    /// Release streams and forget any cached descriptors that reference them
    pub async fn release_streams(&self, stream_ids: &[i32]) -> Result<()> {
        self.ensure_idle("release streams")?;
        let removed = {
            let mut streams = lock(&self.streams);
            if let Some(id) = stream_ids.iter().find(|id| !streams.contains_key(id)) {
                return Err(DCameraError::InvalidArgument(format!("unknown stream {}", id)));
            }
            stream_ids
                .iter()
                .filter_map(|id| streams.remove(id))
                .collect::<Vec<_>>()
        };

        for stream in &removed {
            if stream.has_buffer_queue() {
                if let Err(e) = stream.release_buffer_queue() {
                    warn!(stream_id = stream.stream_id(), "Releasing buffer queue failed: {}", e);
                }
            }
            info!(dh = %self.dh_base, stream_id = stream.stream_id(), "Stream released");
        }

        let mut state = self.request.lock().await;
        for capture in &mut state.cached {
            capture.stream_ids.retain(|id| !stream_ids.contains(id));
        }
        state.cached.retain(|capture| !capture.stream_ids.is_empty());
        Ok(())
    }

    /// Commit the configured streams
    pub fn commit_streams(&self, mode: i32, mode_setting: &[u8]) -> Result<()> {
        let mode = OperationMode::try_from(mode)?;
        let streams = lock(&self.streams).len();
        info!(dh = %self.dh_base, ?mode, streams, setting_len = mode_setting.len(), "Streams committed");
        Ok(())
    }

    pub fn get_stream_attributes(&self) -> Vec<StreamAttribute> {
        let mut attributes: Vec<_> = lock(&self.streams)
            .values()
            .map(|stream| stream.get_stream_attribute())
            .collect();
        attributes.sort_by_key(|a| a.stream_id);
        attributes
    }

    pub fn attach_buffer_queue(&self, stream_id: i32, queue: BufferQueueHandle) -> Result<()> {
        self.ensure_idle("attach buffer queue")?;
        self.stream(stream_id)?.set_buffer_queue(queue)
    }

    pub fn detach_buffer_queue(&self, stream_id: i32) -> Result<()> {
        self.ensure_idle("detach buffer queue")?;
        self.stream(stream_id)?.release_buffer_queue()
    }

    /// Start a capture on configured streams
    ///
    /// The operator enters the capturing state only once the negotiated
    /// descriptors were accepted by the dispatcher.
    pub async fn capture(
        &self,
        capture_id: i32,
        info: &CaptureInfo,
        is_streaming: bool,
    ) -> Result<()> {
        if capture_id < 0 || info.stream_ids.is_empty() {
            return Err(DCameraError::InvalidArgument(format!(
                "bad capture {} with {} streams",
                capture_id,
                info.stream_ids.len()
            )));
        }

        let mut state = self.request.lock().await;
        if state.captures.contains_key(&capture_id) {
            return Err(DCameraError::InvalidArgument(format!(
                "capture {} already running",
                capture_id
            )));
        }

        if let Some((owner, id)) = state.captures.iter().find_map(|(owner, record)| {
            info.stream_ids
                .iter()
                .find(|id| record.stream_ids.contains(id))
                .map(|id| (*owner, *id))
        }) {
            return Err(DCameraError::Busy(format!(
                "stream {} already captured by {}",
                id, owner
            )));
        }

        let (requested, all) = {
            let streams = lock(&self.streams);
            let mut requested = Vec::with_capacity(info.stream_ids.len());
            for id in &info.stream_ids {
                match streams.get(id) {
                    Some(stream) if stream.has_buffer_queue() => requested.push(stream.clone()),
                    Some(_) => {
                        return Err(DCameraError::Busy(format!("stream {} has no buffer queue", id)));
                    }
                    None => return Err(DCameraError::Busy(format!("stream {} not configured", id))),
                }
            }
            let all: Vec<DCStreamInfo> = streams.values().map(|s| s.dc_stream_info().clone()).collect();
            (requested, all)
        };

        let request: Vec<DCStreamInfo> = requested.iter().map(|s| s.dc_stream_info().clone()).collect();
        let settings = if info.capture_setting.is_empty() {
            Vec::new()
        } else {
            vec![DCameraSettings {
                setting_type: DCSettingsType::UpdateMetadata,
                value: hex::encode(&info.capture_setting),
            }]
        };
        let captures = negotiate_capture_info(
            &self.ability,
            &request,
            is_streaming,
            settings,
            &all,
            &state.cached,
        )?;

        if let Err(e) = self.dispatcher.start_capture(&self.dh_base, captures.clone()).await {
            error!(dh = %self.dh_base, capture_id, "Dispatching capture failed: {}", e);
            return Err(e);
        }
        for stream in &requested {
            stream.start_capture(capture_id);
        }

        state.cached = captures;
        state.captures.insert(
            capture_id,
            CaptureRecord {
                stream_ids: info.stream_ids.clone(),
                enable_shutter_callback: info.enable_shutter_callback,
            },
        );
        if info.enable_shutter_callback {
            let mut shutter = lock(&self.shutter);
            for id in &info.stream_ids {
                shutter.insert(*id, capture_id);
            }
        }
        *lock(&self.capturing) = true;
        info!(dh = %self.dh_base, capture_id, streams = ?info.stream_ids, "Capture started");

        self.emit(StreamOperatorEvent::CaptureStarted {
            capture_id,
            stream_ids: info.stream_ids.clone(),
        });
        Ok(())
    }

    /// Stop a capture, flush its streams and report their frame counts
    pub async fn cancel_capture(&self, capture_id: i32) -> Result<()> {
        let mut state = self.request.lock().await;
        if !self.is_capturing() {
            return Err(DCameraError::InvalidArgument(format!(
                "capture {} cancelled while idle",
                capture_id
            )));
        }
        let record = state.captures.remove(&capture_id).ok_or_else(|| {
            DCameraError::InvalidArgument(format!("unknown capture {}", capture_id))
        })?;

        if state.captures.is_empty() {
            if let Err(e) = self.dispatcher.stop_capture(&self.dh_base).await {
                warn!(dh = %self.dh_base, capture_id, "Stopping capture failed: {}", e);
            }
        }

        let mut infos = Vec::with_capacity(record.stream_ids.len());
        for id in &record.stream_ids {
            let stream = lock(&self.streams).get(id).cloned();
            let frame_count = match stream {
                Some(stream) => stream.flush_dcamera_buffer(FLUSH_TIMEOUT).await,
                None => 0,
            };
            infos.push(CaptureEndedInfo {
                stream_id: *id,
                frame_count,
            });
        }

        if record.enable_shutter_callback {
            lock(&self.shutter).retain(|_, owner| *owner != capture_id);
        }
        if state.captures.is_empty() {
            *lock(&self.capturing) = false;
        }
        info!(dh = %self.dh_base, capture_id, ?infos, "Capture ended");

        self.emit(StreamOperatorEvent::CaptureEnded { capture_id, infos });
        Ok(())
    }

    pub fn change_to_offline_stream(&self, _stream_ids: &[i32]) -> Result<()> {
        Err(DCameraError::MethodNotSupported(
            "distributed cameras have no offline streams".into(),
        ))
    }

    /// Hand a free buffer of `stream_id` to the frame producer
    pub fn acquire_buffer(&self, stream_id: i32) -> Result<DCameraBuffer> {
        self.stream(stream_id)?.get_dcamera_buffer()
    }

    /// Take a filled buffer back from the frame producer
    pub fn shutter_buffer(&self, stream_id: i32, buffer: DCameraBuffer) -> Result<()> {
        let delivered = !buffer.data.is_empty();
        self.stream(stream_id)?.return_dcamera_buffer(buffer)?;

        let capture_id = lock(&self.shutter).get(&stream_id).copied();
        if let (true, Some(capture_id)) = (delivered, capture_id) {
            self.emit(StreamOperatorEvent::FrameShutter {
                capture_id,
                stream_ids: vec![stream_id],
                timestamp: now_micros(),
            });
        }
        Ok(())
    }

    /// Report a failed capture to the client
    pub async fn notify_capture_error(&self, error: DCameraError) {
        let state = self.request.lock().await;
        for (capture_id, record) in &state.captures {
            self.emit(StreamOperatorEvent::CaptureError {
                capture_id: *capture_id,
                stream_ids: record.stream_ids.clone(),
                error: error.clone(),
            });
        }
    }

    /// Cancel every capture and tear down all streams
    pub async fn release(&self) {
        let running: Vec<i32> = self.request.lock().await.captures.keys().copied().collect();
        for capture_id in running {
            if let Err(e) = self.cancel_capture(capture_id).await {
                warn!(dh = %self.dh_base, capture_id, "Cancel on release failed: {}", e);
            }
        }

        let streams: Vec<_> = lock(&self.streams).drain().map(|(_, s)| s).collect();
        for stream in streams {
            if stream.has_buffer_queue() {
                if let Err(e) = stream.release_buffer_queue() {
                    warn!(stream_id = stream.stream_id(), "Releasing buffer queue failed: {}", e);
                }
            }
        }
        self.request.lock().await.cached.clear();
        info!(dh = %self.dh_base, "Stream operator released");
    }

    /// Descriptors last dispatched to the device
    pub async fn cached_captures(&self) -> Vec<DCCaptureInfo> {
        self.request.lock().await.cached.clone()
    }
}

impl std::fmt::Debug for DStreamOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DStreamOperator")
            .field("dh_base", &self.dh_base)
            .field("capturing", &self.is_capturing())
            .finish_non_exhaustive()
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

fn choose_format(ability: &CameraAbility, request: &[DCStreamInfo], kind: DCStreamType) -> PixelFormat {
    if let Some(info) = request.iter().find(|info| ability.has_format(info.format)) {
        return info.format;
    }
    match kind {
        DCStreamType::ContinuousFrame => ability
            .preview_formats
            .first()
            .or_else(|| ability.video_formats.first())
            .copied()
            .unwrap_or(PixelFormat::Ycrcb420Sp),
        DCStreamType::SnapshotFrame => ability
            .photo_formats
            .first()
            .copied()
            .unwrap_or(PixelFormat::Jpeg),
    }
}

fn choose_resolution(ability: &CameraAbility, format: PixelFormat, request: &[DCStreamInfo]) -> Resolution {
    let supported = ability.resolutions_for(format);
    request
        .iter()
        .map(|info| Resolution::new(info.width, info.height))
        .filter(|r| supported.contains(r))
        .max()
        .unwrap_or(MAX_PREVIEW_RESOLUTION)
}

fn choose_encode_type(ability: &CameraAbility, kind: DCStreamType) -> EncodeType {
    match kind {
        DCStreamType::SnapshotFrame => EncodeType::Jpeg,
        DCStreamType::ContinuousFrame => [EncodeType::H265, EncodeType::H264]
            .into_iter()
            .find(|codec| ability.supports_codec(*codec))
            .unwrap_or(EncodeType::Null),
    }
}

fn merge_streams(
    ability: &CameraAbility,
    request: &[DCStreamInfo],
    kind: DCStreamType,
    is_capture: bool,
    capture_settings: Vec<DCameraSettings>,
) -> Option<DCCaptureInfo> {
    let first = request.first()?;
    let format = choose_format(ability, request, kind);
    let resolution = choose_resolution(ability, format, request);
    Some(DCCaptureInfo {
        stream_ids: request.iter().map(|info| info.stream_id).collect(),
        width: resolution.width,
        height: resolution.height,
        stride: resolution.width,
        format,
        data_space: first.data_space,
        is_capture,
        encode_type: choose_encode_type(ability, kind),
        stream_type: kind,
        capture_settings,
    })
}

/// Merge a capture request into physical capture descriptors
///
/// Returns the capturing descriptor for `request`, followed by a
/// non-capturing descriptor for streams of the opposite kind when any exist.
pub fn negotiate_capture_info(
    ability: &CameraAbility,
    request: &[DCStreamInfo],
    is_streaming: bool,
    capture_settings: Vec<DCameraSettings>,
    all_streams: &[DCStreamInfo],
    cached: &[DCCaptureInfo],
) -> Result<Vec<DCCaptureInfo>> {
    let kind = if is_streaming {
        DCStreamType::ContinuousFrame
    } else {
        DCStreamType::SnapshotFrame
    };
    let capturing = merge_streams(ability, request, kind, true, capture_settings)
        .ok_or_else(|| DCameraError::InvalidArgument("capture names no streams".into()))?;

    let other = kind.opposite();
    let ride_along = match cached.iter().find(|c| c.stream_type == other) {
        Some(previous) => Some(DCCaptureInfo {
            is_capture: false,
            ..previous.clone()
        }),
        None => {
            let mut others: Vec<DCStreamInfo> = all_streams
                .iter()
                .filter(|info| info.stream_type == other)
                .cloned()
                .collect();
            others.sort_by_key(|info| info.stream_id);
            merge_streams(ability, &others, other, false, Vec::new())
        }
    };

    debug!(
        format = ?capturing.format,
        width = capturing.width,
        height = capturing.height,
        encode = ?capturing.encode_type,
        ride_along = ride_along.is_some(),
        "Capture negotiated"
    );
    let mut captures = vec![capturing];
    captures.extend(ride_along);
    Ok(captures)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::surface::MemoryBufferQueue;
    use dcamera_core::StreamIntent;
    use tokio_test::{assert_err, assert_ok};

    pub(crate) const ABILITY: &str = r#"{
        "ProtocolVer": "1.0",
        "Position": "BACK",
        "CodecType": ["OMX_hisi_video_encoder_avc", "OMX_hisi_video_encoder_hevc"],
        "OutputFormat": {"Preview": [3], "Video": [3], "Photo": [4]},
        "Resolution": {"3": ["640*480", "1280*720", "1920*1080"], "4": ["1920*1080"]}
    }"#;

    /// Records dispatched captures, optionally failing them
    #[derive(Default)]
    pub(crate) struct RecordingDispatcher {
        pub started: Mutex<Vec<Vec<DCCaptureInfo>>>,
        pub stopped: Mutex<u32>,
        pub settings: Mutex<Vec<DCameraSettings>>,
        pub fail: Mutex<bool>,
    }

    #[async_trait]
    impl CaptureDispatcher for RecordingDispatcher {
        async fn start_capture(&self, _dh: &DHBase, captures: Vec<DCCaptureInfo>) -> Result<()> {
            if *lock(&self.fail) {
                return Err(DCameraError::Transport("sink unreachable".into()));
            }
            lock(&self.started).push(captures);
            Ok(())
        }

        async fn stop_capture(&self, _dh: &DHBase) -> Result<()> {
            *lock(&self.stopped) += 1;
            Ok(())
        }

        async fn update_settings(&self, _dh: &DHBase, settings: Vec<DCameraSettings>) -> Result<()> {
            lock(&self.settings).extend(settings);
            Ok(())
        }
    }

    fn stream_info(id: i32, width: u32, height: u32, intent: StreamIntent) -> StreamInfo {
        StreamInfo {
            stream_id: id,
            width,
            height,
            format: if intent == StreamIntent::StillCapture {
                PixelFormat::Jpeg
            } else {
                PixelFormat::Ycrcb420Sp
            },
            data_space: 8,
            intent,
            tunneled_mode: true,
            min_frame_duration: 0,
            encode_type: EncodeType::Null,
            buffer_queue: Some(BufferQueueHandle::new(Arc::new(MemoryBufferQueue::default()))),
        }
    }

    fn operator() -> (Arc<DStreamOperator>, StreamOperatorEvents, Arc<RecordingDispatcher>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (operator, events) = DStreamOperator::new(
            DHBase::new("dev", "cam"),
            CameraAbility::parse(ABILITY).unwrap(),
            dispatcher.clone(),
        );
        (operator, events, dispatcher)
    }

    fn capture_info(ids: &[i32]) -> CaptureInfo {
        CaptureInfo {
            stream_ids: ids.to_vec(),
            capture_setting: vec![1, 2, 3],
            enable_shutter_callback: false,
        }
    }

    #[test]
    fn test_resolution_picks_largest_match() {
        let ability = CameraAbility::parse(
            r#"{"CodecType": [], "OutputFormat": {"Preview": [3]},
                "Resolution": {"3": ["640*480", "1280*720"]}}"#,
        )
        .unwrap();
        let request = vec![DCStreamInfo::from(&stream_info(1, 1280, 720, StreamIntent::Preview))];
        let captures = negotiate_capture_info(&ability, &request, true, Vec::new(), &request, &[]).unwrap();
        assert_eq!(captures.len(), 1);
        assert_eq!((captures[0].width, captures[0].height), (1280, 720));
        assert_eq!(captures[0].encode_type, EncodeType::Null);
    }

    #[test]
    fn test_unmatched_resolution_falls_back() {
        let ability = CameraAbility::parse(ABILITY).unwrap();
        let request = vec![DCStreamInfo::from(&stream_info(1, 800, 600, StreamIntent::Preview))];
        let captures = negotiate_capture_info(&ability, &request, true, Vec::new(), &request, &[]).unwrap();
        assert_eq!(
            Resolution::new(captures[0].width, captures[0].height),
            MAX_PREVIEW_RESOLUTION
        );
        assert_eq!(captures[0].encode_type, EncodeType::H265);
    }

    #[test]
    fn test_negotiation_is_idempotent() {
        let ability = CameraAbility::parse(ABILITY).unwrap();
        let request = vec![DCStreamInfo::from(&stream_info(1, 1280, 720, StreamIntent::Preview))];
        let first = negotiate_capture_info(&ability, &request, true, Vec::new(), &request, &[]).unwrap();
        let second = negotiate_capture_info(&ability, &request, true, Vec::new(), &request, &first).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_is_jpeg_with_continuous_ride_along() {
        let ability = CameraAbility::parse(ABILITY).unwrap();
        let preview = DCStreamInfo::from(&stream_info(1, 640, 480, StreamIntent::Preview));
        let photo = DCStreamInfo::from(&stream_info(2, 1920, 1080, StreamIntent::StillCapture));
        let all = vec![preview.clone(), photo.clone()];

        let captures =
            negotiate_capture_info(&ability, &[photo], false, Vec::new(), &all, &[]).unwrap();
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].encode_type, EncodeType::Jpeg);
        assert_eq!(captures[0].format, PixelFormat::Jpeg);
        assert!(captures[0].is_capture);
        assert_eq!(captures[1].stream_type, DCStreamType::ContinuousFrame);
        assert_eq!(captures[1].stream_ids, vec![1]);
        assert!(!captures[1].is_capture);
    }

    #[test]
    fn test_cached_ride_along_is_reused() {
        let ability = CameraAbility::parse(ABILITY).unwrap();
        let preview = DCStreamInfo::from(&stream_info(1, 640, 480, StreamIntent::Preview));
        let photo = DCStreamInfo::from(&stream_info(2, 1920, 1080, StreamIntent::StillCapture));
        let all = vec![preview.clone(), photo.clone()];

        let streaming =
            negotiate_capture_info(&ability, &[preview], true, Vec::new(), &all, &[]).unwrap();
        let snapshot =
            negotiate_capture_info(&ability, &[photo], false, Vec::new(), &all, &streaming).unwrap();
        assert_eq!(snapshot[1], DCCaptureInfo { is_capture: false, ..streaming[0].clone() });
    }

    #[tokio::test]
    async fn test_capture_lifecycle() {
        let (operator, mut events, dispatcher) = operator();
        assert_ok!(operator.create_streams(&[stream_info(1, 1280, 720, StreamIntent::Preview)]));
        assert_ok!(operator.commit_streams(0, &[]));

        assert_ok!(operator.capture(1, &capture_info(&[1]), true).await);
        assert!(operator.is_capturing());
        let started = lock(&dispatcher.started).clone();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0][0].capture_settings[0].value, "010203");
        assert_eq!(
            events.recv().await.unwrap(),
            StreamOperatorEvent::CaptureStarted { capture_id: 1, stream_ids: vec![1] }
        );

        // structural changes are rejected while capturing
        let err = assert_err!(operator.create_streams(&[stream_info(2, 640, 480, StreamIntent::Video)]));
        assert!(matches!(err, DCameraError::Busy(_)));
        assert_err!(operator.detach_buffer_queue(1));

        let mut buffer = operator.acquire_buffer(1).unwrap();
        buffer.data = vec![1; 16];
        assert_ok!(operator.shutter_buffer(1, buffer));

        assert_ok!(operator.cancel_capture(1).await);
        assert!(!operator.is_capturing());
        assert_eq!(*lock(&dispatcher.stopped), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            StreamOperatorEvent::CaptureEnded {
                capture_id: 1,
                infos: vec![CaptureEndedInfo { stream_id: 1, frame_count: 1 }],
            }
        );
    }

    #[tokio::test]
    async fn test_capture_requires_configured_streams() {
        let (operator, _events, _dispatcher) = operator();
        let err = assert_err!(operator.capture(1, &capture_info(&[1]), true).await);
        assert!(matches!(err, DCameraError::Busy(_)));

        let mut info = stream_info(1, 640, 480, StreamIntent::Preview);
        info.buffer_queue = None;
        operator.create_streams(&[info]).unwrap();
        let err = assert_err!(operator.capture(1, &capture_info(&[1]), true).await);
        assert!(matches!(err, DCameraError::Busy(_)));

        let err = assert_err!(operator.capture(-1, &capture_info(&[1]), true).await);
        assert!(matches!(err, DCameraError::InvalidArgument(_)));
        assert!(!operator.is_capturing());
    }

    #[tokio::test]
    async fn test_failed_dispatch_stays_idle() {
        let (operator, mut events, dispatcher) = operator();
        operator.create_streams(&[stream_info(1, 640, 480, StreamIntent::Preview)]).unwrap();
        *lock(&dispatcher.fail) = true;
        assert_err!(operator.capture(1, &capture_info(&[1]), true).await);
        assert!(!operator.is_capturing());
        assert!(events.try_recv().is_err());
        assert_err!(operator.cancel_capture(1).await);
    }

    #[tokio::test]
    async fn test_overlapping_capture_keeps_running_count() {
        let (operator, mut events, dispatcher) = operator();
        operator
            .create_streams(&[
                stream_info(1, 640, 480, StreamIntent::Preview),
                stream_info(2, 640, 480, StreamIntent::Video),
            ])
            .unwrap();
        assert_ok!(operator.capture(1, &capture_info(&[1]), true).await);
        events.recv().await.unwrap();
        for _ in 0..3 {
            let mut buffer = operator.acquire_buffer(1).unwrap();
            buffer.data = vec![9; 8];
            assert_ok!(operator.shutter_buffer(1, buffer));
        }

        // stream 1 already belongs to capture 1
        let err = assert_err!(operator.capture(2, &capture_info(&[1, 2]), true).await);
        assert!(matches!(err, DCameraError::Busy(_)));
        assert_eq!(lock(&dispatcher.started).len(), 1);

        // a failed dispatch on another stream leaves capture 1 untouched
        *lock(&dispatcher.fail) = true;
        assert_err!(operator.capture(3, &capture_info(&[2]), true).await);
        *lock(&dispatcher.fail) = false;

        assert_ok!(operator.cancel_capture(1).await);
        assert_eq!(
            events.recv().await.unwrap(),
            StreamOperatorEvent::CaptureEnded {
                capture_id: 1,
                infos: vec![CaptureEndedInfo { stream_id: 1, frame_count: 3 }],
            }
        );
        assert!(!operator.is_capturing());

        // once released, the stream can be captured again
        assert_ok!(operator.capture(2, &capture_info(&[1]), true).await);
        assert_ok!(operator.acquire_buffer(1));
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_rejected() {
        let (operator, _events, _dispatcher) = operator();
        let info = stream_info(1, 640, 480, StreamIntent::Preview);
        assert_err!(operator.create_streams(&[info.clone(), info.clone()]));
        assert_ok!(operator.create_streams(&[info.clone()]));
        assert_err!(operator.create_streams(&[info]));

        assert_ok!(operator.capture(7, &capture_info(&[1]), true).await);
        assert_err!(operator.capture(7, &capture_info(&[1]), true).await);
    }

    #[tokio::test]
    async fn test_shutter_callback_events() {
        let (operator, mut events, _dispatcher) = operator();
        operator.create_streams(&[stream_info(1, 640, 480, StreamIntent::Preview)]).unwrap();
        let mut info = capture_info(&[1]);
        info.enable_shutter_callback = true;
        operator.capture(2, &info, true).await.unwrap();
        events.recv().await.unwrap();

        let mut buffer = operator.acquire_buffer(1).unwrap();
        buffer.data = vec![0; 8];
        operator.shutter_buffer(1, buffer).unwrap();
        match events.recv().await.unwrap() {
            StreamOperatorEvent::FrameShutter { capture_id, stream_ids, .. } => {
                assert_eq!(capture_id, 2);
                assert_eq!(stream_ids, vec![1]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_support_and_release() {
        let (operator, _events, _dispatcher) = operator();
        let supported = stream_info(1, 1280, 720, StreamIntent::Preview);
        let unsupported = stream_info(2, 333, 222, StreamIntent::Preview);
        assert_eq!(
            operator.is_streams_supported(0, &[supported.clone()]).unwrap(),
            StreamSupportType::DynamicSupported
        );
        assert_eq!(
            operator.is_streams_supported(0, &[unsupported]).unwrap(),
            StreamSupportType::NotSupported
        );
        assert_eq!(
            operator.is_streams_supported(9, &[supported.clone()]).unwrap(),
            StreamSupportType::NotSupported
        );
        assert_err!(operator.commit_streams(9, &[]));

        operator.create_streams(&[supported]).unwrap();
        assert_eq!(operator.get_stream_attributes()[0].width, 1280);
        assert_err!(operator.release_streams(&[1, 5]).await);
        assert_ok!(operator.release_streams(&[1]).await);
        assert!(operator.get_stream_attributes().is_empty());
        assert!(matches!(
            operator.change_to_offline_stream(&[1]),
            Err(DCameraError::MethodNotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_release_cancels_running_captures() {
        let (operator, mut events, dispatcher) = operator();
        operator.create_streams(&[stream_info(1, 640, 480, StreamIntent::Preview)]).unwrap();
        operator.capture(1, &capture_info(&[1]), true).await.unwrap();
        operator.release().await;
        assert!(!operator.is_capturing());
        assert_eq!(*lock(&dispatcher.stopped), 1);
        events.recv().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            StreamOperatorEvent::CaptureEnded { capture_id: 1, .. }
        ));
        assert!(operator.cached_captures().await.is_empty());
    }
}
