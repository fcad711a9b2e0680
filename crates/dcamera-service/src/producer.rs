//! Stream producer: paces processed frames into HAL buffers
//!
//! Continuous streams deliver on a fixed tick and only ever the newest
//! queued frame. Snapshot streams deliver every frame in order, retrying a
//! failed delivery until it succeeds or the producer stops.

use dcamera_core::{DCStreamType, DCameraBuffer, DCameraError, DHBase, Result};
use dcamera_hdi::BufferProvider;
use dcamera_pipeline::DataBuffer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Producer tuning
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Continuous delivery rate
    pub fps: u32,
    /// Frames held before the oldest is dropped
    pub max_queue: usize,
    /// Wait between snapshot delivery attempts
    pub snapshot_backoff: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            max_queue: 30,
            snapshot_backoff: Duration::from_millis(500),
        }
    }
}

impl ProducerConfig {
    /// Time between continuous deliveries
    pub fn interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

struct ProducerShared {
    dh_base: DHBase,
    stream_id: i32,
    provider: Arc<dyn BufferProvider>,
    queue: Mutex<VecDeque<(u64, DataBuffer)>>,
    next_entry: AtomicU64,
    running: AtomicBool,
    available: Notify,
    stop: Notify,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ProducerShared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<(u64, DataBuffer)>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, buffer: &DataBuffer) -> Result<()> {
        feed_stream_to_driver(self.provider.as_ref(), &self.dh_base, self.stream_id, buffer)?;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Copy one frame into a HAL buffer and shutter it
///
/// A buffer too small for the frame is handed back empty and the delivery
/// fails.
pub fn feed_stream_to_driver(
    provider: &dyn BufferProvider,
    dh_base: &DHBase,
    stream_id: i32,
    buffer: &DataBuffer,
) -> Result<()> {
    let mut target = provider.acquire_buffer(dh_base, stream_id)?;
    if (target.size as usize) < buffer.len() {
        let capacity = target.size;
        let empty = DCameraBuffer {
            data: Vec::new(),
            ..target
        };
        if let Err(e) = provider.shutter_buffer(dh_base, stream_id, empty) {
            warn!(stream_id, "Returning undersized buffer failed: {}", e);
        }
        return Err(DCameraError::InvalidArgument(format!(
            "frame of {} bytes exceeds buffer of {}",
            buffer.len(),
            capacity
        )));
    }
    target.data = buffer.data.clone();
    provider.shutter_buffer(dh_base, stream_id, target)
}

/// Feeds one HAL stream from processed frames
pub struct StreamProducer {
    stream_type: DCStreamType,
    config: ProducerConfig,
    shared: Arc<ProducerShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamProducer {
    pub fn new(
        dh_base: DHBase,
        stream_id: i32,
        stream_type: DCStreamType,
        config: ProducerConfig,
        provider: Arc<dyn BufferProvider>,
    ) -> Self {
        Self {
            stream_type,
            config,
            shared: Arc::new(ProducerShared {
                dh_base,
                stream_id,
                provider,
                queue: Mutex::new(VecDeque::new()),
                next_entry: AtomicU64::new(0),
                running: AtomicBool::new(false),
                available: Notify::new(),
                stop: Notify::new(),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stream_type(&self) -> DCStreamType {
        self.stream_type
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Frames shuttered into HAL buffers
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    /// Frames discarded by overflow or latest-wins pacing
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    /// Spawn the pacing loop on the current runtime
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(DCameraError::WrongState(format!(
                "producer for stream {} already running",
                self.shared.stream_id
            )));
        }
        let mut tasks = self.tasks();
        match self.stream_type {
            DCStreamType::ContinuousFrame => {
                let (tx, rx) = mpsc::unbounded_channel();
                tasks.push(tokio::spawn(continuous_loop(
                    self.shared.clone(),
                    self.config.interval(),
                    tx,
                )));
                tasks.push(tokio::spawn(delivery_loop(self.shared.clone(), rx)));
            }
            DCStreamType::SnapshotFrame => {
                tasks.push(tokio::spawn(snapshot_loop(
                    self.shared.clone(),
                    self.config.snapshot_backoff,
                )));
            }
        }
        info!(
            stream_id = self.shared.stream_id,
            stream_type = ?self.stream_type,
            "Producer started"
        );
        Ok(())
    }

    /// Queue a processed frame, dropping the oldest when full
    pub fn feed_stream(&self, buffer: DataBuffer) {
        let entry = self.shared.next_entry.fetch_add(1, Ordering::SeqCst);
        {
            let mut queue = self.shared.queue();
            while queue.len() >= self.config.max_queue.max(1) {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::SeqCst);
                debug!(stream_id = self.shared.stream_id, "Producer queue full, dropping oldest");
            }
            queue.push_back((entry, buffer));
        }
        if self.stream_type == DCStreamType::SnapshotFrame {
            self.shared.available.notify_one();
        }
    }

    /// Stop pacing and wait for the loops to finish
    ///
    /// Queued frames are discarded.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.stop.notify_one();
        let tasks: Vec<_> = self.tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(stream_id = self.shared.stream_id, "Producer task failed: {}", e);
            }
        }
        self.shared.queue().clear();
        info!(
            stream_id = self.shared.stream_id,
            delivered = self.delivered(),
            dropped = self.dropped(),
            "Producer stopped"
        );
    }
}

impl Drop for StreamProducer {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}

async fn continuous_loop(
    shared: Arc<ProducerShared>,
    interval: Duration,
    deliveries: mpsc::UnboundedSender<DataBuffer>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.stop.notified() => {}
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let latest = {
            let mut queue = shared.queue();
            let latest = queue.pop_back();
            if !queue.is_empty() {
                shared.dropped.fetch_add(queue.len() as u64, Ordering::SeqCst);
                queue.clear();
            }
            latest
        };
        if let Some((_, buffer)) = latest {
            if deliveries.send(buffer).is_err() {
                break;
            }
        }
    }
    debug!(stream_id = shared.stream_id, "Continuous loop exited");
}

async fn delivery_loop(shared: Arc<ProducerShared>, mut deliveries: mpsc::UnboundedReceiver<DataBuffer>) {
    while let Some(buffer) = deliveries.recv().await {
        if let Err(e) = shared.deliver(&buffer) {
            debug!(stream_id = shared.stream_id, "Dropping continuous frame: {}", e);
        }
    }
}

async fn snapshot_loop(shared: Arc<ProducerShared>, backoff: Duration) {
    while shared.running.load(Ordering::SeqCst) {
        let front = shared.queue().front().cloned();
        let Some((entry, buffer)) = front else {
            tokio::select! {
                _ = shared.available.notified() => {}
                _ = shared.stop.notified() => {}
            }
            continue;
        };

        match shared.deliver(&buffer) {
            Ok(()) => {
                let mut queue = shared.queue();
                // overflow may already have dropped it
                if queue.front().map(|(e, _)| *e) == Some(entry) {
                    queue.pop_front();
                }
            }
            Err(e) => {
                warn!(
                    stream_id = shared.stream_id,
                    ?backoff,
                    "Snapshot delivery failed, retrying: {}",
                    e
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shared.stop.notified() => {}
                }
            }
        }
    }
    debug!(stream_id = shared.stream_id, "Snapshot loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::assert_err;

    /// Provider recording every shuttered frame
    #[derive(Default)]
    struct RecordingProvider {
        frames: Mutex<Vec<Vec<u8>>>,
        failures: AtomicUsize,
        capacity: u32,
    }

    impl RecordingProvider {
        fn new(capacity: u32) -> Self {
            Self {
                capacity,
                ..Self::default()
            }
        }

        fn frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl BufferProvider for RecordingProvider {
        fn acquire_buffer(&self, _dh: &DHBase, _stream_id: i32) -> Result<DCameraBuffer> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(DCameraError::ResourceExhausted("no free buffer".into()));
            }
            Ok(DCameraBuffer {
                index: 0,
                size: self.capacity,
                data: Vec::new(),
            })
        }

        fn shutter_buffer(&self, _dh: &DHBase, _stream_id: i32, buffer: DCameraBuffer) -> Result<()> {
            if !buffer.data.is_empty() {
                self.frames.lock().unwrap().push(buffer.data);
            }
            Ok(())
        }
    }

    fn producer(kind: DCStreamType, provider: Arc<RecordingProvider>) -> StreamProducer {
        StreamProducer::new(
            DHBase::new("dev", "cam"),
            1,
            kind,
            ProducerConfig::default(),
            provider,
        )
    }

    fn frame(n: u32) -> DataBuffer {
        DataBuffer::new(n.to_be_bytes().to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_drops_when_fed_fast() {
        let provider = Arc::new(RecordingProvider::new(64));
        let producer = producer(DCStreamType::ContinuousFrame, provider.clone());
        producer.start().unwrap();

        for n in 0..100 {
            producer.feed_stream(frame(n));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        producer.stop().await;

        let frames = provider.frames();
        assert!(!frames.is_empty());
        assert!(frames.len() < 100);
        assert!(producer.dropped() > 0);
        // latest wins: the last frame fed is the last delivered
        assert_eq!(frames.last(), Some(&99u32.to_be_bytes().to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_keeps_every_frame_when_fed_slowly() {
        let provider = Arc::new(RecordingProvider::new(64));
        let producer = producer(DCStreamType::ContinuousFrame, provider.clone());
        let interval = ProducerConfig::default().interval();
        producer.start().unwrap();

        for n in 0..20 {
            producer.feed_stream(frame(n));
            tokio::time::sleep(interval * 2).await;
        }
        producer.stop().await;

        let expected: Vec<_> = (0..20u32).map(|n| n.to_be_bytes().to_vec()).collect();
        assert_eq!(provider.frames(), expected);
        assert_eq!(producer.dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_delivers_everything_in_order() {
        let provider = Arc::new(RecordingProvider::new(64));
        let producer = producer(DCStreamType::SnapshotFrame, provider.clone());
        producer.start().unwrap();

        for n in 0..10 {
            producer.feed_stream(frame(n));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        producer.stop().await;

        let expected: Vec<_> = (0..10u32).map(|n| n.to_be_bytes().to_vec()).collect();
        assert_eq!(provider.frames(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_retries_without_dropping() {
        let provider = Arc::new(RecordingProvider::new(64));
        provider.failures.store(3, Ordering::SeqCst);
        let producer = producer(DCStreamType::SnapshotFrame, provider.clone());
        producer.start().unwrap();

        producer.feed_stream(frame(1));
        producer.feed_stream(frame(2));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(provider.frames().is_empty());

        // three failures cost three backoffs
        tokio::time::sleep(Duration::from_millis(1500)).await;
        producer.stop().await;
        assert_eq!(
            provider.frames(),
            vec![1u32.to_be_bytes().to_vec(), 2u32.to_be_bytes().to_vec()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff() {
        let provider = Arc::new(RecordingProvider::new(64));
        provider.failures.store(usize::MAX, Ordering::SeqCst);
        let producer = producer(DCStreamType::SnapshotFrame, provider);
        producer.start().unwrap();
        producer.feed_stream(frame(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let before = tokio::time::Instant::now();
        producer.stop().await;
        assert!(before.elapsed() < Duration::from_millis(500));
        assert!(!producer.is_running());
        assert_eq!(producer.queued(), 0);
    }

    #[test]
    fn test_undersized_buffer_is_returned_empty() {
        let provider = RecordingProvider::new(2);
        let base = DHBase::new("dev", "cam");
        assert_err!(feed_stream_to_driver(&provider, &base, 1, &frame(7)));
        assert!(provider.frames().is_empty());
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let provider = Arc::new(RecordingProvider::new(64));
        let producer = StreamProducer::new(
            DHBase::new("dev", "cam"),
            1,
            DCStreamType::SnapshotFrame,
            ProducerConfig {
                max_queue: 2,
                ..ProducerConfig::default()
            },
            provider,
        );
        for n in 0..5 {
            producer.feed_stream(frame(n));
        }
        assert_eq!(producer.queued(), 2);
        assert_eq!(producer.dropped(), 3);
        assert_err!(producer.start().and_then(|_| producer.start()));
        producer.stop().await;
    }
}
