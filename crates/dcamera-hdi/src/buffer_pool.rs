//! Fixed-capacity pool of frame buffer slots
//!
//! Slots move idle → busy on acquire and leave busy on remove. A removed slot
//! only circulates again once it is explicitly added back.

use dcamera_core::{DCameraError, ImageBuffer, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Slots per stream
pub const BUFFER_POOL_CAPACITY: usize = 8;

#[derive(Default)]
struct PoolLists {
    idle: VecDeque<Arc<ImageBuffer>>,
    busy: VecDeque<Arc<ImageBuffer>>,
}

/// Idle/busy slot lists under one lock
pub struct BufferPool {
    lists: Mutex<PoolLists>,
    capacity: usize,
    stopped: AtomicBool,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BUFFER_POOL_CAPACITY)
    }
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            lists: Mutex::new(PoolLists::default()),
            capacity,
            stopped: AtomicBool::new(false),
        }
    }

    fn lists(&self) -> MutexGuard<'_, PoolLists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a slot to the idle list
    pub fn add_buffer(&self, buffer: Arc<ImageBuffer>) -> Result<()> {
        let mut lists = self.lists();
        if lists.idle.len() + lists.busy.len() >= self.capacity {
            return Err(DCameraError::ResourceExhausted(format!(
                "buffer pool full ({} slots)",
                self.capacity
            )));
        }
        lists.idle.push_back(buffer);
        Ok(())
    }

    /// Move the oldest idle slot to busy, without blocking
    pub fn acquire_buffer(&self) -> Option<Arc<ImageBuffer>> {
        let mut lists = self.lists();
        let buffer = lists.idle.pop_front()?;
        lists.busy.push_back(buffer.clone());
        Some(buffer)
    }

    /// Take a slot out of the busy list
    pub fn remove_buffer(&self, buffer: &ImageBuffer) -> Result<()> {
        let mut lists = self.lists();
        let position = lists
            .busy
            .iter()
            .position(|b| b.same_slot(buffer))
            .ok_or_else(|| {
                DCameraError::NotFound(format!("buffer {} is not busy", buffer.index()))
            })?;
        lists.busy.remove(position);
        Ok(())
    }

    /// Record whether the owning stream is stopping
    pub fn notify_stop(&self, stop: bool) {
        debug!(stop, "Buffer pool stop flag");
        self.stopped.store(stop, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn idle_len(&self) -> usize {
        self.lists().idle.len()
    }

    pub fn busy_len(&self) -> usize {
        self.lists().busy.len()
    }

    /// Snapshot of the busy slots
    pub fn busy_buffers(&self) -> Vec<Arc<ImageBuffer>> {
        self.lists().busy.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every slot, returning them to the caller
    pub fn clear(&self) -> Vec<Arc<ImageBuffer>> {
        let mut lists = self.lists();
        let mut all: Vec<_> = lists.idle.drain(..).collect();
        all.extend(lists.busy.drain(..));
        all
    }
}
