//! Result metadata processing
//!
//! The sink reports result tags per frame. The processor keeps the latest
//! producer-side values and the values last handed to the consumer, and
//! decides what to report depending on the result mode.

use dcamera_core::{DCameraError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Initial item and data capacity of a metadata buffer
pub const DEFAULT_ITEM_CAPACITY: usize = 20;
pub const DEFAULT_DATA_CAPACITY: usize = 2000;

/// When result metadata is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// Every frame's results
    #[default]
    PerFrame,
    /// Only tags whose value changed since the last report
    OnChanged,
}

/// A bounded set of tag → value entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBuffer {
    entries: BTreeMap<u32, Vec<u8>>,
    item_capacity: usize,
    data_capacity: usize,
}

impl MetadataBuffer {
    pub fn with_capacity(item_capacity: usize, data_capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            item_capacity,
            data_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn item_capacity(&self) -> usize {
        self.item_capacity
    }

    pub fn data_capacity(&self) -> usize {
        self.data_capacity
    }

    pub fn data_len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn get(&self, tag: u32) -> Option<&[u8]> {
        self.entries.get(&tag).map(Vec::as_slice)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.entries.iter().map(|(tag, value)| (*tag, value.as_slice()))
    }

    /// Whether `tag = value` fits without growing
    fn fits(&self, tag: u32, value: &[u8]) -> bool {
        let replaced = self.entries.get(&tag).map_or(0, Vec::len);
        let items = self.entries.len() + usize::from(!self.entries.contains_key(&tag));
        items <= self.item_capacity && self.data_len() - replaced + value.len() <= self.data_capacity
    }

    /// Insert or replace a tag, failing when capacity is exceeded
    pub fn update(&mut self, tag: u32, value: &[u8]) -> Result<()> {
        if !self.fits(tag, value) {
            return Err(DCameraError::ResourceExhausted(format!(
                "metadata buffer full: {} items / {} bytes",
                self.item_capacity, self.data_capacity
            )));
        }
        self.entries.insert(tag, value.to_vec());
        Ok(())
    }
}

/// Replace `slot` with a larger buffer holding the same entries
///
/// The previous buffer is dropped once its entries have moved.
pub fn resize_metadata_buffer(slot: &mut MetadataBuffer, item_capacity: usize, data_capacity: usize) {
    let old = std::mem::replace(slot, MetadataBuffer::with_capacity(item_capacity, data_capacity));
    slot.entries = old.entries;
}

/// Tracks enabled result tags and the latest result values
#[derive(Debug)]
pub struct MetadataProcessor {
    mode: ResultMode,
    all_results: BTreeSet<u32>,
    enabled_results: BTreeSet<u32>,
    producer: MetadataBuffer,
    consumer: MetadataBuffer,
}

impl Default for MetadataProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProcessor {
    pub fn new() -> Self {
        Self {
            mode: ResultMode::default(),
            all_results: BTreeSet::new(),
            enabled_results: BTreeSet::new(),
            producer: MetadataBuffer::with_capacity(DEFAULT_ITEM_CAPACITY, DEFAULT_DATA_CAPACITY),
            consumer: MetadataBuffer::with_capacity(DEFAULT_ITEM_CAPACITY, DEFAULT_DATA_CAPACITY),
        }
    }

    /// Declare the tags the camera can report; all start enabled
    pub fn init_results(&mut self, tags: impl IntoIterator<Item = u32>) {
        self.all_results = tags.into_iter().collect();
        self.enabled_results = self.all_results.clone();
    }

    pub fn set_result_mode(&mut self, mode: ResultMode) {
        debug!(?mode, "Result mode changed");
        self.mode = mode;
    }

    pub fn result_mode(&self) -> ResultMode {
        self.mode
    }

    pub fn enabled_results(&self) -> Vec<u32> {
        self.enabled_results.iter().copied().collect()
    }

    /// Enable reporting for tags the camera supports
    pub fn enable_results(&mut self, tags: &[u32]) -> Result<()> {
        if let Some(tag) = tags.iter().find(|t| !self.all_results.contains(t)) {
            return Err(DCameraError::InvalidArgument(format!(
                "result tag {} not supported",
                tag
            )));
        }
        self.enabled_results.extend(tags.iter().copied());
        Ok(())
    }

    pub fn disable_results(&mut self, tags: &[u32]) -> Result<()> {
        if let Some(tag) = tags.iter().find(|t| !self.all_results.contains(t)) {
            return Err(DCameraError::InvalidArgument(format!(
                "result tag {} not supported",
                tag
            )));
        }
        for tag in tags {
            self.enabled_results.remove(tag);
        }
        Ok(())
    }

    /// Store results from the sink, growing the producer buffer if needed
    ///
    /// Tags seen for the first time become known and enabled.
    pub fn save_results(&mut self, results: &BTreeMap<u32, Vec<u8>>) {
        for (tag, value) in results {
            if self.all_results.insert(*tag) {
                self.enabled_results.insert(*tag);
            }
            if self.producer.update(*tag, value).is_err() {
                let items = (self.producer.item_capacity() * 2).max(self.producer.len() + 1);
                let data = (self.producer.data_capacity() * 2).max(self.producer.data_len() + value.len());
                resize_metadata_buffer(&mut self.producer, items, data);
                // capacity now covers this entry
                let _ = self.producer.update(*tag, value);
            }
        }
    }

    /// Results to report for the latest frame, per the result mode
    pub fn update_results(&mut self) -> BTreeMap<u32, Vec<u8>> {
        let mut report = BTreeMap::new();
        for (tag, value) in self.producer.entries() {
            if !self.enabled_results.contains(&tag) {
                continue;
            }
            let changed = self.consumer.get(tag) != Some(value);
            if self.mode == ResultMode::PerFrame || changed {
                report.insert(tag, value.to_vec());
            }
        }
        for (tag, value) in &report {
            if self.consumer.update(*tag, value).is_err() {
                let items = (self.consumer.item_capacity() * 2).max(self.consumer.len() + 1);
                let data = (self.consumer.data_capacity() * 2).max(self.consumer.data_len() + value.len());
                resize_metadata_buffer(&mut self.consumer, items, data);
                let _ = self.consumer.update(*tag, value);
            }
        }
        report
    }

    pub fn producer_buffer(&self) -> &MetadataBuffer {
        &self.producer
    }

    /// Forget all result values
    pub fn reset(&mut self) {
        self.producer = MetadataBuffer::with_capacity(DEFAULT_ITEM_CAPACITY, DEFAULT_DATA_CAPACITY);
        self.consumer = MetadataBuffer::with_capacity(DEFAULT_ITEM_CAPACITY, DEFAULT_DATA_CAPACITY);
    }
}
