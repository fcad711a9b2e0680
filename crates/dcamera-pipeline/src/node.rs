//! Processing node trait and downstream links

use crate::buffer::DataBuffer;
use crate::config::VideoConfig;
use dcamera_core::{DCameraError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Notifications delivered to the pipeline owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A frame left the tail of the chain
    Processed(DataBuffer),
    /// A node failed asynchronously
    Error(DCameraError),
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

/// One stage of a processing pipeline
///
/// `process_data` may complete asynchronously; results are forwarded through
/// the node's link and failures are reported as `PipelineEvent::Error`.
pub trait ProcessNode: Send {
    fn node_name(&self) -> &'static str;

    /// Validate and prepare the node, returning the configuration it emits
    fn init_node(&mut self, source: &VideoConfig, target: &VideoConfig) -> Result<VideoConfig>;

    /// Accept buffers for processing
    fn process_data(&mut self, buffers: Vec<DataBuffer>) -> Result<()>;

    /// Release owned resources and cascade to the next node. Idempotent.
    fn release_process_node(&mut self);

    /// Chain another node after this one
    fn set_next(&mut self, next: Box<dyn ProcessNode>);
}

enum LinkTarget {
    Next(Box<dyn ProcessNode>),
    Terminal(EventSender),
    Released,
}

/// Where a node sends its output
///
/// Shared between a node and any task that produces its output, so a codec
/// callback can forward frames while the pipeline still owns the node.
#[derive(Clone)]
pub struct NodeLink(Arc<Mutex<LinkTarget>>);

impl NodeLink {
    /// Link that hands frames to the pipeline owner
    pub fn terminal(events: EventSender) -> Self {
        Self(Arc::new(Mutex::new(LinkTarget::Terminal(events))))
    }

    pub fn set_next(&self, node: Box<dyn ProcessNode>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = LinkTarget::Next(node);
    }

    /// Pass one processed frame downstream
    pub fn forward(&self, buffer: DataBuffer) -> Result<()> {
        let mut target = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *target {
            LinkTarget::Next(node) => node.process_data(vec![buffer]),
            LinkTarget::Terminal(events) => events
                .send(PipelineEvent::Processed(buffer))
                .map_err(|_| DCameraError::WrongState("pipeline owner is gone".into())),
            LinkTarget::Released => Err(DCameraError::WrongState("node link released".into())),
        }
    }

    /// Release the downstream node, if any
    pub fn release(&self) {
        let previous = std::mem::replace(
            &mut *self.0.lock().unwrap_or_else(PoisonError::into_inner),
            LinkTarget::Released,
        );
        if let LinkTarget::Next(mut node) = previous {
            debug!(node = node.node_name(), "Releasing downstream node");
            node.release_process_node();
        }
    }
}

impl std::fmt::Debug for NodeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let kind = match &*target {
            LinkTarget::Next(node) => node.node_name(),
            LinkTarget::Terminal(_) => "terminal",
            LinkTarget::Released => "released",
        };
        f.debug_tuple("NodeLink").field(&kind).finish()
    }
}
