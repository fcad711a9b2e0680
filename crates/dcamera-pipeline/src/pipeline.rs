//! Pipeline container: builds the node chain and owns its head

use crate::buffer::DataBuffer;
use crate::codec::{CodecDirection, CodecFactory, CodecNode};
use crate::config::{VideoCodecType, VideoConfig, VideoPixelFormat};
use crate::convert::ConvertNode;
use crate::node::{EventReceiver, EventSender, PipelineEvent, ProcessNode};
use dcamera_core::{DCameraError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What kind of stream a pipeline processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineType {
    /// Continuous frames, transcoded and converted as needed
    Video,
    /// Still JPEG frames, forwarded untouched
    PhotoJpeg,
}

/// A chain of processing nodes
pub struct DataProcessPipeline {
    factory: Arc<dyn CodecFactory>,
    events: EventSender,
    head: Option<Box<dyn ProcessNode>>,
    pipeline_type: Option<PipelineType>,
    output: Option<VideoConfig>,
}

impl DataProcessPipeline {
    /// Create an empty pipeline and the receiver for its events
    pub fn new(factory: Arc<dyn CodecFactory>) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                events,
                head: None,
                pipeline_type: None,
                output: None,
            },
            rx,
        )
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline_type.is_some()
    }

    /// Configuration of frames leaving the pipeline
    pub fn output_config(&self) -> Option<VideoConfig> {
        self.output
    }

    /// Build and initialize the node chain for `source` → `target`
    pub fn create_process_pipeline(
        &mut self,
        pipeline_type: PipelineType,
        source: &VideoConfig,
        target: &VideoConfig,
    ) -> Result<()> {
        if self.is_ready() {
            return Err(DCameraError::WrongState("pipeline already created".into()));
        }
        info!(?pipeline_type, ?source, ?target, "Creating process pipeline");

        if pipeline_type == PipelineType::PhotoJpeg {
            self.pipeline_type = Some(pipeline_type);
            self.output = Some(*source);
            return Ok(());
        }

        let mut nodes: Vec<Box<dyn ProcessNode>> = Vec::new();
        let direction = if source.codec == VideoCodecType::NoCodec {
            CodecDirection::Encode
        } else {
            CodecDirection::Decode
        };
        let mut codec = CodecNode::new(direction, self.factory.clone(), self.events.clone());
        let mut current = codec.init_node(source, target)?;
        nodes.push(Box::new(codec));

        if current.pixel_format == VideoPixelFormat::Nv12
            && target.pixel_format == VideoPixelFormat::Nv21
            && current.codec == VideoCodecType::NoCodec
        {
            let mut convert = ConvertNode::new(self.events.clone());
            match convert.init_node(&current, target) {
                Ok(output) => current = output,
                Err(e) => {
                    release_all(nodes);
                    return Err(e);
                }
            }
            nodes.push(Box::new(convert));
        }

        // Link tail to head
        let mut chain: Option<Box<dyn ProcessNode>> = None;
        while let Some(mut node) = nodes.pop() {
            if let Some(next) = chain.take() {
                node.set_next(next);
            }
            chain = Some(node);
        }

        self.head = chain;
        self.pipeline_type = Some(pipeline_type);
        self.output = Some(current);
        Ok(())
    }

    /// Push buffers into the head of the chain
    pub fn process_data(&mut self, buffers: Vec<DataBuffer>) -> Result<()> {
        if buffers.is_empty() {
            return Err(DCameraError::InvalidArgument("no buffers to process".into()));
        }
        match (self.pipeline_type, self.head.as_mut()) {
            (None, _) => Err(DCameraError::WrongState("pipeline not created".into())),
            (Some(_), Some(head)) => head.process_data(buffers),
            (Some(_), None) => {
                for buffer in buffers {
                    self.events
                        .send(PipelineEvent::Processed(buffer))
                        .map_err(|_| DCameraError::WrongState("pipeline owner is gone".into()))?;
                }
                Ok(())
            }
        }
    }

    /// Release every node, head first
    pub fn destroy_pipeline(&mut self) {
        if let Some(mut head) = self.head.take() {
            debug!(node = head.node_name(), "Destroying pipeline");
            head.release_process_node();
        }
        self.pipeline_type = None;
        self.output = None;
    }
}

impl Drop for DataProcessPipeline {
    fn drop(&mut self) {
        self.destroy_pipeline();
    }
}

fn release_all(nodes: Vec<Box<dyn ProcessNode>>) {
    for mut node in nodes {
        node.release_process_node();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameMeta;
    use crate::codec::tests::LoopbackFactory;
    use std::time::Duration;

    fn nv12_payload(width: usize, height: usize) -> DataBuffer {
        let mut data = vec![16u8; width * height];
        for _ in 0..width * height / 4 {
            data.extend_from_slice(&[1, 2]);
        }
        DataBuffer::with_meta(
            data,
            FrameMeta {
                width: width as u32,
                height: height as u32,
                ..FrameMeta::default()
            },
        )
    }

    #[tokio::test]
    async fn test_decode_then_convert() {
        let (mut pipeline, mut events) = DataProcessPipeline::new(Arc::new(LoopbackFactory::new()));
        let source = VideoConfig::new(VideoCodecType::H264, VideoPixelFormat::Nv12, 640, 480, 30);
        let target = VideoConfig::new(VideoCodecType::NoCodec, VideoPixelFormat::Nv21, 640, 480, 30);
        pipeline
            .create_process_pipeline(PipelineType::Video, &source, &target)
            .unwrap();
        assert_eq!(pipeline.output_config().unwrap().pixel_format, VideoPixelFormat::Nv21);

        // the loopback "decoder" returns its input, so feed it raw NV12
        pipeline.process_data(vec![nv12_payload(640, 480)]).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            PipelineEvent::Processed(buf) => {
                assert_eq!(buf.meta.pixel_format, Some(VideoPixelFormat::Nv21));
                assert_eq!(&buf.data[640 * 480..640 * 480 + 2], &[2, 1]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_jpeg_pipeline_forwards_untouched() {
        let (mut pipeline, mut events) = DataProcessPipeline::new(Arc::new(LoopbackFactory::new()));
        let config = VideoConfig::new(VideoCodecType::NoCodec, VideoPixelFormat::Nv21, 1920, 1080, 30);
        pipeline
            .create_process_pipeline(PipelineType::PhotoJpeg, &config, &config)
            .unwrap();
        pipeline.process_data(vec![DataBuffer::new(b"jpeg".to_vec())]).unwrap();
        assert_eq!(
            events.recv().await,
            Some(PipelineEvent::Processed(DataBuffer::new(b"jpeg".to_vec())))
        );
    }

    #[tokio::test]
    async fn test_destroyed_pipeline_rejects_data() {
        let (mut pipeline, _events) = DataProcessPipeline::new(Arc::new(LoopbackFactory::new()));
        let source = VideoConfig::new(VideoCodecType::H265, VideoPixelFormat::Nv12, 640, 480, 30);
        let target = VideoConfig::new(VideoCodecType::NoCodec, VideoPixelFormat::Nv12, 640, 480, 30);
        pipeline
            .create_process_pipeline(PipelineType::Video, &source, &target)
            .unwrap();
        assert!(pipeline.is_ready());
        assert!(
            pipeline
                .create_process_pipeline(PipelineType::Video, &source, &target)
                .is_err()
        );

        pipeline.destroy_pipeline();
        assert!(!pipeline.is_ready());
        let err = pipeline.process_data(vec![DataBuffer::new(vec![1])]).unwrap_err();
        assert!(matches!(err, DCameraError::WrongState(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_source_fails_creation() {
        let (mut pipeline, _events) = DataProcessPipeline::new(Arc::new(LoopbackFactory::new()));
        let source = VideoConfig::new(VideoCodecType::H265, VideoPixelFormat::Nv12, 4096, 2160, 30);
        let target = VideoConfig::new(VideoCodecType::NoCodec, VideoPixelFormat::Nv21, 4096, 2160, 30);
        assert!(
            pipeline
                .create_process_pipeline(PipelineType::Video, &source, &target)
                .is_err()
        );
        assert!(!pipeline.is_ready());
    }
}
