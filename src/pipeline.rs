//! Render-thread side of the frame composition pipeline.
//!
//! [`FramePipeline`] pulls one draw list per frame from the queue, assembles
//! it into a batch and hands both to a [`FrameBackend`]. The list goes back to
//! the pool whether or not the backend succeeded.

use std::sync::Arc;
use std::time::Duration;

use crate::batch::{AssembledBatch, BatchAssembler};
use crate::config::RendererConfig;
use crate::draw_list::DrawList;
use crate::error::Result;
use crate::frame_queue::{frame_queue, FrameConsumer, FrameProducer};
use crate::gpu::font_atlas::AtlasLayout;
use crate::gpu::mesh::Vertex;
use crate::registry::{FontRegistry, MeshHandle, MeshRegistry};
use crate::text::{FontData, FontHandle, GridShaper, TextAlignment, TextHandle, TextShaper};
use crate::viewport::{compute_viewport, Viewport};

/// Meshes and fonts shared between the simulation and render threads.
pub struct RenderResources {
    meshes: MeshRegistry,
    fonts: FontRegistry,
}

impl Default for RenderResources {
    fn default() -> Self {
        Self::new(Box::new(GridShaper::default()))
    }
}

impl RenderResources {
    pub fn new(shaper: Box<dyn TextShaper>) -> Self {
        Self {
            meshes: MeshRegistry::new(),
            fonts: FontRegistry::new(shaper),
        }
    }

    /// Register an indexed triangle list. Safe to call from any thread.
    pub fn register_mesh(&self, vertices: &[Vertex], indices: &[u32]) -> MeshHandle {
        self.meshes.register(vertices, indices)
    }

    pub fn register_font(&self, font: FontData) -> FontHandle {
        self.fonts.register(font)
    }

    pub fn create_text(&self, text: &str, font_stack: &[FontHandle], alignment: TextAlignment) -> TextHandle {
        self.fonts.create_text(text, font_stack, alignment)
    }

    pub fn meshes(&self) -> &MeshRegistry {
        &self.meshes
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.fonts
    }
}

/// Everything a backend needs to draw one frame.
pub struct FrameContext<'a> {
    pub list: &'a DrawList,
    pub batch: &'a AssembledBatch,
    pub viewport: Viewport,
    pub frame_index: u64,
}

/// Outcome of one rendered frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// False when the destination skipped the frame (lost surface).
    pub presented: bool,
    pub bloom_applied: bool,
    pub uber_applied: bool,
    /// Draw commands issued by the scene pass.
    pub draws: usize,
}

/// A destination the pipeline can draw into.
pub trait FrameBackend {
    /// Current destination size in pixels.
    fn surface_size(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    /// Upload resources registered since the last frame and return the font
    /// atlas layout the batch must be assembled against.
    fn prepare(&mut self, resources: &RenderResources) -> Result<&AtlasLayout>;

    fn render(&mut self, frame: &FrameContext<'_>) -> Result<FrameReport>;
}

pub struct FramePipeline<B: FrameBackend> {
    backend: B,
    resources: Arc<RenderResources>,
    consumer: FrameConsumer,
    assembler: BatchAssembler,
    aspect_ratio: Option<f32>,
    closed: bool,
    next_index: u64,
    frames_rendered: u64,
    last_report: Option<FrameReport>,
}

impl<B: FrameBackend> FramePipeline<B> {
    pub fn new(
        backend: B,
        resources: Arc<RenderResources>,
        consumer: FrameConsumer,
        aspect_ratio: Option<f32>,
    ) -> Self {
        Self {
            backend,
            resources,
            consumer,
            assembler: BatchAssembler::new(),
            aspect_ratio,
            closed: false,
            next_index: 0,
            frames_rendered: 0,
            last_report: None,
        }
    }

    /// Build a pipeline and the producer end of its queue from `config`.
    pub fn create(backend: B, resources: Arc<RenderResources>, config: &RendererConfig) -> (Self, FrameProducer) {
        let (producer, consumer) = frame_queue(config.queue_capacity, config.overflow_policy);
        let pipeline = Self::new(backend, resources, consumer, config.aspect_ratio);
        (pipeline, producer)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.backend.resize(width, height);
    }

    /// Stop processing frames. Queued lists stay queued.
    pub fn close(&mut self) {
        if !self.closed {
            log::info!("Frame pipeline closed after {} frames", self.frames_rendered);
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The producer is gone and every submitted list has been processed.
    pub fn is_finished(&self) -> bool {
        self.consumer.is_finished()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn resources(&self) -> &Arc<RenderResources> {
        &self.resources
    }

    pub fn last_report(&self) -> Option<FrameReport> {
        self.last_report
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Render the next queued list if there is one.
    ///
    /// Returns `Ok(false)` without dequeuing when the pipeline is closed or the
    /// destination has no area, and `Ok(false)` when nothing is queued or the
    /// destination skipped the frame.
    pub fn process_frame(&mut self) -> Result<bool> {
        self.next_frame(None)
    }

    /// Like [`process_frame`](Self::process_frame) but waits up to `timeout`
    /// for the producer.
    pub fn wait_and_process_frame(&mut self, timeout: Duration) -> Result<bool> {
        self.next_frame(Some(timeout))
    }

    fn next_frame(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        let (width, height) = self.backend.surface_size();
        let viewport = compute_viewport(width, height, self.aspect_ratio);
        if viewport.is_empty() {
            log::trace!("Destination is {}x{}, not dequeuing", width, height);
            return Ok(false);
        }

        let list = match timeout {
            None => self.consumer.try_dequeue(),
            Some(timeout) => self.consumer.dequeue_timeout(timeout),
        };
        let Some(list) = list else {
            return Ok(false);
        };

        let result = self.render_list(&list, viewport);
        self.consumer.release(list);
        let report = result?;

        self.last_report = Some(report);
        if report.presented {
            self.frames_rendered += 1;
        }
        Ok(report.presented)
    }

    fn render_list(&mut self, list: &DrawList, viewport: Viewport) -> Result<FrameReport> {
        let frame_index = self.next_index;
        self.next_index += 1;

        let atlas = self.backend.prepare(&self.resources)?;
        let batch = self
            .assembler
            .assemble(list, self.resources.meshes(), &atlas.uv_scales, viewport.aspect());
        log::trace!(
            "Frame {}: {} opaque, {} transparent, {} discarded",
            frame_index,
            batch.opaque_count(),
            batch.transparent_count(),
            batch.discarded
        );

        self.backend.render(&FrameContext {
            list,
            batch,
            viewport,
            frame_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_hand_out_sequential_handles() {
        let resources = RenderResources::default();
        let tri = [Vertex::new(0.0, 0.0), Vertex::new(1.0, 0.0), Vertex::new(0.0, 1.0)];
        let a = resources.register_mesh(&tri, &[0, 1, 2]);
        let b = resources.register_mesh(&tri, &[0, 1, 2]);
        assert_eq!(b.id, a.id + 1);
        assert_eq!(b.vertex_offset, a.vertex_offset + 3);
        assert!(resources.meshes().contains(&a));
    }

    #[test]
    fn test_resources_shape_text_with_registered_font() {
        let resources = RenderResources::default();
        let font = resources.register_font(FontData::new("mono", 16, 16, vec![255; 16 * 16 * 4]));
        let text = resources.create_text("hi", &[font], TextAlignment::Left);
        assert_eq!(text.glyph_count(), 2);
        assert_eq!(resources.fonts().len(), 1);
    }

    #[test]
    fn test_resources_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RenderResources>();
    }
}
