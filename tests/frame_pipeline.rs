//! End-to-end behavior of the frame pipeline against a recording backend.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use glam::{Affine2, Vec2};

use beatframe::camera::CameraData;
use beatframe::config::RendererConfig;
use beatframe::draw_list::{DrawItem, DrawList};
use beatframe::error::{RenderError, Result};
use beatframe::frame_queue::{frame_queue, FrameProducer, OverflowPolicy};
use beatframe::gpu::font_atlas::AtlasLayout;
use beatframe::gpu::mesh::Vertex;
use beatframe::pipeline::{FrameBackend, FrameContext, FramePipeline, FrameReport, RenderResources};
use beatframe::registry::MeshHandle;
use beatframe::simulation::{run_simulation, FixedStepClock, SceneSource};
use beatframe::viewport::Viewport;

#[derive(Clone, Debug)]
struct RecordedFrame {
    frame_index: u64,
    time: f64,
    viewport: Viewport,
    opaque: u32,
    transparent: u32,
    discarded: usize,
    degenerate_view: bool,
}

#[derive(Default)]
struct RecordingBackend {
    size: (u32, u32),
    layout: AtlasLayout,
    frames: Vec<RecordedFrame>,
    fail_next: bool,
    skip_next: bool,
    resizes: Vec<(u32, u32)>,
}

impl RecordingBackend {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            ..Default::default()
        }
    }
}

impl FrameBackend for RecordingBackend {
    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.resizes.push((width, height));
    }

    fn prepare(&mut self, resources: &RenderResources) -> Result<&AtlasLayout> {
        self.layout = AtlasLayout::for_fonts(&resources.fonts().all_fonts());
        Ok(&self.layout)
    }

    fn render(&mut self, frame: &FrameContext<'_>) -> Result<FrameReport> {
        if std::mem::take(&mut self.fail_next) {
            return Err(RenderError::Readback("device lost".to_string()));
        }
        if std::mem::take(&mut self.skip_next) {
            return Ok(FrameReport::default());
        }
        self.frames.push(RecordedFrame {
            frame_index: frame.frame_index,
            time: frame.list.time,
            viewport: frame.viewport,
            opaque: frame.batch.opaque_count(),
            transparent: frame.batch.transparent_count(),
            discarded: frame.batch.discarded,
            degenerate_view: frame.batch.degenerate_view,
        });
        let post = &frame.list.post_processing;
        Ok(FrameReport {
            presented: true,
            bloom_applied: post.bloom.is_active(),
            uber_applied: post.uber_active(),
            draws: frame.batch.commands.len(),
        })
    }
}

fn square(resources: &RenderResources) -> MeshHandle {
    let vertices = [
        Vertex::new(-0.5, -0.5),
        Vertex::new(0.5, -0.5),
        Vertex::new(0.5, 0.5),
        Vertex::new(-0.5, 0.5),
    ];
    resources.register_mesh(&vertices, &[0, 1, 2, 2, 3, 0])
}

fn setup(
    width: u32,
    height: u32,
    aspect_ratio: Option<f32>,
) -> (FramePipeline<RecordingBackend>, FrameProducer, MeshHandle) {
    let resources = Arc::new(RenderResources::default());
    let mesh = square(&resources);
    let config = RendererConfig {
        aspect_ratio,
        queue_capacity: 4,
        overflow_policy: OverflowPolicy::Block,
        ..Default::default()
    };
    let (pipeline, producer) = FramePipeline::create(RecordingBackend::new(width, height), resources, &config);
    (pipeline, producer, mesh)
}

fn submit_one_opaque(producer: &FrameProducer, mesh: MeshHandle) {
    let mut list = producer.acquire_draw_list();
    list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, [1.0, 0.0, 0.0, 1.0]));
    producer.submit(list).unwrap();
}

#[test]
fn test_single_opaque_mesh_at_800x600() {
    let (mut pipeline, producer, _) = setup(800, 600, None);
    let triangle = pipeline.resources().register_mesh(
        &[Vertex::new(0.0, 0.0), Vertex::new(1.0, 0.0), Vertex::new(0.0, 1.0)],
        &[0, 1, 2],
    );
    submit_one_opaque(&producer, triangle);

    assert!(pipeline.process_frame().unwrap());

    let frame = &pipeline.backend().frames[0];
    assert_eq!(frame.opaque, 1);
    assert_eq!(frame.transparent, 0);
    assert_eq!(frame.viewport, Viewport { x: 0, y: 0, width: 800, height: 600 });

    let report = pipeline.last_report().unwrap();
    assert!(report.presented);
    assert!(!report.bloom_applied);
    assert!(!report.uber_applied);
    assert_eq!(report.draws, 1);
    assert_eq!(pipeline.frames_rendered(), 1);

    // Queue is now empty.
    assert!(!pipeline.process_frame().unwrap());
}

#[test]
fn test_wider_content_is_letterboxed() {
    let (mut pipeline, producer, mesh) = setup(800, 600, Some(16.0 / 9.0));
    submit_one_opaque(&producer, mesh);

    assert!(pipeline.process_frame().unwrap());
    let frame = &pipeline.backend().frames[0];
    assert_eq!(frame.viewport, Viewport { x: 0, y: 75, width: 800, height: 450 });
    assert_relative_eq!(frame.viewport.aspect(), 16.0 / 9.0, epsilon = 1e-3);
}

#[test]
fn test_narrower_content_is_pillarboxed() {
    let (mut pipeline, producer, mesh) = setup(800, 600, Some(1.0));
    submit_one_opaque(&producer, mesh);

    assert!(pipeline.process_frame().unwrap());
    let frame = &pipeline.backend().frames[0];
    assert_eq!(frame.viewport, Viewport { x: 100, y: 0, width: 600, height: 600 });
}

#[test]
fn test_zero_area_surface_does_not_dequeue() {
    let (mut pipeline, producer, mesh) = setup(0, 600, None);
    submit_one_opaque(&producer, mesh);

    assert!(!pipeline.process_frame().unwrap());
    assert!(pipeline.backend().frames.is_empty());

    // The list was left queued and renders once the surface has area.
    pipeline.resize(800, 600);
    assert!(pipeline.process_frame().unwrap());
    assert_eq!(pipeline.backend().frames.len(), 1);
    assert_eq!(pipeline.backend().resizes, vec![(800, 600)]);
}

#[test]
fn test_closed_pipeline_processes_nothing() {
    let (mut pipeline, producer, mesh) = setup(800, 600, None);
    submit_one_opaque(&producer, mesh);
    pipeline.close();

    assert!(pipeline.is_closed());
    assert!(!pipeline.process_frame().unwrap());
    assert!(!pipeline.wait_and_process_frame(Duration::from_millis(5)).unwrap());
    assert!(pipeline.backend().frames.is_empty());
}

#[test]
fn test_rendered_lists_return_to_the_pool() {
    let (mut pipeline, producer, mesh) = setup(800, 600, None);
    let mut list = producer.acquire_draw_list();
    for _ in 0..64 {
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, [1.0; 4]));
    }
    list.clear_color = [1.0, 0.0, 0.0, 1.0];
    producer.submit(list).unwrap();
    assert!(pipeline.process_frame().unwrap());

    // Same storage comes back, reset.
    let recycled = producer.acquire_draw_list();
    assert!(recycled.capacity() >= 64);
    assert!(recycled.is_empty());
    assert_eq!(recycled.clear_color, [0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_backend_error_still_releases_the_list() {
    let (mut pipeline, producer, mesh) = setup(800, 600, None);
    let mut list = producer.acquire_draw_list();
    for _ in 0..32 {
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, [1.0; 4]));
    }
    producer.submit(list).unwrap();
    pipeline.backend_mut().fail_next = true;

    assert!(pipeline.process_frame().is_err());
    assert!(producer.acquire_draw_list().capacity() >= 32);
    assert_eq!(pipeline.frames_rendered(), 0);
}

#[test]
fn test_skipped_frame_is_not_counted() {
    let (mut pipeline, producer, mesh) = setup(800, 600, None);
    submit_one_opaque(&producer, mesh);
    submit_one_opaque(&producer, mesh);
    pipeline.backend_mut().skip_next = true;

    assert!(!pipeline.process_frame().unwrap());
    assert_eq!(pipeline.frames_rendered(), 0);
    assert!(pipeline.process_frame().unwrap());
    // Frame indices count dequeued lists, skipped or not.
    assert_eq!(pipeline.backend().frames[0].frame_index, 1);
}

#[test]
fn test_degenerate_camera_presents_without_items() {
    let (mut pipeline, producer, mesh) = setup(800, 600, None);
    let mut list = producer.acquire_draw_list();
    list.camera = CameraData::new(Vec2::ZERO, 0.0, 0.0);
    list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, [1.0; 4]));
    producer.submit(list).unwrap();

    assert!(pipeline.process_frame().unwrap());
    let frame = &pipeline.backend().frames[0];
    assert!(frame.degenerate_view);
    assert_eq!(frame.opaque + frame.transparent, 0);
}

#[test]
fn test_invisible_items_are_discarded() {
    let (mut pipeline, producer, mesh) = setup(800, 600, None);
    let mut list = producer.acquire_draw_list();
    list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, [1.0, 1.0, 1.0, 0.0]));
    list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, [1.0, 1.0, 1.0, 0.5]));
    producer.submit(list).unwrap();

    assert!(pipeline.process_frame().unwrap());
    let frame = &pipeline.backend().frames[0];
    assert_eq!(frame.discarded, 1);
    assert_eq!(frame.transparent, 1);
}

#[test]
fn test_post_effects_reported() {
    let (mut pipeline, producer, _) = setup(800, 600, None);
    let mut list = producer.acquire_draw_list();
    list.post_processing.bloom.intensity = 1.0;
    list.post_processing.vignette.intensity = 0.5;
    producer.submit(list).unwrap();

    assert!(pipeline.process_frame().unwrap());
    let report = pipeline.last_report().unwrap();
    assert!(report.bloom_applied);
    assert!(report.uber_applied);
    assert_eq!(report.draws, 0);
}

#[test]
#[should_panic(expected = "unregistered mesh")]
fn test_unregistered_mesh_panics() {
    let (mut pipeline, producer, _) = setup(800, 600, None);
    let bogus = MeshHandle {
        id: 99,
        vertex_offset: 0,
        vertex_count: 3,
        index_offset: 0,
        index_count: 3,
    };
    let mut list = producer.acquire_draw_list();
    list.push(DrawItem::mesh(bogus, Affine2::IDENTITY, [1.0; 4]));
    producer.submit(list).unwrap();
    let _ = pipeline.process_frame();
}

#[test]
fn test_finished_after_producer_drops() {
    let (mut pipeline, producer, mesh) = setup(800, 600, None);
    submit_one_opaque(&producer, mesh);
    drop(producer);

    assert!(!pipeline.is_finished());
    assert!(pipeline.process_frame().unwrap());
    assert!(!pipeline.process_frame().unwrap());
    assert!(pipeline.is_finished());
}

struct Spinner {
    mesh: MeshHandle,
}

impl SceneSource for Spinner {
    fn populate(&mut self, time: f64, list: &mut DrawList) -> bool {
        let transform = Affine2::from_angle(time as f32);
        list.push(DrawItem::mesh(self.mesh, transform, [0.0, 1.0, 0.0, 1.0]));
        list.push(DrawItem::mesh(self.mesh, transform, [0.0, 0.0, 1.0, 0.5]));
        true
    }
}

#[test]
fn test_threaded_lossless_playback() {
    let resources = Arc::new(RenderResources::default());
    let mesh = square(&resources);
    let (producer, consumer) = frame_queue(2, OverflowPolicy::Block);
    let mut pipeline = FramePipeline::new(RecordingBackend::new(320, 240), Arc::clone(&resources), consumer, None);

    let simulation = std::thread::spawn(move || {
        let stop = AtomicBool::new(false);
        run_simulation(&mut Spinner { mesh }, &producer, &mut FixedStepClock::new(30.0, 45), &stop)
    });

    while !pipeline.is_finished() {
        pipeline.wait_and_process_frame(Duration::from_millis(50)).unwrap();
    }
    let stats = simulation.join().unwrap();

    assert_eq!(stats.submitted, 45);
    let frames = &pipeline.backend().frames;
    assert_eq!(frames.len(), 45);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.frame_index, i as u64);
        assert_relative_eq!(frame.time, i as f64 / 30.0);
        assert_eq!((frame.opaque, frame.transparent), (1, 1));
    }
}
