//! Deterministic offline export: headless device, fixed-step simulation on
//! its own thread, every frame read back into PNG files and/or FFmpeg.

#![cfg(not(target_arch = "wasm32"))]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::{ExportJobSpec, RenderMetadata, RenderProgress};
use crate::error::{RenderError, RenderPhase};
use crate::gpu::backend::WgpuBackend;
use crate::gpu::context::GpuContext;
use crate::pipeline::{FramePipeline, RenderResources};
use crate::simulation::{run_simulation, FixedStepClock, SceneSource, SimulationStats};
use crate::sink::{FanoutSink, FrameImage, FrameSink};
use crate::video_encode::FfmpegPipeSink;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Writes `frame_NNNNN.png` into a directory.
pub struct PngSequenceSink {
    dir: PathBuf,
}

impl PngSequenceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:05}.png", index))
    }
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, frame: &FrameImage) -> crate::error::Result<()> {
        let path = self.frame_path(frame.index);
        image::save_buffer(
            &path,
            &frame.top_down_pixels(),
            frame.width,
            frame.height,
            image::ColorType::Rgba8,
        )
        .map_err(|e| RenderError::sink(RenderPhase::FrameSave, format!("{}: {}", path.display(), e)))
    }
}

fn build_sink(job: &ExportJobSpec) -> crate::error::Result<FanoutSink> {
    let mut sinks: Vec<Box<dyn FrameSink>> = Vec::new();
    if job.write_frames {
        sinks.push(Box::new(PngSequenceSink::new(&job.output_dir)));
    }
    if job.output_video {
        sinks.push(Box::new(FfmpegPipeSink::spawn(
            job.width,
            job.height,
            job.fps,
            &job.video,
            &job.effective_video_path(),
        )?));
    }
    Ok(FanoutSink::new(sinks))
}

/// Render `job` with the scene built by `make_scene`.
///
/// `on_progress` is called after every rendered frame. Metadata is written to
/// `{output_dir}/metadata.json` and returned.
pub fn run_export<S, F>(job: &ExportJobSpec, make_scene: F, mut on_progress: impl FnMut(&RenderProgress)) -> Result<RenderMetadata>
where
    S: SceneSource + Send + 'static,
    F: FnOnce(&RenderResources) -> S,
{
    job.validate().context("invalid export job")?;
    std::fs::create_dir_all(&job.output_dir)
        .map_err(|e| RenderError::io(RenderPhase::Initialization, &job.output_dir, e))?;

    let started_at = Utc::now();
    let start = Instant::now();
    let total_frames = job.total_frames();

    let resources = Arc::new(RenderResources::default());
    let mut scene = make_scene(&resources);

    let ctx = GpuContext::headless().context("failed to acquire a headless GPU device")?;
    let gpu_adapter = ctx.adapter_name();

    let config = job.renderer_config();
    let shaders = config.shader_provider();
    let sink = build_sink(job)?;
    let backend = WgpuBackend::new_offscreen(ctx, job.width, job.height, Box::new(sink), job.row_order, shaders.as_ref())?;
    let (mut pipeline, producer) = FramePipeline::create(backend, Arc::clone(&resources), &config);

    log::info!("Rendering {} frames at {}x{} to {:?}", total_frames, job.width, job.height, job.output_dir);

    let stop = Arc::new(AtomicBool::new(false));
    let simulation = {
        let stop = Arc::clone(&stop);
        let fps = job.fps as f64;
        std::thread::Builder::new()
            .name("simulation".to_string())
            .spawn(move || {
                let mut clock = FixedStepClock::new(fps, total_frames);
                run_simulation(&mut scene, &producer, &mut clock, &stop)
            })
            .context("failed to spawn simulation thread")?
    };

    let rendered = render_all(&mut pipeline, total_frames, start, &mut on_progress);
    let finished = rendered.and_then(|frames| {
        pipeline.backend_mut().finish_sink()?;
        Ok(frames)
    });
    if finished.is_err() {
        stop.store(true, Ordering::Release);
    }
    // Dropping the consumer unblocks a producer waiting on a full queue.
    drop(pipeline);
    let stats: SimulationStats = simulation
        .join()
        .map_err(|_| anyhow::anyhow!("simulation thread panicked"))?;
    let frame_count = finished.context("export failed")?;

    let mut warnings = Vec::new();
    if stats.skipped > 0 {
        warnings.push(format!("{} frames skipped by the scene", stats.skipped));
    }

    let elapsed = start.elapsed().as_secs_f64();
    let metadata = RenderMetadata {
        job: job.clone(),
        started_at,
        completed_at: Utc::now(),
        render_duration_secs: elapsed,
        frame_count,
        average_render_fps: if elapsed > 0.0 { frame_count as f64 / elapsed } else { 0.0 },
        job_hash: RenderMetadata::hash_job(job)?,
        version: env!("CARGO_PKG_VERSION").to_string(),
        gpu_adapter,
        video_path: job.output_video.then(|| job.effective_video_path()),
        warnings,
    };
    metadata.save(&metadata_path(&job.output_dir))?;
    log::info!("Rendered {} frames in {:.1}s ({:.1} fps)", frame_count, elapsed, metadata.average_render_fps);
    Ok(metadata)
}

pub fn metadata_path(output_dir: &Path) -> PathBuf {
    output_dir.join("metadata.json")
}

fn render_all(
    pipeline: &mut FramePipeline<WgpuBackend>,
    total_frames: u64,
    start: Instant,
    on_progress: &mut impl FnMut(&RenderProgress),
) -> crate::error::Result<u64> {
    while !pipeline.is_finished() {
        if pipeline.wait_and_process_frame(POLL_INTERVAL)? {
            let progress = RenderProgress::new(pipeline.frames_rendered(), total_frames, start.elapsed().as_secs_f64());
            on_progress(&progress);
        }
    }
    Ok(pipeline.frames_rendered())
}
