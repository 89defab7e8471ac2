//! Renderer configuration, offline export jobs and export metadata.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(not(target_arch = "wasm32"))]
use chrono::{DateTime, Utc};

#[cfg(not(target_arch = "wasm32"))]
use sha2::{Digest, Sha256};

use crate::error::{RenderError, RenderPhase, Result};
use crate::frame_queue::OverflowPolicy;
use crate::gpu::shaders::{DirectoryShaders, EmbeddedShaders, ShaderProvider};
use crate::sink::RowOrder;

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_queue_capacity() -> usize {
    3
}

fn default_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::DropOldest
}

fn default_fps() -> f32 {
    60.0
}

fn default_duration() -> f32 {
    10.0
}

fn default_export_width() -> u32 {
    1920
}

fn default_export_height() -> u32 {
    1080
}

fn default_true() -> bool {
    true
}

/// Presentation mode requested for a window surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresentModePreference {
    /// Wait for vblank; always supported.
    #[default]
    Vsync,
    /// Wait for vblank, replacing the queued frame.
    Mailbox,
    /// Present immediately, tearing allowed.
    Immediate,
}

impl PresentModePreference {
    pub fn to_wgpu(self) -> wgpu::PresentMode {
        match self {
            PresentModePreference::Vsync => wgpu::PresentMode::Fifo,
            PresentModePreference::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModePreference::Immediate => wgpu::PresentMode::Immediate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub width: u32,
    pub height: u32,
    pub present_mode: wgpu::PresentMode,
}

/// Settings for an interactive or embedded renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Content aspect ratio (width / height). None fills the whole surface.
    #[serde(default)]
    pub aspect_ratio: Option<f32>,

    /// Draw lists that may wait between simulation and render thread.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_overflow_policy")]
    pub overflow_policy: OverflowPolicy,

    #[serde(default)]
    pub present_mode: PresentModePreference,

    /// Directory overriding the built-in WGSL sources.
    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            aspect_ratio: None,
            queue_capacity: default_queue_capacity(),
            overflow_policy: default_overflow_policy(),
            present_mode: PresentModePreference::default(),
            shader_dir: None,
        }
    }
}

impl RendererConfig {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RenderError::io(RenderPhase::Initialization, path, e))?;
        serde_json::from_str(&content).map_err(|e| RenderError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(RenderError::Config("queue capacity must be at least 1".to_string()));
        }
        validate_aspect(self.aspect_ratio)
    }

    /// Validated size and present mode for configuring a window surface.
    pub fn surface_request(&self) -> Result<SurfaceRequest> {
        self.validate()?;
        Ok(SurfaceRequest {
            width: self.width,
            height: self.height,
            present_mode: self.present_mode.to_wgpu(),
        })
    }

    pub fn shader_provider(&self) -> Box<dyn ShaderProvider> {
        match &self.shader_dir {
            Some(dir) => Box::new(DirectoryShaders::new(dir.clone())),
            None => Box::new(EmbeddedShaders),
        }
    }
}

fn validate_aspect(aspect: Option<f32>) -> Result<()> {
    match aspect {
        Some(a) if !(a.is_finite() && a > 0.0) => {
            Err(RenderError::Config(format!("aspect ratio must be positive, got {}", a)))
        }
        _ => Ok(()),
    }
}

/// FFmpeg encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoEncodingOptions {
    pub codec: String,
    pub pixel_format: String,
    /// Constant rate factor, lower is better.
    pub crf: u32,
    pub preset: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for VideoEncodingOptions {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            crf: 18,
            preset: None,
            extra_args: Vec::new(),
        }
    }
}

/// One deterministic offline render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobSpec {
    pub output_dir: PathBuf,

    #[serde(default = "default_fps")]
    pub fps: f32,

    /// Seconds of scene time to render.
    #[serde(default = "default_duration")]
    pub duration: f32,

    #[serde(default = "default_export_width")]
    pub width: u32,

    #[serde(default = "default_export_height")]
    pub height: u32,

    #[serde(default)]
    pub aspect_ratio: Option<f32>,

    /// Write `frame_NNNNN.png` files into `output_dir`.
    #[serde(default = "default_true")]
    pub write_frames: bool,

    /// Pipe frames straight into FFmpeg.
    #[serde(default)]
    pub output_video: bool,

    /// Defaults to `{output_dir}/render.mp4`.
    #[serde(default)]
    pub video_path: Option<PathBuf>,

    #[serde(default)]
    pub video: VideoEncodingOptions,

    #[serde(default)]
    pub row_order: RowOrder,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
}

impl ExportJobSpec {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            fps: default_fps(),
            duration: default_duration(),
            width: default_export_width(),
            height: default_export_height(),
            aspect_ratio: None,
            write_frames: true,
            output_video: false,
            video_path: None,
            video: VideoEncodingOptions::default(),
            row_order: RowOrder::default(),
            queue_capacity: default_queue_capacity(),
            shader_dir: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fps > 0.0) {
            return Err(RenderError::Config("FPS must be positive".to_string()));
        }
        if !(self.duration >= 0.0) {
            return Err(RenderError::Config("duration must not be negative".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::Config("width and height must be positive".to_string()));
        }
        if !self.write_frames && !self.output_video {
            return Err(RenderError::Config("nothing to write: enable frames or video".to_string()));
        }
        validate_aspect(self.aspect_ratio)
    }

    pub fn total_frames(&self) -> u64 {
        (self.duration as f64 * self.fps as f64).ceil() as u64
    }

    pub fn effective_video_path(&self) -> PathBuf {
        self.video_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join("render.mp4"))
    }

    /// Renderer settings for this job. Export never drops frames.
    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            width: self.width,
            height: self.height,
            aspect_ratio: self.aspect_ratio,
            queue_capacity: self.queue_capacity,
            overflow_policy: OverflowPolicy::Block,
            present_mode: PresentModePreference::Vsync,
            shader_dir: self.shader_dir.clone(),
        }
    }
}

/// Written as `metadata.json` alongside an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg(not(target_arch = "wasm32"))]
pub struct RenderMetadata {
    pub job: ExportJobSpec,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub render_duration_secs: f64,
    pub frame_count: u64,
    pub average_render_fps: f64,
    /// SHA-256 of the job as JSON.
    pub job_hash: String,
    pub version: String,
    pub gpu_adapter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(not(target_arch = "wasm32"))]
impl RenderMetadata {
    pub fn hash_job(job: &ExportJobSpec) -> Result<String> {
        let json = serde_json::to_vec(job)
            .map_err(|e| RenderError::sink(RenderPhase::MetadataSave, format!("failed to serialize job: {}", e)))?;
        Ok(format!("{:x}", Sha256::digest(&json)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RenderError::sink(RenderPhase::MetadataSave, format!("failed to serialize metadata: {}", e)))?;
        std::fs::write(path, json).map_err(|e| RenderError::io(RenderPhase::MetadataSave, path, e))
    }
}

/// Progress information for export callbacks.
#[derive(Debug, Clone)]
pub struct RenderProgress {
    /// 1-indexed.
    pub current_frame: u64,
    pub total_frames: u64,
    pub elapsed_secs: f64,
    pub eta_secs: Option<f64>,
}

impl RenderProgress {
    pub fn new(current_frame: u64, total_frames: u64, elapsed_secs: f64) -> Self {
        let eta_secs = (current_frame > 0).then(|| {
            let per_frame = elapsed_secs / current_frame as f64;
            per_frame * total_frames.saturating_sub(current_frame) as f64
        });
        Self {
            current_frame,
            total_frames,
            elapsed_secs,
            eta_secs,
        }
    }

    /// 0.0 to 100.0.
    pub fn percentage(&self) -> f64 {
        if self.total_frames == 0 {
            100.0
        } else {
            (self.current_frame as f64 / self.total_frames as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_config_defaults_from_empty_json() {
        let config: RendererConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.present_mode.to_wgpu(), wgpu::PresentMode::Fifo);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_renderer_config_camel_case() {
        let config: RendererConfig =
            serde_json::from_str(r#"{"aspectRatio": 1.7777, "overflowPolicy": "block", "presentMode": "mailbox"}"#)
                .unwrap();
        assert_eq!(config.overflow_policy, OverflowPolicy::Block);
        assert_eq!(config.present_mode, PresentModePreference::Mailbox);
        assert!(config.aspect_ratio.is_some());
    }

    #[test]
    fn test_renderer_config_validation() {
        let config = RendererConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RenderError::Config(_))));

        let config = RendererConfig {
            aspect_ratio: Some(-1.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_surface_request_follows_config() {
        let config = RendererConfig {
            width: 640,
            height: 360,
            present_mode: PresentModePreference::Immediate,
            ..Default::default()
        };
        let request = config.surface_request().unwrap();
        assert_eq!((request.width, request.height), (640, 360));
        assert_eq!(request.present_mode, wgpu::PresentMode::Immediate);

        let invalid = RendererConfig {
            queue_capacity: 0,
            ..config
        };
        assert!(invalid.surface_request().is_err());
    }

    #[test]
    fn test_export_spec_defaults() {
        let spec = ExportJobSpec::new(PathBuf::from("out"));
        assert_eq!(spec.fps, 60.0);
        assert_eq!((spec.width, spec.height), (1920, 1080));
        assert_eq!(spec.total_frames(), 600);
        assert_eq!(spec.effective_video_path(), PathBuf::from("out/render.mp4"));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_export_spec_forces_lossless_queue() {
        let spec = ExportJobSpec::new(PathBuf::from("out"));
        assert_eq!(spec.renderer_config().overflow_policy, OverflowPolicy::Block);
    }

    #[test]
    fn test_export_spec_validation() {
        let mut spec = ExportJobSpec::new(PathBuf::from("out"));
        spec.fps = 0.0;
        assert!(spec.validate().is_err());

        let mut spec = ExportJobSpec::new(PathBuf::from("out"));
        spec.write_frames = false;
        assert!(spec.validate().is_err());
        spec.output_video = true;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_total_frames_rounds_up() {
        let mut spec = ExportJobSpec::new(PathBuf::from("out"));
        spec.fps = 30.0;
        spec.duration = 0.5;
        assert_eq!(spec.total_frames(), 15);
        spec.duration = 0.51;
        assert_eq!(spec.total_frames(), 16);
    }

    #[test]
    fn test_job_hash_is_stable() {
        let spec = ExportJobSpec::new(PathBuf::from("out"));
        let a = RenderMetadata::hash_job(&spec).unwrap();
        let b = RenderMetadata::hash_job(&spec.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_render_progress() {
        let progress = RenderProgress::new(50, 100, 5.0);
        assert_eq!(progress.percentage(), 50.0);
        assert_eq!(progress.eta_secs, Some(5.0));
        assert_eq!(RenderProgress::new(0, 0, 0.0).percentage(), 100.0);
    }
}
