//! Error types for the frame composition pipeline.

use std::path::PathBuf;

/// Pipeline phase, used to give errors a little context in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Initialization,
    GpuSetup,
    ShaderLoading,
    FrameRender,
    Readback,
    FrameSave,
    VideoEncode,
    MetadataSave,
}

impl std::fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderPhase::Initialization => write!(f, "Initialization"),
            RenderPhase::GpuSetup => write!(f, "GPU Setup"),
            RenderPhase::ShaderLoading => write!(f, "Shader Loading"),
            RenderPhase::FrameRender => write!(f, "Frame Render"),
            RenderPhase::Readback => write!(f, "Readback"),
            RenderPhase::FrameSave => write!(f, "Frame Save"),
            RenderPhase::VideoEncode => write!(f, "Video Encode"),
            RenderPhase::MetadataSave => write!(f, "Metadata Save"),
        }
    }
}

/// Errors raised by the renderer and its export sinks.
///
/// Contract violations between producer and consumer (for example a draw item
/// referencing a handle that was never registered) are not represented here:
/// they panic.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to request GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("shader resource '{0}' not found")]
    ShaderNotFound(String),

    #[error("shader '{name}' failed to compile:\n{log}")]
    ShaderCompilation { name: String, log: String },

    #[error("pipeline creation failed for '{label}':\n{log}")]
    PipelineCreation { label: String, log: String },

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("[{phase}] I/O error on {path:?}: {source}")]
    Io {
        phase: RenderPhase,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{phase}] {message}")]
    Sink { phase: RenderPhase, message: String },
}

impl RenderError {
    /// Wrap an I/O error with the phase and path it happened on.
    pub fn io(phase: RenderPhase, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            phase,
            path: path.into(),
            source,
        }
    }

    /// Create a sink error (frame writing, video encoding, metadata).
    pub fn sink(phase: RenderPhase, message: impl Into<String>) -> Self {
        Self::Sink {
            phase,
            message: message.into(),
        }
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_display_includes_phase() {
        let err = RenderError::sink(RenderPhase::VideoEncode, "ffmpeg exited with 1");
        assert_eq!(err.to_string(), "[Video Encode] ffmpeg exited with 1");
    }

    #[test]
    fn test_shader_error_display_includes_log() {
        let err = RenderError::ShaderCompilation {
            name: "scene".to_string(),
            log: "error: unknown identifier".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("scene"));
        assert!(text.contains("unknown identifier"));
    }
}
