use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::ExportJobSpec;
use crate::demo::DemoScene;
use crate::export::run_export;
use crate::gpu::context::GpuContext;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the demo scene to disk
    Render {
        /// Output directory for frames and metadata
        #[arg(long)]
        out: PathBuf,

        /// Export job JSON; flags below override its fields
        #[arg(long)]
        job: Option<PathBuf>,

        /// Frames per second
        #[arg(long)]
        fps: Option<f32>,

        /// Duration in seconds
        #[arg(long)]
        duration: Option<f32>,

        /// Output width
        #[arg(long)]
        width: Option<u32>,

        /// Output height
        #[arg(long)]
        height: Option<u32>,

        /// Content aspect ratio (width / height); letterboxed into the output
        #[arg(long)]
        aspect: Option<f32>,

        /// Encode a video with FFmpeg
        #[arg(long)]
        video: bool,

        /// Video output path (defaults to OUT/render.mp4)
        #[arg(long)]
        video_path: Option<PathBuf>,

        /// Skip writing PNG frames
        #[arg(long)]
        no_frames: bool,

        /// Directory with WGSL overrides
        #[arg(long)]
        shader_dir: Option<PathBuf>,
    },
    /// Print the GPU adapter that would be used
    Info,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            out,
            job,
            fps,
            duration,
            width,
            height,
            aspect,
            video,
            video_path,
            no_frames,
            shader_dir,
        } => {
            let mut spec = match job {
                Some(path) => load_job(&path)?,
                None => ExportJobSpec::new(out.clone()),
            };
            spec.output_dir = out;
            if let Some(fps) = fps {
                spec.fps = fps;
            }
            if let Some(duration) = duration {
                spec.duration = duration;
            }
            if let Some(width) = width {
                spec.width = width;
            }
            if let Some(height) = height {
                spec.height = height;
            }
            if aspect.is_some() {
                spec.aspect_ratio = aspect;
            }
            if video {
                spec.output_video = true;
            }
            if video_path.is_some() {
                spec.video_path = video_path;
            }
            if no_frames {
                spec.write_frames = false;
            }
            if shader_dir.is_some() {
                spec.shader_dir = shader_dir;
            }
            render(&spec)
        }
        Commands::Info => {
            let ctx = GpuContext::headless()?;
            println!("Adapter: {}", ctx.adapter_name());
            println!("Draw submission: {:?}", ctx.submission);
            Ok(())
        }
    }
}

fn load_job(path: &Path) -> Result<ExportJobSpec> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read job file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse job file {:?}", path))
}

fn render(spec: &ExportJobSpec) -> Result<()> {
    println!("Rendering {} frames to {:?}...", spec.total_frames(), spec.output_dir);
    let fps = spec.fps.max(1.0) as u64;
    let metadata = run_export(spec, DemoScene::new, |progress| {
        if progress.current_frame % fps == 0 {
            print!("\r{:5.1}%", progress.percentage());
            let _ = std::io::stdout().flush();
        }
    })?;
    println!(
        "\rDone: {} frames in {:.1}s on {}",
        metadata.frame_count, metadata.render_duration_secs, metadata.gpu_adapter
    );
    Ok(())
}
