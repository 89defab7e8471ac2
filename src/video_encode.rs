//! FFmpeg integration: raw RGBA frames are piped straight into an encoder
//! process, so no intermediate images are needed on disk.

#![cfg(not(target_arch = "wasm32"))]

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::config::VideoEncodingOptions;
use crate::error::{RenderError, RenderPhase, Result};
use crate::sink::{FrameImage, FrameSink};

#[derive(Debug)]
pub enum FfmpegStatus {
    /// First line of `ffmpeg -version`.
    Available(String),
    NotFound,
    Unknown,
}

pub fn check_ffmpeg() -> FfmpegStatus {
    match Command::new("ffmpeg").arg("-version").output() {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| FfmpegStatus::Available(line.to_string()))
            .unwrap_or(FfmpegStatus::Unknown),
        _ => FfmpegStatus::NotFound,
    }
}

/// Encoder command line for `width`x`height` RGBA frames arriving on stdin.
pub fn ffmpeg_args(width: u32, height: u32, fps: f32, options: &VideoEncodingOptions, output: &Path) -> Vec<OsString> {
    let size = format!("{}x{}", width, height);
    let rate = fps.to_string();
    let mut args: Vec<OsString> = [
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
        size.as_str(),
        "-r",
        rate.as_str(),
        "-i",
        "-",
        "-c:v",
        options.codec.as_str(),
        "-pix_fmt",
        options.pixel_format.as_str(),
    ]
    .iter()
    .map(OsString::from)
    .collect();

    match options.codec.as_str() {
        "libx264" | "libx265" => {
            args.extend(["-crf".into(), options.crf.to_string().into()]);
        }
        "libvpx-vp9" => {
            args.extend(["-crf".into(), options.crf.to_string().into(), "-b:v".into(), "0".into()]);
        }
        _ => {}
    }
    if let Some(preset) = &options.preset {
        args.extend(["-preset".into(), preset.into()]);
    }
    args.extend(options.extra_args.iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// Streams frames into a running `ffmpeg` process.
pub struct FfmpegPipeSink {
    child: Child,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    frames: u64,
}

impl FfmpegPipeSink {
    pub fn spawn(width: u32, height: u32, fps: f32, options: &VideoEncodingOptions, output: &Path) -> Result<Self> {
        match check_ffmpeg() {
            FfmpegStatus::Available(version) => log::info!("Using {}", version),
            FfmpegStatus::Unknown => log::warn!("FFmpeg found but version unknown, proceeding anyway"),
            FfmpegStatus::NotFound => {
                return Err(RenderError::sink(
                    RenderPhase::VideoEncode,
                    "FFmpeg not found. Install FFmpeg and ensure it's in your PATH.",
                ))
            }
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RenderError::io(RenderPhase::VideoEncode, parent, e))?;
        }

        let mut child = Command::new("ffmpeg")
            .args(ffmpeg_args(width, height, fps, options, output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RenderError::io(RenderPhase::VideoEncode, "ffmpeg", e))?;
        let stdin = child.stdin.take();
        Ok(Self {
            child,
            stdin,
            output: output.to_path_buf(),
            frames: 0,
        })
    }

    fn stderr_tail(&mut self) -> String {
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let lines: Vec<&str> = stderr.lines().collect();
        lines[lines.len().saturating_sub(10)..].join("\n")
    }
}

impl FrameSink for FfmpegPipeSink {
    fn write_frame(&mut self, frame: &FrameImage) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RenderError::sink(RenderPhase::VideoEncode, "encoder input already closed"));
        };
        if let Err(e) = stdin.write_all(&frame.top_down_pixels()) {
            // The encoder died; its stderr says why.
            self.stdin = None;
            let _ = self.child.wait();
            let log = self.stderr_tail();
            return Err(RenderError::sink(
                RenderPhase::VideoEncode,
                format!("failed to write frame {} to FFmpeg: {}\n{}", frame.index, e, log),
            ));
        }
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin signals end of stream.
        self.stdin = None;
        let status = self
            .child
            .wait()
            .map_err(|e| RenderError::io(RenderPhase::VideoEncode, "ffmpeg", e))?;
        if !status.success() {
            let log = self.stderr_tail();
            return Err(RenderError::sink(
                RenderPhase::VideoEncode,
                format!("FFmpeg encoding failed ({}):\n{}", status, log),
            ));
        }
        log::info!("Encoded {} frames to {:?}", self.frames, self.output);
        Ok(())
    }
}
