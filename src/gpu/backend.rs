//! wgpu implementation of [`FrameBackend`].
//!
//! One backend owns the scene renderer, the post chain and the presenter, and
//! writes either to a window surface or to an offscreen texture that is read
//! back into a [`FrameSink`].

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::gpu::context::GpuContext;
use crate::gpu::font_atlas::AtlasLayout;
use crate::gpu::fullscreen::RenderTarget;
use crate::gpu::post_processor::{PostProcessor, PostReport};
use crate::gpu::presenter::{Presenter, Readback};
use crate::gpu::scene_renderer::SceneRenderer;
use crate::gpu::shaders::ShaderProvider;
use crate::pipeline::{FrameBackend, FrameContext, FrameReport, RenderResources};
use crate::sink::{FrameImage, FrameSink, RowOrder};

/// Format of the offscreen destination. PNG and raw video expect sRGB bytes.
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

pub enum Destination {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        target: RenderTarget,
        readback: Readback,
        sink: Box<dyn FrameSink>,
        row_order: RowOrder,
    },
}

impl Destination {
    fn format(&self) -> wgpu::TextureFormat {
        match self {
            Destination::Surface { config, .. } => config.format,
            Destination::Offscreen { .. } => OFFSCREEN_FORMAT,
        }
    }
}

fn create_offscreen(device: &wgpu::Device, width: u32, height: u32) -> (RenderTarget, Readback) {
    let target = RenderTarget::new(
        device,
        "Offscreen Destination",
        width,
        height,
        OFFSCREEN_FORMAT,
        wgpu::TextureUsages::COPY_SRC,
    );
    let readback = Readback::new(device, target.width, target.height);
    (target, readback)
}

pub struct WgpuBackend {
    ctx: GpuContext,
    scene: SceneRenderer,
    post: PostProcessor,
    presenter: Presenter,
    destination: Destination,
    size: (u32, u32),
    last_post: Option<PostReport>,
}

impl WgpuBackend {
    /// Backend presenting to a window surface created from `ctx.instance`.
    pub fn new_surface(
        ctx: GpuContext,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
        present_mode: wgpu::PresentMode,
        shaders: &dyn ShaderProvider,
    ) -> Result<Self> {
        let caps = surface.get_capabilities(&ctx.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::Config("surface reports no supported formats".to_string()))?;
        let present_mode = if caps.present_modes.contains(&present_mode) {
            present_mode
        } else {
            log::warn!("Present mode {:?} unsupported, falling back to Fifo", present_mode);
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        if width > 0 && height > 0 {
            surface.configure(&ctx.device, &config);
        }
        log::info!("Surface configured: {}x{} {:?} {:?}", width, height, format, present_mode);

        Self::with_destination(ctx, Destination::Surface { surface, config }, (width, height), shaders)
    }

    /// Surface backend sized and paced by `config`, using its shader overrides.
    pub fn from_config(ctx: GpuContext, surface: wgpu::Surface<'static>, config: &RendererConfig) -> Result<Self> {
        let request = config.surface_request()?;
        let shaders = config.shader_provider();
        Self::new_surface(
            ctx,
            surface,
            request.width,
            request.height,
            request.present_mode,
            shaders.as_ref(),
        )
    }

    /// Backend rendering into an offscreen texture read back after every frame.
    pub fn new_offscreen(
        ctx: GpuContext,
        width: u32,
        height: u32,
        sink: Box<dyn FrameSink>,
        row_order: RowOrder,
        shaders: &dyn ShaderProvider,
    ) -> Result<Self> {
        let (target, readback) = create_offscreen(&ctx.device, width, height);
        let destination = Destination::Offscreen {
            target,
            readback,
            sink,
            row_order,
        };
        Self::with_destination(ctx, destination, (width, height), shaders)
    }

    fn with_destination(
        ctx: GpuContext,
        destination: Destination,
        size: (u32, u32),
        shaders: &dyn ShaderProvider,
    ) -> Result<Self> {
        let scene = SceneRenderer::new(&ctx, shaders)?;
        let post = PostProcessor::new(&ctx.device, shaders, size.0, size.1)?;
        let presenter = Presenter::new(&ctx.device, shaders)?;
        Ok(Self {
            ctx,
            scene,
            post,
            presenter,
            destination,
            size,
            last_post: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn post_processor(&self) -> &PostProcessor {
        &self.post
    }

    /// Passes run by the most recent rendered frame.
    pub fn last_post_report(&self) -> Option<PostReport> {
        self.last_post
    }

    /// Flush the offscreen sink. Does nothing for a surface.
    pub fn finish_sink(&mut self) -> Result<()> {
        match &mut self.destination {
            Destination::Offscreen { sink, .. } => sink.finish(),
            Destination::Surface { .. } => Ok(()),
        }
    }

    fn reconfigure(&self) {
        if let Destination::Surface { surface, config } = &self.destination {
            if config.width > 0 && config.height > 0 {
                surface.configure(&self.ctx.device, config);
            }
        }
    }
}

impl FrameBackend for WgpuBackend {
    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.size == (width, height) {
            return;
        }
        self.size = (width, height);
        match &mut self.destination {
            Destination::Surface { config, .. } => {
                config.width = width;
                config.height = height;
            }
            Destination::Offscreen { target, readback, .. } => {
                target.destroy();
                (*target, *readback) = create_offscreen(&self.ctx.device, width, height);
            }
        }
        self.reconfigure();
    }

    fn prepare(&mut self, resources: &RenderResources) -> Result<&AtlasLayout> {
        self.scene.sync_resources(&self.ctx.device, &self.ctx.queue, resources);
        Ok(self.scene.atlas_layout())
    }

    fn render(&mut self, frame: &FrameContext<'_>) -> Result<FrameReport> {
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;
        let viewport = frame.viewport;
        self.post.resize(device, viewport.width, viewport.height);

        let surface_texture = match &self.destination {
            Destination::Surface { surface, .. } => match surface.get_current_texture() {
                Ok(texture) => Some(texture),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("Surface lost or outdated, reconfiguring and skipping frame {}", frame.frame_index);
                    self.reconfigure();
                    return Ok(FrameReport::default());
                }
                Err(e) => return Err(e.into()),
            },
            Destination::Offscreen { .. } => None,
        };
        let surface_view = surface_texture
            .as_ref()
            .map(|t| t.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        let draws = self.scene.render(
            device,
            queue,
            &mut encoder,
            self.post.scene_target(),
            frame.list,
            frame.batch,
        );
        let post = self.post.run(device, queue, &mut encoder, &frame.list.post_processing);
        self.last_post = Some(post);

        let format = self.destination.format();
        let destination_view = match (&surface_view, &self.destination) {
            (Some(view), _) => view,
            (None, Destination::Offscreen { target, .. }) => &target.view,
            (None, Destination::Surface { .. }) => return Ok(FrameReport::default()),
        };
        self.presenter.present(
            device,
            &mut encoder,
            &self.post.target(post.output).view,
            destination_view,
            format,
            viewport,
        )?;

        if let Destination::Offscreen { target, readback, .. } = &self.destination {
            readback.copy_from(&mut encoder, &target.texture);
        }
        queue.submit(std::iter::once(encoder.finish()));

        match &mut self.destination {
            Destination::Offscreen {
                readback,
                sink,
                row_order,
                ..
            } => {
                let pixels = readback.read(device, *row_order)?;
                let (width, height) = readback.size();
                sink.write_frame(&FrameImage {
                    index: frame.frame_index,
                    time: frame.list.time,
                    width,
                    height,
                    row_order: *row_order,
                    pixels,
                })?;
            }
            Destination::Surface { .. } => {
                if let Some(texture) = surface_texture {
                    texture.present();
                }
            }
        }

        Ok(FrameReport {
            presented: true,
            bloom_applied: post.bloom_applied,
            uber_applied: post.uber_applied,
            draws,
        })
    }
}
