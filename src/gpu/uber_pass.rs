//! Fused single-pass effects: hue shift, lens distortion, chromatic
//! aberration, vignette, gradient overlay and glitch.

use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::gpu::fullscreen::{
    create_fullscreen_pipeline, create_linear_sampler, create_quad_buffer, draw_fullscreen,
    sampler_entry, texture_entry, uniform_entry, HDR_FORMAT,
};
use crate::gpu::shaders::{compile_shader, ShaderProvider, UBER_SHADER};
use crate::post_processing::PostProcessingData;

/// Matches `UberUniforms` in `shader_post_uber.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct UberUniforms {
    resolution: [f32; 2],
    time: f32,
    hue_shift: f32,
    lens: [f32; 4],
    vignette_color: [f32; 4],
    vignette_shape: [f32; 4],
    gradient_color1: [f32; 4],
    gradient_color2: [f32; 4],
    gradient: [f32; 4],
    glitch: [f32; 4],
    gradient_mode: u32,
    vignette_rounded: u32,
    _padding: [u32; 2],
}

impl UberUniforms {
    fn new(post: &PostProcessingData, size: (u32, u32)) -> Self {
        let lens = &post.lens_distortion;
        let vignette = &post.vignette;
        let gradient = &post.gradient;
        let glitch = &post.glitch;
        Self {
            resolution: [size.0.max(1) as f32, size.1.max(1) as f32],
            time: post.time,
            hue_shift: post.hue_shift.to_radians(),
            lens: [lens.intensity, lens.center[0], lens.center[1], post.chromatic_aberration],
            vignette_color: [vignette.color[0], vignette.color[1], vignette.color[2], vignette.intensity],
            vignette_shape: [vignette.center[0], vignette.center[1], vignette.roundness, vignette.smoothness],
            gradient_color1: gradient.color1,
            gradient_color2: gradient.color2,
            gradient: [gradient.intensity, gradient.rotation, 0.0, 0.0],
            glitch: [glitch.intensity, glitch.speed, glitch.size, 0.0],
            gradient_mode: gradient.mode as u32,
            vignette_rounded: vignette.rounded as u32,
            _padding: [0; 2],
        }
    }
}

pub struct UberPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    quad_vertex_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

impl UberPass {
    pub fn new(device: &wgpu::Device, shaders: &dyn ShaderProvider) -> Result<Self> {
        let shader = compile_shader(device, shaders, UBER_SHADER)?;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Uber Layout"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2)],
        });
        let pipeline = create_fullscreen_pipeline(
            device,
            "Uber Pipeline",
            &shader,
            "fs_main",
            &[&bind_group_layout],
            HDR_FORMAT,
        )?;
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uber Uniform Buffer"),
            size: std::mem::size_of::<UberUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
            quad_vertex_buffer: create_quad_buffer(device, "Uber Quad Buffer"),
            sampler: create_linear_sampler(device, "Uber Sampler"),
        })
    }

    /// Run the fused pass from `input` into `output`. Returns false, recording
    /// nothing, when every effect is at identity.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
        size: (u32, u32),
        post: &PostProcessingData,
    ) -> bool {
        if !post.uber_active() {
            return false;
        }

        let uniforms = UberUniforms::new(post, size);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uber Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        draw_fullscreen(encoder, "Uber Pass", output, &self.pipeline, &[&bind_group], &self.quad_vertex_buffer);
        true
    }
}
