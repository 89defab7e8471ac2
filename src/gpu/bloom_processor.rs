//! Mip-chain bloom processor.
//!
//! 1. Prefilter - soft-knee threshold while downsampling the input into mip 0
//! 2. Downsample - 13-tap filter down the chain
//! 3. Upsample - tent filter back up, blending each level with its downsample by `scatter`
//! 4. Combine - input + bloom * intensity into the output target
//!
//! Every pass has its own uniform buffer: all passes are recorded into one
//! encoder, so a shared buffer would only hold the last write by submit time.

use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::gpu::fullscreen::{
    create_fullscreen_pipeline, create_linear_sampler, create_quad_buffer, draw_fullscreen,
    sampler_entry, texture_entry, uniform_entry, RenderTarget, HDR_FORMAT,
};
use crate::gpu::shaders::{compile_shader, ShaderProvider, BLOOM_SHADER};
use crate::post_processing::BloomSettings;

/// Upper bound on the chain length.
pub const MAX_BLOOM_MIPS: u32 = 16;

/// `clamp(floor(log2(max(w, h))), 1, 16)`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    (u32::BITS - 1 - largest.leading_zeros()).clamp(1, MAX_BLOOM_MIPS)
}

/// Size of mip `level`: the input halved `level + 1` times, never below 1.
pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> (level + 1)).max(1), (height >> (level + 1)).max(1))
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct BloomUniforms {
    texel_size: [f32; 2],
    scatter: f32,
    intensity: f32,
    curve: [f32; 4],
}

impl BloomUniforms {
    fn new(settings: &BloomSettings, source_size: (u32, u32)) -> Self {
        let [a, b, c] = settings.knee_curve();
        Self {
            texel_size: [1.0 / source_size.0 as f32, 1.0 / source_size.1 as f32],
            scatter: settings.scatter(),
            intensity: settings.intensity,
            curve: [a, b, c, settings.threshold.max(0.0)],
        }
    }
}

/// One level of the pyramid.
pub struct BloomMip {
    pub down: RenderTarget,
    /// Absent on the smallest level, whose downsample seeds the upsample chain.
    pub up: Option<RenderTarget>,
    pub size: (u32, u32),
    down_uniforms: wgpu::Buffer,
    up_uniforms: wgpu::Buffer,
    /// Level 0 reads the frame input and binds it per frame instead.
    down_bind_group: Option<wgpu::BindGroup>,
    up_bind_group: Option<wgpu::BindGroup>,
}

struct MipChain {
    input_size: (u32, u32),
    mips: Vec<BloomMip>,
}

impl MipChain {
    fn destroy(&self) {
        for mip in &self.mips {
            mip.down.destroy();
            if let Some(up) = &mip.up {
                up.destroy();
            }
        }
    }

    /// Final bloom texture: the top of the upsample chain.
    fn result(&self) -> &wgpu::TextureView {
        let first = &self.mips[0];
        first.up.as_ref().map_or(&first.down.view, |up| &up.view)
    }
}

pub struct BloomProcessor {
    prefilter_pipeline: wgpu::RenderPipeline,
    downsample_pipeline: wgpu::RenderPipeline,
    upsample_pipeline: wgpu::RenderPipeline,
    combine_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    combine_uniforms: wgpu::Buffer,
    quad_vertex_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    chain: Option<MipChain>,
    allocations: u64,
}

impl BloomProcessor {
    pub fn new(device: &wgpu::Device, shaders: &dyn ShaderProvider) -> Result<Self> {
        let shader = compile_shader(device, shaders, BLOOM_SHADER)?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Layout"),
            entries: &[texture_entry(0), texture_entry(1), sampler_entry(2), uniform_entry(3)],
        });

        let pipeline = |label: &str, entry: &str| {
            create_fullscreen_pipeline(device, label, &shader, entry, &[&bind_group_layout], HDR_FORMAT)
        };
        let prefilter_pipeline = pipeline("Bloom Prefilter Pipeline", "fs_prefilter")?;
        let downsample_pipeline = pipeline("Bloom Downsample Pipeline", "fs_downsample")?;
        let upsample_pipeline = pipeline("Bloom Upsample Pipeline", "fs_upsample")?;
        let combine_pipeline = pipeline("Bloom Combine Pipeline", "fs_combine")?;

        Ok(Self {
            prefilter_pipeline,
            downsample_pipeline,
            upsample_pipeline,
            combine_pipeline,
            combine_uniforms: create_uniform_buffer(device, "Bloom Combine Uniforms"),
            bind_group_layout,
            quad_vertex_buffer: create_quad_buffer(device, "Bloom Quad Buffer"),
            sampler: create_linear_sampler(device, "Bloom Sampler"),
            chain: None,
            allocations: 0,
        })
    }

    /// Number of levels in the current chain, 0 before the first active frame.
    pub fn mip_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |c| c.mips.len())
    }

    /// How many times a mip chain has been built.
    pub fn chain_allocations(&self) -> u64 {
        self.allocations
    }

    fn bind_group(&self, device: &wgpu::Device, label: &str, source: &wgpu::TextureView, base: &wgpu::TextureView, uniforms: &wgpu::Buffer) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(base),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniforms.as_entire_binding(),
                },
            ],
        })
    }

    /// Reallocate the pyramid if the input size changed. The old chain is
    /// destroyed before the new one is created.
    fn ensure_chain(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.chain.as_ref().is_some_and(|c| c.input_size == (width, height)) {
            return;
        }
        if let Some(old) = self.chain.take() {
            old.destroy();
        }

        let count = mip_level_count(width, height);
        log::debug!("Allocating {} bloom mips for {}x{}", count, width, height);

        let mut mips: Vec<BloomMip> = (0..count)
            .map(|level| {
                let size = mip_size(width, height, level);
                let down = RenderTarget::new(device, "Bloom Down", size.0, size.1, HDR_FORMAT, wgpu::TextureUsages::empty());
                let up = (level + 1 < count).then(|| {
                    RenderTarget::new(device, "Bloom Up", size.0, size.1, HDR_FORMAT, wgpu::TextureUsages::empty())
                });
                BloomMip {
                    down,
                    up,
                    size,
                    down_uniforms: create_uniform_buffer(device, "Bloom Down Uniforms"),
                    up_uniforms: create_uniform_buffer(device, "Bloom Up Uniforms"),
                    down_bind_group: None,
                    up_bind_group: None,
                }
            })
            .collect();

        let last = mips.len() - 1;
        for level in 0..mips.len() {
            if level > 0 {
                let source = &mips[level - 1].down.view;
                let group = self.bind_group(device, "Bloom Down Bind Group", source, source, &mips[level].down_uniforms);
                mips[level].down_bind_group = Some(group);
            }
            if level < last {
                let next = &mips[level + 1];
                let source = next.up.as_ref().map_or(&next.down.view, |up| &up.view);
                let group = self.bind_group(device, "Bloom Up Bind Group", source, &mips[level].down.view, &mips[level].up_uniforms);
                mips[level].up_bind_group = Some(group);
            }
        }

        self.chain = Some(MipChain {
            input_size: (width, height),
            mips,
        });
        self.allocations += 1;
    }

    /// Apply bloom from `input` into `output`. Returns false, recording
    /// nothing, when bloom is inactive.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
        size: (u32, u32),
        settings: &BloomSettings,
    ) -> bool {
        if !settings.is_active() {
            return false;
        }
        self.ensure_chain(device, size.0, size.1);
        let Some(chain) = self.chain.as_ref() else {
            return false;
        };

        let mut source_size = size;
        for mip in &chain.mips {
            queue.write_buffer(&mip.down_uniforms, 0, bytemuck::bytes_of(&BloomUniforms::new(settings, source_size)));
            source_size = mip.size;
        }
        for pair in chain.mips.windows(2) {
            queue.write_buffer(&pair[0].up_uniforms, 0, bytemuck::bytes_of(&BloomUniforms::new(settings, pair[1].size)));
        }
        queue.write_buffer(&self.combine_uniforms, 0, bytemuck::bytes_of(&BloomUniforms::new(settings, size)));

        let prefilter = self.bind_group(device, "Bloom Prefilter Bind Group", input, input, &chain.mips[0].down_uniforms);
        draw_fullscreen(encoder, "Bloom Prefilter Pass", &chain.mips[0].down.view, &self.prefilter_pipeline, &[&prefilter], &self.quad_vertex_buffer);

        for mip in &chain.mips[1..] {
            if let Some(group) = &mip.down_bind_group {
                draw_fullscreen(encoder, "Bloom Downsample Pass", &mip.down.view, &self.downsample_pipeline, &[group], &self.quad_vertex_buffer);
            }
        }

        for mip in chain.mips.iter().rev() {
            if let (Some(up), Some(group)) = (&mip.up, &mip.up_bind_group) {
                draw_fullscreen(encoder, "Bloom Upsample Pass", &up.view, &self.upsample_pipeline, &[group], &self.quad_vertex_buffer);
            }
        }

        let combine = self.bind_group(device, "Bloom Combine Bind Group", input, chain.result(), &self.combine_uniforms);
        draw_fullscreen(encoder, "Bloom Combine Pass", output, &self.combine_pipeline, &[&combine], &self.quad_vertex_buffer);
        true
    }
}

fn create_uniform_buffer(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<BloomUniforms>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
