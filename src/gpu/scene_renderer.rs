//! Scene pass: uploads an assembled batch and records the opaque and
//! transparent draws into the HDR scene target.

use crate::batch::{AssembledBatch, DrawIndexedCommand};
use crate::draw_list::{DrawList, RenderType};
use crate::error::Result;
use crate::gpu::buffer::DynamicBuffer;
use crate::gpu::context::{DrawSubmission, GpuContext};
use crate::gpu::font_atlas::{AtlasLayout, FontAtlas};
use crate::gpu::fullscreen::{RenderTarget, HDR_FORMAT};
use crate::gpu::mesh::{GpuMeshStore, Vertex};
use crate::gpu::shaders::{compile_shader, create_render_pipeline_checked, ShaderProvider, SCENE_SHADER};
use crate::pipeline::RenderResources;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const COMMAND_STRIDE: u64 = std::mem::size_of::<DrawIndexedCommand>() as u64;

struct DepthTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl DepthTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Scene Depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            size: (width, height),
        }
    }
}

pub struct SceneRenderer {
    opaque_pipeline: wgpu::RenderPipeline,
    transparent_mesh_pipeline: wgpu::RenderPipeline,
    transparent_text_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// Dropped whenever a bound buffer or the atlas is replaced.
    bind_group: Option<wgpu::BindGroup>,
    commands: DynamicBuffer,
    params: DynamicBuffer,
    glyphs: DynamicBuffer,
    meshes: GpuMeshStore,
    atlas: FontAtlas,
    sampler: wgpu::Sampler,
    depth: DepthTarget,
    submission: DrawSubmission,
}

impl SceneRenderer {
    pub fn new(ctx: &GpuContext, shaders: &dyn ShaderProvider) -> Result<Self> {
        let device = &ctx.device;
        let shader = compile_shader(device, shaders, SCENE_SHADER)?;

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Bind Group Layout"),
            entries: &[
                storage_entry(0),
                storage_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let opaque_pipeline = create_scene_pipeline(
            device,
            "Opaque Mesh Pipeline",
            &layout,
            &shader,
            ("vs_mesh", "fs_mesh"),
            true,
            None,
        )?;
        let transparent_mesh_pipeline = create_scene_pipeline(
            device,
            "Transparent Mesh Pipeline",
            &layout,
            &shader,
            ("vs_mesh", "fs_mesh"),
            false,
            Some(wgpu::BlendState::ALPHA_BLENDING),
        )?;
        let transparent_text_pipeline = create_scene_pipeline(
            device,
            "Transparent Text Pipeline",
            &layout,
            &shader,
            ("vs_text", "fs_text"),
            false,
            Some(wgpu::BlendState::ALPHA_BLENDING),
        )?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Font Atlas Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            opaque_pipeline,
            transparent_mesh_pipeline,
            transparent_text_pipeline,
            bind_group_layout,
            bind_group: None,
            commands: DynamicBuffer::new(device, "Draw Command Buffer", wgpu::BufferUsages::INDIRECT),
            params: DynamicBuffer::new(device, "Draw Params Buffer", wgpu::BufferUsages::STORAGE),
            glyphs: DynamicBuffer::new(device, "Glyph Buffer", wgpu::BufferUsages::STORAGE),
            meshes: GpuMeshStore::new(device),
            atlas: FontAtlas::new(device, &ctx.queue),
            sampler,
            depth: DepthTarget::new(device, 1, 1),
            submission: ctx.submission,
        })
    }

    /// Upload meshes and fonts registered since the previous frame.
    pub fn sync_resources(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, resources: &RenderResources) {
        self.meshes.sync(device, queue, resources.meshes());
        if self.atlas.sync(device, queue, resources.fonts()) {
            self.bind_group = None;
        }
    }

    pub fn atlas_layout(&self) -> &AtlasLayout {
        self.atlas.layout()
    }

    fn ensure_depth(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.depth.size != (width, height) {
            self.depth.texture.destroy();
            self.depth = DepthTarget::new(device, width, height);
        }
    }

    /// Record the scene pass into `target`. Returns the number of draw commands issued.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &RenderTarget,
        list: &DrawList,
        batch: &AssembledBatch,
    ) -> usize {
        if !batch.is_empty() {
            self.commands.upload(device, queue, batch.commands.as_bytes());
            let params_moved = self.params.upload(device, queue, batch.params.as_bytes());
            let glyphs_moved = self.glyphs.upload(device, queue, batch.glyphs.as_bytes());
            if params_moved || glyphs_moved {
                self.bind_group = None;
            }
            if self.bind_group.is_none() {
                self.bind_group = Some(self.create_bind_group(device));
            }
        }

        self.ensure_depth(device, target.width, target.height);
        let clear = list.clear_color;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Scene Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: clear[0] as f64,
                        g: clear[1] as f64,
                        b: clear[2] as f64,
                        a: clear[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // An empty batch still clears the target.
        if batch.is_empty() {
            return 0;
        }
        let Some(bind_group) = self.bind_group.as_ref() else {
            return 0;
        };

        pass.set_bind_group(0, bind_group, &[]);
        pass.set_vertex_buffer(0, self.meshes.vertex_buffer().slice(..));
        pass.set_index_buffer(self.meshes.index_buffer().slice(..), wgpu::IndexFormat::Uint32);

        let commands = batch.commands.as_slice();
        if batch.opaque_count() > 0 {
            pass.set_pipeline(&self.opaque_pipeline);
            self.draw_range(&mut pass, commands, batch.opaque.start, batch.opaque.end);
        }
        for run in &batch.transparent {
            pass.set_pipeline(match run.render_type {
                RenderType::Mesh => &self.transparent_mesh_pipeline,
                RenderType::Text => &self.transparent_text_pipeline,
            });
            self.draw_range(&mut pass, commands, run.commands.start, run.commands.end);
        }

        commands.len()
    }

    fn draw_range(&self, pass: &mut wgpu::RenderPass<'_>, commands: &[DrawIndexedCommand], start: u32, end: u32) {
        let indirect = self.commands.buffer();
        match self.submission {
            DrawSubmission::MultiDrawIndirect => {
                pass.multi_draw_indexed_indirect(indirect, start as u64 * COMMAND_STRIDE, end - start);
            }
            DrawSubmission::Indirect => {
                for i in start..end {
                    pass.draw_indexed_indirect(indirect, i as u64 * COMMAND_STRIDE);
                }
            }
            DrawSubmission::Direct => {
                for c in &commands[start as usize..end as usize] {
                    pass.draw_indexed(
                        c.first_index..c.first_index + c.index_count,
                        c.base_vertex,
                        c.first_instance..c.first_instance + c.instance_count,
                    );
                }
            }
        }
    }

    fn create_bind_group(&self, device: &wgpu::Device) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.glyphs.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(self.atlas.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

fn create_scene_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    (vertex_entry, fragment_entry): (&str, &str),
    depth_write: bool,
    blend: Option<wgpu::BlendState>,
) -> Result<wgpu::RenderPipeline> {
    create_render_pipeline_checked(
        device,
        &wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some(vertex_entry),
                buffers: &[Vertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some(fragment_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: HDR_FORMAT,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // Item transforms may mirror geometry.
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: depth_write,
                // Later items carry larger depth values and win ties.
                depth_compare: wgpu::CompareFunction::GreaterEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        },
    )
}
