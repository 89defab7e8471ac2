//! Mesh vertex format and lazy upload of the mesh registry.
//!
//! All registered meshes share one vertex buffer and one index buffer. The
//! registry is append-only, so keeping the GPU copy current only ever means
//! uploading the tail that was registered since the last frame.

use bytemuck::{Pod, Zeroable};

use crate::gpu::buffer::DynamicBuffer;
use crate::registry::MeshRegistry;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
}

impl Vertex {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { position: [x, y] }
    }

    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            }],
        }
    }
}

/// Unit quad spanning [0, 1]², used to draw glyphs.
pub fn create_unit_quad() -> (Vec<Vertex>, Vec<u32>) {
    let vertices = vec![
        Vertex::new(0.0, 0.0),
        Vertex::new(1.0, 0.0),
        Vertex::new(1.0, 1.0),
        Vertex::new(0.0, 1.0),
    ];
    let indices = vec![0, 1, 2, 2, 3, 0];
    (vertices, indices)
}

/// GPU mirror of the mesh registry.
pub struct GpuMeshStore {
    vertex_buffer: DynamicBuffer,
    index_buffer: DynamicBuffer,
    uploaded_vertices: usize,
    uploaded_indices: usize,
}

impl GpuMeshStore {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            vertex_buffer: DynamicBuffer::new(
                device,
                "Mesh Vertex Buffer",
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            ),
            index_buffer: DynamicBuffer::new(
                device,
                "Mesh Index Buffer",
                wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            ),
            uploaded_vertices: 0,
            uploaded_indices: 0,
        }
    }

    /// Upload everything registered since the previous call.
    pub fn sync(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, registry: &MeshRegistry) {
        registry.with_data(|vertices, indices| {
            if vertices.len() > self.uploaded_vertices {
                let uploaded = (self.uploaded_vertices * std::mem::size_of::<Vertex>()) as u64;
                self.vertex_buffer
                    .upload_tail(device, queue, vertices.as_bytes(), uploaded);
                log::debug!(
                    "Uploaded {} new mesh vertices",
                    vertices.len() - self.uploaded_vertices
                );
                self.uploaded_vertices = vertices.len();
            }
            if indices.len() > self.uploaded_indices {
                let uploaded = (self.uploaded_indices * std::mem::size_of::<u32>()) as u64;
                self.index_buffer
                    .upload_tail(device, queue, indices.as_bytes(), uploaded);
                self.uploaded_indices = indices.len();
            }
        });
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        self.vertex_buffer.buffer()
    }

    pub fn index_buffer(&self) -> &wgpu::Buffer {
        self.index_buffer.buffer()
    }
}
