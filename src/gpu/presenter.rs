//! Final blit into the destination and CPU readback for offline export.

use std::collections::HashMap;

use crate::error::{RenderError, Result};
use crate::gpu::fullscreen::{
    create_fullscreen_pipeline, create_linear_sampler, create_quad_buffer, sampler_entry, texture_entry,
};
use crate::gpu::shaders::{compile_shader, ShaderProvider, BLIT_SHADER};
use crate::sink::RowOrder;
use crate::viewport::Viewport;

const BYTES_PER_PIXEL: u32 = 4;

/// Row pitch of a texture-to-buffer copy, padded to the copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strip row padding from a top-down readback and arrange rows in `order`.
pub fn unpad_rows(data: &[u8], width: u32, height: u32, padded_row: u32, order: RowOrder) -> Vec<u8> {
    let row_len = (width * BYTES_PER_PIXEL) as usize;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    let copy_row = |pixels: &mut Vec<u8>, row: u32| {
        let start = (row * padded_row) as usize;
        pixels.extend_from_slice(&data[start..start + row_len]);
    };
    match order {
        RowOrder::TopDown => (0..height).for_each(|row| copy_row(&mut pixels, row)),
        RowOrder::BottomUp => (0..height).rev().for_each(|row| copy_row(&mut pixels, row)),
    }
    pixels
}

pub struct Presenter {
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    /// One blit pipeline per destination format, created on first use.
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    quad_vertex_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

impl Presenter {
    pub fn new(device: &wgpu::Device, shaders: &dyn ShaderProvider) -> Result<Self> {
        let shader = compile_shader(device, shaders, BLIT_SHADER)?;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });
        Ok(Self {
            shader,
            bind_group_layout,
            pipelines: HashMap::new(),
            quad_vertex_buffer: create_quad_buffer(device, "Blit Quad Buffer"),
            sampler: create_linear_sampler(device, "Blit Sampler"),
        })
    }

    /// Clear `target` to black and draw `source` into `viewport`.
    pub fn present(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        viewport: Viewport,
    ) -> Result<()> {
        if !self.pipelines.contains_key(&format) {
            let pipeline = create_fullscreen_pipeline(
                device,
                "Blit Pipeline",
                &self.shader,
                "fs_main",
                &[&self.bind_group_layout],
                format,
            )?;
            log::debug!("Created blit pipeline for {:?}", format);
            self.pipelines.insert(format, pipeline);
        }
        let Some(pipeline) = self.pipelines.get(&format) else {
            return Ok(());
        };

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blit Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
        pass.draw(0..6, 0..1);
        Ok(())
    }
}

/// Mappable buffer receiving one destination-sized frame.
pub struct Readback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
}

impl Readback {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let padded_row = padded_bytes_per_row(width);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            width,
            height,
            padded_row,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) {
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Block until the copy has landed and return tightly packed RGBA8 rows.
    pub fn read(&self, device: &wgpu::Device, order: RowOrder) -> Result<Vec<u8>> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RenderError::Readback("map callback never ran".to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let pixels = {
            let data = slice.get_mapped_range();
            unpad_rows(&data, self.width, self.height, self.padded_row, order)
        };
        self.buffer.unmap();
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_row() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(800), 3328);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    fn padded_frame() -> Vec<u8> {
        // 2x3 image, row r filled with value r + 1, padded to 256-byte rows.
        let mut data = vec![0u8; 256 * 3];
        for row in 0..3 {
            for byte in 0..8 {
                data[row * 256 + byte] = row as u8 + 1;
            }
        }
        data
    }

    #[test]
    fn test_unpad_top_down() {
        let pixels = unpad_rows(&padded_frame(), 2, 3, 256, RowOrder::TopDown);
        assert_eq!(pixels.len(), 2 * 3 * 4);
        assert!(pixels[..8].iter().all(|&b| b == 1));
        assert!(pixels[16..].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_unpad_bottom_up_flips() {
        let pixels = unpad_rows(&padded_frame(), 2, 3, 256, RowOrder::BottomUp);
        assert!(pixels[..8].iter().all(|&b| b == 3));
        assert!(pixels[8..16].iter().all(|&b| b == 2));
        assert!(pixels[16..].iter().all(|&b| b == 1));
    }
}
