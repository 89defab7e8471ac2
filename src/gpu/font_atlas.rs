//! Font atlases packed into one 2D texture array.
//!
//! Each registered font occupies one layer. Layers are sized to the largest
//! atlas, so smaller atlases only fill the top-left corner of their layer and
//! glyph UVs are scaled down accordingly (see [`AtlasLayout::uv_scales`]).

use std::sync::Arc;

use crate::registry::FontRegistry;
use crate::text::FontData;

/// Layer size of the shared atlas array and the per-font UV scale into it.
#[derive(Clone, Debug, PartialEq)]
pub struct AtlasLayout {
    pub layer_width: u32,
    pub layer_height: u32,
    /// Indexed by font handle.
    pub uv_scales: Vec<[f32; 2]>,
}

impl Default for AtlasLayout {
    fn default() -> Self {
        Self {
            layer_width: 1,
            layer_height: 1,
            uv_scales: Vec::new(),
        }
    }
}

impl AtlasLayout {
    pub fn for_fonts(fonts: &[Arc<FontData>]) -> Self {
        if fonts.is_empty() {
            return Self::default();
        }
        let layer_width = fonts.iter().map(|f| f.width).max().unwrap_or(1).max(1);
        let layer_height = fonts.iter().map(|f| f.height).max().unwrap_or(1).max(1);
        let uv_scales = fonts
            .iter()
            .map(|f| [f.width as f32 / layer_width as f32, f.height as f32 / layer_height as f32])
            .collect();
        Self {
            layer_width,
            layer_height,
            uv_scales,
        }
    }

    pub fn font_count(&self) -> usize {
        self.uv_scales.len()
    }

    /// Array layers needed. An empty atlas still has one blank layer to bind.
    pub fn layer_count(&self) -> u32 {
        self.font_count().max(1) as u32
    }
}

pub struct FontAtlas {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    layout: AtlasLayout,
}

impl FontAtlas {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let layout = AtlasLayout::default();
        let (texture, view) = Self::create_texture(device, &layout);
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        Self { texture, view, layout }
    }

    fn create_texture(device: &wgpu::Device, layout: &AtlasLayout) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Font Atlas Array"),
            size: wgpu::Extent3d {
                width: layout.layer_width,
                height: layout.layer_height,
                depth_or_array_layers: layout.layer_count(),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        // Explicit, or a single-layer texture would get a plain 2D view.
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Font Atlas Array View"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });
        (texture, view)
    }

    /// Rebuild the array if fonts were registered since the last call.
    /// Returns true when the texture was replaced and bind groups must be recreated.
    pub fn sync(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, fonts: &FontRegistry) -> bool {
        if fonts.len() == self.layout.font_count() {
            return false;
        }

        let all = fonts.all_fonts();
        let layout = AtlasLayout::for_fonts(&all);
        let (texture, view) = Self::create_texture(device, &layout);
        for (layer, font) in all.iter().enumerate() {
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &font.pixels,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(font.width * 4),
                    rows_per_image: Some(font.height),
                },
                wgpu::Extent3d {
                    width: font.width,
                    height: font.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        log::info!(
            "Rebuilt font atlas: {} layers of {}x{}",
            layout.layer_count(),
            layout.layer_width,
            layout.layer_height
        );
        self.texture.destroy();
        self.texture = texture;
        self.view = view;
        self.layout = layout;
        true
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }
}
