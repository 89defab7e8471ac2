//! Batch assembly: turns a [`DrawList`] into GPU-ready draw data.
//!
//! Items are split into an opaque set, drawn front-to-back with depth writes,
//! and a transparent set, drawn afterwards in submission order with blending.
//! Every item produces one indexed indirect-draw command and one parameter
//! record; text items also append their glyphs to a shared glyph buffer.
//!
//! Depth is derived from the submission index so that ordering is exact and
//! independent of float rounding in the transforms.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec2};

use crate::draw_list::{DrawContent, DrawItem, DrawList, RenderType};
use crate::growable_buffer::GrowableBuffer;
use crate::registry::{MeshHandle, MeshRegistry};
use crate::text::TextHandle;

/// Submission indices are encoded as `index / 2^23`, exact in a 24-bit mantissa.
pub const DEPTH_STEPS: u32 = 1 << 23;
/// Largest index with a distinct depth; later items share it.
pub const MAX_DEPTH_INDEX: u32 = DEPTH_STEPS - 1;

pub const GLYPH_BOLD: u32 = 1;
pub const GLYPH_ITALIC: u32 = 2;

/// Depth of the item with submission index `index`.
pub fn encode_depth(index: u32) -> f32 {
    index.min(MAX_DEPTH_INDEX) as f32 / DEPTH_STEPS as f32
}

/// Layout-compatible with `wgpu::util::DrawIndexedIndirectArgs`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    /// Parameter index for meshes, glyph offset for text.
    pub first_instance: u32,
}

/// Per-draw record, read by the vertex shader. Matches `DrawParams` in WGSL.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuDrawParams {
    /// Item transform composed with the camera, as three padded columns.
    pub transform: [[f32; 4]; 3],
    pub color1: [f32; 4],
    pub color2: [f32; 4],
    pub depth: f32,
    pub render_mode: u32,
    pub render_type: u32,
    pub glyph_offset: u32,
}

/// One glyph quad. Matches `Glyph` in WGSL.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuGlyph {
    pub min: [f32; 2],
    pub max: [f32; 2],
    pub uv_min: [f32; 2],
    pub uv_max: [f32; 2],
    pub color: [f32; 4],
    pub flags: u32,
    pub layer: u32,
    pub param_index: u32,
    pub _padding: u32,
}

/// Consecutive commands of one render type, issued as a single multi-draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawRun {
    pub render_type: RenderType,
    pub commands: Range<u32>,
}

/// Output of [`BatchAssembler::assemble`].
#[derive(Default)]
pub struct AssembledBatch {
    pub commands: GrowableBuffer<DrawIndexedCommand>,
    pub params: GrowableBuffer<GpuDrawParams>,
    pub glyphs: GrowableBuffer<GpuGlyph>,
    /// Command range of the opaque set. Always meshes.
    pub opaque: Range<u32>,
    /// Transparent set, in draw order.
    pub transparent: Vec<DrawRun>,
    /// Items dropped as invisible or empty.
    pub discarded: usize,
    /// The camera could not produce a view; nothing was emitted.
    pub degenerate_view: bool,
}

impl AssembledBatch {
    fn clear(&mut self) {
        self.commands.clear();
        self.params.clear();
        self.glyphs.clear();
        self.opaque = 0..0;
        self.transparent.clear();
        self.discarded = 0;
        self.degenerate_view = false;
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn opaque_count(&self) -> u32 {
        self.opaque.end - self.opaque.start
    }

    pub fn transparent_count(&self) -> u32 {
        self.transparent.iter().map(|r| r.commands.end - r.commands.start).sum()
    }
}

/// Split `items` into opaque (reversed, front-to-back) and transparent (in
/// order) index lists. Returns how many items were discarded as invisible.
pub fn partition_into(items: &[DrawItem], opaque: &mut Vec<usize>, transparent: &mut Vec<usize>) -> usize {
    opaque.clear();
    transparent.clear();
    let mut discarded = 0;
    for (i, item) in items.iter().enumerate() {
        if item.is_invisible() {
            discarded += 1;
        } else if item.is_opaque() {
            opaque.push(i);
        } else {
            transparent.push(i);
        }
    }
    opaque.reverse();
    discarded
}

fn pack_transform(m: Mat3) -> [[f32; 4]; 3] {
    [
        m.x_axis.extend(0.0).to_array(),
        m.y_axis.extend(0.0).to_array(),
        m.z_axis.extend(0.0).to_array(),
    ]
}

/// Reusable assembler. Keeps its buffers between frames.
#[derive(Default)]
pub struct BatchAssembler {
    batch: AssembledBatch,
    opaque: Vec<usize>,
    transparent: Vec<usize>,
}

impl BatchAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble `list` for a viewport with aspect ratio `aspect`.
    ///
    /// `atlas_uv_scales[f]` rescales font `f`'s normalized UVs into its layer
    /// of the shared atlas array.
    ///
    /// Panics if an item references a mesh not issued by `meshes` or a font
    /// without an atlas entry.
    pub fn assemble(
        &mut self,
        list: &DrawList,
        meshes: &MeshRegistry,
        atlas_uv_scales: &[[f32; 2]],
        aspect: f32,
    ) -> &AssembledBatch {
        self.batch.clear();

        let items = list.items();
        meshes.with_handles(|handles| {
            for item in items {
                if let DrawContent::Mesh(mesh) = &item.content {
                    assert!(
                        handles.get(mesh.id as usize) == Some(mesh),
                        "draw item {} references unregistered mesh {:?}",
                        item.index,
                        mesh
                    );
                }
            }
        });

        let Some(view_projection) = list.camera.view_projection(aspect) else {
            log::trace!("Degenerate camera {:?}, frame has no visible items", list.camera);
            self.batch.degenerate_view = true;
            return &self.batch;
        };

        self.batch.discarded = partition_into(items, &mut self.opaque, &mut self.transparent);
        let quad = meshes.quad();

        let opaque_start = self.batch.commands.len() as u32;
        for &i in &self.opaque {
            emit(&mut self.batch, &items[i], view_projection, quad, atlas_uv_scales);
        }
        self.batch.opaque = opaque_start..self.batch.commands.len() as u32;

        for &i in &self.transparent {
            let item = &items[i];
            let start = self.batch.commands.len() as u32;
            if !emit(&mut self.batch, item, view_projection, quad, atlas_uv_scales) {
                continue;
            }
            let end = start + 1;
            let render_type = item.render_type();
            match self.batch.transparent.last_mut() {
                Some(run) if run.render_type == render_type && run.commands.end == start => {
                    run.commands.end = end;
                }
                _ => self.batch.transparent.push(DrawRun {
                    render_type,
                    commands: start..end,
                }),
            }
        }

        &self.batch
    }

    pub fn batch(&self) -> &AssembledBatch {
        &self.batch
    }
}

/// Append the command and parameter record for one item. Returns false for
/// text without glyphs, which is counted as discarded instead.
fn emit(
    batch: &mut AssembledBatch,
    item: &DrawItem,
    view_projection: Mat3,
    quad: MeshHandle,
    atlas_uv_scales: &[[f32; 2]],
) -> bool {
    let param_index = batch.params.len() as u32;
    let transform = view_projection * Mat3::from(item.transform);

    let (command, glyph_offset) = match &item.content {
        DrawContent::Mesh(mesh) => (
            DrawIndexedCommand {
                index_count: mesh.index_count,
                instance_count: 1,
                first_index: mesh.index_offset,
                base_vertex: mesh.vertex_offset as i32,
                first_instance: param_index,
            },
            0,
        ),
        DrawContent::Text(text) => {
            if text.glyph_count() == 0 {
                batch.discarded += 1;
                return false;
            }
            let glyph_offset = append_glyphs(&mut batch.glyphs, text, param_index, atlas_uv_scales);
            (
                DrawIndexedCommand {
                    index_count: quad.index_count,
                    instance_count: text.glyph_count() as u32,
                    first_index: quad.index_offset,
                    base_vertex: quad.vertex_offset as i32,
                    first_instance: glyph_offset,
                },
                glyph_offset,
            )
        }
    };

    batch.commands.push(command);
    batch.params.push(GpuDrawParams {
        transform: pack_transform(transform),
        color1: item.color1,
        color2: item.color2,
        depth: encode_depth(item.index),
        render_mode: item.mode as u32,
        render_type: item.render_type() as u32,
        glyph_offset,
    });
    true
}

fn append_glyphs(
    glyphs: &mut GrowableBuffer<GpuGlyph>,
    text: &TextHandle,
    param_index: u32,
    atlas_uv_scales: &[[f32; 2]],
) -> u32 {
    let offset = glyphs.len() as u32;
    for glyph in text.glyphs() {
        let font = glyph.font.index();
        let scale = Vec2::from(
            *atlas_uv_scales
                .get(font as usize)
                .unwrap_or_else(|| panic!("glyph references unregistered font {}", font)),
        );
        let mut flags = 0;
        if glyph.bold {
            flags |= GLYPH_BOLD;
        }
        if glyph.italic {
            flags |= GLYPH_ITALIC;
        }
        glyphs.push(GpuGlyph {
            min: glyph.min,
            max: glyph.max,
            uv_min: (Vec2::from(glyph.uv_min) * scale).to_array(),
            uv_max: (Vec2::from(glyph.uv_max) * scale).to_array(),
            color: glyph.color,
            flags,
            layer: font,
            param_index,
            _padding: 0,
        });
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraData;
    use crate::draw_list::RenderMode;
    use crate::text::{FontHandle, GlyphInstance};
    use glam::Affine2;

    const OPAQUE: [f32; 4] = [1.0, 0.2, 0.2, 1.0];
    const HALF: [f32; 4] = [1.0, 1.0, 1.0, 0.5];
    const CLEAR: [f32; 4] = [1.0, 1.0, 1.0, 0.0];

    fn triangle(registry: &MeshRegistry) -> MeshHandle {
        registry.register_positions(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]], &[0, 1, 2])
    }

    fn text_handle(glyphs: usize) -> TextHandle {
        let glyph = GlyphInstance {
            min: [0.0, 0.0],
            max: [1.0, 1.0],
            uv_min: [0.5, 0.5],
            uv_max: [1.0, 1.0],
            color: [1.0; 4],
            bold: true,
            italic: false,
            font: FontHandle(0),
        };
        TextHandle::new(vec![glyph; glyphs])
    }

    #[test]
    fn test_depth_is_monotonic_and_exact() {
        let mut previous = -1.0;
        for index in (0..MAX_DEPTH_INDEX).step_by(4099).chain([MAX_DEPTH_INDEX - 1, MAX_DEPTH_INDEX]) {
            let depth = encode_depth(index);
            assert!(depth > previous, "index {index}");
            assert!(depth < 1.0);
            assert_eq!((depth * DEPTH_STEPS as f32) as u32, index);
            previous = depth;
        }
        assert_eq!(encode_depth(0), 0.0);
        assert_eq!(encode_depth(u32::MAX), encode_depth(MAX_DEPTH_INDEX));
    }

    #[test]
    fn test_all_opaque_goes_to_opaque_set() {
        let registry = MeshRegistry::new();
        let mesh = triangle(&registry);
        let mut list = DrawList::new();
        for _ in 0..5 {
            list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, OPAQUE));
        }

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[], 1.0);
        assert_eq!(batch.opaque_count(), 5);
        assert_eq!(batch.transparent_count(), 0);
        assert_eq!(batch.discarded, 0);
    }

    #[test]
    fn test_fully_transparent_items_are_discarded() {
        let registry = MeshRegistry::new();
        let mesh = triangle(&registry);
        let mut list = DrawList::new();
        for _ in 0..4 {
            list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, CLEAR).with_gradient(RenderMode::LinearLeft, CLEAR));
        }

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[], 1.0);
        assert!(batch.is_empty());
        assert_eq!(batch.discarded, 4);
        assert!(batch.params.is_empty());
    }

    #[test]
    fn test_opaque_is_front_to_back() {
        let registry = MeshRegistry::new();
        let mesh = triangle(&registry);
        let mut list = DrawList::new();
        for _ in 0..3 {
            list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, OPAQUE));
        }

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[], 1.0);
        let depths: Vec<f32> = batch.params.as_slice().iter().map(|p| p.depth).collect();
        assert_eq!(depths, vec![encode_depth(2), encode_depth(1), encode_depth(0)]);
        // Each mesh command points at its own parameter record.
        let instances: Vec<u32> = batch.commands.as_slice().iter().map(|c| c.first_instance).collect();
        assert_eq!(instances, vec![0, 1, 2]);
    }

    #[test]
    fn test_mixed_partition_and_runs() {
        let registry = MeshRegistry::new();
        let mesh = triangle(&registry);
        let mut list = DrawList::new();
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, OPAQUE)); // 0 opaque
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, HALF)); // 1 transparent
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, HALF)); // 2 transparent
        list.push(DrawItem::text(text_handle(3), Affine2::IDENTITY, OPAQUE)); // 3 text
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, CLEAR)); // 4 discarded
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, OPAQUE).with_gradient(RenderMode::RadialOut, HALF)); // 5

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[[1.0, 1.0]], 1.0);

        assert_eq!(batch.opaque, 0..1);
        assert_eq!(batch.discarded, 1);
        assert_eq!(
            batch.transparent,
            vec![
                DrawRun { render_type: RenderType::Mesh, commands: 1..3 },
                DrawRun { render_type: RenderType::Text, commands: 3..4 },
                DrawRun { render_type: RenderType::Mesh, commands: 4..5 },
            ]
        );

        let text_command = batch.commands.as_slice()[3];
        let quad = registry.quad();
        assert_eq!(text_command.instance_count, 3);
        assert_eq!(text_command.index_count, quad.index_count);
        assert_eq!(text_command.first_instance, 0);
        assert_eq!(batch.glyphs.len(), 3);
        assert!(batch.glyphs.as_slice().iter().all(|g| g.param_index == 3 && g.flags == GLYPH_BOLD));
        assert_eq!(batch.params.as_slice()[3].render_type, RenderType::Text as u32);
    }

    #[test]
    fn test_glyph_uvs_scaled_into_atlas_layer() {
        let registry = MeshRegistry::new();
        let mut list = DrawList::new();
        list.push(DrawItem::text(text_handle(1), Affine2::IDENTITY, HALF));

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[[0.5, 0.25]], 1.0);
        let glyph = batch.glyphs.as_slice()[0];
        assert_eq!(glyph.uv_min, [0.25, 0.125]);
        assert_eq!(glyph.uv_max, [0.5, 0.25]);
    }

    #[test]
    fn test_empty_text_is_discarded() {
        let registry = MeshRegistry::new();
        let mut list = DrawList::new();
        list.push(DrawItem::text(text_handle(0), Affine2::IDENTITY, HALF));

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[], 1.0);
        assert!(batch.is_empty());
        assert!(batch.transparent.is_empty());
        assert_eq!(batch.discarded, 1);
    }

    #[test]
    fn test_transform_includes_camera() {
        let registry = MeshRegistry::new();
        let mesh = triangle(&registry);
        let mut list = DrawList::new();
        list.camera = CameraData::new(Vec2::new(1.0, 0.0), 2.0, 0.0);
        list.push(DrawItem::mesh(mesh, Affine2::from_translation(Vec2::new(3.0, 0.0)), OPAQUE));

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[], 1.0);
        let t = batch.params.as_slice()[0].transform;
        // Translation column: (3 - 1) / 2 = 1.
        assert_eq!(t[2], [1.0, 0.0, 1.0, 0.0]);
        assert_eq!(t[0], [0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_degenerate_camera_emits_nothing() {
        let registry = MeshRegistry::new();
        let mesh = triangle(&registry);
        let mut list = DrawList::new();
        list.camera.scale = 0.0;
        list.push(DrawItem::mesh(mesh, Affine2::IDENTITY, OPAQUE));

        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, &registry, &[], 1.0);
        assert!(batch.degenerate_view);
        assert!(batch.is_empty());
    }

    #[test]
    #[should_panic(expected = "unregistered mesh")]
    fn test_unregistered_mesh_panics() {
        let registry = MeshRegistry::new();
        let other = MeshRegistry::new();
        let foreign = triangle(&other);
        let mut list = DrawList::new();
        list.push(DrawItem::mesh(foreign, Affine2::IDENTITY, OPAQUE));

        BatchAssembler::new().assemble(&list, &registry, &[], 1.0);
    }

    #[test]
    #[should_panic(expected = "unregistered font")]
    fn test_unregistered_font_panics() {
        let registry = MeshRegistry::new();
        let mut list = DrawList::new();
        list.push(DrawItem::text(text_handle(1), Affine2::IDENTITY, HALF));
        BatchAssembler::new().assemble(&list, &registry, &[], 1.0);
    }

    #[test]
    fn test_gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<DrawIndexedCommand>(), 20);
        assert_eq!(std::mem::size_of::<GpuDrawParams>(), 96);
        assert_eq!(std::mem::size_of::<GpuGlyph>(), 64);
    }
}
