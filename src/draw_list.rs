//! Per-frame draw instructions.
//!
//! A [`DrawList`] is filled by the simulation thread, handed to the render
//! thread through the frame queue, and recycled through a pool afterwards.
//! Items are appended back-to-front: later items are drawn over earlier ones.

use glam::Affine2;

use crate::camera::CameraData;
use crate::post_processing::PostProcessingData;
use crate::registry::MeshHandle;
use crate::text::TextHandle;

/// How the two item colors are combined across a shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum RenderMode {
    /// Solid `color1`.
    #[default]
    Normal = 0,
    /// Horizontal gradient from `color1` (left) to `color2` (right).
    LinearRight = 1,
    /// Horizontal gradient from `color2` (left) to `color1` (right).
    LinearLeft = 2,
    /// Radial gradient, `color1` at the center.
    RadialIn = 3,
    /// Radial gradient, `color2` at the center.
    RadialOut = 4,
}

/// What kind of geometry an item draws. Encoded into the GPU parameter record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum RenderType {
    Mesh = 0,
    Text = 1,
}

/// Geometry referenced by a draw item.
#[derive(Clone, Debug)]
pub enum DrawContent {
    Mesh(MeshHandle),
    Text(TextHandle),
}

impl DrawContent {
    pub fn render_type(&self) -> RenderType {
        match self {
            DrawContent::Mesh(_) => RenderType::Mesh,
            DrawContent::Text(_) => RenderType::Text,
        }
    }
}

/// One renderable unit.
#[derive(Clone, Debug)]
pub struct DrawItem {
    pub content: DrawContent,
    pub transform: Affine2,
    pub color1: [f32; 4],
    pub color2: [f32; 4],
    pub mode: RenderMode,
    /// Position in submission order, assigned by [`DrawList::push`].
    pub index: u32,
}

impl DrawItem {
    pub fn mesh(mesh: MeshHandle, transform: Affine2, color: [f32; 4]) -> Self {
        Self {
            content: DrawContent::Mesh(mesh),
            transform,
            color1: color,
            color2: color,
            mode: RenderMode::Normal,
            index: 0,
        }
    }

    pub fn text(text: TextHandle, transform: Affine2, color: [f32; 4]) -> Self {
        Self {
            content: DrawContent::Text(text),
            transform,
            color1: color,
            color2: color,
            mode: RenderMode::Normal,
            index: 0,
        }
    }

    pub fn with_gradient(mut self, mode: RenderMode, color2: [f32; 4]) -> Self {
        self.mode = mode;
        self.color2 = color2;
        self
    }

    pub fn render_type(&self) -> RenderType {
        self.content.render_type()
    }

    /// Drawn without blending: a mesh whose every visible color is fully opaque.
    pub fn is_opaque(&self) -> bool {
        self.render_type() != RenderType::Text
            && self.color1[3] >= 1.0
            && (self.mode == RenderMode::Normal || self.color2[3] >= 1.0)
    }

    /// Contributes nothing to the frame.
    pub fn is_invisible(&self) -> bool {
        self.color1[3] <= 0.0 && self.color2[3] <= 0.0
    }
}

/// One frame's worth of draw instructions.
#[derive(Debug)]
pub struct DrawList {
    items: Vec<DrawItem>,
    pub camera: CameraData,
    pub clear_color: [f32; 4],
    pub post_processing: PostProcessingData,
    /// Scene time this list was evaluated at, in seconds.
    pub time: f64,
}

impl Default for DrawList {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawList {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            camera: CameraData::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            post_processing: PostProcessingData::default(),
            time: 0.0,
        }
    }

    /// Append an item, stamping it with its submission index.
    pub fn push(&mut self, mut item: DrawItem) -> u32 {
        let index = self.items.len() as u32;
        item.index = index;
        self.items.push(item);
        index
    }

    pub fn items(&self) -> &[DrawItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of item slots available without reallocating.
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Return to the freshly-allocated state, keeping item storage.
    pub fn reset(&mut self) {
        self.items.clear();
        self.camera = CameraData::default();
        self.clear_color = [0.0, 0.0, 0.0, 1.0];
        self.post_processing = PostProcessingData::default();
        self.time = 0.0;
    }
}
