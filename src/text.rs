//! Text handles and the text-shaping seam.
//!
//! Shaping and layout are done by an external collaborator implementing
//! [`TextShaper`]. The renderer only ever sees the result: a flat, immutable
//! array of glyph quads referencing font atlases by index.

use std::sync::Arc;

/// Opaque handle to a registered font (index into the font registry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FontHandle(pub(crate) u32);

impl FontHandle {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// RGBA8 font atlas plus a name for diagnostics.
///
/// The alpha channel holds a signed distance field centered on 0.5, which lets
/// the shader synthesize bold without a second atlas.
#[derive(Clone, Debug)]
pub struct FontData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FontData {
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        assert_eq!(
            pixels.len(),
            (width * height * 4) as usize,
            "font atlas must be tightly packed RGBA8"
        );
        Self {
            name: name.into(),
            width,
            height,
            pixels,
        }
    }
}

/// Horizontal alignment of a shaped line relative to the text origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
}

/// One shaped glyph quad, in the text item's local space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphInstance {
    pub min: [f32; 2],
    pub max: [f32; 2],
    /// UV rect in the glyph's own font atlas, normalized to [0, 1].
    pub uv_min: [f32; 2],
    pub uv_max: [f32; 2],
    pub color: [f32; 4],
    pub bold: bool,
    pub italic: bool,
    pub font: FontHandle,
}

/// Immutable shaped text, shared between frames.
#[derive(Clone, Debug)]
pub struct TextHandle(Arc<[GlyphInstance]>);

impl TextHandle {
    pub fn new(glyphs: Vec<GlyphInstance>) -> Self {
        Self(glyphs.into())
    }

    pub fn glyphs(&self) -> &[GlyphInstance] {
        &self.0
    }

    pub fn glyph_count(&self) -> usize {
        self.0.len()
    }
}

/// External text shaper.
pub trait TextShaper: Send {
    /// Called once per font, right after it has been assigned a handle.
    fn add_font(&mut self, handle: FontHandle, font: &FontData);

    /// Shape `text` using the first font of `fonts` that covers each character.
    fn shape(&self, text: &str, fonts: &[FontHandle], alignment: TextAlignment) -> Vec<GlyphInstance>;
}

/// Shaper for fixed-cell atlases: 16×16 grid of cells, one per byte value.
///
/// Each glyph is one unit tall and `advance` units wide; lines are separated
/// by `\n`. Characters outside Latin-1 fall back to `?`.
#[derive(Clone, Debug)]
pub struct GridShaper {
    pub advance: f32,
    fonts: Vec<FontHandle>,
}

impl Default for GridShaper {
    fn default() -> Self {
        Self {
            advance: 0.6,
            fonts: Vec::new(),
        }
    }
}

impl GridShaper {
    fn cell_uv(ch: char) -> ([f32; 2], [f32; 2]) {
        let code = if (ch as u32) < 256 { ch as u32 } else { '?' as u32 };
        let cell = 1.0 / 16.0;
        let x = (code % 16) as f32 * cell;
        let y = (code / 16) as f32 * cell;
        ([x, y], [x + cell, y + cell])
    }
}

impl TextShaper for GridShaper {
    fn add_font(&mut self, handle: FontHandle, _font: &FontData) {
        self.fonts.push(handle);
    }

    fn shape(&self, text: &str, fonts: &[FontHandle], alignment: TextAlignment) -> Vec<GlyphInstance> {
        let Some(font) = fonts.iter().copied().find(|f| self.fonts.contains(f)) else {
            log::warn!("No registered font in stack {:?}, text dropped", fonts);
            return Vec::new();
        };

        let mut glyphs = Vec::with_capacity(text.len());
        for (line_index, line) in text.split('\n').enumerate() {
            let width = line.chars().count() as f32 * self.advance;
            let start_x = match alignment {
                TextAlignment::Left => 0.0,
                TextAlignment::Center => -width * 0.5,
                TextAlignment::Right => -width,
            };
            let y = -(line_index as f32);
            for (i, ch) in line.chars().enumerate() {
                if ch == ' ' {
                    continue;
                }
                let x = start_x + i as f32 * self.advance;
                let (uv_min, uv_max) = Self::cell_uv(ch);
                glyphs.push(GlyphInstance {
                    min: [x, y - 1.0],
                    max: [x + self.advance, y],
                    uv_min,
                    uv_max,
                    color: [1.0; 4],
                    bold: false,
                    italic: false,
                    font,
                });
            }
        }
        glyphs
    }
}
