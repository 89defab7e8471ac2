//! Mesh and font registries.
//!
//! Both registries are append-only and may be written from any thread. Each
//! is guarded by its own mutex; the render thread takes the same lock while it
//! uploads whatever was added since the previous frame.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::gpu::mesh::{create_unit_quad, Vertex};
use crate::growable_buffer::GrowableBuffer;
use crate::text::{FontData, FontHandle, TextAlignment, TextHandle, TextShaper};

/// Location of a registered mesh inside the shared vertex/index buffers.
///
/// Handles are created once and never invalidated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle {
    pub id: u32,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
}

struct MeshStore {
    vertices: GrowableBuffer<Vertex>,
    indices: GrowableBuffer<u32>,
    handles: Vec<MeshHandle>,
}

impl MeshStore {
    fn insert(&mut self, vertices: &[Vertex], indices: &[u32]) -> MeshHandle {
        assert!(!vertices.is_empty(), "cannot register a mesh without vertices");
        assert!(
            indices.iter().all(|&i| (i as usize) < vertices.len()),
            "mesh index out of range ({} vertices)",
            vertices.len()
        );

        let vertex_range = self.vertices.append(vertices);
        let index_range = self.indices.append(indices);
        let handle = MeshHandle {
            id: self.handles.len() as u32,
            vertex_offset: vertex_range.start as u32,
            vertex_count: vertices.len() as u32,
            index_offset: index_range.start as u32,
            index_count: indices.len() as u32,
        };
        self.handles.push(handle);
        handle
    }
}

/// Thread-safe, append-only mesh registry.
pub struct MeshRegistry {
    store: Mutex<MeshStore>,
    quad: MeshHandle,
}

impl Default for MeshRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshRegistry {
    /// Create a registry. The unit quad used for glyphs is always mesh 0.
    pub fn new() -> Self {
        let mut store = MeshStore {
            vertices: GrowableBuffer::new(),
            indices: GrowableBuffer::new(),
            handles: Vec::new(),
        };
        let (vertices, indices) = create_unit_quad();
        let quad = store.insert(&vertices, &indices);
        Self {
            store: Mutex::new(store),
            quad,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MeshStore> {
        // Append-only data stays consistent even if a writer panicked.
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a mesh. Indices are relative to this mesh's own vertices.
    pub fn register(&self, vertices: &[Vertex], indices: &[u32]) -> MeshHandle {
        let handle = self.lock().insert(vertices, indices);
        log::debug!(
            "Registered mesh {} ({} vertices, {} indices)",
            handle.id,
            handle.vertex_count,
            handle.index_count
        );
        handle
    }

    /// Convenience wrapper taking bare 2D positions.
    pub fn register_positions(&self, positions: &[[f32; 2]], indices: &[u32]) -> MeshHandle {
        let vertices: Vec<Vertex> = positions.iter().map(|p| Vertex { position: *p }).collect();
        self.register(&vertices, indices)
    }

    /// Built-in unit quad spanning [0, 1]².
    pub fn quad(&self) -> MeshHandle {
        self.quad
    }

    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `handle` was issued by this registry.
    pub fn contains(&self, handle: &MeshHandle) -> bool {
        self.lock().handles.get(handle.id as usize) == Some(handle)
    }

    /// Run `f` against every issued handle under the registry lock.
    pub fn with_handles<R>(&self, f: impl FnOnce(&[MeshHandle]) -> R) -> R {
        f(&self.lock().handles)
    }

    /// Run `f` against the raw vertex and index data under the registry lock.
    pub fn with_data<R>(&self, f: impl FnOnce(&GrowableBuffer<Vertex>, &GrowableBuffer<u32>) -> R) -> R {
        let store = self.lock();
        f(&store.vertices, &store.indices)
    }
}

struct FontStore {
    fonts: Vec<Arc<FontData>>,
    shaper: Box<dyn TextShaper>,
}

/// Thread-safe, append-only font registry fronting the external text shaper.
pub struct FontRegistry {
    store: Mutex<FontStore>,
}

impl FontRegistry {
    pub fn new(shaper: Box<dyn TextShaper>) -> Self {
        Self {
            store: Mutex::new(FontStore {
                fonts: Vec::new(),
                shaper,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FontStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, font: FontData) -> FontHandle {
        let mut store = self.lock();
        let handle = FontHandle(store.fonts.len() as u32);
        store.shaper.add_font(handle, &font);
        log::info!(
            "Registered font '{}' as {} ({}x{} atlas)",
            font.name,
            handle.0,
            font.width,
            font.height
        );
        store.fonts.push(Arc::new(font));
        handle
    }

    /// Shape `text` with the first font of `font_stack` that covers each glyph.
    ///
    /// Panics if the stack names a font that was never registered.
    pub fn create_text(&self, text: &str, font_stack: &[FontHandle], alignment: TextAlignment) -> TextHandle {
        let store = self.lock();
        for font in font_stack {
            assert!(
                (font.0 as usize) < store.fonts.len(),
                "font handle {} is not registered",
                font.0
            );
        }
        TextHandle::new(store.shaper.shape(text, font_stack, alignment))
    }

    pub fn len(&self) -> usize {
        self.lock().fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fonts registered at or after index `start`.
    pub fn fonts_since(&self, start: usize) -> Vec<Arc<FontData>> {
        let store = self.lock();
        store.fonts.get(start..).map(|f| f.to_vec()).unwrap_or_default()
    }

    /// Every registered font, in handle order.
    pub fn all_fonts(&self) -> Vec<Arc<FontData>> {
        self.fonts_since(0)
    }
}
