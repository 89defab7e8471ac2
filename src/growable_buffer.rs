//! CPU-side staging buffer for GPU data.
//!
//! Vertex, index, indirect-command and per-draw parameter data is appended here
//! every frame and uploaded in one go. The backing storage only ever grows, so a
//! steady-state frame performs no allocation at all.

use std::ops::Range;

use bytemuck::Pod;

/// Append-only element buffer that grows on demand.
#[derive(Clone, Debug)]
pub struct GrowableBuffer<T: Pod> {
    data: Vec<T>,
}

impl<T: Pod> Default for GrowableBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod> GrowableBuffer<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append one element and return its index.
    pub fn push(&mut self, value: T) -> usize {
        let index = self.data.len();
        self.data.push(value);
        index
    }

    /// Append a slice and return the element range it occupies.
    pub fn append(&mut self, values: &[T]) -> Range<usize> {
        let start = self.data.len();
        self.data.extend_from_slice(values);
        start..self.data.len()
    }

    /// Drop all elements, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Allocated capacity in elements.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Elements from `start` to the end, as raw bytes.
    pub fn bytes_from(&self, start: usize) -> &[u8] {
        bytemuck::cast_slice(&self.data[start.min(self.data.len())..])
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Size of the live contents in bytes.
    pub fn byte_len(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<T>()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_previous_contents() {
        let mut buffer = GrowableBuffer::<u32>::with_capacity(2);
        let first = buffer.append(&[1, 2]);
        let second = buffer.append(&[3, 4, 5, 6, 7]);

        assert_eq!(first, 0..2);
        assert_eq!(second, 2..7);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6, 7]);
        assert!(buffer.capacity() >= 7);
    }

    #[test]
    fn test_clear_then_append_matches_fresh_append() {
        let payload = [0.5f32, 1.5, -2.0];

        let mut fresh = GrowableBuffer::<f32>::new();
        fresh.append(&payload);

        let mut reused = GrowableBuffer::<f32>::new();
        reused.append(&[9.0; 32]);
        reused.clear();
        reused.append(&payload);

        assert_eq!(reused.as_bytes(), fresh.as_bytes());
        assert!(reused.capacity() >= 32);
    }

    #[test]
    fn test_byte_views() {
        let mut buffer = GrowableBuffer::<u32>::new();
        assert_eq!(buffer.push(7), 0);
        assert_eq!(buffer.push(8), 1);
        assert_eq!(buffer.byte_len(), 8);
        assert_eq!(buffer.bytes_from(1), &8u32.to_ne_bytes());
        assert!(buffer.bytes_from(5).is_empty());
    }
}
