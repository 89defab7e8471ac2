//! GPU buffers that are rewritten every frame.
//!
//! Data is written in place while it fits; when it outgrows the allocation the
//! buffer is replaced by one of the next power-of-two size and fully
//! re-uploaded. Frames of similar size therefore never reallocate.

/// Smallest allocation. Also keeps storage bindings non-empty.
pub const MIN_BUFFER_CAPACITY: u64 = 256;

/// New capacity for `needed` bytes, or `None` if `current` already suffices.
pub fn grown_capacity(current: u64, needed: u64) -> Option<u64> {
    if needed <= current {
        None
    } else {
        Some(needed.next_power_of_two().max(MIN_BUFFER_CAPACITY))
    }
}

pub struct DynamicBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
    usage: wgpu::BufferUsages,
    label: &'static str,
}

impl DynamicBuffer {
    pub fn new(device: &wgpu::Device, label: &'static str, usage: wgpu::BufferUsages) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        Self {
            buffer: Self::allocate(device, label, usage, MIN_BUFFER_CAPACITY),
            capacity: MIN_BUFFER_CAPACITY,
            usage,
            label,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        label: &'static str,
        usage: wgpu::BufferUsages,
        size: u64,
    ) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    fn grow(&mut self, device: &wgpu::Device, needed: u64) -> bool {
        match grown_capacity(self.capacity, needed) {
            Some(capacity) => {
                log::debug!("Growing {} from {} to {} bytes", self.label, self.capacity, capacity);
                self.buffer = Self::allocate(device, self.label, self.usage, capacity);
                self.capacity = capacity;
                true
            }
            None => false,
        }
    }

    /// Replace the buffer contents with `bytes`. Returns true if it reallocated.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        let reallocated = self.grow(device, bytes.len() as u64);
        queue.write_buffer(&self.buffer, 0, bytes);
        reallocated
    }

    /// Bring the buffer in line with `bytes`, of which the first `uploaded`
    /// bytes are already on the GPU. Only the tail is written unless the
    /// buffer has to grow.
    pub fn upload_tail(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bytes: &[u8],
        uploaded: u64,
    ) -> bool {
        if self.grow(device, bytes.len() as u64) {
            queue.write_buffer(&self.buffer, 0, bytes);
            return true;
        }
        let start = uploaded.min(bytes.len() as u64);
        if (start as usize) < bytes.len() {
            queue.write_buffer(&self.buffer, start, &bytes[start as usize..]);
        }
        false
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_growth_when_fits() {
        assert_eq!(grown_capacity(1024, 1024), None);
        assert_eq!(grown_capacity(1024, 10), None);
    }

    #[test]
    fn test_growth_is_power_of_two() {
        assert_eq!(grown_capacity(256, 257), Some(512));
        assert_eq!(grown_capacity(256, 5000), Some(8192));
    }

    #[test]
    fn test_growth_respects_minimum() {
        assert_eq!(grown_capacity(0, 4), Some(MIN_BUFFER_CAPACITY));
    }
}
