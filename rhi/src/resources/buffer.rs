//! GPU buffer resource.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{GpuBackend, GpuBuffer};
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferType, MemoryType};

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are
/// reference-counted. Host-visible buffers can be written from any thread
/// with [`copy_from`](Self::copy_from).
///
/// [`GraphicsDevice::create_buffer`]: crate::GraphicsDevice::create_buffer
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(&BufferDescriptor::uniform(64), None)?;
/// buffer.copy_from(bytemuck::bytes_of(&transform))?;
/// ```
pub struct Buffer {
    descriptor: BufferDescriptor,
    gpu_handle: GpuBuffer,
    backend: Arc<dyn GpuBackend>,
    copy_lock: Mutex<()>,
}

impl Buffer {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: BufferDescriptor,
        gpu_handle: GpuBuffer,
    ) -> Self {
        Self {
            descriptor,
            gpu_handle,
            backend,
            copy_lock: Mutex::new(()),
        }
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer kind.
    pub fn buffer_type(&self) -> BufferType {
        self.descriptor.buffer_type
    }

    /// Get the debug name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Copy `data` to the start of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the buffer is not
    /// host-visible or `data` is larger than the buffer.
    pub fn copy_from(&self, data: &[u8]) -> Result<(), GraphicsError> {
        if self.descriptor.memory_type != MemoryType::CpuGpu {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer '{}' is not host-visible",
                self.descriptor.name
            )));
        }
        if data.len() as u64 > self.descriptor.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "copy of {} bytes exceeds buffer '{}' size {}",
                data.len(),
                self.descriptor.name,
                self.descriptor.size
            )));
        }
        let _guard = self.copy_lock.lock();
        self.backend.write_buffer(&self.gpu_handle, 0, data)
    }

    pub(crate) fn gpu_handle(&self) -> &GpuBuffer {
        &self.gpu_handle
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.descriptor.name)
            .field("size", &self.descriptor.size)
            .field("buffer_type", &self.descriptor.buffer_type)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn create_buffer(descriptor: BufferDescriptor) -> (Arc<DummyBackend>, Buffer) {
        let backend = Arc::new(DummyBackend::new());
        let gpu = backend.create_buffer(&descriptor).unwrap();
        let buffer = Buffer::new(backend.clone(), descriptor, gpu);
        (backend, buffer)
    }

    #[test]
    fn test_copy_from() {
        let (backend, buffer) = create_buffer(BufferDescriptor::uniform(8).with_name("params"));
        buffer.copy_from(&[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.buffer_contents(&buffer), vec![1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_too_large_fails() {
        let (_backend, buffer) = create_buffer(BufferDescriptor::uniform(4));
        let result = buffer.copy_from(&[0; 8]);
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_copy_into_gpu_only_fails() {
        let (_backend, buffer) = create_buffer(
            BufferDescriptor::new(16, BufferType::Storage).with_memory_type(MemoryType::GpuOnly),
        );
        assert!(buffer.copy_from(&[0; 4]).is_err());
    }

    #[test]
    fn test_buffer_debug() {
        let (_backend, buffer) = create_buffer(BufferDescriptor::uniform(1024));
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }
}
