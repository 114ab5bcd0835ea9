//! Buffer types and descriptors.

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferType {
    /// Vertex data.
    Vertex,
    /// 32-bit index data.
    Index,
    /// Uniform (constant-sized, read-only in shaders) data.
    #[default]
    Uniform,
    /// Storage (read/write in shaders) data.
    Storage,
    /// Small constant data uploaded once.
    Constant,
}

/// Where the buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// Device-local memory, not visible to the CPU.
    GpuOnly,
    /// Host-visible memory that the CPU can write directly.
    #[default]
    CpuGpu,
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug name of the buffer.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Binding kind.
    pub buffer_type: BufferType,
    /// Memory residency.
    pub memory_type: MemoryType,
}

impl BufferDescriptor {
    /// Create a new CPU-visible buffer descriptor.
    pub fn new(size: u64, buffer_type: BufferType) -> Self {
        Self {
            name: String::new(),
            size,
            buffer_type,
            memory_type: MemoryType::CpuGpu,
        }
    }

    /// Create a uniform buffer descriptor.
    pub fn uniform(size: u64) -> Self {
        Self::new(size, BufferType::Uniform)
    }

    /// Set the debug name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the memory residency.
    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    /// Whether the CPU can write into the buffer after creation.
    pub fn is_host_visible(&self) -> bool {
        self.memory_type == MemoryType::CpuGpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_descriptor_builder() {
        let desc = BufferDescriptor::uniform(256)
            .with_name("CameraData")
            .with_memory_type(MemoryType::GpuOnly);
        assert_eq!(desc.size, 256);
        assert_eq!(desc.buffer_type, BufferType::Uniform);
        assert_eq!(desc.name, "CameraData");
        assert!(!desc.is_host_visible());
    }
}
