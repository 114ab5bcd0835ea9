//! CPU-side material state.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::MaterialError;
use crate::resources::{Buffer, Texture};
use crate::shader::{BufferLayout, BufferLayoutRegistry, Shader, ShaderStageFlags};
use crate::types::{BufferDescriptor, MemoryType};

use super::{GpuMaterial, TextureBindingStore};

/// A shader's binding table together with the uniform buffers it owns.
///
/// Created by the material loader once per loaded material. Every reflected
/// uniform block gets a host-visible buffer named after the block, bound at
/// its slot; textures bound here are also remembered in the
/// [`TextureBindingStore`] so a rebuilt material of the same shader starts
/// with them.
pub struct Material {
    name: String,
    shader: Arc<Shader>,
    gpu_material: Arc<GpuMaterial>,
    buffers: BTreeMap<u32, (Arc<Buffer>, BufferLayout)>,
    bindings: Arc<TextureBindingStore>,
}

impl Material {
    /// Create the material's buffers and binding table on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Layout`] if a uniform block of the shader
    /// has no registered layout or a mismatched size, and
    /// [`MaterialError::Device`] if the device can't create a resource.
    pub fn new(
        device: &GraphicsDevice,
        name: impl Into<String>,
        shader: Arc<Shader>,
        layouts: &BufferLayoutRegistry,
        bindings: Arc<TextureBindingStore>,
    ) -> Result<Self, MaterialError> {
        let name = name.into();
        let gpu_material = device.create_gpu_material(&shader)?;
        let alignment = device.parameters().min_uniform_buffer_alignment.max(1);

        let mut buffers = BTreeMap::new();
        for (slot, reflected) in shader.reflection().uniform_buffers() {
            let layout = *layouts.resolve(reflected)?;
            let size = layout.size.div_ceil(alignment) * alignment;
            let descriptor = BufferDescriptor::uniform(size)
                .with_name(reflected.name.clone())
                .with_memory_type(MemoryType::CpuGpu);
            let buffer = device.create_buffer(&descriptor, None)?;
            gpu_material.set_buffer(&buffer, slot, reflected.stages, 0);
            buffers.insert(slot, (buffer, layout));
        }

        let restored = bindings.apply(shader.id(), &gpu_material);
        log::debug!(
            "Material '{}': created with {} uniform buffers, {} restored textures",
            name,
            buffers.len(),
            restored
        );

        Ok(Self {
            name,
            shader,
            gpu_material,
            buffers,
            bindings,
        })
    }

    /// Material name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shader the material binds for.
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    /// The binding table.
    pub fn gpu_material(&self) -> &Arc<GpuMaterial> {
        &self.gpu_material
    }

    /// The uniform buffer owned at `slot`.
    pub fn buffer(&self, slot: u32) -> Option<&Arc<Buffer>> {
        self.buffers.get(&slot).map(|(buffer, _)| buffer)
    }

    /// Write `value` into the uniform buffer at `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Layout`] if there is no uniform buffer at
    /// `slot` or `T` is not the type registered for it.
    pub fn update_buffer<T: bytemuck::Pod>(&self, slot: u32, value: &T) -> Result<(), MaterialError> {
        let (buffer, layout) = self.buffers.get(&slot).ok_or_else(|| MaterialError::Layout {
            buffer: format!("{}[{}]", self.name, slot),
            reason: "no uniform buffer at this slot".to_string(),
        })?;
        if layout.type_id != TypeId::of::<T>() {
            return Err(MaterialError::Layout {
                buffer: buffer.name().to_string(),
                reason: format!(
                    "registered as {}, written as {}",
                    layout.type_name,
                    std::any::type_name::<T>()
                ),
            });
        }
        buffer.copy_from(bytemuck::bytes_of(value))?;
        Ok(())
    }

    /// Bind an extra buffer, such as a storage buffer owned elsewhere.
    pub fn set_buffer(&self, slot: u32, buffer: &Arc<Buffer>, stages: ShaderStageFlags) {
        self.gpu_material.set_buffer(buffer, slot, stages, 0);
    }

    /// Bind `texture` at `slot` and remember it for rebuilt materials of the
    /// same shader.
    pub fn set_texture(&self, slot: u32, texture: &Arc<Texture>, mip_level: Option<u32>) {
        self.gpu_material.set_texture(texture, slot, mip_level);
        self.bindings
            .record(self.shader.id(), slot, texture, mip_level);
    }

    /// Publish pending bindings. See [`GpuMaterial::sync`].
    pub fn sync(&self) -> bool {
        self.gpu_material.sync()
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.name)
            .field("shader", &self.shader.name())
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Material: Send, Sync);
