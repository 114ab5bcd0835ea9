//! Material system.
//!
//! This module provides a two-level material abstraction:
//!
//! - [`GpuMaterial`] - the shader-visible binding table, synchronized
//!   explicitly with [`GpuMaterial::sync`]
//! - [`Material`] - a binding table plus the uniform buffers it owns,
//!   created by the material loader
//!
//! Bindings are weak references; materials never keep buffers or textures
//! alive on their own.

mod bindings;
mod gpu_material;
mod material;

pub use bindings::TextureBindingStore;
pub use gpu_material::{GpuMaterial, MAX_BUFFER_SLOTS, MAX_TEXTURE_SLOTS};
pub use material::Material;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::GraphicsDevice;
    use crate::shader::{
        BufferLayoutRegistry, CompiledShader, ReflectedBuffer, ReflectedTexture, ShaderDescriptor,
        ShaderReflection, ShaderStage, ShaderStageFlags, ShaderType,
    };
    use crate::types::{BufferDescriptor, Extent2d, TextureDescriptor, TextureFormat};

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Tint {
        color: [f32; 4],
    }

    fn setup() -> (Arc<DummyBackend>, GraphicsDevice, Arc<crate::shader::Shader>) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(backend.clone(), 2, Extent2d::new(16, 16)).unwrap();
        let vertex = ShaderReflection::default()
            .with_buffer(0, ReflectedBuffer::uniform("Tint", 16, ShaderStageFlags::VERTEX));
        let fragment = ShaderReflection::default()
            .with_buffer(0, ReflectedBuffer::uniform("Tint", 16, ShaderStageFlags::FRAGMENT))
            .with_texture(1, ReflectedTexture::new("albedo", ShaderStageFlags::FRAGMENT))
            .with_texture(2, ReflectedTexture::new("shadow", ShaderStageFlags::FRAGMENT))
            .with_output_count(1);
        let compiled = CompiledShader::default()
            .with_stage(ShaderStage::Vertex, vec![0], vertex)
            .with_stage(ShaderStage::Fragment, vec![0], fragment);
        let shader = device
            .create_shader(ShaderDescriptor::from_compiled(
                "tinted",
                "shaders/tinted.glsl",
                ShaderType::Fx,
                compiled,
            ))
            .unwrap();
        (backend, device, shader)
    }

    fn texture(device: &GraphicsDevice, format: TextureFormat) -> Arc<crate::resources::Texture> {
        device
            .create_texture(&TextureDescriptor::new_2d(4, 4, format), None, None)
            .unwrap()
    }

    #[test]
    fn test_sync_is_idempotent() {
        let (backend, device, shader) = setup();
        let material = device.create_gpu_material(&shader).unwrap();
        let albedo = texture(&device, TextureFormat::Rgba8Unorm);

        assert!(!material.sync());
        assert_eq!(backend.descriptor_update_count(), 0);

        material.set_texture(&albedo, 1, None);
        assert!(material.is_dirty());
        assert!(material.bound_texture(1).is_none());
        assert!(material.sync());
        assert!(!material.sync());
        assert_eq!(backend.descriptor_update_count(), 1);
        assert!(Arc::ptr_eq(&material.bound_texture(1).unwrap(), &albedo));
    }

    #[test]
    fn test_sync_batches_pending_writes() {
        let (backend, device, shader) = setup();
        let material = device.create_gpu_material(&shader).unwrap();
        let albedo = texture(&device, TextureFormat::Rgba8Unorm);
        let shadow = texture(&device, TextureFormat::Depth32Float);
        let buffer = device
            .create_buffer(&BufferDescriptor::uniform(64), None)
            .unwrap();

        material.set_buffer(&buffer, 0, ShaderStageFlags::VERTEX_FRAGMENT, 0);
        material.set_texture(&albedo, 1, None);
        material.set_texture(&shadow, 2, None);
        assert!(material.sync());

        assert_eq!(backend.descriptor_update_count(), 1);
        assert_eq!(backend.descriptor_write_count(), 3);
        assert_eq!(
            material.bound_buffer_stages(0),
            Some(ShaderStageFlags::VERTEX_FRAGMENT)
        );
    }

    #[test]
    fn test_expired_binding_is_skipped() {
        let (backend, device, shader) = setup();
        let material = device.create_gpu_material(&shader).unwrap();
        let kept = texture(&device, TextureFormat::Rgba8Unorm);
        let dropped = texture(&device, TextureFormat::Rgba8Unorm);

        material.set_texture(&kept, 1, None);
        material.set_texture(&dropped, 2, None);
        drop(dropped);

        assert!(material.sync());
        assert_eq!(backend.descriptor_write_count(), 1);
        assert!(material.bound_texture(2).is_none());
    }

    #[test]
    #[should_panic(expected = "not a multiple of 64")]
    fn test_unaligned_buffer_panics() {
        let (_, device, shader) = setup();
        let material = device.create_gpu_material(&shader).unwrap();
        let buffer = device
            .create_buffer(&BufferDescriptor::uniform(16), None)
            .unwrap();
        material.set_buffer(&buffer, 0, ShaderStageFlags::VERTEX, 0);
    }

    #[test]
    #[should_panic(expected = "slot 5 is not a buffer of the shader")]
    fn test_undeclared_buffer_slot_panics() {
        let (_, device, shader) = setup();
        let material = device.create_gpu_material(&shader).unwrap();
        let buffer = device
            .create_buffer(&BufferDescriptor::uniform(64), None)
            .unwrap();
        material.set_buffer(&buffer, 5, ShaderStageFlags::VERTEX, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_texture_slot_out_of_range_panics() {
        let (_, device, shader) = setup();
        let material = device.create_gpu_material(&shader).unwrap();
        let albedo = texture(&device, TextureFormat::Rgba8Unorm);
        material.set_texture(&albedo, MAX_TEXTURE_SLOTS, None);
    }

    #[test]
    fn test_material_creates_uniform_buffers() {
        let (backend, device, shader) = setup();
        let layouts = BufferLayoutRegistry::new().with::<Tint>("Tint");
        let store = Arc::new(TextureBindingStore::new());
        let material = Material::new(&device, "tinted", shader, &layouts, store).unwrap();

        let buffer = material.buffer(0).unwrap();
        assert_eq!(buffer.name(), "Tint");
        assert_eq!(buffer.size(), 64);

        let tint = Tint {
            color: [1.0, 0.5, 0.25, 1.0],
        };
        material.update_buffer(0, &tint).unwrap();
        assert_eq!(
            &backend.buffer_contents(buffer)[..16],
            bytemuck::bytes_of(&tint)
        );
        assert!(material.update_buffer(0, &[0u32; 4]).is_err());
        assert!(material.sync());
    }

    #[test]
    fn test_material_requires_registered_layout() {
        let (_, device, shader) = setup();
        let store = Arc::new(TextureBindingStore::new());
        let result = Material::new(&device, "tinted", shader, &BufferLayoutRegistry::new(), store);
        assert!(matches!(result, Err(crate::error::MaterialError::Layout { .. })));
    }

    #[test]
    fn test_rebuilt_material_restores_textures() {
        let (_, device, shader) = setup();
        let layouts = BufferLayoutRegistry::new().with::<Tint>("Tint");
        let store = Arc::new(TextureBindingStore::new());
        let albedo = texture(&device, TextureFormat::Rgba8Unorm);

        let first = Material::new(&device, "tinted", shader.clone(), &layouts, store.clone()).unwrap();
        first.set_texture(1, &albedo, None);
        first.sync();

        let rebuilt = Material::new(&device, "tinted", shader, &layouts, store).unwrap();
        rebuilt.sync();
        assert!(Arc::ptr_eq(
            &rebuilt.gpu_material().bound_texture(1).unwrap(),
            &albedo
        ));
    }
}
