//! Registered CPU-side layouts of shader uniform blocks.
//!
//! Materials create one GPU buffer per reflected uniform block. The block's
//! name is looked up here to find the Rust type that mirrors it, so
//! [`Material::update_buffer`](crate::materials::Material::update_buffer)
//! can check that the value written has the size the shader expects.

use std::any::TypeId;
use std::collections::HashMap;

use crate::error::MaterialError;

use super::ReflectedBuffer;

/// Registered layout of one uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Size in bytes.
    pub size: u64,
    /// Rust type mirroring the block.
    pub type_id: TypeId,
    /// Name of the Rust type, for diagnostics.
    pub type_name: &'static str,
}

impl BufferLayout {
    /// Layout of `T`.
    pub fn of<T: bytemuck::Pod>() -> Self {
        Self {
            size: std::mem::size_of::<T>() as u64,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Static table of uniform block name to layout.
///
/// # Example
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// struct CameraUniforms { view_proj: [[f32; 4]; 4] }
///
/// let layouts = BufferLayoutRegistry::new().with::<CameraUniforms>("Camera");
/// ```
#[derive(Debug, Clone, Default)]
pub struct BufferLayoutRegistry {
    layouts: HashMap<String, BufferLayout>,
}

impl BufferLayoutRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as the layout of the block called `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered with a different type.
    pub fn with<T: bytemuck::Pod>(mut self, name: impl Into<String>) -> Self {
        self.register::<T>(name);
        self
    }

    /// Register `T` as the layout of the block called `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered with a different type.
    pub fn register<T: bytemuck::Pod>(&mut self, name: impl Into<String>) {
        let name = name.into();
        let layout = BufferLayout::of::<T>();
        if let Some(existing) = self.layouts.get(&name) {
            assert!(
                existing.type_id == layout.type_id,
                "BufferLayoutRegistry: '{name}' is already registered as {}",
                existing.type_name
            );
            return;
        }
        self.layouts.insert(name, layout);
    }

    /// Layout registered for `name`.
    pub fn get(&self, name: &str) -> Option<&BufferLayout> {
        self.layouts.get(name)
    }

    /// Number of registered layouts.
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Find the layout for a reflected block and check its size.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Layout`] if the block is not registered or
    /// its reflected size differs from the registered type.
    pub fn resolve(&self, buffer: &ReflectedBuffer) -> Result<&BufferLayout, MaterialError> {
        let layout = self.get(&buffer.name).ok_or_else(|| MaterialError::Layout {
            buffer: buffer.name.clone(),
            reason: "no layout registered".to_string(),
        })?;
        if layout.size != buffer.size {
            return Err(MaterialError::Layout {
                buffer: buffer.name.clone(),
                reason: format!(
                    "shader declares {} bytes, {} is {} bytes",
                    buffer.size, layout.type_name, layout.size
                ),
            });
        }
        Ok(layout)
    }
}
