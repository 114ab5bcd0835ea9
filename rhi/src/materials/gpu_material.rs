//! Shader-visible binding table of a material.
//!
//! A [`GpuMaterial`] keeps two views of its bindings: the *pending* writes
//! made by [`set_buffer`](GpuMaterial::set_buffer) and
//! [`set_texture`](GpuMaterial::set_texture), and the *live* table that the
//! GPU descriptor table currently reflects. [`sync`](GpuMaterial::sync) is
//! the only place pending writes reach the GPU.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{
    DescriptorWrite, GpuBackend, GpuDescriptorTable, TextureBindingKind, TextureView,
};
use crate::resources::{Buffer, Texture};
use crate::shader::{BufferKind, Shader, ShaderStageFlags};
use crate::types::TextureLayout;

/// Number of buffer slots of a material.
pub const MAX_BUFFER_SLOTS: u32 = 16;

/// Number of texture slots of a material.
pub const MAX_TEXTURE_SLOTS: u32 = 16;

#[derive(Debug, Clone)]
struct BufferBinding {
    buffer: Weak<Buffer>,
    stages: ShaderStageFlags,
    offset: u64,
}

#[derive(Debug, Clone)]
struct TextureBinding {
    texture: Weak<Texture>,
    mip_level: Option<u32>,
}

#[derive(Debug, Default)]
struct BindingState {
    pending_buffers: Vec<(u32, BufferBinding)>,
    pending_textures: Vec<(u32, TextureBinding)>,
    buffers: [Option<BufferBinding>; MAX_BUFFER_SLOTS as usize],
    textures: [Option<TextureBinding>; MAX_TEXTURE_SLOTS as usize],
    dirty: bool,
    synced: bool,
}

/// A descriptor table built for one shader.
///
/// Bindings are weak: the material never keeps a buffer or texture alive,
/// and a target dropped before [`sync`](Self::sync) is skipped.
pub struct GpuMaterial {
    shader: Arc<Shader>,
    table: GpuDescriptorTable,
    min_uniform_alignment: u64,
    backend: Arc<dyn GpuBackend>,
    state: Mutex<BindingState>,
}

impl GpuMaterial {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        shader: Arc<Shader>,
        table: GpuDescriptorTable,
        min_uniform_alignment: u64,
    ) -> Self {
        Self {
            shader,
            table,
            min_uniform_alignment: min_uniform_alignment.max(1),
            backend,
            state: Mutex::new(BindingState::default()),
        }
    }

    /// The shader this table is laid out for.
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    /// Queue a buffer binding.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range, the shader declares no buffer at
    /// `slot`, or the buffer size is not a multiple of the device's minimum
    /// uniform buffer alignment.
    pub fn set_buffer(
        &self,
        buffer: &Arc<Buffer>,
        slot: u32,
        stages: ShaderStageFlags,
        offset: u64,
    ) {
        assert!(
            slot < MAX_BUFFER_SLOTS,
            "GpuMaterial '{}': buffer slot {} out of range (max {})",
            self.shader.name(),
            slot,
            MAX_BUFFER_SLOTS
        );
        assert!(
            self.shader.reflection().buffers.contains_key(&slot),
            "GpuMaterial '{}': slot {} is not a buffer of the shader",
            self.shader.name(),
            slot
        );
        assert!(
            buffer.size() % self.min_uniform_alignment == 0,
            "GpuMaterial '{}': buffer '{}' size {} is not a multiple of {}",
            self.shader.name(),
            buffer.name(),
            buffer.size(),
            self.min_uniform_alignment
        );
        let mut state = self.state.lock();
        state.pending_buffers.push((
            slot,
            BufferBinding {
                buffer: Arc::downgrade(buffer),
                stages,
                offset,
            },
        ));
        state.dirty = true;
    }

    /// Queue a texture binding. `mip_level` binds a single mip level instead
    /// of the whole chain.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn set_texture(&self, texture: &Arc<Texture>, slot: u32, mip_level: Option<u32>) {
        assert!(
            slot < MAX_TEXTURE_SLOTS,
            "GpuMaterial '{}': texture slot {} out of range (max {})",
            self.shader.name(),
            slot,
            MAX_TEXTURE_SLOTS
        );
        let mut state = self.state.lock();
        state.pending_textures.push((
            slot,
            TextureBinding {
                texture: Arc::downgrade(texture),
                mip_level,
            },
        ));
        state.dirty = true;
    }

    /// Publish pending bindings to the GPU table in one batched update.
    ///
    /// Returns `false` without touching the GPU when nothing changed since
    /// the last sync.
    ///
    /// # Panics
    ///
    /// Panics if a pending texture slot is neither a sampled texture nor a
    /// storage image of the shader.
    pub fn sync(&self) -> bool {
        let mut state = self.state.lock();
        if !state.dirty {
            return false;
        }

        let reflection = self.shader.reflection();
        let pending_buffers = std::mem::take(&mut state.pending_buffers);
        let pending_textures = std::mem::take(&mut state.pending_textures);

        let mut buffers = Vec::with_capacity(pending_buffers.len());
        for (slot, binding) in pending_buffers {
            match binding.buffer.upgrade() {
                Some(buffer) => buffers.push((slot, binding, buffer)),
                None => log::warn!(
                    "GpuMaterial '{}': buffer at slot {} was dropped before sync",
                    self.shader.name(),
                    slot
                ),
            }
        }

        let mut textures = Vec::with_capacity(pending_textures.len());
        for (slot, binding) in pending_textures {
            match binding.texture.upgrade() {
                Some(texture) => textures.push((slot, binding, texture)),
                None => log::warn!(
                    "GpuMaterial '{}': texture at slot {} was dropped before sync",
                    self.shader.name(),
                    slot
                ),
            }
        }

        let mut writes = Vec::with_capacity(buffers.len() + textures.len());
        for (slot, binding, buffer) in &buffers {
            let storage = reflection
                .buffers
                .get(slot)
                .is_some_and(|b| b.kind == BufferKind::Storage);
            writes.push(DescriptorWrite::Buffer {
                slot: *slot,
                buffer: buffer.gpu_handle(),
                offset: binding.offset,
                range: buffer.size().saturating_sub(binding.offset),
                storage,
            });
        }
        for (slot, binding, texture) in &textures {
            let storage = reflection.is_storage_image(*slot);
            let kind = if storage {
                TextureBindingKind::Storage
            } else {
                assert!(
                    reflection.is_sampled_texture(*slot),
                    "GpuMaterial '{}': slot {} is not a texture of the shader",
                    self.shader.name(),
                    slot
                );
                TextureBindingKind::Sampled
            };
            let layout = if storage || texture.format().is_depth_stencil() {
                TextureLayout::General
            } else {
                TextureLayout::ShaderReadOnly
            };
            writes.push(DescriptorWrite::Texture {
                slot: *slot,
                texture: texture.gpu_handle(),
                sampler: texture.sampler().gpu_handle(),
                view: binding.mip_level.map_or(TextureView::Full, TextureView::Mip),
                layout,
                kind,
            });
        }

        if !writes.is_empty() {
            self.backend.update_descriptor_table(&self.table, &writes);
        }
        log::trace!(
            "GpuMaterial '{}': synced {} writes",
            self.shader.name(),
            writes.len()
        );
        drop(writes);

        for (slot, binding, _) in buffers {
            state.buffers[slot as usize] = Some(binding);
        }
        for (slot, binding, _) in textures {
            state.textures[slot as usize] = Some(binding);
        }
        state.dirty = false;
        state.synced = true;
        true
    }

    /// Whether bindings were queued since the last sync.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Whether the table was synced at least once.
    pub fn has_synced(&self) -> bool {
        self.state.lock().synced
    }

    /// The buffer the live table holds at `slot`, if it is still alive.
    pub fn bound_buffer(&self, slot: u32) -> Option<Arc<Buffer>> {
        self.state
            .lock()
            .buffers
            .get(slot as usize)?
            .as_ref()?
            .buffer
            .upgrade()
    }

    /// Stages the live buffer binding at `slot` is visible to.
    pub fn bound_buffer_stages(&self, slot: u32) -> Option<ShaderStageFlags> {
        self.state
            .lock()
            .buffers
            .get(slot as usize)?
            .as_ref()
            .map(|b| b.stages)
    }

    /// The texture the live table holds at `slot`, if it is still alive.
    pub fn bound_texture(&self, slot: u32) -> Option<Arc<Texture>> {
        self.state
            .lock()
            .textures
            .get(slot as usize)?
            .as_ref()?
            .texture
            .upgrade()
    }

    pub(crate) fn table(&self) -> &GpuDescriptorTable {
        &self.table
    }
}

impl std::fmt::Debug for GpuMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GpuMaterial")
            .field("shader", &self.shader.name())
            .field("dirty", &state.dirty)
            .field("synced", &state.synced)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(GpuMaterial: Send, Sync);
