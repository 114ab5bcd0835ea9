//! Texture bindings remembered per shader.
//!
//! Rebuilding a pipeline (for example on resize) creates a fresh
//! [`Material`](super::Material) with an empty binding table. Textures the
//! application bound to the previous material are recorded here, keyed by
//! shader identity, and re-applied to every new material of that shader.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::resources::Texture;
use crate::shader::ShaderId;

use super::GpuMaterial;

#[derive(Debug, Clone)]
struct StoredTexture {
    texture: Weak<Texture>,
    mip_level: Option<u32>,
}

/// Shader-keyed record of texture bindings.
///
/// Entries are weak; a texture dropped by its owner is forgotten the next
/// time the shader's bindings are applied.
#[derive(Debug, Default)]
pub struct TextureBindingStore {
    bindings: Mutex<HashMap<ShaderId, HashMap<u32, StoredTexture>>>,
}

impl TextureBindingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `texture` is bound at `slot` for `shader`.
    pub fn record(
        &self,
        shader: ShaderId,
        slot: u32,
        texture: &Arc<Texture>,
        mip_level: Option<u32>,
    ) {
        self.bindings.lock().entry(shader).or_default().insert(
            slot,
            StoredTexture {
                texture: Arc::downgrade(texture),
                mip_level,
            },
        );
    }

    /// Queue every remembered texture of `shader` on `material`.
    ///
    /// Returns the number of textures applied.
    pub fn apply(&self, shader: ShaderId, material: &GpuMaterial) -> usize {
        let mut bindings = self.bindings.lock();
        let Some(slots) = bindings.get_mut(&shader) else {
            return 0;
        };
        slots.retain(|_, stored| stored.texture.strong_count() > 0);

        let mut applied = 0;
        for (slot, stored) in slots.iter() {
            if let Some(texture) = stored.texture.upgrade() {
                material.set_texture(&texture, *slot, stored.mip_level);
                applied += 1;
            }
        }
        applied
    }

    /// Texture remembered at `slot` for `shader`, if still alive.
    pub fn get(&self, shader: ShaderId, slot: u32) -> Option<Arc<Texture>> {
        self.bindings
            .lock()
            .get(&shader)?
            .get(&slot)?
            .texture
            .upgrade()
    }

    /// Forget everything remembered for `shader`.
    pub fn clear(&self, shader: ShaderId) {
        self.bindings.lock().remove(&shader);
    }
}
