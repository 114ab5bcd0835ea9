//! Image-based lighting maps baked from an equirectangular environment.
//!
//! Three immediate compute stages run back to back:
//!
//! 1. equirectangular source → environment cubemap
//! 2. environment cubemap → diffuse irradiance cubemap
//! 3. environment cubemap → specular prefilter cubemap, one dispatch per mip
//!
//! Each stage's material binds its destination as a storage image at slot
//! [`DESTINATION_SLOT`] and its input as a sampled texture at
//! [`SOURCE_SLOT`]. A prefilter shader declaring a uniform block named
//! [`PREFILTER_BLOCK`] gets the mip's roughness written into it before each
//! dispatch; register [`PrefilterUniforms`] under that name.

use std::sync::Arc;

use crate::config::{EnvironmentConfig, SystemMaterials};
use crate::device::GraphicsDevice;
use crate::error::MaterialError;
use crate::loader::{LoadedMaterial, MaterialLoader, MaterialResource};
use crate::resource::ResourceStatus;
use crate::resources::{Pipeline, Texture};
use crate::types::{CUBEMAP_FACES, TextureDescriptor, TextureFormat, TextureUsage};

/// Material slot of the storage image written by a stage.
pub const DESTINATION_SLOT: u32 = 0;

/// Material slot of the texture read by a stage.
pub const SOURCE_SLOT: u32 = 1;

/// Local work-group size of the bake shaders along x and y.
pub const WORKGROUP_SIZE: u32 = 32;

/// Format of every baked cubemap.
pub const ENVIRONMENT_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Name of the prefilter shader's uniform block.
pub const PREFILTER_BLOCK: &str = "Prefilter";

/// Uniform block of the prefilter stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrefilterUniforms {
    /// 0 at mip 0 up to 1 at the last mip.
    pub roughness: f32,
    pub _pad: [f32; 3],
}

impl PrefilterUniforms {
    /// Uniforms for `mip_level` of a texture with `mip_levels` mips.
    pub fn for_mip(mip_level: u32, mip_levels: u32) -> Self {
        let roughness = if mip_levels > 1 {
            mip_level as f32 / (mip_levels - 1) as f32
        } else {
            0.0
        };
        Self {
            roughness,
            _pad: [0.0; 3],
        }
    }
}

/// The baked maps.
#[derive(Debug, Clone)]
pub struct EnvironmentMaps {
    /// Environment as a cubemap.
    pub cubemap: Arc<Texture>,
    /// Diffuse irradiance.
    pub irradiance: Arc<Texture>,
    /// Specular prefilter, one roughness level per mip.
    pub prefilter: Arc<Texture>,
}

/// Work groups needed to cover `size >> mip_level` pixels, at least one.
pub fn group_count(size: u32, mip_level: u32) -> u32 {
    (size >> mip_level).max(1).div_ceil(WORKGROUP_SIZE).max(1)
}

/// Runs the environment bake with the three bake materials.
///
/// Created from a [`MaterialLoader`]; [`bake`](Self::bake) runs on the
/// render thread once the materials are ready.
#[derive(Clone)]
pub struct EnvironmentMapBaker {
    loader: MaterialLoader,
    equirect_to_cubemap: Arc<MaterialResource>,
    irradiance: Arc<MaterialResource>,
    prefilter: Arc<MaterialResource>,
    config: EnvironmentConfig,
}

struct Stage {
    pipeline: Arc<Pipeline>,
    loaded: Arc<LoadedMaterial>,
}

impl EnvironmentMapBaker {
    /// Request the bake materials from `loader`. Does not wait for them.
    pub fn new(
        loader: &MaterialLoader,
        materials: &SystemMaterials,
        config: EnvironmentConfig,
    ) -> Self {
        Self {
            loader: loader.clone(),
            equirect_to_cubemap: loader.load(&materials.equirect_to_cubemap),
            irradiance: loader.load(&materials.irradiance),
            prefilter: loader.load(&materials.prefilter),
            config,
        }
    }

    /// Block until the bake materials finished loading.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Dependency`] for the first material that
    /// failed.
    pub fn wait_ready(&self) -> Result<(), MaterialError> {
        for resource in self.resources() {
            if resource.wait() == ResourceStatus::Failed {
                return Err(MaterialError::Dependency {
                    path: resource.path().to_string(),
                    reason: resource
                        .error()
                        .map_or_else(|| "failed to load".to_string(), |e| e.to_string()),
                });
            }
        }
        Ok(())
    }

    /// Bake the maps from an equirectangular `source` texture.
    ///
    /// Must run on the render thread. Every stage is submitted and waited
    /// for before the next one starts.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Dependency`] if a bake material is not
    /// ready or is not a compute material, [`MaterialError::Layout`] if the
    /// prefilter block is not registered as [`PrefilterUniforms`], and
    /// [`MaterialError::Device`] if the device fails.
    pub fn bake(
        &self,
        device: &GraphicsDevice,
        source: &Arc<Texture>,
    ) -> Result<EnvironmentMaps, MaterialError> {
        let equirect = self.stage(&self.equirect_to_cubemap)?;
        let irradiance_stage = self.stage(&self.irradiance)?;
        let prefilter_stage = self.stage(&self.prefilter)?;

        let cubemap = create_cubemap(device, "EnvironmentCubemap", self.config.cubemap_size, false)?;
        run_stage(device, &equirect, source, &cubemap, 0)?;

        let irradiance = create_cubemap(
            device,
            "EnvironmentIrradiance",
            self.config.irradiance_size,
            false,
        )?;
        run_stage(device, &irradiance_stage, &cubemap, &irradiance, 0)?;

        let prefilter = create_cubemap(
            device,
            "EnvironmentPrefilter",
            self.config.prefilter_size,
            true,
        )?;
        let roughness_slot = prefilter_stage
            .loaded
            .shader()
            .reflection()
            .buffers
            .iter()
            .find(|(_, buffer)| buffer.name == PREFILTER_BLOCK)
            .map(|(slot, _)| *slot);
        for mip_level in 0..prefilter.mip_levels() {
            if let Some(slot) = roughness_slot {
                prefilter_stage.loaded.material().update_buffer(
                    slot,
                    &PrefilterUniforms::for_mip(mip_level, prefilter.mip_levels()),
                )?;
            }
            run_stage(device, &prefilter_stage, &cubemap, &prefilter, mip_level)?;
        }

        log::info!(
            "EnvironmentMapBaker: baked '{}' ({} prefilter mips)",
            source.name(),
            prefilter.mip_levels()
        );
        Ok(EnvironmentMaps {
            cubemap,
            irradiance,
            prefilter,
        })
    }

    fn resources(&self) -> [&Arc<MaterialResource>; 3] {
        [&self.equirect_to_cubemap, &self.irradiance, &self.prefilter]
    }

    fn stage(&self, resource: &MaterialResource) -> Result<Stage, MaterialError> {
        let not_ready = |reason: &str| MaterialError::Dependency {
            path: resource.path().to_string(),
            reason: reason.to_string(),
        };
        let loaded = resource.get().ok_or_else(|| not_ready("is not loaded"))?;
        let pipeline = self
            .loader
            .pipeline(resource)
            .ok_or_else(|| not_ready("has no pipeline"))?;
        if !pipeline.is_compute() {
            return Err(not_ready("is not a compute material"));
        }
        Ok(Stage { pipeline, loaded })
    }
}

impl std::fmt::Debug for EnvironmentMapBaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentMapBaker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn create_cubemap(
    device: &GraphicsDevice,
    name: &str,
    size: u16,
    mipmapped: bool,
) -> Result<Arc<Texture>, MaterialError> {
    let mut descriptor = TextureDescriptor::new_cubemap(size.max(1), ENVIRONMENT_FORMAT)
        .with_name(name)
        .with_usage(TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING);
    if mipmapped {
        descriptor = descriptor.with_mipmaps();
    }
    Ok(device.create_texture(&descriptor, None, None)?)
}

/// Write `destination` (at `mip_level`) from `source` with one immediate
/// dispatch.
fn run_stage(
    device: &GraphicsDevice,
    stage: &Stage,
    source: &Arc<Texture>,
    destination: &Arc<Texture>,
    mip_level: u32,
) -> Result<(), MaterialError> {
    let Some(pass) = stage.pipeline.compute_pass() else {
        return Err(MaterialError::Dependency {
            path: stage.loaded.definition().name.clone(),
            reason: "is not a compute material".to_string(),
        });
    };
    pass.set_textures(vec![Arc::clone(source)]);
    pass.set_storage_textures(vec![Arc::clone(destination)]);

    let material = stage.loaded.material();
    let mip_view = (destination.mip_levels() > 1).then_some(mip_level);
    material.set_texture(DESTINATION_SLOT, destination, mip_view);
    material.set_texture(SOURCE_SLOT, source, None);
    material.sync();

    let state = device.begin_compute_pipeline_immediate(&stage.pipeline)?;
    device.bind_gpu_material_immediate(&state, material.gpu_material(), &stage.pipeline);
    device.dispatch_immediate(
        &state,
        group_count(destination.width(), mip_level),
        group_count(destination.height(), mip_level),
        u32::from(CUBEMAP_FACES),
    );
    device.end_compute_pipeline_immediate(&stage.pipeline, state)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1024, 0, 32)]
    #[case(32, 0, 1)]
    #[case(32, 3, 1)]
    #[case(48, 0, 2)]
    #[case(1, 0, 1)]
    fn test_group_count(#[case] size: u32, #[case] mip: u32, #[case] expected: u32) {
        assert_eq!(group_count(size, mip), expected);
    }

    #[rstest]
    #[case(0, 6, 0.0)]
    #[case(5, 6, 1.0)]
    #[case(2, 5, 0.5)]
    #[case(0, 1, 0.0)]
    fn test_prefilter_roughness(#[case] mip: u32, #[case] mips: u32, #[case] roughness: f32) {
        assert_eq!(PrefilterUniforms::for_mip(mip, mips).roughness, roughness);
    }
}
