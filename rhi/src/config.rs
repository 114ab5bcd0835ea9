//! Renderer configuration and device limits.

use serde::Deserialize;

use crate::types::Extent2d;

/// Sizes of the maps produced by the environment-map bake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Face size of the environment cubemap.
    pub cubemap_size: u16,
    /// Face size of the diffuse irradiance cubemap.
    pub irradiance_size: u16,
    /// Face size of the base level of the specular prefilter cubemap.
    pub prefilter_size: u16,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            cubemap_size: 1024,
            irradiance_size: 32,
            prefilter_size: 32,
        }
    }
}

/// Paths of the materials the renderer itself depends on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SystemMaterials {
    pub render: String,
    pub skybox: String,
    pub present: String,
    pub equirect_to_cubemap: String,
    pub irradiance: String,
    pub prefilter: String,
}

impl SystemMaterials {
    /// All paths, in load order.
    pub fn paths(&self) -> [&str; 6] {
        [
            &self.render,
            &self.skybox,
            &self.present,
            &self.equirect_to_cubemap,
            &self.irradiance,
            &self.prefilter,
        ]
    }
}

impl Default for SystemMaterials {
    fn default() -> Self {
        Self {
            render: "materials/render.material".into(),
            skybox: "materials/skybox.material".into(),
            present: "materials/present.material".into(),
            equirect_to_cubemap: "materials/equirect_to_cubemap.material".into(),
            irradiance: "materials/envmap_irradiance.material".into(),
            prefilter: "materials/envmap_prefilter.material".into(),
        }
    }
}

/// Top-level renderer configuration.
///
/// Deserializable so an application can keep it next to its other
/// settings; missing fields fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Number of frames recorded ahead of the GPU.
    pub frames_in_flight: usize,
    /// Threads in the background loading pool.
    pub worker_threads: usize,
    /// The render viewport is an editor panel sized independently of the
    /// window.
    pub editor_mode: bool,
    /// Initial window size.
    #[serde(with = "extent_serde")]
    pub window_extent: Extent2d,
    /// Initial size of the offscreen render viewport.
    #[serde(with = "extent_serde")]
    pub viewport_extent: Extent2d,
    /// Enable API validation layers.
    pub validation: bool,
    /// Built-in materials.
    pub system_materials: SystemMaterials,
    /// Environment bake sizes.
    pub environment: EnvironmentConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            worker_threads: 2,
            editor_mode: false,
            window_extent: Extent2d::new(1280, 720),
            viewport_extent: Extent2d::new(1280, 720),
            validation: cfg!(debug_assertions),
            system_materials: SystemMaterials::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the number of loader threads.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Enable or disable editor mode.
    pub fn with_editor_mode(mut self, editor_mode: bool) -> Self {
        self.editor_mode = editor_mode;
        self
    }

    /// Set the initial window extent.
    pub fn with_window_extent(mut self, extent: Extent2d) -> Self {
        self.window_extent = extent;
        self
    }

    /// Set the initial viewport extent.
    pub fn with_viewport_extent(mut self, extent: Extent2d) -> Self {
        self.viewport_extent = extent;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the environment bake sizes.
    pub fn with_environment(mut self, environment: EnvironmentConfig) -> Self {
        self.environment = environment;
        self
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod extent_serde {
    use serde::{Deserialize, Deserializer};

    use crate::types::Extent2d;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Extent2d, D::Error> {
        let [width, height] = <[u32; 2]>::deserialize(deserializer)?;
        Ok(Extent2d::new(width, height))
    }
}

/// Limits reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParameters {
    /// Adapter name.
    pub name: String,
    /// Required alignment of uniform buffer sizes and offsets.
    pub min_uniform_buffer_alignment: u64,
    /// Largest supported sampler anisotropy.
    pub max_anisotropy: f32,
    /// Largest push-constant block in bytes.
    pub max_push_constant_size: u32,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            name: String::from("Dummy Adapter"),
            min_uniform_buffer_alignment: 64,
            max_anisotropy: 16.0,
            max_push_constant_size: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.environment.cubemap_size, 1024);
        assert_eq!(config.environment.irradiance_size, 32);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RenderConfig::from_json(
            r#"{ "frames_in_flight": 3, "editor_mode": true, "viewport_extent": [800, 600] }"#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.editor_mode);
        assert_eq!(config.viewport_extent, Extent2d::new(800, 600));
        assert_eq!(config.window_extent, Extent2d::new(1280, 720));
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_system_material_paths() {
        let materials = SystemMaterials::default();
        assert_eq!(materials.paths().len(), 6);
        assert_eq!(materials.paths()[2], "materials/present.material");
    }
}
