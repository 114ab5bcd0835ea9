//! Shared fixtures for the integration tests.
//!
//! Everything runs on the dummy backend: a scripted [`ShaderCompiler`]
//! stands in for the GLSL toolchain and material files live in a
//! [`MemorySource`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use redlilium_rhi::environment::{PREFILTER_BLOCK, PrefilterUniforms};
use redlilium_rhi::shader::{
    ReflectedBuffer, ReflectedTexture, ShaderStageFlags, VertexInputLayout,
};
use redlilium_rhi::{
    BufferLayoutRegistry, CompiledShader, DummyBackend, Extent2d, GraphicsDevice, GraphicsError,
    MaterialLoader, MemorySource, RenderConfig, RenderThread, ShaderCompiler, ShaderReflection,
    ShaderStage, ShaderType, WorkerPool,
};

/// Uniform block of the scene shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
}

pub const RENDER: &str = "materials/render.material";
pub const SKYBOX: &str = "materials/skybox.material";
pub const PRESENT: &str = "materials/present.material";
pub const EQUIRECT: &str = "materials/equirect_to_cubemap.material";
pub const IRRADIANCE: &str = "materials/envmap_irradiance.material";
pub const PREFILTER: &str = "materials/envmap_prefilter.material";

// ============================================================================
// Shader compiler
// ============================================================================

/// Compiler returning canned output per shader path.
///
/// Counts compiles per path and can be told to fail a path or to take a
/// while, which widens race windows in concurrency tests.
#[derive(Default)]
pub struct ScriptedCompiler {
    outputs: Mutex<HashMap<String, CompiledShader>>,
    failing: Mutex<Vec<String>>,
    compiles: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiler knowing every shader of [`system_source`].
    pub fn with_system_shaders() -> Self {
        let compiler = Self::new();
        compiler.insert("shaders/render.glsl", scene_shader());
        compiler.insert("shaders/skybox.glsl", skybox_shader());
        compiler.insert("shaders/present.glsl", present_shader());
        compiler.insert("shaders/equirect_to_cubemap.comp", bake_shader(false));
        compiler.insert("shaders/envmap_irradiance.comp", bake_shader(false));
        compiler.insert("shaders/envmap_prefilter.comp", bake_shader(true));
        compiler
    }

    pub fn insert(&self, path: &str, output: CompiledShader) {
        self.outputs.lock().insert(path.to_string(), output);
    }

    pub fn fail(&self, path: &str) {
        self.failing.lock().push(path.to_string());
    }

    pub fn heal(&self, path: &str) {
        self.failing.lock().retain(|p| p != path);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of compiles of `path` so far.
    pub fn compile_count(&self, path: &str) -> usize {
        self.compiles.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_compiles(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ShaderCompiler for ScriptedCompiler {
    fn compile(
        &self,
        path: &str,
        _shader_type: ShaderType,
    ) -> Result<CompiledShader, GraphicsError> {
        *self.compiles.lock().entry(path.to_string()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }
        if self.failing.lock().iter().any(|p| p == path) {
            return Err(GraphicsError::ShaderCompilationFailed(format!(
                "{path}: syntax error"
            )));
        }
        self.outputs.lock().get(path).cloned().ok_or_else(|| {
            GraphicsError::ShaderCompilationFailed(format!("{path}: file not found"))
        })
    }
}

/// Vertex + fragment program with a camera block and one color output.
pub fn scene_shader() -> CompiledShader {
    let both = ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT;
    CompiledShader::default()
        .with_stage(
            ShaderStage::Vertex,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_buffer(0, ReflectedBuffer::uniform("Camera", 64, both))
                .with_vertex_input(VertexInputLayout::from_components(&[3, 3, 2])),
        )
        .with_stage(
            ShaderStage::Fragment,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_buffer(0, ReflectedBuffer::uniform("Camera", 64, both))
                .with_texture(1, ReflectedTexture::new("albedo", ShaderStageFlags::FRAGMENT))
                .with_output_count(1),
        )
}

/// Program sampling an environment cubemap.
pub fn skybox_shader() -> CompiledShader {
    CompiledShader::default()
        .with_stage(
            ShaderStage::Vertex,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_vertex_input(VertexInputLayout::from_components(&[3])),
        )
        .with_stage(
            ShaderStage::Fragment,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_texture(0, ReflectedTexture::new("environment", ShaderStageFlags::FRAGMENT))
                .with_output_count(1),
        )
}

/// Full-screen program copying slot 0 to the swapchain.
pub fn present_shader() -> CompiledShader {
    CompiledShader::default()
        .with_stage(
            ShaderStage::Vertex,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_vertex_input(VertexInputLayout::from_components(&[3, 2])),
        )
        .with_stage(
            ShaderStage::Fragment,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_texture(0, ReflectedTexture::new("scene", ShaderStageFlags::FRAGMENT))
                .with_output_count(1),
        )
}

/// Compute program writing slot 0 from slot 1.
pub fn bake_shader(with_roughness: bool) -> CompiledShader {
    let mut reflection = ShaderReflection::default()
        .with_storage_image(0, ReflectedTexture::new("destination", ShaderStageFlags::COMPUTE))
        .with_texture(1, ReflectedTexture::new("source", ShaderStageFlags::COMPUTE));
    if with_roughness {
        reflection = reflection.with_buffer(
            2,
            ReflectedBuffer::uniform(PREFILTER_BLOCK, 16, ShaderStageFlags::COMPUTE),
        );
    }
    CompiledShader::default().with_stage(ShaderStage::Compute, vec![0x0723_0203], reflection)
}

/// Every uniform block used by the fixture shaders.
pub fn layouts() -> BufferLayoutRegistry {
    BufferLayoutRegistry::new()
        .with::<CameraUniforms>("Camera")
        .with::<PrefilterUniforms>(PREFILTER_BLOCK)
}

// ============================================================================
// Material files
// ============================================================================

/// A graphics material with its own color and depth attachments.
pub fn graphics_material(name: &str, shader: &str, offscreen: bool) -> String {
    format!(
        r#"{{
            "name": "{name}",
            "shader": "{shader}",
            "version": 1,
            "offscreen": {offscreen},
            "attachments": [ {{ "loadOperation": "CLEAR", "storeOperation": "STORE" }} ],
            "depthAttachment": {{ "loadOperation": "CLEAR", "storeOperation": "STORE" }}
        }}"#
    )
}

/// A graphics material drawing into `owner`'s color 0 and depth.
pub fn dependent_material(name: &str, shader: &str, owner: &str) -> String {
    format!(
        r#"{{
            "name": "{name}",
            "shader": "{shader}",
            "version": 1,
            "attachments": [ {{ "loadOperation": "LOAD", "storeOperation": "STORE",
                "dependency": {{ "path": "{owner}", "index": 0 }} }} ],
            "depthAttachment": {{ "loadOperation": "LOAD", "storeOperation": "STORE",
                "dependency": {{ "path": "{owner}", "index": 0 }} }}
        }}"#
    )
}

pub fn compute_material(name: &str, shader: &str) -> String {
    format!(
        r#"{{ "name": "{name}", "shader": "{shader}", "version": 1, "compute": true }}"#
    )
}

/// The six system materials.
pub fn system_source() -> MemorySource {
    MemorySource::new()
        .with(RENDER, graphics_material("Render", "shaders/render.glsl", true))
        .with(SKYBOX, dependent_material("Skybox", "shaders/skybox.glsl", RENDER))
        .with(
            PRESENT,
            r#"{ "name": "Present", "shader": "shaders/present.glsl", "version": 1,
                 "offscreen": false }"#,
        )
        .with(EQUIRECT, compute_material("EquirectToCubemap", "shaders/equirect_to_cubemap.comp"))
        .with(IRRADIANCE, compute_material("Irradiance", "shaders/envmap_irradiance.comp"))
        .with(PREFILTER, compute_material("Prefilter", "shaders/envmap_prefilter.comp"))
}

// ============================================================================
// Loader harness
// ============================================================================

/// A loader running on a dummy device, plus handles to inspect it.
pub struct Harness {
    pub backend: Arc<DummyBackend>,
    pub render: Arc<RenderThread>,
    pub workers: Arc<WorkerPool>,
    pub source: MemorySource,
    pub compiler: Arc<ScriptedCompiler>,
    pub loader: MaterialLoader,
}

impl Harness {
    pub fn new(source: MemorySource, compiler: ScriptedCompiler) -> Self {
        Self::with_backend(DummyBackend::new(), source, compiler, 4)
    }

    pub fn with_backend(
        backend: DummyBackend,
        source: MemorySource,
        compiler: ScriptedCompiler,
        worker_threads: usize,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(backend);
        let extent = Extent2d::new(320, 240);
        let device = GraphicsDevice::new(backend.clone(), 2, extent).unwrap();
        let render = Arc::new(RenderThread::spawn(device).unwrap());
        let workers = Arc::new(WorkerPool::new("test-loader", worker_threads).unwrap());
        let compiler = Arc::new(compiler);
        let loader = MaterialLoader::new(
            Arc::clone(&render),
            Arc::clone(&workers),
            Arc::new(source.clone()),
            compiler.clone(),
            layouts(),
            extent,
            extent,
        );
        Self {
            backend,
            render,
            workers,
            source,
            compiler,
            loader,
        }
    }
}

/// Configuration for contexts in tests: small extents, no validation.
pub fn test_config() -> RenderConfig {
    RenderConfig::new()
        .with_window_extent(Extent2d::new(320, 240))
        .with_viewport_extent(Extent2d::new(320, 240))
        .with_worker_threads(2)
        .with_validation(false)
}
