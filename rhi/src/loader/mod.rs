//! Material loading.
//!
//! The [`MaterialLoader`] turns material files into ready-to-bind
//! [`Pipeline`] + [`Material`] pairs in the background:
//!
//! - [`load`](MaterialLoader::load) is single-flight: every call for a path
//!   returns the same [`MaterialResource`], and exactly one load runs for it.
//! - Compiled shaders are cached by shader source path, so materials sharing
//!   a shader compile it once.
//! - Pipelines are cached by [`ShaderId`]. A material whose shader already
//!   has a pipeline reuses it; a forced rebuild replaces the cache entry.
//! - An attachment with a dependency reuses the texture another material's
//!   pass already allocated. Waiting on a dependency whose load has not
//!   started runs it inline, and a wait that would close a cycle fails the
//!   load instead of blocking forever.
//! - [`resize_pipelines`](MaterialLoader::resize_pipelines) rebuilds every
//!   ready offscreen or on-screen material at a new extent and returns once
//!   all of them are rebuilt. Materials sharing a shader share the one
//!   rebuilt pipeline.
//!
//! All device work is marshalled to the [`RenderThread`]; loads run on a
//! [`WorkerPool`].

mod definition;
mod source;

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SystemMaterials;
use crate::error::{GraphicsError, MaterialError};
use crate::materials::{Material, TextureBindingStore};
use crate::render_thread::{RenderThread, panic_message};
use crate::resource::{Resource, ResourceStatus};
use crate::resources::{ComputePass, Pipeline, PipelineDescriptor, Texture};
use crate::shader::{BufferLayoutRegistry, Shader, ShaderCompiler, ShaderDescriptor, ShaderId};
use crate::types::{
    AttachmentDescriptor, Extent2d, RenderPassDescriptor, TextureDescriptor, TextureFormat,
    TextureUsage,
};
use crate::worker::WorkerPool;

pub use definition::{AttachmentDefinition, DependencyDefinition, MaterialDefinition};
pub use source::{FileSystemSource, MaterialSource, MemorySource};

/// Format of color attachments allocated for graphics materials.
pub const COLOR_ATTACHMENT_FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;

/// Format of depth attachments allocated for graphics materials.
pub const DEPTH_ATTACHMENT_FORMAT: TextureFormat = TextureFormat::Depth32FloatStencil8;

/// A loaded material file: its definition and the material built from it.
#[derive(Debug)]
pub struct LoadedMaterial {
    definition: MaterialDefinition,
    material: Material,
}

impl LoadedMaterial {
    /// The parsed material file.
    pub fn definition(&self) -> &MaterialDefinition {
        &self.definition
    }

    /// The material.
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// The material's shader.
    pub fn shader(&self) -> &Arc<Shader> {
        self.material.shader()
    }
}

/// Handle to a material load.
pub type MaterialResource = Resource<LoadedMaterial>;

/// Materials rebuilt by one [`MaterialLoader::resize_pipelines`] call.
struct ResizeCohort {
    members: HashMap<String, CohortMember>,
}

struct CohortMember {
    resource: Arc<MaterialResource>,
    /// Member that allocates the pipeline of a shared shader. `None` for
    /// the leader itself.
    leader: Option<String>,
    /// Completed once the rebuild finished, with whether it succeeded.
    rebuilt: Resource<bool>,
}

#[derive(Clone, Default)]
struct LoadContext {
    /// Allocate a new pipeline even if the shader already has one.
    force: bool,
    cohort: Option<Arc<ResizeCohort>>,
}

#[derive(Debug, Clone, Copy)]
enum AttachmentKind {
    Color,
    Depth,
}

#[derive(Debug, Clone, Copy)]
struct TargetExtents {
    viewport: Extent2d,
    window: Extent2d,
}

struct LoaderShared {
    render: Arc<RenderThread>,
    workers: Arc<WorkerPool>,
    source: Arc<dyn MaterialSource>,
    compiler: Arc<dyn ShaderCompiler>,
    layouts: Arc<BufferLayoutRegistry>,
    bindings: Arc<TextureBindingStore>,
    materials: Mutex<HashMap<String, Arc<MaterialResource>>>,
    shaders: Mutex<HashMap<String, Arc<Resource<Shader>>>>,
    pipelines: Mutex<HashMap<ShaderId, Arc<Pipeline>>>,
    /// Material paths currently blocked on other material paths.
    waits: Mutex<HashMap<String, Vec<String>>>,
    extents: Mutex<TargetExtents>,
}

/// Loads material files and owns the shader, pipeline and material caches.
///
/// Cloning is cheap and shares the caches.
#[derive(Clone)]
pub struct MaterialLoader {
    shared: Arc<LoaderShared>,
}

impl MaterialLoader {
    /// Create a loader.
    ///
    /// Offscreen materials are sized to `viewport`, on-screen materials to
    /// `window`; both are clamped into `[1, 65536]`.
    pub fn new(
        render: Arc<RenderThread>,
        workers: Arc<WorkerPool>,
        source: Arc<dyn MaterialSource>,
        compiler: Arc<dyn ShaderCompiler>,
        layouts: BufferLayoutRegistry,
        viewport: Extent2d,
        window: Extent2d,
    ) -> Self {
        Self {
            shared: Arc::new(LoaderShared {
                render,
                workers,
                source,
                compiler,
                layouts: Arc::new(layouts),
                bindings: Arc::new(TextureBindingStore::new()),
                materials: Mutex::new(HashMap::new()),
                shaders: Mutex::new(HashMap::new()),
                pipelines: Mutex::new(HashMap::new()),
                waits: Mutex::new(HashMap::new()),
                extents: Mutex::new(TargetExtents {
                    viewport: viewport.clamped(),
                    window: window.clamped(),
                }),
            }),
        }
    }

    /// Start loading the material at `path`, or return the handle of the
    /// load already started for it.
    pub fn load(&self, path: &str) -> Arc<MaterialResource> {
        self.shared.load(path)
    }

    /// The handle for `path`, if a load was ever requested.
    pub fn get(&self, path: &str) -> Option<Arc<MaterialResource>> {
        self.shared.materials.lock().get(path).cloned()
    }

    /// The pipeline of a ready material.
    pub fn pipeline(&self, resource: &MaterialResource) -> Option<Arc<Pipeline>> {
        self.shared.pipeline_of(resource)
    }

    /// The cached pipeline for `shader`.
    pub fn pipeline_for_shader(&self, shader: ShaderId) -> Option<Arc<Pipeline>> {
        self.shared.pipelines.lock().get(&shader).cloned()
    }

    /// The compiled shader cached for a shader source path.
    pub fn shader(&self, path: &str) -> Option<Arc<Shader>> {
        self.shared.shaders.lock().get(path)?.get()
    }

    /// Number of material paths requested so far.
    pub fn material_count(&self) -> usize {
        self.shared.materials.lock().len()
    }

    /// Number of cached pipelines.
    pub fn pipeline_count(&self) -> usize {
        self.shared.pipelines.lock().len()
    }

    /// Texture bindings remembered across material rebuilds.
    pub fn texture_bindings(&self) -> &Arc<TextureBindingStore> {
        &self.shared.bindings
    }

    /// Extent offscreen materials are allocated at.
    pub fn viewport_extent(&self) -> Extent2d {
        self.shared.extents.lock().viewport
    }

    /// Extent on-screen materials are allocated at.
    pub fn window_extent(&self) -> Extent2d {
        self.shared.extents.lock().window
    }

    /// Rebuild every ready, non-compute material of one cohort at `extent`.
    ///
    /// `offscreen` selects the cohort: offscreen materials follow the render
    /// viewport, on-screen materials follow the window. Materials depending
    /// on another member of the cohort are rebuilt after it and pick up its
    /// new textures. Members sharing a shader get one new pipeline between
    /// them. Returns once every rebuild finished; a failed rebuild is logged
    /// and keeps the previous material.
    ///
    /// # Panics
    ///
    /// Panics when called from the render thread.
    pub fn resize_pipelines(&self, extent: Extent2d, offscreen: bool) {
        assert!(
            !self.shared.render.is_render_thread(),
            "MaterialLoader: resize_pipelines called from the render thread"
        );
        self.shared.resize_pipelines(extent, offscreen);
    }

    /// Load the renderer's built-in materials and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Dependency`] naming the first material that
    /// failed.
    ///
    /// # Panics
    ///
    /// Panics when called from the render thread.
    pub fn load_system_materials(&self, materials: &SystemMaterials) -> Result<(), MaterialError> {
        assert!(
            !self.shared.render.is_render_thread(),
            "MaterialLoader: load_system_materials called from the render thread"
        );
        let resources: Vec<_> = materials.paths().iter().map(|p| self.load(p)).collect();
        for resource in &resources {
            if resource.wait() == ResourceStatus::Failed {
                return Err(dependency_failed(resource));
            }
        }
        log::info!(
            "MaterialLoader: {} system materials ready",
            resources.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for MaterialLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialLoader")
            .field("materials", &self.material_count())
            .field("pipelines", &self.pipeline_count())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(MaterialLoader: Send, Sync);

impl LoaderShared {
    fn load(self: &Arc<Self>, path: &str) -> Arc<MaterialResource> {
        let (resource, inserted) = self.get_or_insert(path);
        if inserted {
            log::debug!("MaterialLoader: loading '{}'", path);
            let shared = Arc::clone(self);
            let job_resource = Arc::clone(&resource);
            self.workers.spawn(move || {
                if job_resource.claim() {
                    shared.run(&job_resource, &LoadContext::default());
                }
            });
        }
        resource
    }

    fn get_or_insert(&self, path: &str) -> (Arc<MaterialResource>, bool) {
        let mut materials = self.materials.lock();
        if let Some(resource) = materials.get(path) {
            return (Arc::clone(resource), false);
        }
        let resource = Arc::new(MaterialResource::new(path));
        materials.insert(path.to_string(), Arc::clone(&resource));
        (resource, true)
    }

    /// Execute a claimed load and publish its outcome.
    ///
    /// A panic during the load fails the resource with
    /// [`MaterialError::Aborted`] so its waiters wake up. Returns whether
    /// the load succeeded.
    fn run(self: &Arc<Self>, resource: &MaterialResource, context: &LoadContext) -> bool {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(resource.path(), context)
        }))
        .unwrap_or_else(|payload| {
            Err(MaterialError::Aborted {
                path: resource.path().to_string(),
                reason: panic_message(payload.as_ref()).to_string(),
            })
        });
        match outcome {
            Ok(loaded) => {
                resource.complete(Arc::new(loaded));
                true
            }
            Err(err) => {
                log::error!(
                    "MaterialLoader: failed to load '{}': {}",
                    resource.path(),
                    err
                );
                resource.fail(err);
                false
            }
        }
    }

    fn execute(
        self: &Arc<Self>,
        path: &str,
        context: &LoadContext,
    ) -> Result<LoadedMaterial, MaterialError> {
        let text = self.source.read(path)?;
        let definition = MaterialDefinition::parse(path, &text)?;
        let shader = self.resolve_shader(&definition)?;
        let pipeline = self.resolve_pipeline(path, &definition, &shader, context)?;

        let layouts = Arc::clone(&self.layouts);
        let bindings = Arc::clone(&self.bindings);
        let name = definition.name.clone();
        let material = self.render.run_wait(move |device| {
            let material = Material::new(device, name, shader, &layouts, bindings)?;
            material.sync();
            Ok::<_, MaterialError>(material)
        })?;

        log::debug!(
            "MaterialLoader: '{}' ready ({}{})",
            path,
            if pipeline.is_compute() {
                "compute"
            } else if pipeline.is_offscreen() {
                "offscreen"
            } else {
                "on-screen"
            },
            if context.force { ", rebuilt" } else { "" }
        );
        Ok(LoadedMaterial {
            definition,
            material,
        })
    }

    /// Compile the material's shader, or wait for the compile another load
    /// already started for the same source path.
    fn resolve_shader(&self, definition: &MaterialDefinition) -> Result<Arc<Shader>, MaterialError> {
        let path = &definition.shader;
        let entry = {
            let mut shaders = self.shaders.lock();
            Arc::clone(
                shaders
                    .entry(path.clone())
                    .or_insert_with(|| Arc::new(Resource::new(path.clone()))),
            )
        };

        if entry.claim() {
            let claim = ShaderClaim {
                shaders: &self.shaders,
                path,
                entry: &entry,
                settled: false,
            };
            let compiler = Arc::clone(&self.compiler);
            let name = definition.name.clone();
            let shader_path = path.clone();
            let shader_type = definition.shader_type();
            let result = self.render.run_wait(move |device| {
                let compiled = compiler.compile(&shader_path, shader_type)?;
                device.create_shader(ShaderDescriptor::from_compiled(
                    name,
                    shader_path,
                    shader_type,
                    compiled,
                ))
            });
            return match result {
                Ok(shader) => {
                    log::debug!("MaterialLoader: compiled shader '{}'", path);
                    claim.complete(Arc::clone(&shader));
                    Ok(shader)
                }
                Err(source) => {
                    claim.fail(MaterialError::Shader {
                        path: path.clone(),
                        source: source.clone(),
                    });
                    Err(MaterialError::Shader {
                        path: path.clone(),
                        source,
                    })
                }
            };
        }

        entry.wait();
        entry.get().ok_or_else(|| MaterialError::Shader {
            path: path.clone(),
            source: GraphicsError::ShaderCompilationFailed(
                entry
                    .error()
                    .map_or_else(|| "compilation failed".to_string(), |e| e.to_string()),
            ),
        })
    }

    fn resolve_pipeline(
        self: &Arc<Self>,
        path: &str,
        definition: &MaterialDefinition,
        shader: &Arc<Shader>,
        context: &LoadContext,
    ) -> Result<Arc<Pipeline>, MaterialError> {
        let id = shader.id();
        if !context.force
            && let Some(pipeline) = self.pipelines.lock().get(&id)
        {
            return Ok(Arc::clone(pipeline));
        }

        let pipeline = self.allocate_pipeline(path, definition, shader, context)?;
        let mut pipelines = self.pipelines.lock();
        if context.force {
            pipelines.insert(id, Arc::clone(&pipeline));
            Ok(pipeline)
        } else {
            // A concurrent load of the same shader may have won the race.
            Ok(Arc::clone(pipelines.entry(id).or_insert(pipeline)))
        }
    }

    fn allocate_pipeline(
        self: &Arc<Self>,
        path: &str,
        definition: &MaterialDefinition,
        shader: &Arc<Shader>,
        context: &LoadContext,
    ) -> Result<Arc<Pipeline>, MaterialError> {
        let shader = Arc::clone(shader);
        if definition.compute {
            return self
                .render
                .run_wait(move |device| {
                    device.create_pipeline(PipelineDescriptor::compute(
                        shader,
                        Arc::new(ComputePass::new()),
                    ))
                })
                .map_err(MaterialError::from);
        }

        let extent = self.target_extent(definition.offscreen);
        let mut colors = Vec::with_capacity(definition.attachments.len());
        for attachment in &definition.attachments {
            let texture = match &attachment.dependency {
                Some(dependency) => {
                    Some(self.dependency_texture(path, dependency, AttachmentKind::Color, context)?)
                }
                None => None,
            };
            colors.push((attachment.clone(), texture));
        }
        let depth = match &definition.depth_attachment {
            Some(attachment) => {
                let texture = match &attachment.dependency {
                    Some(dependency) => Some(self.dependency_texture(
                        path,
                        dependency,
                        AttachmentKind::Depth,
                        context,
                    )?),
                    None => None,
                };
                Some((attachment.clone(), texture))
            }
            None => None,
        };

        let name = definition.name.clone();
        let cull_mode = definition.cull_mode;
        let depth_compare_op = definition.depth_compare_op;
        let offscreen = definition.offscreen;
        self.render
            .run_wait(move |device| {
                let (width, height) = extent.as_texture_size();
                let mut pass = RenderPassDescriptor::new(format!("{name}-Pass"), extent);

                for (index, (attachment, texture)) in colors.into_iter().enumerate() {
                    let texture = match texture {
                        Some(texture) => texture,
                        None => device.create_texture(
                            &TextureDescriptor::new_2d(width, height, COLOR_ATTACHMENT_FORMAT)
                                .with_name(format!("{name}-Color{index}"))
                                .with_usage(
                                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                                ),
                            None,
                            None,
                        )?,
                    };
                    pass = pass.with_color_attachment(
                        AttachmentDescriptor::new(texture)
                            .with_ops(attachment.load_operation, attachment.store_operation),
                    );
                }

                if let Some((attachment, texture)) = depth {
                    let texture = match texture {
                        Some(texture) => texture,
                        None => device.create_texture(
                            &TextureDescriptor::new_2d(width, height, DEPTH_ATTACHMENT_FORMAT)
                                .with_name(format!("{name}-Depth"))
                                .with_usage(
                                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                                ),
                            None,
                            None,
                        )?,
                    };
                    pass = pass.with_depth_stencil_attachment(
                        AttachmentDescriptor::new(texture)
                            .with_ops(attachment.load_operation, attachment.store_operation),
                    );
                }

                let pass = device.create_render_pass(pass)?;
                device.create_pipeline(PipelineDescriptor::graphics(
                    shader,
                    pass,
                    cull_mode,
                    depth_compare_op,
                    offscreen,
                ))
            })
            .map_err(MaterialError::from)
    }

    fn dependency_texture(
        self: &Arc<Self>,
        owner: &str,
        dependency: &DependencyDefinition,
        kind: AttachmentKind,
        context: &LoadContext,
    ) -> Result<Arc<Texture>, MaterialError> {
        let pipeline = self.wait_dependency(owner, &dependency.path, context)?;
        let error = |reason: String| MaterialError::Dependency {
            path: dependency.path.clone(),
            reason,
        };
        let pass = pipeline
            .render_pass()
            .ok_or_else(|| error("is a compute material".to_string()))?;
        let texture = match kind {
            AttachmentKind::Color => pass.color_texture(dependency.index),
            AttachmentKind::Depth => pass.depth_texture(),
        };
        texture.cloned().ok_or_else(|| match kind {
            AttachmentKind::Color => error(format!("has no color attachment {}", dependency.index)),
            AttachmentKind::Depth => error("has no depth attachment".to_string()),
        })
    }

    /// Block until the material at `path` is ready and return its pipeline.
    fn wait_dependency(
        self: &Arc<Self>,
        owner: &str,
        path: &str,
        context: &LoadContext,
    ) -> Result<Arc<Pipeline>, MaterialError> {
        let _edge = self.enter_wait(owner, path)?;

        let cohort_member = context
            .cohort
            .as_ref()
            .and_then(|cohort| Some((cohort, cohort.members.get(path)?)));
        let resource = if let Some((cohort, member)) = cohort_member {
            // Being rebuilt by the same resize: wait for the new textures.
            self.rebuild(cohort, member);
            member.rebuilt.wait();
            Arc::clone(&member.resource)
        } else {
            let (resource, _) = self.get_or_insert(path);
            if resource.claim() {
                log::debug!("MaterialLoader: loading '{}' inline for '{}'", path, owner);
                let inline = LoadContext {
                    force: false,
                    cohort: context.cohort.clone(),
                };
                self.run(&resource, &inline);
            }
            resource.wait();
            resource
        };

        if resource.status() == ResourceStatus::Failed {
            return Err(dependency_failed(&resource));
        }
        self.pipeline_of(&resource)
            .ok_or_else(|| MaterialError::Dependency {
                path: path.to_string(),
                reason: "has no pipeline".to_string(),
            })
    }

    /// Record that `from` waits on `to`, refusing waits that close a cycle.
    fn enter_wait(&self, from: &str, to: &str) -> Result<WaitEdge<'_>, MaterialError> {
        let mut waits = self.waits.lock();
        if from == to || reaches(&waits, to, from) {
            return Err(MaterialError::Dependency {
                path: to.to_string(),
                reason: format!("dependency cycle through '{from}'"),
            });
        }
        waits
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
        Ok(WaitEdge {
            waits: &self.waits,
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    fn pipeline_of(&self, resource: &MaterialResource) -> Option<Arc<Pipeline>> {
        let loaded = resource.get()?;
        self.pipelines.lock().get(&loaded.shader().id()).cloned()
    }

    fn target_extent(&self, offscreen: bool) -> Extent2d {
        let extents = self.extents.lock();
        if offscreen {
            extents.viewport
        } else {
            extents.window
        }
    }

    fn resize_pipelines(self: &Arc<Self>, extent: Extent2d, offscreen: bool) {
        let extent = extent.clamped();
        {
            let mut extents = self.extents.lock();
            if offscreen {
                extents.viewport = extent;
            } else {
                extents.window = extent;
            }
        }

        let resources: Vec<_> = self.materials.lock().values().cloned().collect();
        let selected: Vec<_> = resources
            .into_iter()
            .filter_map(|resource| {
                let shader = resource.get()?.shader().id();
                let pipeline = self.pipeline_of(&resource)?;
                (!pipeline.is_compute() && pipeline.is_offscreen() == offscreen)
                    .then_some((shader, resource))
            })
            .collect();

        // One pipeline per shader: the first path in order allocates it.
        let mut leaders: HashMap<ShaderId, String> = HashMap::new();
        for (shader, resource) in &selected {
            let leader = leaders
                .entry(*shader)
                .or_insert_with(|| resource.path().to_string());
            if resource.path() < leader.as_str() {
                *leader = resource.path().to_string();
            }
        }
        let members: HashMap<_, _> = selected
            .into_iter()
            .map(|(shader, resource)| {
                let leader = leaders
                    .get(&shader)
                    .filter(|leader| leader.as_str() != resource.path())
                    .cloned();
                (
                    resource.path().to_string(),
                    CohortMember {
                        rebuilt: Resource::new(resource.path()),
                        leader,
                        resource,
                    },
                )
            })
            .collect();
        if members.is_empty() {
            return;
        }

        log::info!(
            "MaterialLoader: rebuilding {} {} pipelines at {}",
            members.len(),
            if offscreen { "offscreen" } else { "on-screen" },
            extent
        );
        let cohort = Arc::new(ResizeCohort { members });
        for path in cohort.members.keys() {
            let shared = Arc::clone(self);
            let cohort = Arc::clone(&cohort);
            let path = path.clone();
            self.workers.spawn(move || {
                if let Some(member) = cohort.members.get(&path) {
                    shared.rebuild(&cohort, member);
                }
            });
        }
        for member in cohort.members.values() {
            member.rebuilt.wait();
        }
    }

    /// Rebuild one cohort member unless another thread already claimed it.
    ///
    /// A member sharing its shader with the leader waits for the leader and
    /// reuses the pipeline it allocated. It allocates its own only if the
    /// leader failed or waiting on it would close a cycle.
    fn rebuild(self: &Arc<Self>, cohort: &Arc<ResizeCohort>, member: &CohortMember) {
        if !member.rebuilt.claim() {
            return;
        }
        let shared = member
            .leader
            .as_deref()
            .is_some_and(|leader| self.follow(cohort, member.resource.path(), leader));
        let context = LoadContext {
            force: !shared,
            cohort: Some(Arc::clone(cohort)),
        };
        let rebuilt = self.run(&member.resource, &context);
        member.rebuilt.complete(Arc::new(rebuilt));
    }

    /// Wait for the cohort leader at `leader` to finish. True if it
    /// allocated a pipeline to share.
    fn follow(self: &Arc<Self>, cohort: &Arc<ResizeCohort>, path: &str, leader: &str) -> bool {
        let Some(member) = cohort.members.get(leader) else {
            return false;
        };
        let Ok(_edge) = self.enter_wait(path, leader) else {
            log::debug!(
                "MaterialLoader: '{}' depends on '{}', allocating its own pipeline",
                leader,
                path
            );
            return false;
        };
        self.rebuild(cohort, member);
        member.rebuilt.wait();
        member.rebuilt.get().is_some_and(|rebuilt| *rebuilt)
    }
}

/// A claimed shader compile.
///
/// A compile that fails, or unwinds before settling, is evicted from the
/// cache so a later load retries it, and its waiters see it failed.
struct ShaderClaim<'a> {
    shaders: &'a Mutex<HashMap<String, Arc<Resource<Shader>>>>,
    path: &'a str,
    entry: &'a Arc<Resource<Shader>>,
    settled: bool,
}

impl ShaderClaim<'_> {
    fn complete(mut self, shader: Arc<Shader>) {
        self.settled = true;
        self.entry.complete(shader);
    }

    fn fail(mut self, error: MaterialError) {
        self.settled = true;
        self.evict();
        self.entry.fail(error);
    }

    fn evict(&self) {
        let mut shaders = self.shaders.lock();
        if shaders
            .get(self.path)
            .is_some_and(|e| Arc::ptr_eq(e, self.entry))
        {
            shaders.remove(self.path);
        }
    }
}

impl Drop for ShaderClaim<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.evict();
        self.entry.fail(MaterialError::Aborted {
            path: self.path.to_string(),
            reason: "shader compile did not finish".to_string(),
        });
    }
}

/// A registered wait; removed from the wait graph when dropped.
struct WaitEdge<'a> {
    waits: &'a Mutex<HashMap<String, Vec<String>>>,
    from: String,
    to: String,
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        let mut waits = self.waits.lock();
        if let Some(targets) = waits.get_mut(&self.from) {
            if let Some(index) = targets.iter().position(|t| *t == self.to) {
                targets.swap_remove(index);
            }
            if targets.is_empty() {
                waits.remove(&self.from);
            }
        }
    }
}

/// Whether `target` is reachable from `start` along wait edges.
fn reaches(waits: &HashMap<String, Vec<String>>, start: &str, target: &str) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = waits.get(node) {
            stack.extend(next.iter().map(String::as_str));
        }
    }
    false
}

fn dependency_failed(resource: &MaterialResource) -> MaterialError {
    MaterialError::Dependency {
        path: resource.path().to_string(),
        reason: resource
            .error()
            .map_or_else(|| "failed to load".to_string(), |e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut waits: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in edges {
            waits.entry(from.to_string()).or_default().push(to.to_string());
        }
        waits
    }

    #[test]
    fn test_reaches_follows_chains() {
        let waits = graph(&[("a", "b"), ("b", "c")]);
        assert!(reaches(&waits, "a", "c"));
        assert!(!reaches(&waits, "c", "a"));
        assert!(reaches(&waits, "c", "c"));
    }

    #[test]
    fn test_reaches_terminates_on_cycles() {
        let waits = graph(&[("a", "b"), ("b", "a")]);
        assert!(!reaches(&waits, "a", "z"));
    }
}
