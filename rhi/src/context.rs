//! The renderer façade used by the logic thread.
//!
//! [`RenderContext`] owns the render thread, the loader worker pool and the
//! material loader, and forwards recording calls to the render thread in
//! the order they are made. A frame on the logic thread looks like:
//!
//! ```ignore
//! context.update()?;                    // resize if requested, begin frame
//! context.begin_pass(&scene_material);
//! context.bind_material(&scene_material);
//! context.draw(&mesh, vertex_count, 1);
//! context.end_pass(&scene_material);
//! context.post_update()?;               // present pass, end frame, present
//! ```
//!
//! When the device skips a frame (the swapchain stayed out of date),
//! `update` returns `Ok(false)` and the recording calls of that frame are
//! dropped.

use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::config::RenderConfig;
use crate::device::GraphicsDevice;
use crate::environment::{EnvironmentMapBaker, EnvironmentMaps};
use crate::error::{GraphicsError, MaterialError};
use crate::loader::{MaterialLoader, MaterialResource, MaterialSource};
use crate::render_thread::RenderThread;
use crate::resources::{Buffer, Pipeline, Texture};
use crate::shader::{BufferLayoutRegistry, ShaderCompiler};
use crate::types::{BufferDescriptor, BufferType, Extent2d, MemoryType, TextureDescriptor};
use crate::worker::WorkerPool;

/// Full-screen quad drawn by the present pass: position (xyz) and uv per
/// vertex, two triangles.
#[rustfmt::skip]
pub const PRESENT_QUAD: [f32; 30] = [
    -1.0,  1.0, 0.0, 0.0, 1.0,
    -1.0, -1.0, 0.0, 0.0, 0.0,
     1.0, -1.0, 0.0, 1.0, 0.0,

     1.0, -1.0, 0.0, 1.0, 0.0,
     1.0,  1.0, 0.0, 1.0, 1.0,
    -1.0,  1.0, 0.0, 0.0, 1.0,
];

/// Byte size of one [`PRESENT_QUAD`] vertex.
const PRESENT_VERTEX_STRIDE: u32 = 5 * std::mem::size_of::<f32>() as u32;

/// Material slot the present material samples the final image from.
pub const PRESENT_SOURCE_SLOT: u32 = 0;

/// The renderer: render thread, loaders and the per-frame protocol.
///
/// All methods are called from one logic thread. Recording methods queue
/// work on the render thread and return immediately; the queue is drained
/// at the end of [`post_update`](Self::post_update).
pub struct RenderContext {
    config: RenderConfig,
    loader: MaterialLoader,
    render_material: Arc<MaterialResource>,
    present_material: Arc<MaterialResource>,
    present_vertices: Arc<Buffer>,
    pending_viewport: Option<Extent2d>,
    frame_open: bool,
    // Dropped after the loader so queued loads can still reach the device.
    workers: Arc<WorkerPool>,
    render: Arc<RenderThread>,
}

impl RenderContext {
    /// Create the device on `backend`, start the render thread and the
    /// loader pool, and load the system materials.
    ///
    /// # Errors
    ///
    /// Returns an error if the device or threads can't be created, or a
    /// system material fails to load.
    pub fn new(
        config: RenderConfig,
        backend: Arc<dyn GpuBackend>,
        source: Arc<dyn MaterialSource>,
        compiler: Arc<dyn ShaderCompiler>,
        layouts: BufferLayoutRegistry,
    ) -> Result<Self, MaterialError> {
        log::info!(
            "RenderContext: starting on '{}' with {} frames in flight",
            backend.name(),
            config.frames_in_flight
        );
        let device = GraphicsDevice::new(backend, config.frames_in_flight, config.window_extent)?;
        let render = Arc::new(RenderThread::spawn(device)?);
        let workers = Arc::new(WorkerPool::new("loader", config.worker_threads)?);
        let loader = MaterialLoader::new(
            Arc::clone(&render),
            Arc::clone(&workers),
            source,
            compiler,
            layouts,
            config.viewport_extent,
            config.window_extent,
        );

        loader.load_system_materials(&config.system_materials)?;
        let render_material = loader.load(&config.system_materials.render);
        let present_material = loader.load(&config.system_materials.present);

        let present_vertices = render.run_wait(|device| {
            let data: &[u8] = bytemuck::cast_slice(&PRESENT_QUAD);
            device.create_buffer(
                &BufferDescriptor::new(data.len() as u64, BufferType::Vertex)
                    .with_name("PresentVB")
                    .with_memory_type(MemoryType::CpuGpu),
                Some(data),
            )
        })?;

        let context = Self {
            config,
            loader,
            render_material,
            present_material,
            present_vertices,
            pending_viewport: None,
            frame_open: false,
            workers,
            render,
        };
        context.connect_present_source();
        Ok(context)
    }

    /// The configuration the context was created with.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// The render thread.
    pub fn render_thread(&self) -> &Arc<RenderThread> {
        &self.render
    }

    /// The material loader.
    pub fn loader(&self) -> &MaterialLoader {
        &self.loader
    }

    /// The scene material whose first color attachment is presented.
    pub fn render_material(&self) -> &Arc<MaterialResource> {
        &self.render_material
    }

    /// The material drawing the final full-screen quad.
    pub fn present_material(&self) -> &Arc<MaterialResource> {
        &self.present_material
    }

    /// Whether the last [`update`](Self::update) began a frame that has not
    /// been presented yet.
    pub fn is_frame_open(&self) -> bool {
        self.frame_open
    }

    /// Whether a viewport resize is waiting for the next
    /// [`update`](Self::update).
    pub fn is_resize_pending(&self) -> bool {
        self.pending_viewport.is_some()
    }

    // ========================================================================
    // Frame protocol
    // ========================================================================

    /// Apply a pending viewport resize, then begin a frame.
    ///
    /// Returns `false` when the device skipped the frame. Recording calls
    /// and [`post_update`](Self::post_update) do nothing until the next
    /// `update`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device can't be drained before the resize
    /// or the frame can't begin. No frame is open after an error.
    ///
    /// # Panics
    ///
    /// Panics if the previous frame was not finished with `post_update`.
    pub fn update(&mut self) -> Result<bool, GraphicsError> {
        assert!(
            !self.frame_open,
            "RenderContext: update called before post_update"
        );
        if let Some(extent) = self.pending_viewport.take() {
            self.wait_all()?;
            self.loader.resize_pipelines(extent, true);
            self.connect_present_source();
        }
        self.frame_open = self.render.run_wait(|device| device.begin_frame())?;
        Ok(self.frame_open)
    }

    /// Draw the present pass, end and present the frame, and wait for the
    /// render thread to finish it.
    ///
    /// Does nothing but drain the render thread when no frame is open.
    ///
    /// # Errors
    ///
    /// Returns the error of ending or presenting the frame. An out-of-date
    /// surface is not an error; the swapchain is rebuilt on the next frame.
    pub fn post_update(&mut self) -> Result<(), GraphicsError> {
        if !self.frame_open {
            self.render.wait_for_all();
            return Ok(());
        }

        let present = Arc::clone(&self.present_material);
        if let Some(pipeline) = self.loader.pipeline(&present) {
            let stride = pipeline.shader().reflection().vertex_input.stride();
            let stride = if stride == 0 {
                PRESENT_VERTEX_STRIDE
            } else {
                stride
            };
            let vertex_count = (self.present_vertices.size() / u64::from(stride)) as u32;

            self.begin_pass(&present);
            self.bind_material(&present);
            self.draw(&self.present_vertices, vertex_count, 1);
            self.end_pass(&present);
        } else {
            log::warn!("RenderContext: present material has no pipeline, skipping present pass");
        }

        self.frame_open = false;
        self.render.run_wait(|device| {
            device.end_frame().inspect_err(|e| {
                log::error!("RenderContext: end_frame failed: {}", e);
            })?;
            device.present()
        })
    }

    /// Request a viewport resize, applied at the next
    /// [`update`](Self::update). Zero axes are clamped to 1.
    pub fn on_resize(&mut self, extent: Extent2d) {
        self.pending_viewport = Some(extent.clamped());
    }

    /// React to a window resize: drain the GPU, request a new swapchain,
    /// rebuild the on-screen pipelines, and unless running in editor mode
    /// also request a viewport resize.
    ///
    /// # Errors
    ///
    /// Returns an error if the device can't be drained.
    pub fn on_window_resize(&mut self, extent: Extent2d) -> Result<(), GraphicsError> {
        let extent = extent.clamped();
        log::info!("RenderContext: window resized to {}", extent);
        self.wait_all()?;
        self.render
            .run_wait(move |device| device.on_resize(extent.width, extent.height));
        self.loader.resize_pipelines(extent, false);
        self.connect_present_source();

        if !self.config.editor_mode {
            self.on_resize(extent);
        }
        Ok(())
    }

    /// Block until the render thread and the GPU are idle.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on the device fails.
    pub fn wait_all(&self) -> Result<(), GraphicsError> {
        self.render.wait_for_all();
        self.render.run_wait(|device| device.wait_for_idle())
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Open the render pass of a graphics material.
    ///
    /// # Panics
    ///
    /// Panics if the material has no pipeline.
    pub fn begin_pass(&self, material: &MaterialResource) {
        let pipeline = self.pipeline(material);
        self.record(move |device| device.begin_pipeline(&pipeline));
    }

    /// Close the render pass of a graphics material.
    pub fn end_pass(&self, material: &MaterialResource) {
        let pipeline = self.pipeline(material);
        self.record(move |device| device.end_pipeline(&pipeline));
    }

    /// Open a compute pass in the frame's command stream.
    pub fn begin_compute_pass(&self, material: &MaterialResource) {
        let pipeline = self.pipeline(material);
        self.record(move |device| device.begin_compute_pipeline(&pipeline));
    }

    /// Close a compute pass.
    pub fn end_compute_pass(&self, material: &MaterialResource) {
        let pipeline = self.pipeline(material);
        self.record(move |device| device.end_compute_pipeline(&pipeline));
    }

    /// Bind a material's table for the open pass.
    ///
    /// A material still loading is skipped.
    pub fn bind_material(&self, material: &MaterialResource) {
        let Some(loaded) = material.get() else {
            log::warn!(
                "RenderContext: material '{}' is not ready, not bound",
                material.path()
            );
            return;
        };
        let pipeline = self.pipeline(material);
        self.record(move |device| {
            device.bind_gpu_material(loaded.material().gpu_material(), &pipeline);
        });
    }

    /// Draw `vertex_count` vertices.
    pub fn draw(&self, vertices: &Arc<Buffer>, vertex_count: u32, instance_count: u32) {
        let vertices = Arc::clone(vertices);
        self.record(move |device| device.draw(&vertices, vertex_count, instance_count));
    }

    /// Draw every index of `indices`.
    pub fn draw_indexed(&self, vertices: &Arc<Buffer>, indices: &Arc<Buffer>, instance_count: u32) {
        let vertices = Arc::clone(vertices);
        let indices = Arc::clone(indices);
        let index_count = (indices.size() / std::mem::size_of::<u32>() as u64) as u32;
        self.record(move |device| {
            device.draw_indexed(&vertices, &indices, index_count, instance_count);
        });
    }

    /// Dispatch work groups in the open compute pass.
    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        self.record(move |device| device.dispatch(x, y, z));
    }

    /// Upload push constants for the open pass of `material`.
    pub fn push_constant(&self, material: &MaterialResource, data: &[u8]) {
        let pipeline = self.pipeline(material);
        let data = data.to_vec();
        self.record(move |device| device.push_constant(&pipeline, &data));
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Create a buffer on the render thread.
    ///
    /// # Errors
    ///
    /// See [`GraphicsDevice::create_buffer`].
    pub fn create_buffer(
        &self,
        descriptor: BufferDescriptor,
        data: Option<Vec<u8>>,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        self.render
            .run_wait(move |device| device.create_buffer(&descriptor, data.as_deref()))
    }

    /// Create a texture with the default sampler on the render thread.
    ///
    /// # Errors
    ///
    /// See [`GraphicsDevice::create_texture`].
    pub fn create_texture(
        &self,
        descriptor: TextureDescriptor,
        data: Option<Vec<u8>>,
    ) -> Result<Arc<Texture>, GraphicsError> {
        self.render
            .run_wait(move |device| device.create_texture(&descriptor, None, data.as_deref()))
    }

    /// Bake image-based lighting maps from an equirectangular texture.
    ///
    /// # Errors
    ///
    /// Returns an error if a bake material failed to load or the device
    /// fails.
    pub fn load_environment_map(
        &self,
        source: Arc<Texture>,
    ) -> Result<EnvironmentMaps, MaterialError> {
        let baker = EnvironmentMapBaker::new(
            &self.loader,
            &self.config.system_materials,
            self.config.environment,
        );
        baker.wait_ready()?;
        self.render
            .run_wait(move |device| baker.bake(device, &source))
    }

    /// Queue a recording call for the open frame. Dropped without one.
    fn record<F>(&self, job: F)
    where
        F: FnOnce(&mut GraphicsDevice) + Send + 'static,
    {
        if self.frame_open {
            self.render.run(job);
        } else {
            log::trace!("RenderContext: no frame open, recording call dropped");
        }
    }

    fn pipeline(&self, material: &MaterialResource) -> Arc<Pipeline> {
        match self.loader.pipeline(material) {
            Some(pipeline) => pipeline,
            None => panic!(
                "RenderContext: material '{}' has no pipeline",
                material.path()
            ),
        }
    }

    /// Point the present material at the scene's first color attachment.
    fn connect_present_source(&self) {
        let Some(scene) = self
            .loader
            .pipeline(&self.render_material)
            .and_then(|pipeline| pipeline.render_pass()?.color_texture(0).cloned())
        else {
            log::warn!("RenderContext: render material has no color attachment to present");
            return;
        };
        let Some(present) = self.present_material.get() else {
            return;
        };
        self.render.run_wait(move |_| {
            present
                .material()
                .set_texture(PRESENT_SOURCE_SLOT, &scene, None);
            present.material().sync();
        });
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.render.wait_for_all();
        if let Err(e) = self.render.run_wait(|device| device.wait_for_idle()) {
            log::error!("RenderContext: wait for idle on shutdown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("loader", &self.loader)
            .field("render", &self.render)
            .field("pending_viewport", &self.pending_viewport)
            .field("frame_open", &self.frame_open)
            .finish_non_exhaustive()
    }
}
