//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. It records every command into an
//! inspectable log and simulates the parts of a GPU the device logic depends
//! on: fences signaled after an optional latency, a three-image swapchain
//! that can be forced out of date, and storage-image writes performed by
//! dispatches, so tests can observe whether work had completed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::DeviceParameters;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture};
use crate::shader::{ShaderDescriptor, ShaderStageFlags};
use crate::types::{
    BufferDescriptor, Extent2d, SamplerDescriptor, TextureDescriptor, TextureFormat, TextureLayout,
};

use super::{
    DescriptorWrite, GpuBackend, GpuBuffer, GpuCommandBuffer, GpuDescriptorTable, GpuFence,
    GpuPipeline, GpuSampler, GpuSemaphore, GpuShader, GpuTexture, PipelineState, RenderTarget,
    RenderingInfo,
};

/// Number of images in the simulated swapchain.
pub const DUMMY_SWAPCHAIN_IMAGES: u32 = 3;

/// A CPU-side fence state, shared with the simulated GPU.
#[derive(Debug, Default)]
pub struct DummySignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl DummySignal {
    fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    fn reset(&self) {
        *self.signaled.lock() = false;
    }

    fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
    }

    fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }
}

/// Host memory standing in for a GPU buffer.
#[derive(Debug)]
pub struct DummyBuffer {
    data: Mutex<Vec<u8>>,
    /// Every host write as (offset, bytes), oldest first.
    writes: Mutex<Vec<(u64, Vec<u8>)>>,
}

/// A simulated texture.
#[derive(Debug)]
pub struct DummyTexture {
    id: u64,
    writes: Arc<AtomicU64>,
}

impl DummyTexture {
    /// Identifier used in the command log.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A simulated command buffer.
#[derive(Debug, Default)]
pub struct DummyCommandBuffer {
    recording: AtomicBool,
    commands: Mutex<Vec<RecordedCommand>>,
}

/// A command captured by the dummy backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    TransitionTexture {
        texture: u64,
        from: TextureLayout,
        to: TextureLayout,
    },
    TransitionSurface {
        image_index: u32,
        from: TextureLayout,
        to: TextureLayout,
    },
    BeginRendering {
        extent: Extent2d,
        color_targets: Vec<u64>,
        depth_target: Option<u64>,
        surface_image: Option<u32>,
    },
    EndRendering,
    BindPipeline {
        compute: bool,
    },
    SetViewport(Extent2d),
    BindDescriptorTable,
    PushConstants {
        stages: ShaderStageFlags,
        size: usize,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

/// One call to [`GpuBackend::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Commands in recording order.
    pub commands: Vec<RecordedCommand>,
    /// A semaphore was waited before execution.
    pub waits: bool,
    /// A semaphore was signaled after execution.
    pub signals: bool,
    /// A fence was signaled after execution.
    pub fenced: bool,
}

#[derive(Debug)]
struct DummySurface {
    extent: Extent2d,
    next_image: u32,
    configure_count: usize,
}

/// Simulated GPU queue: tracks outstanding submissions.
#[derive(Debug, Default)]
struct SimulatedQueue {
    in_flight: Mutex<usize>,
    idle: Condvar,
    max_in_flight: AtomicUsize,
}

impl SimulatedQueue {
    fn begin(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight += 1;
        self.max_in_flight.fetch_max(*in_flight, Ordering::SeqCst);
    }

    fn finish(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.idle.wait(&mut in_flight);
        }
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    parameters: DeviceParameters,
    latency: Option<Duration>,
    next_id: AtomicU64,
    textures: Mutex<HashMap<u64, Weak<AtomicU64>>>,
    submissions: Mutex<Vec<Submission>>,
    descriptor_updates: AtomicUsize,
    descriptor_writes: AtomicUsize,
    surface: Mutex<DummySurface>,
    acquire_out_of_date: AtomicU32,
    present_error: Mutex<Option<GraphicsError>>,
    queue: Arc<SimulatedQueue>,
}

impl DummyBackend {
    /// Create a new dummy backend whose submissions complete immediately.
    pub fn new() -> Self {
        Self {
            parameters: DeviceParameters::default(),
            latency: None,
            next_id: AtomicU64::new(1),
            textures: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            descriptor_updates: AtomicUsize::new(0),
            descriptor_writes: AtomicUsize::new(0),
            surface: Mutex::new(DummySurface {
                extent: Extent2d::default(),
                next_image: 0,
                configure_count: 0,
            }),
            acquire_out_of_date: AtomicU32::new(0),
            present_error: Mutex::new(None),
            queue: Arc::new(SimulatedQueue::default()),
        }
    }

    /// Complete every submission `latency` after it was made, on a
    /// separate thread.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Report different device limits.
    pub fn with_parameters(mut self, parameters: DeviceParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Make the next acquire report an out-of-date swapchain.
    pub fn force_acquire_out_of_date(&self) {
        self.force_acquire_out_of_date_times(1);
    }

    /// Make the next `count` acquires report an out-of-date swapchain.
    pub fn force_acquire_out_of_date_times(&self, count: u32) {
        self.acquire_out_of_date.store(count, Ordering::SeqCst);
    }

    /// Make the next present report an out-of-date swapchain.
    pub fn force_present_out_of_date(&self) {
        self.fail_next_present(GraphicsError::SurfaceOutdated);
    }

    /// Make the next present fail with `error`.
    pub fn fail_next_present(&self, error: GraphicsError) {
        *self.present_error.lock() = Some(error);
    }

    /// Number of descriptor table updates applied.
    pub fn descriptor_update_count(&self) -> usize {
        self.descriptor_updates.load(Ordering::SeqCst)
    }

    /// Number of individual descriptor writes applied.
    pub fn descriptor_write_count(&self) -> usize {
        self.descriptor_writes.load(Ordering::SeqCst)
    }

    /// Every submission so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Number of submissions so far.
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Number of times the swapchain was (re)created.
    pub fn surface_configure_count(&self) -> usize {
        self.surface.lock().configure_count
    }

    /// Extent of the current swapchain.
    pub fn surface_extent(&self) -> Extent2d {
        self.surface.lock().extent
    }

    /// Largest number of submissions that were executing at once.
    pub fn max_in_flight(&self) -> usize {
        self.queue.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of submissions currently executing.
    pub fn in_flight(&self) -> usize {
        *self.queue.in_flight.lock()
    }

    /// Number of dispatches or draws that have written to a texture.
    pub fn texture_writes(&self, texture: &Texture) -> u64 {
        match texture.gpu_handle() {
            GpuTexture::Dummy(t) => t.writes.load(Ordering::SeqCst),
            #[cfg(feature = "vulkan-backend")]
            GpuTexture::Vulkan { .. } => 0,
        }
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: &Buffer) -> Vec<u8> {
        match buffer.gpu_handle() {
            GpuBuffer::Dummy(b) => b.data.lock().clone(),
            #[cfg(feature = "vulkan-backend")]
            GpuBuffer::Vulkan { .. } => Vec::new(),
        }
    }

    /// Every host write to a buffer as (offset, bytes), oldest first.
    pub fn buffer_writes(&self, buffer: &Buffer) -> Vec<(u64, Vec<u8>)> {
        match buffer.gpu_handle() {
            GpuBuffer::Dummy(b) => b.writes.lock().clone(),
            #[cfg(feature = "vulkan-backend")]
            GpuBuffer::Vulkan { .. } => Vec::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn record(&self, cmd: &GpuCommandBuffer, command: RecordedCommand) {
        match cmd {
            GpuCommandBuffer::Dummy(buffer) => {
                debug_assert!(
                    buffer.recording.load(Ordering::Relaxed),
                    "DummyBackend: recording into a command buffer that was not begun"
                );
                buffer.commands.lock().push(command);
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { .. } => {}
        }
    }

    fn texture_id(texture: &GpuTexture) -> u64 {
        match texture {
            GpuTexture::Dummy(t) => t.id,
            #[cfg(feature = "vulkan-backend")]
            GpuTexture::Vulkan { .. } => 0,
        }
    }

    /// Replay a submission against the simulated textures.
    fn execute(commands: &[RecordedCommand], textures: &HashMap<u64, Arc<AtomicU64>>) {
        let mut layouts: HashMap<u64, TextureLayout> = HashMap::new();
        let mut targets: Vec<u64> = Vec::new();
        for command in commands {
            match command {
                RecordedCommand::TransitionTexture { texture, to, .. } => {
                    layouts.insert(*texture, *to);
                }
                RecordedCommand::BeginRendering { color_targets, .. } => {
                    targets.clone_from(color_targets);
                }
                RecordedCommand::EndRendering => targets.clear(),
                RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. } => {
                    for id in &targets {
                        if let Some(writes) = textures.get(id) {
                            writes.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
                RecordedCommand::Dispatch { .. } => {
                    for (id, layout) in &layouts {
                        if *layout == TextureLayout::General
                            && let Some(writes) = textures.get(id)
                        {
                            writes.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn parameters(&self) -> DeviceParameters {
        self.parameters.clone()
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer '{}' (size: {})",
            descriptor.name,
            descriptor.size
        );
        let size = usize::try_from(descriptor.size).map_err(|_| GraphicsError::OutOfMemory)?;
        Ok(GpuBuffer::Dummy(DummyBuffer {
            data: Mutex::new(vec![0; size]),
            writes: Mutex::new(Vec::new()),
        }))
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        match buffer {
            GpuBuffer::Dummy(b) => {
                let mut contents = b.data.lock();
                let start = offset as usize;
                let end = start + data.len();
                if end > contents.len() {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "write of {} bytes at offset {} exceeds buffer size {}",
                        data.len(),
                        offset,
                        contents.len()
                    )));
                }
                contents[start..end].copy_from_slice(data);
                b.writes.lock().push((offset, data.to_vec()));
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            GpuBuffer::Vulkan { .. } => Err(GraphicsError::Internal(
                "DummyBackend received a Vulkan buffer".into(),
            )),
        }
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "DummyBackend: creating texture '{}' ({}x{}x{}, {} mips)",
            descriptor.name,
            descriptor.width,
            descriptor.height,
            descriptor.layers,
            descriptor.mip_levels()
        );
        let id = self.next_id();
        let writes = Arc::new(AtomicU64::new(0));
        let mut textures = self.textures.lock();
        textures.retain(|_, w| w.strong_count() > 0);
        textures.insert(id, Arc::downgrade(&writes));
        Ok(GpuTexture::Dummy(DummyTexture { id, writes }))
    }

    fn write_texture(
        &self,
        _texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        log::trace!(
            "DummyBackend: write_texture '{}' ({}x{}) len={}",
            descriptor.name,
            descriptor.width,
            descriptor.height,
            data.len()
        );
        Ok(())
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        log::trace!("DummyBackend: creating sampler '{}'", descriptor.name);
        Ok(GpuSampler::Dummy)
    }

    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<GpuShader, GraphicsError> {
        log::trace!(
            "DummyBackend: creating shader '{}' from '{}'",
            descriptor.name,
            descriptor.path
        );
        Ok(GpuShader::Dummy)
    }

    fn create_pipeline(
        &self,
        _shader: &GpuShader,
        descriptor: &ShaderDescriptor,
        state: &PipelineState,
    ) -> Result<GpuPipeline, GraphicsError> {
        log::trace!("DummyBackend: creating pipeline for '{}'", descriptor.name);
        Ok(GpuPipeline::Dummy {
            compute: matches!(state, PipelineState::Compute),
        })
    }

    fn create_descriptor_table(
        &self,
        _shader: &GpuShader,
    ) -> Result<GpuDescriptorTable, GraphicsError> {
        Ok(GpuDescriptorTable::Dummy {
            updates: AtomicUsize::new(0),
        })
    }

    fn update_descriptor_table(&self, table: &GpuDescriptorTable, writes: &[DescriptorWrite<'_>]) {
        if let GpuDescriptorTable::Dummy { updates } = table {
            updates.fetch_add(1, Ordering::SeqCst);
        }
        self.descriptor_updates.fetch_add(1, Ordering::SeqCst);
        self.descriptor_writes
            .fetch_add(writes.len(), Ordering::SeqCst);
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Dummy(Arc::new(DummySignal::new(signaled))))
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        match fence {
            GpuFence::Dummy(signal) => {
                signal.wait();
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            GpuFence::Vulkan { .. } => Ok(()),
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        match fence {
            GpuFence::Dummy(signal) => {
                signal.reset();
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            GpuFence::Vulkan { .. } => Ok(()),
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match fence {
            GpuFence::Dummy(signal) => signal.is_signaled(),
            #[cfg(feature = "vulkan-backend")]
            GpuFence::Vulkan { .. } => false,
        }
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        Ok(GpuSemaphore::Dummy)
    }

    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, GraphicsError> {
        Ok(GpuCommandBuffer::Dummy(DummyCommandBuffer::default()))
    }

    fn begin_commands(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        if let GpuCommandBuffer::Dummy(buffer) = cmd {
            buffer.commands.lock().clear();
            buffer.recording.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn end_commands(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        if let GpuCommandBuffer::Dummy(buffer) = cmd {
            buffer.recording.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    fn submit(
        &self,
        cmd: &GpuCommandBuffer,
        wait: Option<&GpuSemaphore>,
        signal: Option<&GpuSemaphore>,
        fence: Option<&GpuFence>,
    ) -> Result<(), GraphicsError> {
        let commands = match cmd {
            GpuCommandBuffer::Dummy(buffer) => buffer.commands.lock().clone(),
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { .. } => Vec::new(),
        };
        let fence = match fence {
            Some(GpuFence::Dummy(signal)) => Some(Arc::clone(signal)),
            _ => None,
        };
        self.submissions.lock().push(Submission {
            commands: commands.clone(),
            waits: wait.is_some(),
            signals: signal.is_some(),
            fenced: fence.is_some(),
        });

        let textures: HashMap<u64, Arc<AtomicU64>> = self
            .textures
            .lock()
            .iter()
            .filter_map(|(id, w)| w.upgrade().map(|w| (*id, w)))
            .collect();
        let queue = Arc::clone(&self.queue);
        queue.begin();

        let complete = move || {
            Self::execute(&commands, &textures);
            queue.finish();
            if let Some(fence) = fence {
                fence.signal();
            }
        };

        match self.latency {
            Some(latency) => {
                std::thread::Builder::new()
                    .name("dummy-gpu".into())
                    .spawn(move || {
                        std::thread::sleep(latency);
                        complete();
                    })
                    .map_err(|e| GraphicsError::Internal(format!("Failed to spawn: {e}")))?;
            }
            None => complete(),
        }
        Ok(())
    }

    fn configure_surface(&self, extent: Extent2d) -> Result<Extent2d, GraphicsError> {
        let mut surface = self.surface.lock();
        surface.extent = extent;
        surface.next_image = 0;
        surface.configure_count += 1;
        log::debug!("DummyBackend: configured swapchain at {}", extent);
        Ok(extent)
    }

    fn surface_format(&self) -> TextureFormat {
        TextureFormat::Bgra8Unorm
    }

    fn acquire_next_image(&self, _signal: &GpuSemaphore) -> Result<u32, GraphicsError> {
        let forced = self
            .acquire_out_of_date
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if forced.is_ok() {
            return Err(GraphicsError::SurfaceOutdated);
        }
        let mut surface = self.surface.lock();
        let index = surface.next_image;
        surface.next_image = (index + 1) % DUMMY_SWAPCHAIN_IMAGES;
        Ok(index)
    }

    fn present(&self, _image_index: u32, _wait: &GpuSemaphore) -> Result<(), GraphicsError> {
        match self.present_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn cmd_transition_texture(
        &self,
        cmd: &GpuCommandBuffer,
        texture: &GpuTexture,
        from: TextureLayout,
        to: TextureLayout,
    ) {
        self.record(
            cmd,
            RecordedCommand::TransitionTexture {
                texture: Self::texture_id(texture),
                from,
                to,
            },
        );
    }

    fn cmd_transition_surface(
        &self,
        cmd: &GpuCommandBuffer,
        image_index: u32,
        from: TextureLayout,
        to: TextureLayout,
    ) {
        self.record(
            cmd,
            RecordedCommand::TransitionSurface {
                image_index,
                from,
                to,
            },
        );
    }

    fn cmd_begin_rendering(&self, cmd: &GpuCommandBuffer, info: &RenderingInfo<'_>) {
        let command = match &info.target {
            RenderTarget::Textures { color, depth } => RecordedCommand::BeginRendering {
                extent: info.extent,
                color_targets: color.iter().map(|a| Self::texture_id(a.texture)).collect(),
                depth_target: depth.as_ref().map(|a| Self::texture_id(a.texture)),
                surface_image: None,
            },
            RenderTarget::Surface { image_index, .. } => RecordedCommand::BeginRendering {
                extent: info.extent,
                color_targets: Vec::new(),
                depth_target: None,
                surface_image: Some(*image_index),
            },
        };
        self.record(cmd, command);
    }

    fn cmd_end_rendering(&self, cmd: &GpuCommandBuffer) {
        self.record(cmd, RecordedCommand::EndRendering);
    }

    fn cmd_bind_pipeline(&self, cmd: &GpuCommandBuffer, pipeline: &GpuPipeline) {
        let compute = match pipeline {
            GpuPipeline::Dummy { compute } => *compute,
            #[cfg(feature = "vulkan-backend")]
            GpuPipeline::Vulkan { .. } => false,
        };
        self.record(cmd, RecordedCommand::BindPipeline { compute });
    }

    fn cmd_set_viewport(&self, cmd: &GpuCommandBuffer, extent: Extent2d) {
        self.record(cmd, RecordedCommand::SetViewport(extent));
    }

    fn cmd_bind_descriptor_table(
        &self,
        cmd: &GpuCommandBuffer,
        _pipeline: &GpuPipeline,
        _table: &GpuDescriptorTable,
    ) {
        self.record(cmd, RecordedCommand::BindDescriptorTable);
    }

    fn cmd_push_constants(
        &self,
        cmd: &GpuCommandBuffer,
        _pipeline: &GpuPipeline,
        stages: ShaderStageFlags,
        data: &[u8],
    ) {
        self.record(
            cmd,
            RecordedCommand::PushConstants {
                stages,
                size: data.len(),
            },
        );
    }

    fn cmd_draw(
        &self,
        cmd: &GpuCommandBuffer,
        _vertex_buffer: &GpuBuffer,
        vertex_count: u32,
        instance_count: u32,
    ) {
        self.record(
            cmd,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        cmd: &GpuCommandBuffer,
        _vertex_buffer: &GpuBuffer,
        _index_buffer: &GpuBuffer,
        index_count: u32,
        instance_count: u32,
    ) {
        self.record(
            cmd,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_dispatch(&self, cmd: &GpuCommandBuffer, x: u32, y: u32, z: u32) {
        self.record(cmd, RecordedCommand::Dispatch { x, y, z });
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.queue.wait_idle();
        Ok(())
    }

    unsafe fn advance_frame(&self) {}
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_signaled_after_latency() {
        let backend = DummyBackend::new().with_latency(Duration::from_millis(20));
        let cmd = backend.create_command_buffer().unwrap();
        let fence = backend.create_fence(false).unwrap();

        backend.begin_commands(&cmd).unwrap();
        backend.cmd_dispatch(&cmd, 1, 1, 1);
        backend.end_commands(&cmd).unwrap();
        backend.submit(&cmd, None, None, Some(&fence)).unwrap();

        assert!(!backend.is_fence_signaled(&fence));
        backend.wait_fence(&fence).unwrap();
        assert!(backend.is_fence_signaled(&fence));
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn test_forced_out_of_date_is_one_shot() {
        let backend = DummyBackend::new();
        let semaphore = backend.create_semaphore().unwrap();
        backend.force_acquire_out_of_date();
        assert_eq!(
            backend.acquire_next_image(&semaphore),
            Err(GraphicsError::SurfaceOutdated)
        );
        assert_eq!(backend.acquire_next_image(&semaphore), Ok(0));
        assert_eq!(backend.acquire_next_image(&semaphore), Ok(1));
    }

    #[test]
    fn test_submission_log() {
        let backend = DummyBackend::new();
        let cmd = backend.create_command_buffer().unwrap();
        backend.begin_commands(&cmd).unwrap();
        backend.cmd_set_viewport(&cmd, Extent2d::new(4, 4));
        backend.end_commands(&cmd).unwrap();
        backend.submit(&cmd, None, None, None).unwrap();

        let submissions = backend.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(
            submissions[0].commands,
            vec![RecordedCommand::SetViewport(Extent2d::new(4, 4))]
        );
        assert!(!submissions[0].fenced);
    }
}
