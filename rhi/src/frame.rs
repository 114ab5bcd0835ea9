//! Per-frame-in-flight state.

use crate::backend::{GpuBackend, GpuCommandBuffer, GpuFence, GpuSemaphore};
use crate::error::GraphicsError;

/// Where the device is in its frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    /// No frame is open. [`begin_frame`](crate::GraphicsDevice::begin_frame)
    /// may be called.
    #[default]
    Idle,
    /// A swapchain image was acquired and commands are being recorded.
    Recording,
    /// Commands were submitted; the frame waits for presentation.
    Submitted,
}

/// The recording context and synchronization primitives of one slot.
///
/// Slots are reused round-robin; the fence guards reuse of the command
/// buffer, and starts signaled so the first use doesn't block.
#[derive(Debug)]
pub(crate) struct FrameSlot {
    pub(crate) commands: GpuCommandBuffer,
    pub(crate) fence: GpuFence,
    /// Signaled when the acquired swapchain image can be rendered to.
    pub(crate) presentable: GpuSemaphore,
    /// Signaled when the frame's commands finished executing.
    pub(crate) render_complete: GpuSemaphore,
}

impl FrameSlot {
    pub(crate) fn new(backend: &dyn GpuBackend) -> Result<Self, GraphicsError> {
        Ok(Self {
            commands: backend.create_command_buffer()?,
            fence: backend.create_fence(true)?,
            presentable: backend.create_semaphore()?,
            render_complete: backend.create_semaphore()?,
        })
    }
}
