//! Command pools.

use ash::vk;

use crate::error::GraphicsError;

/// Create a pool whose buffers can be reset one by one.
///
/// Each command buffer gets its own pool so buffers can be recorded on
/// different threads.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("failed to create command pool: {e:?}"))
    })
}

/// Allocate one primary command buffer from `pool`.
pub fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("failed to allocate command buffer: {e:?}"))
    })?;
    buffers.into_iter().next().ok_or_else(|| {
        GraphicsError::ResourceCreationFailed("driver returned no command buffer".to_string())
    })
}
