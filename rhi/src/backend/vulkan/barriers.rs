//! Image layout transitions.
//!
//! The device tracks the layout of every texture and asks for explicit
//! transitions; this module turns a `(from, to)` pair into one image memory
//! barrier with access masks and stages derived from the two layouts.

use ash::vk;

use super::conversion::convert_layout;
use crate::types::TextureLayout;

/// Accesses that must be made available when leaving `layout`.
pub fn src_access_mask(layout: TextureLayout) -> vk::AccessFlags {
    match layout {
        TextureLayout::Undefined | TextureLayout::Present => vk::AccessFlags::empty(),
        TextureLayout::ColorAttachment => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        TextureLayout::DepthStencilAttachment => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        TextureLayout::ShaderReadOnly => vk::AccessFlags::empty(),
        TextureLayout::General => vk::AccessFlags::SHADER_WRITE,
        TextureLayout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

/// Accesses performed after entering `layout`.
pub fn dst_access_mask(layout: TextureLayout) -> vk::AccessFlags {
    match layout {
        TextureLayout::Undefined | TextureLayout::Present => vk::AccessFlags::empty(),
        TextureLayout::ColorAttachment => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        TextureLayout::DepthStencilAttachment => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        TextureLayout::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        TextureLayout::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        TextureLayout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

/// Stages that touched the image in `layout`.
pub fn src_stage(layout: TextureLayout) -> vk::PipelineStageFlags {
    match layout {
        TextureLayout::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
        TextureLayout::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        TextureLayout::DepthStencilAttachment => vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        TextureLayout::ShaderReadOnly | TextureLayout::General => {
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
        }
        TextureLayout::TransferDst => vk::PipelineStageFlags::TRANSFER,
        TextureLayout::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// Stages that will touch the image in `layout`.
pub fn dst_stage(layout: TextureLayout) -> vk::PipelineStageFlags {
    match layout {
        TextureLayout::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
        TextureLayout::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        TextureLayout::DepthStencilAttachment => vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        TextureLayout::ShaderReadOnly | TextureLayout::General => {
            vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER
        }
        TextureLayout::TransferDst => vk::PipelineStageFlags::TRANSFER,
        TextureLayout::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// Record one transition of every mip level and layer of `image`.
///
/// `from` is the layout the image is treated as; pass
/// [`TextureLayout::Undefined`] to discard the contents.
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    from: TextureLayout,
    to: TextureLayout,
) {
    if from == to && from != TextureLayout::General {
        return;
    }

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(convert_layout(from))
        .new_layout(convert_layout(to))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(src_access_mask(from))
        .dst_access_mask(dst_access_mask(to));

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage(from),
            dst_stage(to),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TextureLayout::Undefined, vk::PipelineStageFlags::TOP_OF_PIPE)]
    #[case(
        TextureLayout::ColorAttachment,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    )]
    #[case(TextureLayout::Present, vk::PipelineStageFlags::BOTTOM_OF_PIPE)]
    fn test_src_stage(#[case] layout: TextureLayout, #[case] expected: vk::PipelineStageFlags) {
        assert_eq!(src_stage(layout), expected);
    }

    #[test]
    fn test_storage_images_are_read_write() {
        let access = dst_access_mask(TextureLayout::General);
        assert!(access.contains(vk::AccessFlags::SHADER_READ));
        assert!(access.contains(vk::AccessFlags::SHADER_WRITE));
        assert!(dst_stage(TextureLayout::General).contains(vk::PipelineStageFlags::COMPUTE_SHADER));
    }
}
