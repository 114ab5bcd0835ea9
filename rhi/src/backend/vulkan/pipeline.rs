//! Shader modules, binding layouts, pipelines and descriptor sets.

use ash::vk;
use parking_lot::Mutex;

use super::conversion::{
    convert_compare_op, convert_cull_mode, convert_shader_stages, convert_texture_format,
    vertex_format,
};
use crate::backend::PipelineState;
use crate::error::GraphicsError;
use crate::shader::{BufferKind, ShaderDescriptor, ShaderStage};

/// Entry point of every stage.
const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Sets per descriptor pool. Each descriptor type gets this many
/// descriptors too.
pub const SETS_PER_POOL: u32 = 128;

/// Vulkan objects made from a shader descriptor.
pub struct ShaderObjects {
    pub modules: Vec<(ShaderStage, vk::ShaderModule)>,
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
}

impl ShaderObjects {
    /// Destroy whatever was created so far.
    fn destroy(self, device: &ash::Device) {
        unsafe {
            for (_, module) in self.modules {
                device.destroy_shader_module(module, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.set_layout, None);
            }
        }
    }
}

/// Create stage modules, the set 0 layout from the merged reflection, and
/// the pipeline layout with the push-constant range.
pub fn create_shader_objects(
    device: &ash::Device,
    descriptor: &ShaderDescriptor,
) -> Result<ShaderObjects, GraphicsError> {
    let mut objects = ShaderObjects {
        modules: Vec::with_capacity(descriptor.binaries.len()),
        set_layout: vk::DescriptorSetLayout::null(),
        pipeline_layout: vk::PipelineLayout::null(),
    };

    match build_shader_objects(device, descriptor, &mut objects) {
        Ok(()) => Ok(objects),
        Err(e) => {
            objects.destroy(device);
            Err(e)
        }
    }
}

fn build_shader_objects(
    device: &ash::Device,
    descriptor: &ShaderDescriptor,
    objects: &mut ShaderObjects,
) -> Result<(), GraphicsError> {
    for binary in &descriptor.binaries {
        let create_info = vk::ShaderModuleCreateInfo::default().code(&binary.spirv);
        let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
            GraphicsError::ShaderCompilationFailed(format!(
                "{}: failed to create {:?} module: {e:?}",
                descriptor.path, binary.stage
            ))
        })?;
        objects.modules.push((binary.stage, module));
    }

    let reflection = &descriptor.reflection;
    let buffers = reflection.buffers.iter().map(|(&slot, buffer)| {
        let ty = match buffer.kind {
            BufferKind::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            BufferKind::Storage => vk::DescriptorType::STORAGE_BUFFER,
        };
        (slot, ty, buffer.stages)
    });
    let textures = reflection.textures.iter().map(|(&slot, texture)| {
        (slot, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, texture.stages)
    });
    let storage_images = reflection
        .storage_images
        .iter()
        .map(|(&slot, image)| (slot, vk::DescriptorType::STORAGE_IMAGE, image.stages));
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = buffers
        .chain(textures)
        .chain(storage_images)
        .map(|(slot, ty, stages)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(slot)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(convert_shader_stages(stages))
        })
        .collect();

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    objects.set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "{}: failed to create descriptor set layout: {e:?}",
                descriptor.path
            ))
        })?;

    let push_ranges: Vec<vk::PushConstantRange> = reflection
        .push_constant
        .iter()
        .map(|block| {
            vk::PushConstantRange::default()
                .stage_flags(convert_shader_stages(block.stages))
                .offset(0)
                .size(block.size)
        })
        .collect();
    let set_layouts = [objects.set_layout];
    let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges);
    objects.pipeline_layout =
        unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "{}: failed to create pipeline layout: {e:?}",
                descriptor.path
            ))
        })?;
    Ok(())
}

/// Create a pipeline for `state` from the shader's modules.
pub fn create_pipeline(
    device: &ash::Device,
    modules: &[(ShaderStage, vk::ShaderModule)],
    layout: vk::PipelineLayout,
    descriptor: &ShaderDescriptor,
    state: &PipelineState,
) -> Result<vk::Pipeline, GraphicsError> {
    match state {
        PipelineState::Compute => create_compute_pipeline(device, modules, layout, descriptor),
        PipelineState::Graphics { .. } => {
            create_graphics_pipeline(device, modules, layout, descriptor, state)
        }
    }
}

fn module_for(
    modules: &[(ShaderStage, vk::ShaderModule)],
    stage: ShaderStage,
    descriptor: &ShaderDescriptor,
) -> Result<vk::ShaderModule, GraphicsError> {
    modules
        .iter()
        .find_map(|&(s, module)| (s == stage).then_some(module))
        .ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "{}: shader has no {stage:?} stage",
                descriptor.path
            ))
        })
}

fn create_compute_pipeline(
    device: &ash::Device,
    modules: &[(ShaderStage, vk::ShaderModule)],
    layout: vk::PipelineLayout,
    descriptor: &ShaderDescriptor,
) -> Result<vk::Pipeline, GraphicsError> {
    let module = module_for(modules, ShaderStage::Compute, descriptor)?;
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(ENTRY_POINT);
    let create_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| {
        GraphicsError::ResourceCreationFailed(format!(
            "{}: failed to create compute pipeline: {e:?}",
            descriptor.path
        ))
    })?;
    first_pipeline(pipelines, descriptor)
}

fn create_graphics_pipeline(
    device: &ash::Device,
    modules: &[(ShaderStage, vk::ShaderModule)],
    layout: vk::PipelineLayout,
    descriptor: &ShaderDescriptor,
    state: &PipelineState,
) -> Result<vk::Pipeline, GraphicsError> {
    let PipelineState::Graphics {
        color_formats,
        depth_format,
        cull_mode,
        depth_compare_op,
    } = state
    else {
        return Err(GraphicsError::InvalidParameter(
            "graphics pipeline requested with compute state".to_string(),
        ));
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(module_for(modules, ShaderStage::Vertex, descriptor)?)
            .name(ENTRY_POINT),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(module_for(modules, ShaderStage::Fragment, descriptor)?)
            .name(ENTRY_POINT),
    ];

    // All attributes are interleaved in binding 0.
    let vertex_input = &descriptor.reflection.vertex_input;
    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = if vertex_input.is_empty()
    {
        Vec::new()
    } else {
        vec![
            vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(vertex_input.stride())
                .input_rate(vk::VertexInputRate::VERTEX),
        ]
    };
    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = vertex_input
        .attributes
        .iter()
        .zip(vertex_input.offsets())
        .map(|(attribute, offset)| {
            vk::VertexInputAttributeDescription::default()
                .location(attribute.location)
                .binding(0)
                .format(vertex_format(attribute.components))
                .offset(offset)
        })
        .collect();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(convert_cull_mode(*cull_mode))
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth_format.is_some())
        .depth_write_enable(depth_format.is_some())
        .depth_compare_op(convert_compare_op(*depth_compare_op));

    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = color_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
        })
        .collect();
    let color_blend_state =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_attachment_formats: Vec<vk::Format> = color_formats
        .iter()
        .map(|&format| convert_texture_format(format))
        .collect();
    let depth_attachment_format = depth_format.map_or(vk::Format::UNDEFINED, convert_texture_format);
    let stencil_attachment_format = depth_format
        .filter(|format| format.has_stencil())
        .map_or(vk::Format::UNDEFINED, convert_texture_format);
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_attachment_formats)
        .depth_attachment_format(depth_attachment_format)
        .stencil_attachment_format(stencil_attachment_format);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| {
        GraphicsError::ResourceCreationFailed(format!(
            "{}: failed to create graphics pipeline: {e:?}",
            descriptor.path
        ))
    })?;
    first_pipeline(pipelines, descriptor)
}

fn first_pipeline(
    pipelines: Vec<vk::Pipeline>,
    descriptor: &ShaderDescriptor,
) -> Result<vk::Pipeline, GraphicsError> {
    pipelines.into_iter().next().ok_or_else(|| {
        GraphicsError::ResourceCreationFailed(format!(
            "{}: driver returned no pipeline",
            descriptor.path
        ))
    })
}

/// Descriptor sets allocated from a growing list of pools.
///
/// A new pool is created when the newest one runs out. Pools are only
/// destroyed with the allocator.
pub struct DescriptorAllocator {
    device: ash::Device,
    pools: Mutex<Vec<vk::DescriptorPool>>,
}

impl DescriptorAllocator {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Allocate one set with `layout`, returning it with the pool it came
    /// from.
    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> Result<(vk::DescriptorPool, vk::DescriptorSet), GraphicsError> {
        let mut pools = self.pools.lock();
        if let Some(&pool) = pools.last() {
            match self.allocate_from(pool, layout) {
                Ok(set) => return Ok((pool, set)),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {}
                Err(e) => return Err(descriptor_error(e)),
            }
        }

        let pool = self.create_pool()?;
        pools.push(pool);
        log::debug!("DescriptorAllocator: created pool #{}", pools.len());
        let set = self.allocate_from(pool, layout).map_err(descriptor_error)?;
        Ok((pool, set))
    }

    fn allocate_from(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }?;
        sets.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn create_pool(&self) -> Result<vk::DescriptorPool, GraphicsError> {
        let pool_sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::STORAGE_IMAGE,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: SETS_PER_POOL,
        });

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(SETS_PER_POOL)
            .pool_sizes(&pool_sizes);

        unsafe { self.device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "failed to create descriptor pool: {e:?}"
            ))
        })
    }

    /// Destroy every pool.
    ///
    /// # Safety
    ///
    /// The device must be idle and no set from these pools may be used
    /// again.
    pub unsafe fn destroy(&self) {
        for pool in self.pools.lock().drain(..) {
            unsafe { self.device.destroy_descriptor_pool(pool, None) };
        }
    }
}

fn descriptor_error(result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => {
            GraphicsError::ResourceCreationFailed(format!("failed to allocate descriptor set: {other:?}"))
        }
    }
}
