//! Deferred destruction of Vulkan objects.
//!
//! The GPU runs up to `frames_in_flight` frames behind the CPU, so dropping a
//! handle must not destroy the Vulkan object right away. Drops push the raw
//! handles into the queue of the current frame; the queue is drained once
//! the frame that may still reference them has retired.
//!
//! ```text
//! drop(GpuTexture)  ->  queue[frame % retention].push(Texture { .. })
//! advance_frame()   ->  frame += 1; destroy queue[(frame + 1) % retention]
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

/// A Vulkan object waiting for the GPU to stop using it.
pub enum DeferredResource {
    /// A buffer and its memory.
    Buffer {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Option<Allocation>,
    },
    /// An image, every view created over it, and its memory.
    Texture {
        device: ash::Device,
        image: vk::Image,
        views: Vec<vk::ImageView>,
        allocation: Option<Allocation>,
    },
    /// A sampler.
    Sampler {
        device: ash::Device,
        sampler: vk::Sampler,
    },
    /// Stage modules and the layouts derived from a shader's reflection.
    Shader {
        device: ash::Device,
        modules: Vec<vk::ShaderModule>,
        set_layout: vk::DescriptorSetLayout,
        pipeline_layout: vk::PipelineLayout,
    },
    /// A graphics or compute pipeline.
    Pipeline {
        device: ash::Device,
        pipeline: vk::Pipeline,
    },
    /// A descriptor set returned to its pool.
    DescriptorSet {
        device: ash::Device,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    },
    /// Command buffers and the pool that owns them.
    CommandBuffers {
        device: ash::Device,
        command_pool: vk::CommandPool,
        buffers: Vec<vk::CommandBuffer>,
    },
}

// SAFETY: only plain Vulkan handles and the ash function tables are held.
unsafe impl Send for DeferredResource {}
unsafe impl Sync for DeferredResource {}

impl DeferredResource {
    /// Destroy the object now.
    ///
    /// Allocations are returned to `allocator` when one is given and
    /// leaked otherwise.
    ///
    /// # Safety
    ///
    /// The GPU must no longer use the object.
    pub unsafe fn destroy(self, allocator: Option<&Mutex<Allocator>>) {
        let free = |allocation: Option<Allocation>, what: &str| {
            if let (Some(allocation), Some(allocator)) = (allocation, allocator)
                && let Err(e) = allocator.lock().free(allocation)
            {
                log::error!("DeferredDestructor: failed to free {what} memory: {e}");
            }
        };

        match self {
            Self::Buffer {
                device,
                buffer,
                allocation,
            } => {
                free(allocation, "buffer");
                unsafe { device.destroy_buffer(buffer, None) };
            }
            Self::Texture {
                device,
                image,
                views,
                allocation,
            } => {
                free(allocation, "texture");
                unsafe {
                    for view in views {
                        device.destroy_image_view(view, None);
                    }
                    device.destroy_image(image, None);
                }
            }
            Self::Sampler { device, sampler } => unsafe {
                device.destroy_sampler(sampler, None);
            },
            Self::Shader {
                device,
                modules,
                set_layout,
                pipeline_layout,
            } => unsafe {
                for module in modules {
                    device.destroy_shader_module(module, None);
                }
                device.destroy_pipeline_layout(pipeline_layout, None);
                device.destroy_descriptor_set_layout(set_layout, None);
            },
            Self::Pipeline { device, pipeline } => unsafe {
                device.destroy_pipeline(pipeline, None);
            },
            Self::DescriptorSet { device, pool, set } => {
                if let Err(e) = unsafe { device.free_descriptor_sets(pool, &[set]) } {
                    log::error!("DeferredDestructor: failed to free descriptor set: {e:?}");
                }
            }
            Self::CommandBuffers {
                device,
                command_pool,
                buffers,
            } => unsafe {
                device.free_command_buffers(command_pool, &buffers);
                device.destroy_command_pool(command_pool, None);
            },
        }
    }
}

/// Frame-indexed queues of objects pending destruction.
pub struct DeferredDestructor {
    queues: Vec<Mutex<Vec<DeferredResource>>>,
    current_frame: AtomicUsize,
    allocator: Mutex<Option<Weak<Mutex<Allocator>>>>,
}

impl DeferredDestructor {
    /// Create a destructor that holds objects for `frames_in_flight` frames
    /// after they were dropped.
    pub fn new(frames_in_flight: usize) -> Self {
        let retention = frames_in_flight.max(1) + 1;
        Self {
            queues: (0..retention).map(|_| Mutex::new(Vec::new())).collect(),
            current_frame: AtomicUsize::new(0),
            allocator: Mutex::new(None),
        }
    }

    /// Return freed memory to `allocator`.
    pub fn set_allocator(&self, allocator: Weak<Mutex<Allocator>>) {
        *self.allocator.lock() = Some(allocator);
    }

    /// Queue an object dropped during the current frame.
    pub fn queue(&self, resource: DeferredResource) {
        let frame = self.current_frame.load(Ordering::Acquire);
        self.queues[frame % self.queues.len()].lock().push(resource);
    }

    /// Move to the next frame and destroy what the oldest frame dropped.
    ///
    /// # Safety
    ///
    /// The GPU must have finished every frame older than the ones still in
    /// flight.
    pub unsafe fn advance_frame(&self) {
        let next = self.current_frame.fetch_add(1, Ordering::AcqRel) + 1;
        let retiring = (next + 1) % self.queues.len();
        let resources = std::mem::take(&mut *self.queues[retiring].lock());
        unsafe { self.destroy_all(resources) };
    }

    /// Destroy everything queued regardless of frame.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub unsafe fn flush_all(&self) {
        for queue in &self.queues {
            let resources = std::mem::take(&mut *queue.lock());
            unsafe { self.destroy_all(resources) };
        }
    }

    /// Number of objects waiting for destruction.
    pub fn pending_count(&self) -> usize {
        self.queues.iter().map(|q| q.lock().len()).sum()
    }

    /// Frames advanced so far.
    pub fn current_frame(&self) -> usize {
        self.current_frame.load(Ordering::Acquire)
    }

    unsafe fn destroy_all(&self, resources: Vec<DeferredResource>) {
        if resources.is_empty() {
            return;
        }
        let allocator: Option<Arc<Mutex<Allocator>>> =
            self.allocator.lock().as_ref().and_then(Weak::upgrade);
        for resource in resources {
            unsafe { resource.destroy(allocator.as_deref()) };
        }
    }
}

impl std::fmt::Debug for DeferredDestructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDestructor")
            .field("retention", &self.queues.len())
            .field("current_frame", &self.current_frame())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}
