//! The Vulkan implementation of [`Device`], with memory managed by gpu-allocator.

mod acceleration;
mod context;
mod pipelines;
mod record;
mod resources;
mod swapchain;

pub use context::VulkanContext;
pub use swapchain::SwapchainSurface;

use std::collections::BTreeMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{
    AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use winit::window::Window;

use self::resources::*;
use super::command_buffer::CommandList;
use super::device::*;
use super::error::DeviceError;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Rust will drop these fields in the order they are declared
struct NativeShared {
    registry: Mutex<Registry>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: Mutex<vk::Queue>,
    /// `None` when compute work shares the graphics queue.
    compute_queue: Option<Mutex<vk::Queue>>,
    graphics_pool: Mutex<vk::CommandPool>,
    compute_pool: Option<Mutex<vk::CommandPool>>,
    sharing: QueueSharing,
    context: VulkanContext,
}

/// Cloning hands out another handle to the same device.
#[derive(Clone)]
pub struct NativeDevice {
    shared: Arc<NativeShared>,
}

fn create_command_pool(device: &ash::Device, family: u32) -> Result<vk::CommandPool, DeviceError> {
    let create_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    Ok(unsafe { device.create_command_pool(&create_info, None) }?)
}

impl NativeDevice {
    pub fn new(window: &Window) -> Result<Self, DeviceError> {
        let context = VulkanContext::new(window)?;
        let device = &context.device;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        let graphics_queue = unsafe { device.get_device_queue(context.graphics_family, 0) };
        let graphics_pool = create_command_pool(device, context.graphics_family)?;
        let (compute_queue, compute_pool) = if context.compute_family != context.graphics_family {
            let queue = unsafe { device.get_device_queue(context.compute_family, 0) };
            let pool = create_command_pool(device, context.compute_family)?;
            (Some(Mutex::new(queue)), Some(Mutex::new(pool)))
        } else {
            (None, None)
        };

        Ok(Self {
            shared: Arc::new(NativeShared {
                registry: Mutex::new(Registry::default()),
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                graphics_queue: Mutex::new(graphics_queue),
                compute_queue,
                graphics_pool: Mutex::new(graphics_pool),
                compute_pool,
                sharing: QueueSharing::new(context.graphics_family, context.compute_family),
                context,
            }),
        })
    }

    pub fn vulkan(&self) -> &VulkanContext {
        &self.shared.context
    }

    pub(crate) fn graphics_queue(&self) -> MutexGuard<'_, vk::Queue> {
        locked(&self.shared.graphics_queue)
    }

    pub(crate) fn semaphore(&self, semaphore: SemaphoreId) -> Result<vk::Semaphore, DeviceError> {
        let registry = locked(&self.shared.registry);
        lookup(&registry.semaphores, semaphore, "semaphore").copied()
    }

    /// Makes an image owned by someone else usable through an id.
    pub fn register_external_image(
        &self,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<ImageId, DeviceError> {
        let view = self.shared.create_image_view(image, format)?;
        let mut registry = locked(&self.shared.registry);
        let id = ImageId(registry.next_id());
        registry.images.insert(
            id,
            ImageRecord {
                image,
                view,
                allocation: None,
                format,
                extent,
            },
        );
        Ok(id)
    }

    /// A single color attachment render pass that clears and ends in `final_layout`.
    pub fn create_render_pass(
        &self,
        format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> Result<RenderPassId, DeviceError> {
        let color_attachment = vk::AttachmentDescription {
            flags: vk::AttachmentDescriptionFlags::empty(),
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        };

        let color_attachment_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_attachment_ref))
            .build();

        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ..Default::default()
        }];

        let attachments = [color_attachment];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);

        let render_pass =
            unsafe { self.shared.context.device.create_render_pass(&create_info, None) }?;
        let mut registry = locked(&self.shared.registry);
        let id = RenderPassId(registry.next_id());
        registry.render_passes.insert(id, render_pass);
        Ok(id)
    }

    pub fn destroy_render_pass(&self, render_pass: RenderPassId) {
        let removed = locked(&self.shared.registry).render_passes.remove(&render_pass);
        if let Some(render_pass) = removed {
            unsafe { self.shared.context.device.destroy_render_pass(render_pass, None) };
        }
    }

    pub fn create_framebuffer(
        &self,
        render_pass: RenderPassId,
        image: ImageId,
    ) -> Result<FramebufferId, DeviceError> {
        let mut registry = locked(&self.shared.registry);
        let render_pass = *lookup(&registry.render_passes, render_pass, "render pass")?;
        let image = lookup(&registry.images, image, "image")?;
        let image_views = [image.view];

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&image_views)
            .width(image.extent.width)
            .height(image.extent.height)
            .layers(1);

        let framebuffer =
            unsafe { self.shared.context.device.create_framebuffer(&create_info, None) }?;
        let id = FramebufferId(registry.next_id());
        registry.framebuffers.insert(id, framebuffer);
        Ok(id)
    }

    pub fn destroy_framebuffer(&self, framebuffer: FramebufferId) {
        let removed = locked(&self.shared.registry).framebuffers.remove(&framebuffer);
        if let Some(framebuffer) = removed {
            unsafe { self.shared.context.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

impl NativeShared {
    fn device(&self) -> &ash::Device {
        &self.context.device
    }

    fn raytracing(&self) -> Result<&context::ContextRaytracing, DeviceError> {
        self.context
            .context_raytracing
            .as_ref()
            .ok_or_else(|| DeviceError::RayTracingUnsupported(self.context.device_name.clone()))
    }

    fn queue(&self, queue: QueueKind) -> &Mutex<vk::Queue> {
        match (queue, &self.compute_queue) {
            (QueueKind::Compute, Some(compute)) => compute,
            _ => &self.graphics_queue,
        }
    }

    fn command_pool(&self, queue: QueueKind) -> &Mutex<vk::CommandPool> {
        match (queue, &self.compute_pool) {
            (QueueKind::Compute, Some(compute)) => compute,
            _ => &self.graphics_pool,
        }
    }

    fn create_raw_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<BufferRecord, DeviceError> {
        let device = self.device();
        let create_info = vk::BufferCreateInfo::builder()
            .size(size.max(4))
            .usage(usage)
            .sharing_mode(self.sharing.mode)
            .queue_family_indices(&self.sharing.families);

        let buffer = unsafe { device.create_buffer(&create_info, None) }?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = locked(&self.allocator).allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: location.into(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };

        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }?;

        Ok(BufferRecord {
            buffer,
            allocation,
            location,
            size,
        })
    }

    fn destroy_raw_buffer(&self, record: BufferRecord) {
        if let Err(err) = locked(&self.allocator).free(record.allocation) {
            log::warn!("Could not free buffer memory: {err}");
        }
        unsafe { self.device().destroy_buffer(record.buffer, None) };
    }

    fn raw_buffer_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        unsafe { self.device().get_buffer_device_address(&info) }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> Result<vk::ImageView, DeviceError> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(crate::vulkan::command_buffer::COLOR_SUBRESOURCE_RANGE)
            .image(image);
        Ok(unsafe { self.device().create_image_view(&create_info, None) }?)
    }

    fn destroy_image_record(&self, record: ImageRecord) {
        unsafe { self.device().destroy_image_view(record.view, None) };
        if let Some(allocation) = record.allocation {
            if let Err(err) = locked(&self.allocator).free(allocation) {
                log::warn!("Could not free image memory: {err}");
            }
            unsafe { self.device().destroy_image(record.image, None) };
        }
    }

    fn shader_module(&self, shader: &Shader) -> Result<vk::ShaderModule, DeviceError> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&shader.spirv);
        Ok(unsafe { self.device().create_shader_module(&create_info, None) }?)
    }
}

impl Drop for NativeShared {
    fn drop(&mut self) {
        let device = &self.context.device;
        if let Err(err) = unsafe { device.device_wait_idle() } {
            log::error!("Could not wait for device idle: {err}");
        }

        let registry = std::mem::take(
            self.registry
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let leaked = registry.buffers.len() + registry.images.len() + registry.pipelines.len();
        if leaked > 0 {
            log::warn!("{leaked} device objects were still alive at shutdown");
        }

        for (_, record) in registry.structures {
            self.destroy_structure(record);
        }
        for (_, record) in registry.pipelines {
            unsafe { device.destroy_pipeline(record.pipeline, None) };
            if let Some(table) = record.shader_binding_table {
                self.destroy_raw_buffer(table);
            }
        }
        for (_, record) in registry.buffers {
            self.destroy_raw_buffer(record);
        }
        for (_, framebuffer) in registry.framebuffers {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
        for (_, record) in registry.images {
            self.destroy_image_record(record);
        }
        unsafe {
            for (_, sampler) in registry.samplers {
                device.destroy_sampler(sampler, None);
            }
            for (_, pool) in registry.pools {
                device.destroy_descriptor_pool(pool, None);
            }
            for (_, record) in registry.set_layouts {
                device.destroy_descriptor_set_layout(record.layout, None);
            }
            for (_, layout) in registry.pipeline_layouts {
                device.destroy_pipeline_layout(layout, None);
            }
            for (_, render_pass) in registry.render_passes {
                device.destroy_render_pass(render_pass, None);
            }
            for (_, fence) in registry.fences {
                device.destroy_fence(fence, None);
            }
            for (_, semaphore) in registry.semaphores {
                device.destroy_semaphore(semaphore, None);
            }
            device.destroy_command_pool(*locked(&self.graphics_pool), None);
            if let Some(pool) = &self.compute_pool {
                device.destroy_command_pool(*locked(pool), None);
            }
            // The allocator frees its memory blocks and has to go before the device
            ManuallyDrop::drop(&mut self.allocator);
        }
    }
}

impl Device for NativeDevice {
    fn name(&self) -> &str {
        &self.shared.context.device_name
    }

    fn supports_ray_tracing(&self) -> bool {
        self.shared.context.context_raytracing.is_some()
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        let record = self
            .shared
            .create_raw_buffer(desc.name, desc.size, desc.usage, desc.location)?;
        let mut registry = locked(&self.shared.registry);
        let id = BufferId(registry.next_id());
        registry.buffers.insert(id, record);
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let removed = locked(&self.shared.registry).buffers.remove(&buffer);
        if let Some(record) = removed {
            self.shared.destroy_raw_buffer(record);
        }
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let mut registry = locked(&self.shared.registry);
        let record = lookup_mut(&mut registry.buffers, buffer, "buffer")?;
        let size = record.size;
        let mapped = record
            .allocation
            .mapped_slice_mut()
            .ok_or(DeviceError::NotHostVisible(buffer.raw()))?;
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= size)
            .ok_or(DeviceError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size,
            })?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError> {
        let registry = locked(&self.shared.registry);
        let record = lookup(&registry.buffers, buffer, "buffer")?;
        let mapped = record
            .allocation
            .mapped_slice()
            .ok_or(DeviceError::NotHostVisible(buffer.raw()))?;
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= record.size)
            .ok_or(DeviceError::OutOfBounds {
                offset,
                len,
                size: record.size,
            })?;
        Ok(mapped[offset as usize..end as usize].to_vec())
    }

    fn buffer_device_address(&self, buffer: BufferId) -> Result<vk::DeviceAddress, DeviceError> {
        let registry = locked(&self.shared.registry);
        let record = lookup(&registry.buffers, buffer, "buffer")?;
        Ok(self.shared.raw_buffer_address(record.buffer))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId, DeviceError> {
        let device = self.shared.device();
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(self.shared.sharing.mode)
            .queue_family_indices(&self.shared.sharing.families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&create_info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = locked(&self.shared.allocator).allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: desc.location.into(),
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }?;
        let view = self.shared.create_image_view(image, desc.format)?;

        let mut registry = locked(&self.shared.registry);
        let id = ImageId(registry.next_id());
        registry.images.insert(
            id,
            ImageRecord {
                image,
                view,
                allocation: Some(allocation),
                format: desc.format,
                extent: desc.extent,
            },
        );
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        let removed = locked(&self.shared.registry).images.remove(&image);
        if let Some(record) = removed {
            self.shared.destroy_image_record(record);
        }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { self.shared.device().create_sampler(&create_info, None) }?;
        let mut registry = locked(&self.shared.registry);
        let id = SamplerId(registry.next_id());
        registry.samplers.insert(id, sampler);
        Ok(id)
    }

    fn destroy_sampler(&self, sampler: SamplerId) {
        let removed = locked(&self.shared.registry).samplers.remove(&sampler);
        if let Some(sampler) = removed {
            unsafe { self.shared.device().destroy_sampler(sampler, None) };
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutId, DeviceError> {
        let layout_bindings: Vec<_> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.slot)
                    .descriptor_type(binding.kind)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let layout =
            unsafe { self.shared.device().create_descriptor_set_layout(&create_info, None) }?;

        let mut registry = locked(&self.shared.registry);
        let id = DescriptorSetLayoutId(registry.next_id());
        registry.set_layouts.insert(
            id,
            LayoutRecord {
                layout,
                bindings: bindings.to_vec(),
            },
        );
        Ok(id)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutId) {
        let removed = locked(&self.shared.registry).set_layouts.remove(&layout);
        if let Some(record) = removed {
            unsafe {
                self.shared
                    .device()
                    .destroy_descriptor_set_layout(record.layout, None)
            };
        }
    }

    fn create_descriptor_pool(
        &self,
        bindings: &[DescriptorBinding],
        max_sets: u32,
    ) -> Result<DescriptorPoolId, DeviceError> {
        let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
        for binding in bindings {
            *counts.entry(binding.kind.as_raw()).or_default() += binding.count * max_sets;
        }
        let pool_sizes: Vec<_> = counts
            .into_iter()
            .map(|(kind, descriptor_count)| vk::DescriptorPoolSize {
                ty: vk::DescriptorType::from_raw(kind),
                descriptor_count,
            })
            .collect();

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);
        let pool = unsafe { self.shared.device().create_descriptor_pool(&create_info, None) }?;

        let mut registry = locked(&self.shared.registry);
        let id = DescriptorPoolId(registry.next_id());
        registry.pools.insert(id, pool);
        Ok(id)
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolId) {
        let mut registry = locked(&self.shared.registry);
        registry.sets.retain(|_, set| set.pool != pool);
        if let Some(pool) = registry.pools.remove(&pool) {
            unsafe { self.shared.device().destroy_descriptor_pool(pool, None) };
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
    ) -> Result<DescriptorSetId, DeviceError> {
        let mut registry = locked(&self.shared.registry);
        let raw_pool = *lookup(&registry.pools, pool, "descriptor pool")?;
        let raw_layout = lookup(&registry.set_layouts, layout, "descriptor set layout")?.layout;

        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(raw_pool)
            .set_layouts(std::slice::from_ref(&raw_layout));
        let set = unsafe { self.shared.device().allocate_descriptor_sets(&allocate_info) }?[0];

        let id = DescriptorSetId(registry.next_id());
        registry.sets.insert(id, SetRecord { set, layout, pool });
        Ok(id)
    }

    fn update_descriptor_set(
        &self,
        set: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError> {
        let registry = locked(&self.shared.registry);
        let record = lookup(&registry.sets, set, "descriptor set")?;
        let bindings = &lookup(&registry.set_layouts, record.layout, "descriptor set layout")?
            .bindings;

        // The infos are collected first, so the pointers taken below stay valid
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut structures = Vec::new();
        for write in writes {
            match write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: lookup(&registry.buffers, buffer, "buffer")?.buffer,
                    offset,
                    range,
                }),
                DescriptorResource::Image {
                    image,
                    layout,
                    sampler,
                } => image_infos.push(vk::DescriptorImageInfo {
                    sampler: match sampler {
                        Some(sampler) => *lookup(&registry.samplers, sampler, "sampler")?,
                        None => vk::Sampler::null(),
                    },
                    image_view: lookup(&registry.images, image, "image")?.view,
                    image_layout: layout,
                }),
                DescriptorResource::AccelerationStructure(structure) => structures.push(
                    lookup(&registry.structures, structure, "acceleration structure")?.structure,
                ),
            }
        }
        let structure_writes: Vec<_> = structures
            .iter()
            .map(|structure| {
                vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                    .acceleration_structures(std::slice::from_ref(structure))
                    .build()
            })
            .collect();

        let (mut buffer_index, mut image_index, mut structure_index) = (0, 0, 0);
        let mut vk_writes = Vec::with_capacity(writes.len());
        for write in writes {
            let kind = bindings
                .iter()
                .find(|binding| binding.slot == write.slot)
                .map(|binding| binding.kind)
                .ok_or(DeviceError::UnknownId {
                    kind: "descriptor slot",
                    id: write.slot as u64,
                })?;
            let mut vk_write = vk::WriteDescriptorSet {
                dst_set: record.set,
                dst_binding: write.slot,
                descriptor_count: 1,
                descriptor_type: kind,
                ..Default::default()
            };
            match write.resource {
                DescriptorResource::Buffer { .. } => {
                    vk_write.p_buffer_info = &buffer_infos[buffer_index];
                    buffer_index += 1;
                }
                DescriptorResource::Image { .. } => {
                    vk_write.p_image_info = &image_infos[image_index];
                    image_index += 1;
                }
                DescriptorResource::AccelerationStructure(_) => {
                    vk_write.p_next = &structure_writes[structure_index]
                        as *const vk::WriteDescriptorSetAccelerationStructureKHR
                        as *const std::ffi::c_void;
                    structure_index += 1;
                }
            }
            vk_writes.push(vk_write);
        }

        unsafe { self.shared.device().update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutId],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<PipelineLayoutId, DeviceError> {
        let mut registry = locked(&self.shared.registry);
        let raw_layouts = set_layouts
            .iter()
            .map(|&layout| {
                lookup(&registry.set_layouts, layout, "descriptor set layout")
                    .map(|record| record.layout)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&raw_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { self.shared.device().create_pipeline_layout(&create_info, None) }?;

        let id = PipelineLayoutId(registry.next_id());
        registry.pipeline_layouts.insert(id, layout);
        Ok(id)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutId) {
        let removed = locked(&self.shared.registry).pipeline_layouts.remove(&layout);
        if let Some(layout) = removed {
            unsafe { self.shared.device().destroy_pipeline_layout(layout, None) };
        }
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<PipelineId, DeviceError> {
        let record = self.shared.create_compute_pipeline(desc)?;
        Ok(self.shared.insert_pipeline(record))
    }

    fn create_raster_pipeline(&self, desc: &RasterPipelineDesc) -> Result<PipelineId, DeviceError> {
        let record = self.shared.create_raster_pipeline(desc)?;
        Ok(self.shared.insert_pipeline(record))
    }

    fn create_ray_trace_pipeline(
        &self,
        desc: &RayTracePipelineDesc,
    ) -> Result<(PipelineId, SbtRegions), DeviceError> {
        let (record, regions) = self.shared.create_ray_trace_pipeline(desc)?;
        Ok((self.shared.insert_pipeline(record), regions))
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        let removed = locked(&self.shared.registry).pipelines.remove(&pipeline);
        if let Some(record) = removed {
            unsafe { self.shared.device().destroy_pipeline(record.pipeline, None) };
            if let Some(table) = record.shader_binding_table {
                self.shared.destroy_raw_buffer(table);
            }
        }
    }

    fn create_bottom_level_structure(
        &self,
        geometry: &TriangleGeometry,
    ) -> Result<AccelerationStructureHandle, DeviceError> {
        self.shared.create_structure(StructureKind::Bottom(*geometry))
    }

    fn create_top_level_structure(
        &self,
        max_instances: u32,
    ) -> Result<AccelerationStructureHandle, DeviceError> {
        self.shared
            .create_structure(StructureKind::Top { max_instances })
    }

    fn destroy_acceleration_structure(&self, structure: AccelerationStructureId) {
        let removed = locked(&self.shared.registry).structures.remove(&structure);
        if let Some(record) = removed {
            self.shared.destroy_structure(record);
        }
    }

    fn create_command_buffer(&self, queue: QueueKind) -> Result<CommandBufferId, DeviceError> {
        let pool = locked(self.shared.command_pool(queue));
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(1)
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer =
            unsafe { self.shared.device().allocate_command_buffers(&allocate_info) }?[0];
        drop(pool);

        let mut registry = locked(&self.shared.registry);
        let id = CommandBufferId(registry.next_id());
        registry.command_buffers.insert(
            id,
            CommandBufferRecord {
                command_buffer,
                queue,
            },
        );
        Ok(id)
    }

    fn destroy_command_buffer(&self, command_buffer: CommandBufferId) {
        let removed = locked(&self.shared.registry)
            .command_buffers
            .remove(&command_buffer);
        if let Some(record) = removed {
            let pool = locked(self.shared.command_pool(record.queue));
            unsafe {
                self.shared
                    .device()
                    .free_command_buffers(*pool, std::slice::from_ref(&record.command_buffer))
            };
        }
    }

    fn record_command_buffer(
        &self,
        command_buffer: CommandBufferId,
        commands: &CommandList,
        usage: vk::CommandBufferUsageFlags,
    ) -> Result<(), DeviceError> {
        let registry = locked(&self.shared.registry);
        let record = lookup(&registry.command_buffers, command_buffer, "command buffer")?;
        let _pool = locked(self.shared.command_pool(record.queue));
        self.shared
            .record(&registry, record.command_buffer, commands, usage)
    }

    fn submit(
        &self,
        queue: QueueKind,
        command_buffer: CommandBufferId,
        info: &SubmitInfo,
    ) -> Result<(), DeviceError> {
        let (raw_command_buffer, wait, signal, fence) = {
            let registry = locked(&self.shared.registry);
            let raw_command_buffer =
                lookup(&registry.command_buffers, command_buffer, "command buffer")?
                    .command_buffer;
            let wait = info
                .wait_semaphore
                .map(|(semaphore, stage)| {
                    lookup(&registry.semaphores, semaphore, "semaphore")
                        .map(|&semaphore| (semaphore, stage))
                })
                .transpose()?;
            let signal = info
                .signal_semaphore
                .map(|semaphore| lookup(&registry.semaphores, semaphore, "semaphore").copied())
                .transpose()?;
            let fence = info
                .fence
                .map(|fence| lookup(&registry.fences, fence, "fence").copied())
                .transpose()?
                .unwrap_or_else(vk::Fence::null);
            (raw_command_buffer, wait, signal, fence)
        };

        let wait_semaphores: Vec<_> = wait.iter().map(|(semaphore, _)| *semaphore).collect();
        let wait_stages: Vec<_> = wait.iter().map(|(_, stage)| *stage).collect();
        let signal_semaphores: Vec<_> = signal.into_iter().collect();
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(std::slice::from_ref(&raw_command_buffer))
            .signal_semaphores(&signal_semaphores)
            .build();

        let queue = locked(self.shared.queue(queue));
        unsafe {
            self.shared
                .device()
                .queue_submit(*queue, std::slice::from_ref(&submit_info), fence)
        }?;
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceId, DeviceError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.shared.device().create_fence(&create_info, None) }?;
        let mut registry = locked(&self.shared.registry);
        let id = FenceId(registry.next_id());
        registry.fences.insert(id, fence);
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        let removed = locked(&self.shared.registry).fences.remove(&fence);
        if let Some(fence) = removed {
            unsafe { self.shared.device().destroy_fence(fence, None) };
        }
    }

    fn wait_for_fence(&self, fence: FenceId) -> Result<(), DeviceError> {
        let fence = *lookup(&locked(&self.shared.registry).fences, fence, "fence")?;
        unsafe {
            self.shared
                .device()
                .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)
        }?;
        Ok(())
    }

    fn reset_fence(&self, fence: FenceId) -> Result<(), DeviceError> {
        let fence = *lookup(&locked(&self.shared.registry).fences, fence, "fence")?;
        unsafe { self.shared.device().reset_fences(std::slice::from_ref(&fence)) }?;
        Ok(())
    }

    fn signal_fence(&self, queue: QueueKind, fence: FenceId) -> Result<(), DeviceError> {
        let fence = *lookup(&locked(&self.shared.registry).fences, fence, "fence")?;
        let device = self.shared.device();
        unsafe { device.reset_fences(std::slice::from_ref(&fence)) }?;
        // An empty submission still orders its fence after all prior work on the queue.
        let queue = locked(self.shared.queue(queue));
        unsafe { device.queue_submit(*queue, &[], fence) }?;
        Ok(())
    }

    fn create_semaphore(&self) -> Result<SemaphoreId, DeviceError> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.shared.device().create_semaphore(&create_info, None) }?;
        let mut registry = locked(&self.shared.registry);
        let id = SemaphoreId(registry.next_id());
        registry.semaphores.insert(id, semaphore);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        let removed = locked(&self.shared.registry).semaphores.remove(&semaphore);
        if let Some(semaphore) = removed {
            unsafe { self.shared.device().destroy_semaphore(semaphore, None) };
        }
    }

    fn queue_wait_idle(&self, queue: QueueKind) -> Result<(), DeviceError> {
        let queue = locked(self.shared.queue(queue));
        unsafe { self.shared.device().queue_wait_idle(*queue) }?;
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        unsafe { self.shared.device().device_wait_idle() }?;
        Ok(())
    }
}
