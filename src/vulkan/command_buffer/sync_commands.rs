use ash::vk;

use crate::vulkan::device::{BufferId, ImageId};
use crate::vulkan::resource_state::ResourceState;

pub const COLOR_SUBRESOURCE_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

#[derive(Debug, Clone, Default)]
pub struct PipelineBarrier {
    pub dependency_flags: vk::DependencyFlags,
    pub memory_barriers: Vec<MemoryBarrier>,
    pub buffer_memory_barriers: Vec<BufferMemoryBarrier>,
    pub image_memory_barriers: Vec<ImageMemoryBarrier>,
}

impl PipelineBarrier {
    pub fn full() -> Self {
        let everything = vk::AccessFlags2::MEMORY_READ
            | vk::AccessFlags2::MEMORY_WRITE
            | vk::AccessFlags2::SHADER_WRITE
            | vk::AccessFlags2::SHADER_READ;
        Self {
            memory_barriers: vec![MemoryBarrier {
                src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                src_access_mask: everything,
                dst_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                dst_access_mask: everything,
            }],
            ..Default::default()
        }
    }

    /// Every write of a compute dispatch becomes visible to the next dispatch.
    pub fn compute_to_compute() -> Self {
        Self {
            memory_barriers: vec![MemoryBarrier {
                src_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
                src_access_mask: vk::AccessFlags2::SHADER_WRITE,
                dst_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
                dst_access_mask: vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            }],
            ..Default::default()
        }
    }

    pub fn src_stages(&self) -> vk::PipelineStageFlags2 {
        self.memory_barriers
            .iter()
            .map(|v| v.src_stage_mask)
            .chain(self.buffer_memory_barriers.iter().map(|v| v.src_stage_mask))
            .chain(self.image_memory_barriers.iter().map(|v| v.src_stage_mask))
            .fold(vk::PipelineStageFlags2::NONE, |acc, stage| acc | stage)
    }

    pub fn dst_stages(&self) -> vk::PipelineStageFlags2 {
        self.memory_barriers
            .iter()
            .map(|v| v.dst_stage_mask)
            .chain(self.buffer_memory_barriers.iter().map(|v| v.dst_stage_mask))
            .chain(self.image_memory_barriers.iter().map(|v| v.dst_stage_mask))
            .fold(vk::PipelineStageFlags2::NONE, |acc, stage| acc | stage)
    }

    /// Whether the barrier names a stage that only exists on queues with graphics support.
    pub fn needs_graphics_queue(&self) -> bool {
        (self.src_stages() | self.dst_stages()).intersects(graphics_stages())
    }

    pub fn is_empty(&self) -> bool {
        self.memory_barriers.is_empty()
            && self.buffer_memory_barriers.is_empty()
            && self.image_memory_barriers.is_empty()
    }
}

/// Stages a compute-only queue does not have.
pub fn graphics_stages() -> vk::PipelineStageFlags2 {
    vk::PipelineStageFlags2::VERTEX_INPUT
        | vk::PipelineStageFlags2::VERTEX_SHADER
        | vk::PipelineStageFlags2::TESSELLATION_CONTROL_SHADER
        | vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER
        | vk::PipelineStageFlags2::GEOMETRY_SHADER
        | vk::PipelineStageFlags2::FRAGMENT_SHADER
        | vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
        | vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags2::ALL_GRAPHICS
        | vk::PipelineStageFlags2::INDEX_INPUT
        | vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT
        | vk::PipelineStageFlags2::PRE_RASTERIZATION_SHADERS
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryBarrier {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferMemoryBarrier {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub buffer: BufferId,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageMemoryBarrier {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub image: ImageId,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// The declared half of an image barrier: everything except the image itself.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransition {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl ImageTransition {
    pub fn new(from: ResourceState, to: ResourceState) -> Self {
        Self {
            src_stage_mask: from.stage,
            src_access_mask: from.access,
            dst_stage_mask: to.stage,
            dst_access_mask: to.access,
            old_layout: from.layout,
            new_layout: to.layout,
            subresource_range: COLOR_SUBRESOURCE_RANGE,
        }
    }

    pub fn for_image(self, image: ImageId) -> ImageMemoryBarrier {
        ImageMemoryBarrier {
            src_stage_mask: self.src_stage_mask,
            src_access_mask: self.src_access_mask,
            dst_stage_mask: self.dst_stage_mask,
            dst_access_mask: self.dst_access_mask,
            old_layout: self.old_layout,
            new_layout: self.new_layout,
            image,
            subresource_range: self.subresource_range,
        }
    }
}
