use std::collections::HashMap;
use std::hash::Hash;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::vulkan::device::*;
use crate::vulkan::error::DeviceError;

pub(super) struct BufferRecord {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,
    pub location: MemoryLocation,
    pub size: vk::DeviceSize,
}

pub(super) struct ImageRecord {
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// `None` for swapchain images, which the swapchain owns.
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

pub(super) struct LayoutRecord {
    pub layout: vk::DescriptorSetLayout,
    pub bindings: Vec<DescriptorBinding>,
}

pub(super) struct SetRecord {
    pub set: vk::DescriptorSet,
    pub layout: DescriptorSetLayoutId,
    pub pool: DescriptorPoolId,
}

pub(super) struct PipelineRecord {
    pub pipeline: vk::Pipeline,
    pub shader_binding_table: Option<BufferRecord>,
}

pub(super) enum StructureKind {
    Bottom(TriangleGeometry),
    Top { max_instances: u32 },
}

pub(super) struct StructureRecord {
    pub structure: vk::AccelerationStructureKHR,
    pub kind: StructureKind,
    pub storage: BufferRecord,
    pub scratch: BufferRecord,
    /// Aligned to the minimum scratch offset alignment.
    pub scratch_address: vk::DeviceAddress,
}

pub(super) struct CommandBufferRecord {
    pub command_buffer: vk::CommandBuffer,
    pub queue: QueueKind,
}

/// Maps the ids handed out by the device to the Vulkan objects behind them.
#[derive(Default)]
pub(super) struct Registry {
    next_id: u64,
    pub buffers: HashMap<BufferId, BufferRecord>,
    pub images: HashMap<ImageId, ImageRecord>,
    pub samplers: HashMap<SamplerId, vk::Sampler>,
    pub set_layouts: HashMap<DescriptorSetLayoutId, LayoutRecord>,
    pub pools: HashMap<DescriptorPoolId, vk::DescriptorPool>,
    pub sets: HashMap<DescriptorSetId, SetRecord>,
    pub pipeline_layouts: HashMap<PipelineLayoutId, vk::PipelineLayout>,
    pub pipelines: HashMap<PipelineId, PipelineRecord>,
    pub structures: HashMap<AccelerationStructureId, StructureRecord>,
    pub command_buffers: HashMap<CommandBufferId, CommandBufferRecord>,
    pub fences: HashMap<FenceId, vk::Fence>,
    pub semaphores: HashMap<SemaphoreId, vk::Semaphore>,
    pub render_passes: HashMap<RenderPassId, vk::RenderPass>,
    pub framebuffers: HashMap<FramebufferId, vk::Framebuffer>,
}

impl Registry {
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub(super) fn lookup<'a, K, V>(
    map: &'a HashMap<K, V>,
    id: K,
    kind: &'static str,
) -> Result<&'a V, DeviceError>
where
    K: Hash + Eq + Copy + Into<u64>,
{
    map.get(&id).ok_or(DeviceError::UnknownId {
        kind,
        id: id.into(),
    })
}

pub(super) fn lookup_mut<'a, K, V>(
    map: &'a mut HashMap<K, V>,
    id: K,
    kind: &'static str,
) -> Result<&'a mut V, DeviceError>
where
    K: Hash + Eq + Copy + Into<u64>,
{
    map.get_mut(&id).ok_or(DeviceError::UnknownId {
        kind,
        id: id.into(),
    })
}

/// How resources are shared between the queue families in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct QueueSharing {
    pub mode: vk::SharingMode,
    /// Empty for exclusive sharing.
    pub families: Vec<u32>,
}

impl QueueSharing {
    /// Compute results are read by the graphics queue without ownership transfers,
    /// so distinct families share every resource concurrently.
    pub fn new(graphics_family: u32, compute_family: u32) -> Self {
        if graphics_family == compute_family {
            Self {
                mode: vk::SharingMode::EXCLUSIVE,
                families: Vec::new(),
            }
        } else {
            Self {
                mode: vk::SharingMode::CONCURRENT,
                families: vec![graphics_family, compute_family],
            }
        }
    }
}

impl From<MemoryLocation> for gpu_allocator::MemoryLocation {
    fn from(location: MemoryLocation) -> Self {
        match location {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}

impl From<gpu_allocator::AllocationError> for DeviceError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        DeviceError::Allocation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_family_keeps_resources_exclusive() {
        let sharing = QueueSharing::new(0, 0);
        assert_eq!(sharing.mode, vk::SharingMode::EXCLUSIVE);
        assert!(sharing.families.is_empty());
    }

    #[test]
    fn a_dedicated_compute_family_shares_resources_concurrently() {
        let sharing = QueueSharing::new(0, 2);
        assert_eq!(sharing.mode, vk::SharingMode::CONCURRENT);
        assert_eq!(sharing.families, vec![0, 2]);
    }
}
