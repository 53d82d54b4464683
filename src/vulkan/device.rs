use ash::vk;

use super::command_buffer::CommandList;
use super::error::DeviceError;

macro_rules! define_ids {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u64);

            impl $name {
                pub fn raw(self) -> u64 {
                    self.0
                }
            }

            impl From<$name> for u64 {
                fn from(id: $name) -> u64 {
                    id.0
                }
            }
        )*
    };
}

define_ids!(
    BufferId,
    ImageId,
    SamplerId,
    DescriptorSetLayoutId,
    DescriptorPoolId,
    DescriptorSetId,
    PipelineLayoutId,
    PipelineId,
    AccelerationStructureId,
    CommandBufferId,
    FenceId,
    SemaphoreId,
    RenderPassId,
    FramebufferId,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

impl MemoryLocation {
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub location: MemoryLocation,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

/// One slot of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub slot: u32,
    pub count: u32,
    pub kind: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: BufferId,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        image: ImageId,
        layout: vk::ImageLayout,
        sampler: Option<SamplerId>,
    },
    AccelerationStructure(AccelerationStructureId),
}

impl DescriptorResource {
    pub fn describe(&self) -> &'static str {
        match self {
            DescriptorResource::Buffer { .. } => "buffer",
            DescriptorResource::Image { sampler: Some(_), .. } => "sampled image",
            DescriptorResource::Image { sampler: None, .. } => "image",
            DescriptorResource::AccelerationStructure(_) => "acceleration structure",
        }
    }

    /// Whether this resource can be bound to a slot of the given kind.
    pub fn fits(&self, kind: vk::DescriptorType) -> bool {
        match self {
            DescriptorResource::Buffer { .. } => matches!(
                kind,
                vk::DescriptorType::UNIFORM_BUFFER
                    | vk::DescriptorType::STORAGE_BUFFER
                    | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                    | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            ),
            DescriptorResource::Image {
                sampler: Some(_), ..
            } => kind == vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorResource::Image { sampler: None, .. } => matches!(
                kind,
                vk::DescriptorType::STORAGE_IMAGE | vk::DescriptorType::SAMPLED_IMAGE
            ),
            DescriptorResource::AccelerationStructure(_) => {
                kind == vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

/// Usage flags a resource was created with, checked against the slot it is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    Buffer(vk::BufferUsageFlags),
    Image(vk::ImageUsageFlags),
    AccelerationStructure,
}

impl ResourceUsage {
    pub fn allows(self, kind: vk::DescriptorType) -> bool {
        match self {
            ResourceUsage::Buffer(usage) => match kind {
                vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
                    usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
                }
                vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
                    usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER)
                }
                _ => false,
            },
            ResourceUsage::Image(usage) => match kind {
                vk::DescriptorType::STORAGE_IMAGE => usage.contains(vk::ImageUsageFlags::STORAGE),
                vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::COMBINED_IMAGE_SAMPLER => {
                    usage.contains(vk::ImageUsageFlags::SAMPLED)
                }
                _ => false,
            },
            ResourceUsage::AccelerationStructure => {
                kind == vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub slot: u32,
    pub resource: DescriptorResource,
}

/// Compiled shader code plus the name it was loaded by.
#[derive(Debug, Clone)]
pub struct Shader {
    pub name: String,
    pub stage: vk::ShaderStageFlags,
    pub spirv: Vec<u32>,
}

pub struct ComputePipelineDesc<'a> {
    pub layout: PipelineLayoutId,
    pub shader: &'a Shader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    PremultipliedAlpha,
}

pub struct RasterPipelineDesc<'a> {
    pub layout: PipelineLayoutId,
    pub render_pass: RenderPassId,
    pub vertex_shader: &'a Shader,
    pub fragment_shader: &'a Shader,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub polygon_mode: vk::PolygonMode,
    pub front_face: vk::FrontFace,
    pub cull_mode: vk::CullModeFlags,
    pub blend: BlendMode,
}

pub struct RayTracePipelineDesc<'a> {
    pub layout: PipelineLayoutId,
    pub raygen: &'a Shader,
    pub miss: &'a [Shader],
    pub closest_hit: &'a [Shader],
    pub callable: &'a [Shader],
    pub max_recursion_depth: u32,
}

/// Device address regions of a shader binding table, one per group kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct SbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

#[derive(Debug, Clone, Copy)]
pub struct TriangleGeometry {
    pub vertex_buffer: BufferId,
    pub vertex_format: vk::Format,
    pub vertex_stride: vk::DeviceSize,
    pub max_vertex: u32,
    pub index_buffer: BufferId,
    pub index_type: vk::IndexType,
    pub triangle_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelerationStructureHandle {
    pub id: AccelerationStructureId,
    pub device_address: vk::DeviceAddress,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo {
    pub wait_semaphore: Option<(SemaphoreId, vk::PipelineStageFlags)>,
    pub signal_semaphore: Option<SemaphoreId>,
    pub fence: Option<FenceId>,
}

/// The backend seam. Everything the passes, tables and structures need from a GPU.
///
/// Submissions are asynchronous: work handed to [`Device::submit`] is only guaranteed
/// to have executed once a fence it signals was waited on, or its queue went idle.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    fn supports_ray_tracing(&self) -> bool;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId, DeviceError>;
    fn destroy_buffer(&self, buffer: BufferId);
    /// Only valid for host visible buffers.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError>;
    /// Only valid for host visible buffers.
    fn read_buffer(&self, buffer: BufferId, offset: u64, len: u64)
        -> Result<Vec<u8>, DeviceError>;
    fn buffer_device_address(&self, buffer: BufferId) -> Result<vk::DeviceAddress, DeviceError>;

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId, DeviceError>;
    fn destroy_image(&self, image: ImageId);
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError>;
    fn destroy_sampler(&self, sampler: SamplerId);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutId, DeviceError>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutId);
    fn create_descriptor_pool(
        &self,
        bindings: &[DescriptorBinding],
        max_sets: u32,
    ) -> Result<DescriptorPoolId, DeviceError>;
    /// Also frees every set allocated from the pool.
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolId);
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
    ) -> Result<DescriptorSetId, DeviceError>;
    /// Applies all writes at once.
    fn update_descriptor_set(
        &self,
        set: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError>;

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutId],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<PipelineLayoutId, DeviceError>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutId);
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc)
        -> Result<PipelineId, DeviceError>;
    fn create_raster_pipeline(&self, desc: &RasterPipelineDesc) -> Result<PipelineId, DeviceError>;
    /// Creates the pipeline together with its shader binding table.
    fn create_ray_trace_pipeline(
        &self,
        desc: &RayTracePipelineDesc,
    ) -> Result<(PipelineId, SbtRegions), DeviceError>;
    fn destroy_pipeline(&self, pipeline: PipelineId);

    fn create_bottom_level_structure(
        &self,
        geometry: &TriangleGeometry,
    ) -> Result<AccelerationStructureHandle, DeviceError>;
    fn create_top_level_structure(
        &self,
        max_instances: u32,
    ) -> Result<AccelerationStructureHandle, DeviceError>;
    fn destroy_acceleration_structure(&self, structure: AccelerationStructureId);

    fn create_command_buffer(&self, queue: QueueKind) -> Result<CommandBufferId, DeviceError>;
    fn destroy_command_buffer(&self, command_buffer: CommandBufferId);
    /// Resets the buffer and records the list into it.
    fn record_command_buffer(
        &self,
        command_buffer: CommandBufferId,
        commands: &CommandList,
        usage: vk::CommandBufferUsageFlags,
    ) -> Result<(), DeviceError>;
    fn submit(
        &self,
        queue: QueueKind,
        command_buffer: CommandBufferId,
        info: &SubmitInfo,
    ) -> Result<(), DeviceError>;

    fn create_fence(&self, signaled: bool) -> Result<FenceId, DeviceError>;
    fn destroy_fence(&self, fence: FenceId);
    fn wait_for_fence(&self, fence: FenceId) -> Result<(), DeviceError>;
    fn reset_fence(&self, fence: FenceId) -> Result<(), DeviceError>;
    /// Resets the fence and signals it once everything submitted to `queue` so far finished.
    fn signal_fence(&self, queue: QueueKind, fence: FenceId) -> Result<(), DeviceError>;
    fn create_semaphore(&self) -> Result<SemaphoreId, DeviceError>;
    fn destroy_semaphore(&self, semaphore: SemaphoreId);

    fn queue_wait_idle(&self, queue: QueueKind) -> Result<(), DeviceError>;
    fn wait_idle(&self) -> Result<(), DeviceError>;
}
