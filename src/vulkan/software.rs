//! A CPU reference implementation of [`Device`]. Compute and ray generation shaders are
//! replaced by registered Rust closures, rasterization only clears and counts.

mod execute;
mod kernel;
mod memory;
mod ray_query;
mod surface;

pub use kernel::{ComputeKernel, Invocation, RayGenKernel, RayInvocation};
pub use ray_query::RayHit;
pub use surface::HeadlessSurface;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use ash::vk;

use self::kernel::RegisteredCompute;
use self::memory::{Memory, SoftBuffer, SoftImage};
use self::ray_query::Structures;
use super::command_buffer::{Command, CommandList};
use super::device::*;
use super::error::DeviceError;
use super::image::texel_size;

/// Counters over everything the device executed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub submissions: u64,
    pub executed_submissions: u64,
    pub dispatches: u64,
    pub workgroups: u64,
    /// Batches of two or more dispatches that ran without a compute barrier in between.
    pub interleaved_batches: u64,
    pub draw_calls: u64,
    pub vertices: u64,
    pub rays: u64,
    pub render_passes: u64,
    pub presents: u64,
    pub invalid_accesses: u64,
    /// Barriers recorded for a compute-only queue that name graphics stages.
    pub graphics_barriers_on_compute: u64,
}

enum SoftPipeline {
    Compute(RegisteredCompute),
    Raster,
    RayTrace(RayGenKernel),
}

struct Submission {
    seq: u64,
    commands: Arc<CommandList>,
    fence: Option<FenceId>,
}

struct SoftPool {
    max_sets: u32,
    sets: Vec<DescriptorSetId>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    next_address: vk::DeviceAddress,
    next_seq: u64,
    memory: Memory,
    structures: Structures,
    samplers: HashSet<SamplerId>,
    set_layouts: HashMap<DescriptorSetLayoutId, Vec<DescriptorBinding>>,
    pools: HashMap<DescriptorPoolId, SoftPool>,
    set_layout_of: HashMap<DescriptorSetId, DescriptorSetLayoutId>,
    sets: HashMap<DescriptorSetId, BTreeMap<u32, DescriptorResource>>,
    pipeline_layouts: HashSet<PipelineLayoutId>,
    pipelines: HashMap<PipelineId, SoftPipeline>,
    command_buffers: HashMap<CommandBufferId, (QueueKind, Arc<CommandList>)>,
    fences: HashMap<FenceId, bool>,
    semaphores: HashSet<SemaphoreId>,
    pending: HashMap<QueueKind, VecDeque<Submission>>,
    render_passes: HashSet<RenderPassId>,
    framebuffers: HashMap<FramebufferId, ImageId>,
    stats: SoftwareStats,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Fake device addresses, never zero and spaced far apart.
    fn next_address(&mut self) -> vk::DeviceAddress {
        self.next_address += 1 << 32;
        self.next_address
    }

    /// Executes pending submissions of every queue, oldest first, up to and including `seq`.
    fn drain_until(&mut self, seq: u64) -> Result<(), DeviceError> {
        loop {
            let oldest = self
                .pending
                .iter()
                .filter_map(|(queue, submissions)| Some((*queue, submissions.front()?.seq)))
                .filter(|(_, next)| *next <= seq)
                .min_by_key(|(_, next)| *next);
            let Some((queue, _)) = oldest else {
                return Ok(());
            };
            let Some(submission) = self.pending.get_mut(&queue).and_then(VecDeque::pop_front)
            else {
                return Ok(());
            };
            execute::execute(self, &submission.commands)?;
            self.stats.executed_submissions += 1;
            if let Some(fence) = submission.fence {
                self.fences.insert(fence, true);
            }
        }
    }

    fn last_seq(&self, queue: Option<QueueKind>) -> Option<u64> {
        self.pending
            .iter()
            .filter(|(kind, _)| queue.map_or(true, |queue| queue == **kind))
            .filter_map(|(_, submissions)| submissions.back().map(|submission| submission.seq))
            .max()
    }
}

struct Shared {
    state: Mutex<State>,
    compute_kernels: RwLock<HashMap<String, RegisteredCompute>>,
    ray_gen_kernels: RwLock<HashMap<String, RayGenKernel>>,
}

/// Cloning hands out another handle to the same device.
#[derive(Clone)]
pub struct SoftwareDevice {
    shared: Arc<Shared>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                compute_kernels: RwLock::new(HashMap::new()),
                ray_gen_kernels: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A kernel that panicked leaves the device usable for inspection.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers the stand-in for the compute shader loaded under `name`.
    pub fn register_compute_kernel(
        &self,
        name: &str,
        local_size: [u32; 3],
        kernel: impl Fn(&mut Invocation<'_>) + Send + Sync + 'static,
    ) {
        if let Ok(mut kernels) = self.shared.compute_kernels.write() {
            kernels.insert(
                name.to_owned(),
                RegisteredCompute {
                    local_size,
                    kernel: Arc::new(kernel),
                },
            );
        }
    }

    /// Registers the stand-in for the ray generation shader loaded under `name`.
    pub fn register_ray_gen_kernel(
        &self,
        name: &str,
        kernel: impl Fn(&mut RayInvocation<'_>) + Send + Sync + 'static,
    ) {
        if let Ok(mut kernels) = self.shared.ray_gen_kernels.write() {
            kernels.insert(name.to_owned(), Arc::new(kernel));
        }
    }

    pub fn stats(&self) -> SoftwareStats {
        self.state().stats.clone()
    }

    /// Submissions that were handed to a queue but did not execute yet.
    pub fn pending_submissions(&self) -> usize {
        self.state().pending.values().map(VecDeque::len).sum()
    }

    /// Decoded texels in row-major order. Reads whatever the last executed command left.
    pub fn read_image(&self, image: ImageId) -> Result<Vec<[f32; 4]>, DeviceError> {
        let state = self.state();
        let image = state.memory.image(image)?;
        Ok((0..image.extent.height)
            .flat_map(|y| (0..image.extent.width).map(move |x| (x, y)))
            .map(|(x, y)| image.load(x, y).unwrap_or([0.0; 4]))
            .collect())
    }

    /// Current contents of any buffer, host visible or not.
    pub fn read_buffer_contents(&self, buffer: BufferId) -> Result<Vec<u8>, DeviceError> {
        Ok(self.state().memory.buffer(buffer)?.bytes.clone())
    }

    /// Contents of a descriptor set as the device sees them.
    pub fn descriptor_set_contents(
        &self,
        set: DescriptorSetId,
    ) -> Result<BTreeMap<u32, DescriptorResource>, DeviceError> {
        self.state()
            .sets
            .get(&set)
            .cloned()
            .ok_or(DeviceError::UnknownId {
                kind: "descriptor set",
                id: set.raw(),
            })
    }

    pub fn create_render_pass(&self) -> RenderPassId {
        let mut state = self.state();
        let id = RenderPassId(state.next_id());
        state.render_passes.insert(id);
        id
    }

    pub fn destroy_render_pass(&self, render_pass: RenderPassId) {
        self.state().render_passes.remove(&render_pass);
    }

    /// An image plus a framebuffer that renders into it.
    pub fn create_render_target(
        &self,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<(ImageId, FramebufferId), DeviceError> {
        let image = self.create_image(&ImageDesc {
            name,
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            location: MemoryLocation::GpuOnly,
        })?;
        let mut state = self.state();
        let framebuffer = FramebufferId(state.next_id());
        state.framebuffers.insert(framebuffer, image);
        Ok((image, framebuffer))
    }

    pub fn destroy_render_target(&self, image: ImageId, framebuffer: FramebufferId) {
        self.state().framebuffers.remove(&framebuffer);
        self.destroy_image(image);
    }

    pub(crate) fn count_present(&self) {
        self.state().stats.presents += 1;
    }
}

fn unknown(kind: &'static str, id: u64) -> DeviceError {
    DeviceError::UnknownId { kind, id }
}

impl Device for SoftwareDevice {
    fn name(&self) -> &str {
        "software reference device"
    }

    fn supports_ray_tracing(&self) -> bool {
        true
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        let mut state = self.state();
        let id = BufferId(state.next_id());
        let address = state.next_address();
        state.memory.buffers.insert(
            id,
            SoftBuffer {
                bytes: vec![0; desc.size as usize],
                location: desc.location,
                address,
            },
        );
        log::trace!("Created buffer {} of {} bytes", desc.name, desc.size);
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        self.state().memory.buffers.remove(&buffer);
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state();
        if !state.memory.buffer(buffer)?.location.is_host_visible() {
            return Err(DeviceError::NotHostVisible(buffer.raw()));
        }
        state.memory.write_bytes(buffer, offset, data)
    }

    fn read_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError> {
        let state = self.state();
        if !state.memory.buffer(buffer)?.location.is_host_visible() {
            return Err(DeviceError::NotHostVisible(buffer.raw()));
        }
        Ok(state.memory.read_bytes(buffer, offset, len)?.to_vec())
    }

    fn buffer_device_address(&self, buffer: BufferId) -> Result<vk::DeviceAddress, DeviceError> {
        Ok(self.state().memory.buffer(buffer)?.address)
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId, DeviceError> {
        let size = texel_size(desc.format).ok_or_else(|| {
            DeviceError::Allocation(format!("unsupported image format {:?}", desc.format))
        })?;
        let mut state = self.state();
        let id = ImageId(state.next_id());
        state.memory.images.insert(
            id,
            SoftImage {
                bytes: vec![0; desc.extent.width as usize * desc.extent.height as usize * size],
                extent: desc.extent,
                format: desc.format,
                texel_size: size,
            },
        );
        log::trace!(
            "Created image {} of {}x{}",
            desc.name,
            desc.extent.width,
            desc.extent.height
        );
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        self.state().memory.images.remove(&image);
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        let mut state = self.state();
        let id = SamplerId(state.next_id());
        state.samplers.insert(id);
        Ok(id)
    }

    fn destroy_sampler(&self, sampler: SamplerId) {
        self.state().samplers.remove(&sampler);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutId, DeviceError> {
        let mut state = self.state();
        let id = DescriptorSetLayoutId(state.next_id());
        state.set_layouts.insert(id, bindings.to_vec());
        Ok(id)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutId) {
        self.state().set_layouts.remove(&layout);
    }

    fn create_descriptor_pool(
        &self,
        _bindings: &[DescriptorBinding],
        max_sets: u32,
    ) -> Result<DescriptorPoolId, DeviceError> {
        let mut state = self.state();
        let id = DescriptorPoolId(state.next_id());
        state.pools.insert(
            id,
            SoftPool {
                max_sets,
                sets: Vec::new(),
            },
        );
        Ok(id)
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolId) {
        let mut state = self.state();
        if let Some(pool) = state.pools.remove(&pool) {
            for set in pool.sets {
                state.sets.remove(&set);
                state.set_layout_of.remove(&set);
            }
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
    ) -> Result<DescriptorSetId, DeviceError> {
        let mut state = self.state();
        if !state.set_layouts.contains_key(&layout) {
            return Err(unknown("descriptor set layout", layout.raw()));
        }
        let id = DescriptorSetId(state.next_id());
        let soft_pool = state
            .pools
            .get_mut(&pool)
            .ok_or(unknown("descriptor pool", pool.raw()))?;
        if soft_pool.sets.len() >= soft_pool.max_sets as usize {
            return Err(DeviceError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        soft_pool.sets.push(id);
        state.sets.insert(id, BTreeMap::new());
        state.set_layout_of.insert(id, layout);
        Ok(id)
    }

    fn update_descriptor_set(
        &self,
        set: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError> {
        let mut state = self.state();
        if !state.sets.contains_key(&set) {
            return Err(unknown("descriptor set", set.raw()));
        }
        for write in writes {
            match write.resource {
                DescriptorResource::Buffer { buffer, .. } => {
                    state.memory.buffer(buffer)?;
                }
                DescriptorResource::Image { image, sampler, .. } => {
                    state.memory.image(image)?;
                    if let Some(sampler) = sampler {
                        if !state.samplers.contains(&sampler) {
                            return Err(unknown("sampler", sampler.raw()));
                        }
                    }
                }
                DescriptorResource::AccelerationStructure(structure) => {
                    if !state.structures.contains(structure) {
                        return Err(unknown("acceleration structure", structure.raw()));
                    }
                }
            }
        }
        if let Some(contents) = state.sets.get_mut(&set) {
            for write in writes {
                contents.insert(write.slot, write.resource);
            }
        }
        Ok(())
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[DescriptorSetLayoutId],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<PipelineLayoutId, DeviceError> {
        let mut state = self.state();
        let id = PipelineLayoutId(state.next_id());
        state.pipeline_layouts.insert(id);
        Ok(id)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutId) {
        self.state().pipeline_layouts.remove(&layout);
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<PipelineId, DeviceError> {
        let compute = self
            .shared
            .compute_kernels
            .read()
            .ok()
            .and_then(|kernels| kernels.get(&desc.shader.name).cloned())
            .ok_or_else(|| DeviceError::MissingKernel(desc.shader.name.clone()))?;
        let mut state = self.state();
        let id = PipelineId(state.next_id());
        state.pipelines.insert(id, SoftPipeline::Compute(compute));
        Ok(id)
    }

    fn create_raster_pipeline(&self, desc: &RasterPipelineDesc) -> Result<PipelineId, DeviceError> {
        let mut state = self.state();
        if !state.render_passes.contains(&desc.render_pass) {
            return Err(unknown("render pass", desc.render_pass.raw()));
        }
        let id = PipelineId(state.next_id());
        state.pipelines.insert(id, SoftPipeline::Raster);
        Ok(id)
    }

    fn create_ray_trace_pipeline(
        &self,
        desc: &RayTracePipelineDesc,
    ) -> Result<(PipelineId, SbtRegions), DeviceError> {
        let kernel = self
            .shared
            .ray_gen_kernels
            .read()
            .ok()
            .and_then(|kernels| kernels.get(&desc.raygen.name).cloned())
            .ok_or_else(|| DeviceError::MissingKernel(desc.raygen.name.clone()))?;
        let mut state = self.state();
        let id = PipelineId(state.next_id());
        state.pipelines.insert(id, SoftPipeline::RayTrace(kernel));

        let base = state.next_address();
        let region = |index: u64, count: usize| vk::StridedDeviceAddressRegionKHR {
            device_address: base + index * 256,
            stride: 32,
            size: 32 * count as u64,
        };
        let regions = SbtRegions {
            raygen: vk::StridedDeviceAddressRegionKHR {
                size: 32,
                ..region(0, 1)
            },
            miss: region(1, desc.miss.len()),
            hit: region(2, desc.closest_hit.len()),
            callable: region(3, desc.callable.len()),
        };
        Ok((id, regions))
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        self.state().pipelines.remove(&pipeline);
    }

    fn create_bottom_level_structure(
        &self,
        geometry: &TriangleGeometry,
    ) -> Result<AccelerationStructureHandle, DeviceError> {
        let mut state = self.state();
        state.memory.buffer(geometry.vertex_buffer)?;
        state.memory.buffer(geometry.index_buffer)?;
        let id = AccelerationStructureId(state.next_id());
        let device_address = state.next_address();
        state.structures.insert_bottom(id, device_address, *geometry);
        Ok(AccelerationStructureHandle { id, device_address })
    }

    fn create_top_level_structure(
        &self,
        max_instances: u32,
    ) -> Result<AccelerationStructureHandle, DeviceError> {
        let mut state = self.state();
        let id = AccelerationStructureId(state.next_id());
        let device_address = state.next_address();
        state.structures.insert_top(id, device_address, max_instances);
        Ok(AccelerationStructureHandle { id, device_address })
    }

    fn destroy_acceleration_structure(&self, structure: AccelerationStructureId) {
        self.state().structures.remove(structure);
    }

    fn create_command_buffer(&self, queue: QueueKind) -> Result<CommandBufferId, DeviceError> {
        let mut state = self.state();
        let id = CommandBufferId(state.next_id());
        state
            .command_buffers
            .insert(id, (queue, Arc::new(CommandList::default())));
        Ok(id)
    }

    fn destroy_command_buffer(&self, command_buffer: CommandBufferId) {
        self.state().command_buffers.remove(&command_buffer);
    }

    fn record_command_buffer(
        &self,
        command_buffer: CommandBufferId,
        commands: &CommandList,
        _usage: vk::CommandBufferUsageFlags,
    ) -> Result<(), DeviceError> {
        let mut state = self.state();
        let (queue, recorded) = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or(unknown("command buffer", command_buffer.raw()))?;
        *recorded = Arc::new(commands.clone());
        if *queue == QueueKind::Compute {
            let misplaced = commands
                .commands()
                .iter()
                .filter(|command| match command {
                    Command::PipelineBarrier(barrier) => barrier.needs_graphics_queue(),
                    _ => false,
                })
                .count() as u64;
            if misplaced > 0 {
                log::warn!("Recorded {misplaced} barriers with graphics stages for the compute queue");
                state.stats.graphics_barriers_on_compute += misplaced;
            }
        }
        Ok(())
    }

    fn submit(
        &self,
        queue: QueueKind,
        command_buffer: CommandBufferId,
        info: &SubmitInfo,
    ) -> Result<(), DeviceError> {
        let mut state = self.state();
        let (buffer_queue, commands) = state
            .command_buffers
            .get(&command_buffer)
            .map(|(queue, commands)| (*queue, commands.clone()))
            .ok_or(unknown("command buffer", command_buffer.raw()))?;
        if buffer_queue != queue {
            return Err(DeviceError::Vulkan(vk::Result::ERROR_FEATURE_NOT_PRESENT));
        }
        let semaphores = info
            .wait_semaphore
            .map(|(semaphore, _)| semaphore)
            .into_iter()
            .chain(info.signal_semaphore);
        for semaphore in semaphores {
            if !state.semaphores.contains(&semaphore) {
                return Err(unknown("semaphore", semaphore.raw()));
            }
        }
        if let Some(fence) = info.fence {
            let signaled = state
                .fences
                .get_mut(&fence)
                .ok_or(unknown("fence", fence.raw()))?;
            *signaled = false;
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        state.stats.submissions += 1;
        state.pending.entry(queue).or_default().push_back(Submission {
            seq,
            commands,
            fence: info.fence,
        });
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceId, DeviceError> {
        let mut state = self.state();
        let id = FenceId(state.next_id());
        state.fences.insert(id, signaled);
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.state().fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: FenceId) -> Result<(), DeviceError> {
        let mut state = self.state();
        match state.fences.get(&fence) {
            None => return Err(unknown("fence", fence.raw())),
            Some(true) => return Ok(()),
            Some(false) => {}
        }
        let seq = state
            .pending
            .values()
            .flatten()
            .find(|submission| submission.fence == Some(fence))
            .map(|submission| submission.seq)
            // Waiting on a fence nothing will ever signal would hang forever.
            .ok_or(DeviceError::Vulkan(vk::Result::TIMEOUT))?;
        state.drain_until(seq)
    }

    fn reset_fence(&self, fence: FenceId) -> Result<(), DeviceError> {
        let mut state = self.state();
        let signaled = state
            .fences
            .get_mut(&fence)
            .ok_or(unknown("fence", fence.raw()))?;
        *signaled = false;
        Ok(())
    }

    fn signal_fence(&self, queue: QueueKind, fence: FenceId) -> Result<(), DeviceError> {
        let mut state = self.state();
        let signaled = state
            .fences
            .get_mut(&fence)
            .ok_or(unknown("fence", fence.raw()))?;
        *signaled = false;
        state.next_seq += 1;
        let seq = state.next_seq;
        state.pending.entry(queue).or_default().push_back(Submission {
            seq,
            commands: Arc::new(CommandList::default()),
            fence: Some(fence),
        });
        Ok(())
    }

    fn create_semaphore(&self) -> Result<SemaphoreId, DeviceError> {
        let mut state = self.state();
        let id = SemaphoreId(state.next_id());
        state.semaphores.insert(id);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.state().semaphores.remove(&semaphore);
    }

    fn queue_wait_idle(&self, queue: QueueKind) -> Result<(), DeviceError> {
        let mut state = self.state();
        match state.last_seq(Some(queue)) {
            Some(seq) => state.drain_until(seq),
            None => Ok(()),
        }
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        let mut state = self.state();
        match state.last_seq(None) {
            Some(seq) => state.drain_until(seq),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::command_buffer::{BufferMemoryBarrier, CommandRecorder, PipelineBarrier};

    fn host_buffer(device: &SoftwareDevice, size: u64) -> BufferId {
        device
            .create_buffer(&BufferDesc {
                name: "test",
                size,
                usage: vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
                location: MemoryLocation::CpuToGpu,
            })
            .unwrap()
    }

    #[test]
    fn submissions_run_only_when_waited_on() {
        let device = SoftwareDevice::new();
        let buffer = host_buffer(&device, 16);
        let command_buffer = device.create_command_buffer(QueueKind::Graphics).unwrap();
        let fence = device.create_fence(false).unwrap();

        let mut recorder = CommandRecorder::new();
        recorder.push(crate::vulkan::command_buffer::Command::FillBuffer {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            data: 7,
        });
        device
            .record_command_buffer(
                command_buffer,
                &recorder.finish(),
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
            .unwrap();
        device
            .submit(
                QueueKind::Graphics,
                command_buffer,
                &SubmitInfo {
                    fence: Some(fence),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(device.read_buffer(buffer, 0, 4).unwrap(), vec![0; 4]);
        assert_eq!(device.pending_submissions(), 1);

        device.wait_for_fence(fence).unwrap();
        assert_eq!(device.read_buffer(buffer, 0, 4).unwrap(), 7u32.to_le_bytes());
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn graphics_stages_are_flagged_only_on_the_compute_queue() {
        let device = SoftwareDevice::new();
        let buffer = host_buffer(&device, 16);
        let fragment_read = PipelineBarrier {
            buffer_memory_barriers: vec![BufferMemoryBarrier {
                src_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
                src_access_mask: vk::AccessFlags2::SHADER_WRITE,
                dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                dst_access_mask: vk::AccessFlags2::SHADER_READ,
                buffer,
                offset: 0,
                size: vk::WHOLE_SIZE,
            }],
            ..Default::default()
        };
        let mut recorder = CommandRecorder::new();
        recorder
            .compute_barrier()
            .pipeline_barrier(fragment_read);
        let commands = recorder.finish();

        for queue in [QueueKind::Graphics, QueueKind::Compute] {
            let command_buffer = device.create_command_buffer(queue).unwrap();
            device
                .record_command_buffer(
                    command_buffer,
                    &commands,
                    vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                )
                .unwrap();
        }
        assert_eq!(device.stats().graphics_barriers_on_compute, 1);
    }

    #[test]
    fn waiting_on_an_unsubmitted_fence_fails() {
        let device = SoftwareDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert!(matches!(
            device.wait_for_fence(fence),
            Err(DeviceError::Vulkan(vk::Result::TIMEOUT))
        ));
    }

    #[test]
    fn device_only_buffers_are_not_mappable() {
        let device = SoftwareDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc {
                name: "gpu",
                size: 4,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                location: MemoryLocation::GpuOnly,
            })
            .unwrap();
        assert!(matches!(
            device.write_buffer(buffer, 0, &[1, 2, 3, 4]),
            Err(DeviceError::NotHostVisible(_))
        ));
    }
}
