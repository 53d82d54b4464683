use std::collections::HashMap;

use ash::vk;

use super::kernel::{AccessLog, Bindings, Invocation, RayInvocation, RegisteredCompute};
use super::memory::Memory;
use super::{SoftPipeline, State};
use crate::vulkan::command_buffer::{Command, CommandList};
use crate::vulkan::device::{DescriptorSetId, PipelineId};
use crate::vulkan::error::DeviceError;

struct PendingDispatch {
    compute: RegisteredCompute,
    bindings: Bindings,
    push_constants: Vec<u8>,
    group_count: [u32; 3],
}

impl PendingDispatch {
    fn workgroup_count(&self) -> u64 {
        self.group_count.iter().map(|&count| count as u64).product()
    }

    fn run_workgroup(&self, memory: &mut Memory, log: &mut AccessLog, index: u64) {
        let [groups_x, groups_y, _] = self.group_count.map(|count| count as u64);
        let workgroup_id = [
            (index % groups_x) as u32,
            ((index / groups_x) % groups_y) as u32,
            (index / (groups_x * groups_y)) as u32,
        ];
        let [size_x, size_y, size_z] = self.compute.local_size;
        for z in 0..size_z {
            for y in 0..size_y {
                for x in 0..size_x {
                    let mut invocation =
                        Invocation::new(memory, &self.bindings, &self.push_constants, log);
                    invocation.workgroup_id = workgroup_id;
                    invocation.local_id = [x, y, z];
                    invocation.global_id = [
                        workgroup_id[0] * size_x + x,
                        workgroup_id[1] * size_y + y,
                        workgroup_id[2] * size_z + z,
                    ];
                    invocation.num_workgroups = self.group_count;
                    (self.compute.kernel)(&mut invocation);
                }
            }
        }
    }
}

#[derive(Default)]
struct BoundState {
    pipelines: HashMap<vk::PipelineBindPoint, PipelineId>,
    sets: HashMap<(vk::PipelineBindPoint, u32), DescriptorSetId>,
    push_constants: Vec<u8>,
}

/// Replays one command list against the reference device.
///
/// Dispatches that are not separated by a barrier out of the compute stage are collected
/// and then run one workgroup of each at a time, so a dispatch that reads what the previous
/// one writes sees partial results unless a barrier was recorded in between.
struct Executor<'a> {
    state: &'a mut State,
    bound: BoundState,
    batch: Vec<PendingDispatch>,
}

pub(super) fn execute(state: &mut State, commands: &CommandList) -> Result<(), DeviceError> {
    let mut executor = Executor {
        state,
        bound: BoundState::default(),
        batch: Vec::new(),
    };
    for command in commands.commands() {
        executor.command(command)?;
    }
    executor.flush();
    Ok(())
}

impl<'a> Executor<'a> {
    fn command(&mut self, command: &Command) -> Result<(), DeviceError> {
        match command {
            Command::BindPipeline {
                bind_point,
                pipeline,
            } => {
                self.bound.pipelines.insert(*bind_point, *pipeline);
            }
            Command::BindDescriptorSets {
                bind_point,
                first_set,
                sets,
                ..
            } => {
                for (index, set) in sets.iter().enumerate() {
                    self.bound
                        .sets
                        .insert((*bind_point, first_set + index as u32), *set);
                }
            }
            Command::PushConstants { offset, data, .. } => {
                let start = *offset as usize;
                let end = start + data.len();
                if self.bound.push_constants.len() < end {
                    self.bound.push_constants.resize(end, 0);
                }
                self.bound.push_constants[start..end].copy_from_slice(data);
            }
            Command::BindVertexBuffers { .. }
            | Command::BindIndexBuffer { .. }
            | Command::SetViewport(_)
            | Command::SetScissor(_) => {}
            Command::Dispatch { group_count } => self.queue_dispatch(*group_count)?,
            Command::PipelineBarrier(barrier) => {
                let compute = vk::PipelineStageFlags2::COMPUTE_SHADER
                    | vk::PipelineStageFlags2::ALL_COMMANDS;
                if barrier.src_stages().intersects(compute) {
                    self.flush();
                }
            }
            other => {
                self.flush();
                self.run(other)?;
            }
        }
        Ok(())
    }

    fn pipeline(&self, bind_point: vk::PipelineBindPoint) -> Result<&SoftPipeline, DeviceError> {
        let id = self
            .bound
            .pipelines
            .get(&bind_point)
            .ok_or(DeviceError::UnknownId {
                kind: "bound pipeline",
                id: bind_point.as_raw() as u64,
            })?;
        self.state.pipelines.get(id).ok_or(DeviceError::UnknownId {
            kind: "pipeline",
            id: id.raw(),
        })
    }

    fn resolve(&self, bind_point: vk::PipelineBindPoint) -> Bindings {
        let mut bindings = Bindings::new();
        for (&(point, set_index), set) in &self.bound.sets {
            if point != bind_point {
                continue;
            }
            if let Some(contents) = self.state.sets.get(set) {
                for (&slot, &resource) in contents {
                    bindings.insert((set_index, slot), resource);
                }
            }
        }
        bindings
    }

    fn queue_dispatch(&mut self, group_count: [u32; 3]) -> Result<(), DeviceError> {
        let SoftPipeline::Compute(compute) = self.pipeline(vk::PipelineBindPoint::COMPUTE)?
        else {
            return Err(DeviceError::MissingKernel("compute pipeline expected".into()));
        };
        let dispatch = PendingDispatch {
            compute: compute.clone(),
            bindings: self.resolve(vk::PipelineBindPoint::COMPUTE),
            push_constants: self.bound.push_constants.clone(),
            group_count,
        };
        self.state.stats.dispatches += 1;
        self.batch.push(dispatch);
        Ok(())
    }

    fn flush(&mut self) {
        let batch = std::mem::take(&mut self.batch);
        if batch.is_empty() {
            return;
        }
        if batch.len() > 1 {
            self.state.stats.interleaved_batches += 1;
        }

        let totals: Vec<u64> = batch.iter().map(PendingDispatch::workgroup_count).collect();
        let mut next = vec![0u64; batch.len()];
        let mut log = AccessLog::default();
        let memory = &mut self.state.memory;
        loop {
            let mut progressed = false;
            for (index, dispatch) in batch.iter().enumerate() {
                if next[index] < totals[index] {
                    dispatch.run_workgroup(memory, &mut log, next[index]);
                    next[index] += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        self.state.stats.workgroups += totals.iter().sum::<u64>();
        self.state.stats.invalid_accesses += log.invalid;
    }

    fn run(&mut self, command: &Command) -> Result<(), DeviceError> {
        match command {
            Command::BeginRenderPass {
                framebuffer,
                clear_color,
                ..
            } => {
                let image = *self
                    .state
                    .framebuffers
                    .get(framebuffer)
                    .ok_or(DeviceError::UnknownId {
                        kind: "framebuffer",
                        id: framebuffer.raw(),
                    })?;
                self.state.memory.image_mut(image)?.clear(*clear_color);
                self.state.stats.render_passes += 1;
            }
            Command::Draw {
                vertex_count,
                instance_count,
                ..
            } => {
                self.state.stats.draw_calls += 1;
                self.state.stats.vertices += *vertex_count as u64 * *instance_count as u64;
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                ..
            } => {
                self.state.stats.draw_calls += 1;
                self.state.stats.vertices += *index_count as u64 * *instance_count as u64;
            }
            Command::TraceRays { extent, .. } => self.trace_rays(*extent)?,
            Command::CopyBuffer { src, dst, regions } => {
                for region in regions {
                    self.state.memory.copy_buffer(*src, *dst, region)?;
                }
            }
            Command::CopyBufferToImage {
                src,
                dst,
                offset,
                extent,
                ..
            } => {
                let memory = &mut self.state.memory;
                let texel_size = memory.image(*dst)?.texel_size;
                let row_size = extent.width as usize * texel_size;
                for row in 0..extent.height {
                    let data = memory
                        .read_bytes(*src, (row as usize * row_size) as u64, row_size as u64)?
                        .to_vec();
                    let image = memory.image_mut(*dst)?;
                    let start = image
                        .texel_offset(offset.x as u32, offset.y as u32 + row)
                        .ok_or(DeviceError::OutOfBounds {
                            offset: row as u64,
                            len: row_size as u64,
                            size: image.bytes.len() as u64,
                        })?;
                    let end = start + row_size;
                    if end > image.bytes.len() {
                        return Err(DeviceError::OutOfBounds {
                            offset: start as u64,
                            len: row_size as u64,
                            size: image.bytes.len() as u64,
                        });
                    }
                    image.bytes[start..end].copy_from_slice(&data);
                }
            }
            Command::CopyImageToBuffer {
                src, dst, extent, ..
            } => {
                let memory = &mut self.state.memory;
                let image = memory.image(*src)?;
                let texel_size = image.texel_size;
                let row_size = extent.width.min(image.extent.width) as usize * texel_size;
                let rows: Vec<Vec<u8>> = (0..extent.height.min(image.extent.height))
                    .filter_map(|row| {
                        let start = image.texel_offset(0, row)?;
                        Some(image.bytes[start..start + row_size].to_vec())
                    })
                    .collect();
                let stride = extent.width as usize * texel_size;
                for (row, data) in rows.iter().enumerate() {
                    memory.write_bytes(*dst, (row * stride) as u64, data)?;
                }
            }
            Command::BlitImage {
                src,
                src_extent,
                dst,
                dst_extent,
                ..
            } => {
                let memory = &mut self.state.memory;
                let source = memory.image(*src)?;
                let mut texels = Vec::with_capacity((dst_extent.width * dst_extent.height) as usize);
                for y in 0..dst_extent.height {
                    for x in 0..dst_extent.width {
                        let sx = (x as u64 * src_extent.width as u64 / dst_extent.width as u64) as u32;
                        let sy =
                            (y as u64 * src_extent.height as u64 / dst_extent.height as u64) as u32;
                        texels.push(source.load(sx, sy).unwrap_or([0.0; 4]));
                    }
                }
                let target = memory.image_mut(*dst)?;
                for (index, texel) in texels.into_iter().enumerate() {
                    let x = index as u32 % dst_extent.width;
                    let y = index as u32 / dst_extent.width;
                    target.store(x, y, texel);
                }
            }
            Command::FillBuffer {
                buffer,
                offset,
                size,
                data,
            } => {
                let memory = &mut self.state.memory;
                let buffer_size = memory.buffer(*buffer)?.bytes.len() as u64;
                let size = if *size == vk::WHOLE_SIZE {
                    buffer_size.saturating_sub(*offset) & !3
                } else {
                    *size
                };
                let pattern: Vec<u8> = std::iter::repeat(data.to_le_bytes())
                    .take((size / 4) as usize)
                    .flatten()
                    .collect();
                memory.write_bytes(*buffer, *offset, &pattern)?;
            }
            Command::BuildBottomLevel { structure } => {
                let State {
                    memory, structures, ..
                } = &mut *self.state;
                structures.build_bottom(*structure, memory)?;
            }
            Command::BuildTopLevel {
                structure,
                instances,
                instance_count,
            } => {
                let State {
                    memory, structures, ..
                } = &mut *self.state;
                structures.build_top(*structure, *instances, *instance_count, memory)?;
            }
            Command::EndRenderPass
            | Command::BindPipeline { .. }
            | Command::BindDescriptorSets { .. }
            | Command::PushConstants { .. }
            | Command::BindVertexBuffers { .. }
            | Command::BindIndexBuffer { .. }
            | Command::SetViewport(_)
            | Command::SetScissor(_)
            | Command::Dispatch { .. }
            | Command::PipelineBarrier(_) => {}
        }
        Ok(())
    }

    fn trace_rays(&mut self, extent: [u32; 3]) -> Result<(), DeviceError> {
        let SoftPipeline::RayTrace(kernel) =
            self.pipeline(vk::PipelineBindPoint::RAY_TRACING_KHR)?
        else {
            return Err(DeviceError::MissingKernel("ray tracing pipeline expected".into()));
        };
        let kernel = kernel.clone();
        let bindings = self.resolve(vk::PipelineBindPoint::RAY_TRACING_KHR);
        let push_constants = self.bound.push_constants.clone();

        let State {
            memory,
            structures,
            stats,
            ..
        } = &mut *self.state;
        let mut log = AccessLog::default();
        for z in 0..extent[2] {
            for y in 0..extent[1] {
                for x in 0..extent[0] {
                    let resources = Invocation::new(memory, &bindings, &push_constants, &mut log);
                    let mut ray = RayInvocation::new(extent, resources, structures);
                    ray.launch_id = [x, y, z];
                    kernel(&mut ray);
                }
            }
        }
        stats.rays += extent.iter().map(|&size| size as u64).product::<u64>();
        stats.invalid_accesses += log.invalid;
        Ok(())
    }
}
