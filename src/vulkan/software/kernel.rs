use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use ultraviolet::Vec3;

use super::memory::Memory;
use super::ray_query::{RayHit, Structures};
use crate::vulkan::device::{BufferId, DescriptorResource, ImageId};

/// A CPU stand-in for a compute shader, run once per invocation.
pub type ComputeKernel = Arc<dyn Fn(&mut Invocation<'_>) + Send + Sync>;
/// A CPU stand-in for a ray generation shader, run once per launch.
pub type RayGenKernel = Arc<dyn Fn(&mut RayInvocation<'_>) + Send + Sync>;

#[derive(Clone)]
pub(super) struct RegisteredCompute {
    pub local_size: [u32; 3],
    pub kernel: ComputeKernel,
}

/// Descriptor contents as seen by one dispatch, keyed by (set, slot).
pub(super) type Bindings = HashMap<(u32, u32), DescriptorResource>;

/// Counts loads and stores that hit unbound slots or fall out of range.
#[derive(Default)]
pub(super) struct AccessLog {
    pub invalid: u64,
}

/// Typed access to the resources bound to set 0, the way a shader sees them.
///
/// Invalid accesses read zero and drop writes, and are counted in the device statistics.
pub struct Invocation<'a> {
    pub global_id: [u32; 3],
    pub local_id: [u32; 3],
    pub workgroup_id: [u32; 3],
    pub num_workgroups: [u32; 3],
    memory: &'a mut Memory,
    bindings: &'a Bindings,
    push_constants: &'a [u8],
    log: &'a mut AccessLog,
}

impl<'a> Invocation<'a> {
    pub(super) fn new(
        memory: &'a mut Memory,
        bindings: &'a Bindings,
        push_constants: &'a [u8],
        log: &'a mut AccessLog,
    ) -> Self {
        Self {
            global_id: [0; 3],
            local_id: [0; 3],
            workgroup_id: [0; 3],
            num_workgroups: [1; 3],
            memory,
            bindings,
            push_constants,
            log,
        }
    }

    fn buffer_range<T>(&self, slot: u32, index: usize) -> Option<(BufferId, u64)> {
        let DescriptorResource::Buffer {
            buffer,
            offset,
            range,
        } = *self.bindings.get(&(0, slot))?
        else {
            return None;
        };
        let size = std::mem::size_of::<T>() as u64;
        let start = offset + index as u64 * size;
        let end = if range == ash::vk::WHOLE_SIZE {
            self.memory.buffer(buffer).ok()?.bytes.len() as u64
        } else {
            offset + range
        };
        (start + size <= end).then_some((buffer, start))
    }

    /// Number of `T` elements visible through `slot`.
    pub fn len<T>(&self, slot: u32) -> usize {
        let Some(DescriptorResource::Buffer {
            buffer,
            offset,
            range,
        }) = self.bindings.get(&(0, slot)).copied()
        else {
            return 0;
        };
        let Ok(soft) = self.memory.buffer(buffer) else {
            return 0;
        };
        let bytes = if range == ash::vk::WHOLE_SIZE {
            (soft.bytes.len() as u64).saturating_sub(offset)
        } else {
            range
        };
        (bytes / std::mem::size_of::<T>() as u64) as usize
    }

    pub fn load<T: Pod>(&mut self, slot: u32, index: usize) -> T {
        let value = self.buffer_range::<T>(slot, index).and_then(|(buffer, start)| {
            self.memory
                .read_bytes(buffer, start, std::mem::size_of::<T>() as u64)
                .ok()
                .map(bytemuck::pod_read_unaligned)
        });
        value.unwrap_or_else(|| {
            self.log.invalid += 1;
            T::zeroed()
        })
    }

    pub fn store<T: Pod>(&mut self, slot: u32, index: usize, value: T) {
        let written = self
            .buffer_range::<T>(slot, index)
            .map(|(buffer, start)| {
                self.memory
                    .write_bytes(buffer, start, bytemuck::bytes_of(&value))
                    .is_ok()
            })
            .unwrap_or(false);
        if !written {
            self.log.invalid += 1;
        }
    }

    fn image_id(&self, slot: u32) -> Option<ImageId> {
        match self.bindings.get(&(0, slot))? {
            DescriptorResource::Image { image, .. } => Some(*image),
            _ => None,
        }
    }

    pub fn image_size(&self, slot: u32) -> [u32; 2] {
        self.image_id(slot)
            .and_then(|image| self.memory.image(image).ok())
            .map(|image| [image.extent.width, image.extent.height])
            .unwrap_or([0, 0])
    }

    pub fn image_load(&mut self, slot: u32, x: u32, y: u32) -> [f32; 4] {
        let value = self
            .image_id(slot)
            .and_then(|image| self.memory.image(image).ok())
            .and_then(|image| image.load(x, y));
        value.unwrap_or_else(|| {
            self.log.invalid += 1;
            [0.0; 4]
        })
    }

    pub fn image_store(&mut self, slot: u32, x: u32, y: u32, value: [f32; 4]) {
        let stored = match self.image_id(slot) {
            Some(image) => self
                .memory
                .image_mut(image)
                .map(|image| image.store(x, y, value))
                .unwrap_or(false),
            None => false,
        };
        if !stored {
            self.log.invalid += 1;
        }
    }

    pub fn push_constants<T: Pod>(&self) -> T {
        let size = std::mem::size_of::<T>();
        if self.push_constants.len() < size {
            return T::zeroed();
        }
        bytemuck::pod_read_unaligned(&self.push_constants[..size])
    }

    pub(super) fn binding(&self, slot: u32) -> Option<DescriptorResource> {
        self.bindings.get(&(0, slot)).copied()
    }
}

/// A ray generation invocation: shader style resource access plus ray queries.
pub struct RayInvocation<'a> {
    pub launch_id: [u32; 3],
    pub launch_size: [u32; 3],
    pub resources: Invocation<'a>,
    structures: &'a Structures,
}

impl<'a> RayInvocation<'a> {
    pub(super) fn new(
        launch_size: [u32; 3],
        resources: Invocation<'a>,
        structures: &'a Structures,
    ) -> Self {
        Self {
            launch_id: [0; 3],
            launch_size,
            resources,
            structures,
        }
    }

    /// Closest hit against the top level structure bound to `slot`, as of its last build.
    pub fn trace_ray(
        &mut self,
        slot: u32,
        origin: Vec3,
        direction: Vec3,
        t_min: f32,
        t_max: f32,
    ) -> Option<RayHit> {
        let Some(DescriptorResource::AccelerationStructure(tlas)) = self.resources.binding(slot)
        else {
            self.resources.log.invalid += 1;
            return None;
        };
        self.structures
            .trace(tlas, origin, direction, t_min, t_max)
    }
}
