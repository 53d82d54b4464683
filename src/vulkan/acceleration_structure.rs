use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use ultraviolet::{Mat4, Vec4};

use super::buffer::Buffer;
use super::command_buffer::Command;
use super::context::Context;
use super::device::{
    AccelerationStructureHandle, AccelerationStructureId, MemoryLocation, TriangleGeometry,
};
use super::error::{AccelerationStructureError, DeviceError};
use super::pass::ImmediatePass;

/// Structure sizes reported by the driver get rounded up to this.
pub const STRUCTURE_SIZE_ALIGNMENT: u64 = 256;

pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Same memory layout as `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// Row-major 3x4 object to world transform.
    pub transform: [f32; 12],
    pub custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

impl InstanceRecord {
    pub fn new(blas_address: vk::DeviceAddress, transform: &Mat4) -> Self {
        let flags = vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw();
        Self {
            transform: to_rows(transform),
            custom_index_and_mask: 0xFF << 24,
            sbt_offset_and_flags: (flags & 0xFF) << 24,
            acceleration_structure_reference: blas_address,
        }
    }

    pub fn with_custom_index(mut self, index: u32) -> Self {
        self.custom_index_and_mask = (self.custom_index_and_mask & 0xFF00_0000) | (index & 0xFF_FFFF);
        self
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0xFF_FFFF
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    pub fn sbt_record_offset(&self) -> u32 {
        self.sbt_offset_and_flags & 0xFF_FFFF
    }

    pub fn set_transform(&mut self, transform: &Mat4) {
        self.transform = to_rows(transform);
    }

    pub fn transform_matrix(&self) -> Mat4 {
        let t = &self.transform;
        Mat4::new(
            Vec4::new(t[0], t[4], t[8], 0.0),
            Vec4::new(t[1], t[5], t[9], 0.0),
            Vec4::new(t[2], t[6], t[10], 0.0),
            Vec4::new(t[3], t[7], t[11], 1.0),
        )
    }
}

fn to_rows(transform: &Mat4) -> [f32; 12] {
    let mut rows = [0.0; 12];
    for (column, values) in transform.cols.iter().enumerate() {
        let values = [values.x, values.y, values.z];
        for (row, value) in values.into_iter().enumerate() {
            rows[row * 4 + column] = value;
        }
    }
    rows
}

/// Bottom level structure over immutable triangle geometry.
pub struct Blas {
    handle: AccelerationStructureHandle,
    triangle_count: u32,
    context: Arc<Context>,
}

impl Blas {
    /// Builds the structure and waits for the build. The geometry must not change afterwards.
    pub fn new(
        context: Arc<Context>,
        pass: &mut ImmediatePass,
        vertices: &Buffer<[f32; 3]>,
        indices: &Buffer<u32>,
    ) -> Result<Self, DeviceError> {
        let geometry = TriangleGeometry {
            vertex_buffer: vertices.id(),
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            vertex_stride: std::mem::size_of::<[f32; 3]>() as vk::DeviceSize,
            max_vertex: vertices.len().saturating_sub(1) as u32,
            index_buffer: indices.id(),
            index_type: vk::IndexType::UINT32,
            triangle_count: (indices.len() / 3) as u32,
        };
        let handle = context.device().create_bottom_level_structure(&geometry)?;

        pass.execute_immediately(|cmd| {
            cmd.push(Command::BuildBottomLevel {
                structure: handle.id,
            })
            .memory_barrier(
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
            );
        });
        log::debug!(
            "Built bottom level structure with {} triangles",
            geometry.triangle_count
        );

        Ok(Self {
            handle,
            triangle_count: geometry.triangle_count,
            context,
        })
    }

    pub fn id(&self) -> AccelerationStructureId {
        self.handle.id
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        self.handle.device_address
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    /// An instance of this structure with the identity transform.
    pub fn create_instance(&self) -> InstanceRecord {
        InstanceRecord::new(self.handle.device_address, &Mat4::identity())
    }

    pub fn create_instance_with_transform(&self, transform: &Mat4) -> InstanceRecord {
        InstanceRecord::new(self.handle.device_address, transform)
    }
}

impl Drop for Blas {
    fn drop(&mut self) {
        self.context
            .device()
            .destroy_acceleration_structure(self.handle.id);
    }
}

/// Top level structure over instance records. It refers to its bottom level structures by
/// address only, so it has to be dropped before any of them.
///
/// The instances are copied at build time. Changing a transform means calling
/// [`Tlas::rebuild`]; until then rays are traced against the old placement.
pub struct Tlas {
    handle: AccelerationStructureHandle,
    instance_buffer: Buffer<InstanceRecord>,
    instances: Vec<InstanceRecord>,
    context: Arc<Context>,
}

impl Tlas {
    pub fn new(
        context: Arc<Context>,
        pass: &mut ImmediatePass,
        instances: &[InstanceRecord],
    ) -> Result<Self, AccelerationStructureError> {
        if instances.is_empty() {
            return Err(AccelerationStructureError::NoInstances);
        }
        let instance_buffer = Buffer::new(
            context.clone(),
            "Instance Buffer",
            instances.len(),
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;
        let handle = context
            .device()
            .create_top_level_structure(instances.len() as u32)?;

        let mut tlas = Self {
            handle,
            instance_buffer,
            instances: Vec::new(),
            context,
        };
        tlas.rebuild(pass, instances)?;
        Ok(tlas)
    }

    /// Full rebuild from `instances`. Must not be called while a submitted trace still reads
    /// the structure.
    pub fn rebuild(
        &mut self,
        pass: &mut ImmediatePass,
        instances: &[InstanceRecord],
    ) -> Result<(), AccelerationStructureError> {
        if instances.is_empty() {
            return Err(AccelerationStructureError::NoInstances);
        }
        if instances.len() > self.instance_buffer.len() {
            return Err(AccelerationStructureError::CapacityExceeded {
                capacity: self.instance_buffer.len(),
                requested: instances.len(),
            });
        }

        let staging =
            Buffer::<InstanceRecord>::new_staging(self.context.clone(), "Instance Staging", instances.len())?;
        staging.fill_whole(instances)?;

        let structure = self.handle.id;
        let instance_buffer = &self.instance_buffer;
        pass.execute_immediately(|cmd| {
            instance_buffer.upload_from(cmd, &staging);
            cmd.memory_barrier(
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags2::SHADER_READ,
            )
            .push(Command::BuildTopLevel {
                structure,
                instances: instance_buffer.id(),
                instance_count: instances.len() as u32,
            })
            .memory_barrier(
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
            );
        });
        log::debug!("Built top level structure with {} instances", instances.len());

        self.instances = instances.to_vec();
        Ok(())
    }

    pub fn id(&self) -> AccelerationStructureId {
        self.handle.id
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        self.handle.device_address
    }

    /// The instances of the last build.
    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }

    /// The device copy of the instances. Writing to it has no effect until the next build.
    pub fn instance_buffer(&self) -> &Buffer<InstanceRecord> {
        &self.instance_buffer
    }
}

impl Drop for Tlas {
    fn drop(&mut self) {
        self.context
            .device()
            .destroy_acceleration_structure(self.handle.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ultraviolet::Vec3;

    #[test]
    fn instance_record_matches_vulkan_layout() {
        assert_eq!(
            std::mem::size_of::<InstanceRecord>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()
        );
    }

    #[test]
    fn identity_instance_defaults() {
        let record = InstanceRecord::new(0x1000, &Mat4::identity());
        assert_eq!(
            record.transform,
            [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
        assert_eq!(record.mask(), 0xFF);
        assert_eq!(record.custom_index(), 0);
        assert_eq!(record.sbt_record_offset(), 0);
        assert_eq!(record.acceleration_structure_reference, 0x1000);
        assert_eq!(record.with_custom_index(5).custom_index(), 5);
    }

    #[test]
    fn translation_lands_in_last_column() {
        let record = InstanceRecord::new(0, &Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(
            [record.transform[3], record.transform[7], record.transform[11]],
            [1.0, 2.0, 3.0]
        );
        let back = record.transform_matrix();
        assert_eq!(back.cols[3], Vec4::new(1.0, 2.0, 3.0, 1.0));
    }

    #[test]
    fn sizes_round_up_to_alignment() {
        assert_eq!(align_up(1, STRUCTURE_SIZE_ALIGNMENT), 256);
        assert_eq!(align_up(256, STRUCTURE_SIZE_ALIGNMENT), 256);
        assert_eq!(align_up(257, STRUCTURE_SIZE_ALIGNMENT), 512);
    }
}
