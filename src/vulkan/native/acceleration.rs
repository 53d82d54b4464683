use ash::vk;

use super::resources::{lookup, Registry, StructureKind, StructureRecord};
use super::{locked, NativeShared};
use crate::vulkan::acceleration_structure::{align_up, STRUCTURE_SIZE_ALIGNMENT};
use crate::vulkan::device::*;
use crate::vulkan::error::DeviceError;

struct GeometryInfo {
    ty: vk::AccelerationStructureTypeKHR,
    geometry: vk::AccelerationStructureGeometryKHR,
    primitive_count: u32,
}

impl NativeShared {
    /// Geometry description of a structure. Without `instances` the top level data address
    /// stays zero, which is enough for size queries.
    fn geometry_info(
        &self,
        registry: &Registry,
        kind: &StructureKind,
        instances: Option<(BufferId, u32)>,
    ) -> Result<GeometryInfo, DeviceError> {
        match kind {
            StructureKind::Bottom(geometry) => {
                let vertices = lookup(&registry.buffers, geometry.vertex_buffer, "buffer")?;
                let indices = lookup(&registry.buffers, geometry.index_buffer, "buffer")?;
                let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                    .vertex_format(geometry.vertex_format)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: self.raw_buffer_address(vertices.buffer),
                    })
                    .vertex_stride(geometry.vertex_stride)
                    .max_vertex(geometry.max_vertex)
                    .index_type(geometry.index_type)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: self.raw_buffer_address(indices.buffer),
                    })
                    .build();

                Ok(GeometryInfo {
                    ty: vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
                    geometry: vk::AccelerationStructureGeometryKHR::builder()
                        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                        .flags(vk::GeometryFlagsKHR::OPAQUE)
                        .build(),
                    primitive_count: geometry.triangle_count,
                })
            }
            StructureKind::Top { max_instances } => {
                let (device_address, primitive_count) = match instances {
                    Some((buffer, count)) => {
                        let buffer = lookup(&registry.buffers, buffer, "buffer")?;
                        (self.raw_buffer_address(buffer.buffer), count)
                    }
                    None => (0, *max_instances),
                };
                let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR { device_address })
                    .build();

                Ok(GeometryInfo {
                    ty: vk::AccelerationStructureTypeKHR::TOP_LEVEL,
                    geometry: vk::AccelerationStructureGeometryKHR::builder()
                        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
                        .flags(vk::GeometryFlagsKHR::OPAQUE)
                        .build(),
                    primitive_count,
                })
            }
        }
    }

    pub(super) fn create_structure(
        &self,
        kind: StructureKind,
    ) -> Result<AccelerationStructureHandle, DeviceError> {
        let raytracing = self.raytracing()?;
        let info = {
            let registry = locked(&self.registry);
            self.geometry_info(&registry, &kind, None)?
        };

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(info.ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&info.geometry));

        let sizes = unsafe {
            raytracing
                .acceleration_structure
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[info.primitive_count],
                )
        };

        let storage_size = align_up(sizes.acceleration_structure_size, STRUCTURE_SIZE_ALIGNMENT);
        let storage = self.create_raw_buffer(
            "Acceleration Structure",
            storage_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        )?;

        let scratch_alignment = raytracing
            .physical_device_acceleration_structure_properties_khr
            .min_acceleration_structure_scratch_offset_alignment as u64;
        let scratch = match self.create_raw_buffer(
            "Acceleration Structure Scratch",
            sizes.build_scratch_size + scratch_alignment,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        ) {
            Ok(scratch) => scratch,
            Err(err) => {
                self.destroy_raw_buffer(storage);
                return Err(err);
            }
        };
        let scratch_address = align_up(self.raw_buffer_address(scratch.buffer), scratch_alignment);

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .ty(info.ty)
            .buffer(storage.buffer)
            .size(storage_size);
        let structure = match unsafe {
            raytracing
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        } {
            Ok(structure) => structure,
            Err(err) => {
                self.destroy_raw_buffer(storage);
                self.destroy_raw_buffer(scratch);
                return Err(err.into());
            }
        };

        let device_address = unsafe {
            raytracing
                .acceleration_structure
                .get_acceleration_structure_device_address(
                    &vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                        .acceleration_structure(structure),
                )
        };

        let mut registry = locked(&self.registry);
        let id = AccelerationStructureId(registry.next_id());
        registry.structures.insert(
            id,
            StructureRecord {
                structure,
                kind,
                storage,
                scratch,
                scratch_address,
            },
        );
        Ok(AccelerationStructureHandle { id, device_address })
    }

    pub(super) fn destroy_structure(&self, record: StructureRecord) {
        if let Ok(raytracing) = self.raytracing() {
            unsafe {
                raytracing
                    .acceleration_structure
                    .destroy_acceleration_structure(record.structure, None)
            };
        }
        self.destroy_raw_buffer(record.storage);
        self.destroy_raw_buffer(record.scratch);
    }

    fn record_build(
        &self,
        registry: &Registry,
        cb: vk::CommandBuffer,
        structure: AccelerationStructureId,
        instances: Option<(BufferId, u32)>,
    ) -> Result<(), DeviceError> {
        let raytracing = self.raytracing()?;
        let record = lookup(&registry.structures, structure, "acceleration structure")?;
        let info = self.geometry_info(registry, &record.kind, instances)?;

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(info.ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(record.structure)
            .geometries(std::slice::from_ref(&info.geometry))
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: record.scratch_address,
            })
            .build();

        let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(info.primitive_count)
            .build();

        unsafe {
            raytracing
                .acceleration_structure
                .cmd_build_acceleration_structures(
                    cb,
                    std::slice::from_ref(&build_info),
                    &[std::slice::from_ref(&build_range_info)],
                )
        };
        Ok(())
    }

    pub(super) fn record_bottom_level_build(
        &self,
        registry: &Registry,
        cb: vk::CommandBuffer,
        structure: AccelerationStructureId,
    ) -> Result<(), DeviceError> {
        self.record_build(registry, cb, structure, None)
    }

    pub(super) fn record_top_level_build(
        &self,
        registry: &Registry,
        cb: vk::CommandBuffer,
        structure: AccelerationStructureId,
        instances: BufferId,
        instance_count: u32,
    ) -> Result<(), DeviceError> {
        self.record_build(registry, cb, structure, Some((instances, instance_count)))
    }
}
