use std::collections::HashMap;

use ash::vk;
use ultraviolet::{Mat4, Vec2, Vec3};

use super::memory::Memory;
use crate::vulkan::acceleration_structure::InstanceRecord;
use crate::vulkan::device::{AccelerationStructureId, TriangleGeometry};
use crate::vulkan::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub t: f32,
    pub position: Vec3,
    /// Index of the instance in the top level structure.
    pub instance_index: u32,
    pub instance_custom_index: u32,
    pub primitive_index: u32,
    /// Weights of the second and third vertex.
    pub barycentrics: Vec2,
}

struct Instance {
    blas: AccelerationStructureId,
    world_to_object: Mat4,
    custom_index: u32,
    mask: u8,
}

enum Structure {
    Bottom {
        geometry: TriangleGeometry,
        /// Snapshot taken by the last build.
        triangles: Vec<[Vec3; 3]>,
    },
    Top {
        max_instances: u32,
        /// Snapshot taken by the last build.
        instances: Vec<Instance>,
    },
}

/// Acceleration structures of the reference device, keyed by id and by device address.
#[derive(Default)]
pub(super) struct Structures {
    structures: HashMap<AccelerationStructureId, Structure>,
    addresses: HashMap<vk::DeviceAddress, AccelerationStructureId>,
}

impl Structures {
    pub fn insert_bottom(
        &mut self,
        id: AccelerationStructureId,
        address: vk::DeviceAddress,
        geometry: TriangleGeometry,
    ) {
        self.structures.insert(
            id,
            Structure::Bottom {
                geometry,
                triangles: Vec::new(),
            },
        );
        self.addresses.insert(address, id);
    }

    pub fn insert_top(
        &mut self,
        id: AccelerationStructureId,
        address: vk::DeviceAddress,
        max_instances: u32,
    ) {
        self.structures.insert(
            id,
            Structure::Top {
                max_instances,
                instances: Vec::new(),
            },
        );
        self.addresses.insert(address, id);
    }

    pub fn remove(&mut self, id: AccelerationStructureId) {
        self.structures.remove(&id);
        self.addresses.retain(|_, structure| *structure != id);
    }

    pub fn contains(&self, id: AccelerationStructureId) -> bool {
        self.structures.contains_key(&id)
    }

    fn unknown(id: AccelerationStructureId) -> DeviceError {
        DeviceError::UnknownId {
            kind: "acceleration structure",
            id: id.raw(),
        }
    }

    /// Reads the geometry buffers and keeps the triangles.
    pub fn build_bottom(
        &mut self,
        id: AccelerationStructureId,
        memory: &Memory,
    ) -> Result<(), DeviceError> {
        let Some(Structure::Bottom {
            geometry,
            triangles,
        }) = self.structures.get_mut(&id)
        else {
            return Err(Self::unknown(id));
        };

        let index_size = if geometry.index_type == vk::IndexType::UINT16 { 2 } else { 4 };
        let indices = memory.read_bytes(
            geometry.index_buffer,
            0,
            geometry.triangle_count as u64 * 3 * index_size,
        )?;
        let indices: Vec<u32> = indices
            .chunks_exact(index_size as usize)
            .map(|bytes| match bytes.len() {
                2 => bytemuck::pod_read_unaligned::<u16>(bytes) as u32,
                _ => bytemuck::pod_read_unaligned::<u32>(bytes),
            })
            .collect();

        let vertex = |index: u32| -> Result<Vec3, DeviceError> {
            let bytes = memory.read_bytes(
                geometry.vertex_buffer,
                index as u64 * geometry.vertex_stride,
                12,
            )?;
            let [x, y, z]: [f32; 3] = bytemuck::pod_read_unaligned(bytes);
            Ok(Vec3::new(x, y, z))
        };

        *triangles = indices
            .chunks_exact(3)
            .map(|face| Ok([vertex(face[0])?, vertex(face[1])?, vertex(face[2])?]))
            .collect::<Result<_, DeviceError>>()?;
        Ok(())
    }

    /// Reads the instance records and resolves their references by address.
    pub fn build_top(
        &mut self,
        id: AccelerationStructureId,
        instance_buffer: crate::vulkan::device::BufferId,
        instance_count: u32,
        memory: &Memory,
    ) -> Result<(), DeviceError> {
        let record_size = std::mem::size_of::<InstanceRecord>() as u64;
        let bytes = memory.read_bytes(instance_buffer, 0, instance_count as u64 * record_size)?;
        // Instance indices must stay dense, so a dangling reference fails the whole build
        let snapshot = bytes
            .chunks_exact(record_size as usize)
            .map(bytemuck::pod_read_unaligned::<InstanceRecord>)
            .map(|record| {
                let reference = record.acceleration_structure_reference;
                let blas = self
                    .addresses
                    .get(&reference)
                    .ok_or(DeviceError::UnknownId {
                        kind: "acceleration structure reference",
                        id: reference,
                    })?;
                Ok(Instance {
                    blas: *blas,
                    world_to_object: record.transform_matrix().inversed(),
                    custom_index: record.custom_index(),
                    mask: record.mask(),
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        let Some(Structure::Top {
            max_instances,
            instances,
        }) = self.structures.get_mut(&id)
        else {
            return Err(Self::unknown(id));
        };
        if snapshot.len() > *max_instances as usize {
            return Err(DeviceError::OutOfBounds {
                offset: 0,
                len: snapshot.len() as u64,
                size: *max_instances as u64,
            });
        }
        *instances = snapshot;
        Ok(())
    }

    pub fn trace(
        &self,
        tlas: AccelerationStructureId,
        origin: Vec3,
        direction: Vec3,
        t_min: f32,
        t_max: f32,
    ) -> Option<RayHit> {
        let Some(Structure::Top { instances, .. }) = self.structures.get(&tlas) else {
            return None;
        };

        let mut closest: Option<RayHit> = None;
        for (instance_index, instance) in instances.iter().enumerate() {
            if instance.mask == 0 {
                continue;
            }
            let Some(Structure::Bottom { triangles, .. }) = self.structures.get(&instance.blas)
            else {
                continue;
            };
            // The ray parameter is preserved by the affine transform.
            let object_origin = instance.world_to_object.transform_point3(origin);
            let object_direction = instance.world_to_object.transform_vec3(direction);

            for (primitive_index, triangle) in triangles.iter().enumerate() {
                let limit = closest.map_or(t_max, |hit| hit.t);
                let Some((t, u, v)) = intersect(object_origin, object_direction, triangle) else {
                    continue;
                };
                if t < t_min || t > limit {
                    continue;
                }
                closest = Some(RayHit {
                    t,
                    position: origin + direction * t,
                    instance_index: instance_index as u32,
                    instance_custom_index: instance.custom_index,
                    primitive_index: primitive_index as u32,
                    barycentrics: Vec2::new(u, v),
                });
            }
        }
        closest
    }
}

/// Möller–Trumbore, both faces.
fn intersect(origin: Vec3, direction: Vec3, [a, b, c]: &[Vec3; 3]) -> Option<(f32, f32, f32)> {
    const EPSILON: f32 = 1e-7;
    let edge1 = *b - *a;
    let edge2 = *c - *a;
    let p = direction.cross(edge2);
    let determinant = edge1.dot(p);
    if determinant.abs() < EPSILON {
        return None;
    }
    let inverse = 1.0 / determinant;
    let s = origin - *a;
    let u = s.dot(p) * inverse;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inverse;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    Some((edge2.dot(q) * inverse, u, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::device::{BufferId, MemoryLocation};
    use crate::vulkan::software::memory::SoftBuffer;

    fn instance_memory(records: &[InstanceRecord]) -> (Memory, BufferId) {
        let id = BufferId(1);
        let mut memory = Memory::default();
        memory.buffers.insert(
            id,
            SoftBuffer {
                bytes: bytemuck::cast_slice(records).to_vec(),
                location: MemoryLocation::CpuToGpu,
                address: 1 << 32,
            },
        );
        (memory, id)
    }

    #[test]
    fn dangling_instance_reference_fails_the_build() {
        let blas_address = 7 << 32;
        let dangling = 9 << 32;
        let mut structures = Structures::default();
        structures.insert_bottom(
            AccelerationStructureId(2),
            blas_address,
            TriangleGeometry {
                vertex_buffer: BufferId(3),
                vertex_format: vk::Format::R32G32B32_SFLOAT,
                vertex_stride: 12,
                max_vertex: 0,
                index_buffer: BufferId(4),
                index_type: vk::IndexType::UINT32,
                triangle_count: 0,
            },
        );
        let tlas = AccelerationStructureId(5);
        structures.insert_top(tlas, 8 << 32, 4);
        let records = [
            InstanceRecord::new(blas_address, &Mat4::identity()),
            InstanceRecord::new(dangling, &Mat4::identity()),
            InstanceRecord::new(blas_address, &Mat4::identity()),
        ];
        let (memory, buffer) = instance_memory(&records);

        let result = structures.build_top(tlas, buffer, records.len() as u32, &memory);
        assert!(matches!(
            result,
            Err(DeviceError::UnknownId { id, .. }) if id == dangling
        ));

        let (memory, buffer) = instance_memory(&[records[0], records[2]]);
        structures.build_top(tlas, buffer, 2, &memory).unwrap();
    }

    #[test]
    fn ray_through_triangle_center_hits() {
        let triangle = [
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(0.0, -1.0, 0.0),
        ];
        let (t, u, v) = intersect(
            Vec3::new(0.0, 0.0, -1.5),
            Vec3::new(0.0, 0.0, 1.0),
            &triangle,
        )
        .expect("the center is inside the triangle");
        assert!((t - 1.5).abs() < 1e-6);
        assert!(u > 0.0 && v > 0.0 && u + v < 1.0);
    }

    #[test]
    fn ray_beside_triangle_misses() {
        let triangle = [
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(0.0, -1.0, 0.0),
        ];
        assert!(intersect(
            Vec3::new(0.9, -0.9, -1.5),
            Vec3::new(0.0, 0.0, 1.0),
            &triangle
        )
        .is_none());
    }
}
