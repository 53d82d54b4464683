use std::sync::Arc;

use ash::vk;
use ultraviolet::{Mat4, Vec2, Vec3};

use super::{Scene, SceneError};
use crate::input_map::{InputSource, Key};
use crate::time::Time;
use crate::vulkan::{
    Blas, Buffer, Context, DescriptorSet, DescriptorTable, Image, ImageTransition,
    ImmediatePass, MemoryLocation, Pass, PipelineLayout, QueueKind, RayTracePipeline,
    RayTraceShaders, ResourceState, SurfaceFrame, Tlas,
};

pub const RAYGEN_SHADER: &str = "ray_trace_triangle.rgen";
pub const MISS_SHADER: &str = "ray_trace_triangle.rmiss";
pub const CLOSEST_HIT_SHADER: &str = "ray_trace_triangle.rchit";

pub const TLAS_SLOT: u32 = 0;
pub const OUTPUT_SLOT: u32 = 1;

pub const TRIANGLE_VERTICES: [[f32; 3]; 3] = [[1.0, 1.0, 0.0], [-1.0, 1.0, 0.0], [0.0, -1.0, 0.0]];
pub const TRIANGLE_INDICES: [u32; 3] = [0, 1, 2];

pub const CAMERA_POSITION: [f32; 3] = [0.0, 0.0, -1.5];
pub const MISS_COLOR: [f32; 4] = [0.3, 0.3, 0.3, 1.0];
/// Units per second the arrow keys move the triangle by.
const MOVE_SPEED: f32 = 1.0;

/// The camera ray through the center of pixel `launch_id`.
pub fn primary_ray(launch_id: [u32; 2], launch_size: [u32; 2]) -> (Vec3, Vec3) {
    let pixel_center = Vec2::new(launch_id[0] as f32 + 0.5, launch_id[1] as f32 + 0.5);
    let uv = pixel_center / Vec2::new(launch_size[0] as f32, launch_size[1] as f32);
    // Image rows go down, world y goes up
    let d = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let aspect = launch_size[0] as f32 / launch_size[1].max(1) as f32;
    let direction = Vec3::new(d.x * aspect, d.y, 1.0).normalized();
    (Vec3::from(CAMERA_POSITION), direction)
}

/// Hit colour, the barycentric weights of the three corners.
pub fn hit_color(barycentrics: Vec2) -> [f32; 4] {
    [
        1.0 - barycentrics.x - barycentrics.y,
        barycentrics.x,
        barycentrics.y,
        1.0,
    ]
}

fn storage_write() -> ResourceState {
    ResourceState::new(
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::SHADER_WRITE,
        vk::ImageLayout::GENERAL,
    )
}

fn transfer_read() -> ResourceState {
    ResourceState::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    )
}

fn transfer_write() -> ResourceState {
    ResourceState::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )
}

fn present() -> ResourceState {
    ResourceState::new(
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::PRESENT_SRC_KHR,
    )
}

/// One triangle, traced into an offscreen image that gets blitted onto the surface.
pub struct RayTraceTriangleScene {
    pass: Pass,
    _pipeline: RayTracePipeline,
    _layout: PipelineLayout,
    _descriptor_set: DescriptorSet,
    _descriptor_table: DescriptorTable,
    offscreen: Image,
    // The top level structure must go before the bottom level one it references
    tlas: Tlas,
    blas: Blas,
    _vertices: Buffer<[f32; 3]>,
    _indices: Buffer<u32>,
    build_pass: ImmediatePass,
    offset: Vec3,
    rebuilds: u64,
}

impl RayTraceTriangleScene {
    pub fn new(context: &Arc<Context>) -> Result<Self, SceneError> {
        let mut build_pass = ImmediatePass::new(context.clone(), QueueKind::Graphics)?;
        let geometry_usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::TRANSFER_DST;
        let vertices = Buffer::<[f32; 3]>::new(
            context.clone(),
            "Triangle Vertices",
            TRIANGLE_VERTICES.len(),
            geometry_usage,
            MemoryLocation::GpuOnly,
        )?;
        vertices.upload(&mut build_pass, &TRIANGLE_VERTICES[..])?;
        let indices = Buffer::<u32>::new(
            context.clone(),
            "Triangle Indices",
            TRIANGLE_INDICES.len(),
            geometry_usage,
            MemoryLocation::GpuOnly,
        )?;
        indices.upload(&mut build_pass, &TRIANGLE_INDICES[..])?;

        let blas = Blas::new(context.clone(), &mut build_pass, &vertices, &indices)?;
        let tlas = Tlas::new(context.clone(), &mut build_pass, &[blas.create_instance()])?;

        let surface = context.surface();
        let extent = surface.extent();
        let offscreen = Image::new_device_local(
            context.clone(),
            "Ray Trace Output",
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;

        let mut descriptor_table = DescriptorTable::new(context.clone());
        descriptor_table
            .add_layout_binding(
                TLAS_SLOT,
                1,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                vk::ShaderStageFlags::RAYGEN_KHR,
            )?
            .add_layout_binding(
                OUTPUT_SLOT,
                1,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::RAYGEN_KHR,
            )?;
        let mut descriptor_set = descriptor_table.allocate_descriptor_set()?;
        descriptor_set
            .write_acceleration_structure(TLAS_SLOT, &tlas)
            .write_image(OUTPUT_SLOT, &offscreen, vk::ImageLayout::GENERAL, None)
            .update()?;

        let layout = PipelineLayout::new(context.clone(), &[descriptor_table.layout()?], &[])?;
        let shaders = RayTraceShaders {
            raygen: context.load_shader(RAYGEN_SHADER, vk::ShaderStageFlags::RAYGEN_KHR)?,
            miss: vec![context.load_shader(MISS_SHADER, vk::ShaderStageFlags::MISS_KHR)?],
            closest_hit: vec![context
                .load_shader(CLOSEST_HIT_SHADER, vk::ShaderStageFlags::CLOSEST_HIT_KHR)?],
            callable: Vec::new(),
        };
        let pipeline = RayTracePipeline::new(context.clone(), &layout, &shaders, 1)?;

        let mut pass = Pass::for_surface(context.clone())?;
        pass.record_all_commands(|cmd, index| {
            let target = surface.image(index);
            // The previous contents are never read, so every frame starts from undefined
            cmd.image_barrier(
                &offscreen,
                ImageTransition::new(ResourceState::UNDEFINED, storage_write()),
            )
            .bind_pipeline(&pipeline)
            .bind_descriptor_sets(
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                &layout,
                0,
                &[&descriptor_set],
            )
            .trace_rays(
                pipeline.shader_binding_table(),
                extent.width,
                extent.height,
                1,
            )
            .external_image_barrier(
                target,
                ImageTransition::new(ResourceState::UNDEFINED, transfer_write()),
            )
            .transition_image(&offscreen, transfer_read())
            .blit_image(
                &offscreen,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                extent,
            )
            .external_image_barrier(target, ImageTransition::new(transfer_write(), present()));
        });

        Ok(Self {
            pass,
            _pipeline: pipeline,
            _layout: layout,
            _descriptor_set: descriptor_set,
            _descriptor_table: descriptor_table,
            offscreen,
            tlas,
            blas,
            _vertices: vertices,
            _indices: indices,
            build_pass,
            offset: Vec3::zero(),
            rebuilds: 0,
        })
    }

    /// Moves the instance and rebuilds the top level structure.
    pub fn move_instance(&mut self, offset: Vec3) -> Result<(), SceneError> {
        // Frames in flight still trace against the structure
        self.pass.wait();
        self.offset = offset;
        let instance = self
            .blas
            .create_instance_with_transform(&Mat4::from_translation(offset));
        self.tlas.rebuild(&mut self.build_pass, &[instance])?;
        self.rebuilds += 1;
        log::debug!("Rebuilt top level structure with the triangle at {offset:?}");
        Ok(())
    }

    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn tlas(&self) -> &Tlas {
        &self.tlas
    }

    pub fn offscreen(&self) -> &Image {
        &self.offscreen
    }

    pub fn pass(&self) -> &Pass {
        &self.pass
    }
}

impl Scene for RayTraceTriangleScene {
    fn update(&mut self, input: &dyn InputSource, time: &Time) -> Result<(), SceneError> {
        let mut direction = Vec3::zero();
        if input.is_down(Key::Left) {
            direction.x -= 1.0;
        }
        if input.is_down(Key::Right) {
            direction.x += 1.0;
        }
        if input.is_down(Key::Up) {
            direction.y += 1.0;
        }
        if input.is_down(Key::Down) {
            direction.y -= 1.0;
        }
        if direction != Vec3::zero() {
            let offset = self.offset + direction * MOVE_SPEED * time.delta_seconds();
            self.move_instance(offset)?;
        }
        Ok(())
    }

    fn render(&mut self, frame: &SurfaceFrame) {
        self.pass.render(frame);
    }

    fn cleanup(&mut self) {
        self.pass.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_ray_looks_down_the_z_axis() {
        let (origin, direction) = primary_ray([1, 1], [3, 3]);
        assert_eq!(origin, Vec3::new(0.0, 0.0, -1.5));
        assert!((direction - Vec3::unit_z()).mag() < 1e-6);
    }

    #[test]
    fn top_rows_look_up() {
        let (_, direction) = primary_ray([5, 0], [10, 10]);
        assert!(direction.y > 0.0);
        let (_, direction) = primary_ray([5, 9], [10, 10]);
        assert!(direction.y < 0.0);
    }

    #[test]
    fn barycentric_colors_sum_to_one() {
        let color = hit_color(Vec2::new(0.25, 0.5));
        assert!((color[0] + color[1] + color[2] - 1.0).abs() < 1e-6);
        assert_eq!(hit_color(Vec2::zero()), [1.0, 0.0, 0.0, 1.0]);
    }
}
