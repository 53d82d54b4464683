use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use ultraviolet::Vec2;

use super::{Scene, SceneError};
use crate::input_map::InputSource;
use crate::time::Time;
use crate::vulkan::command_buffer::{BufferMemoryBarrier, PipelineBarrier};
use crate::vulkan::{
    Buffer, ComputePipeline, Context, DescriptorSet, DescriptorTable, ImmediatePass,
    MemoryLocation, Pass, PipelineLayout, QueueKind, RasterPipeline, RasterPipelineBuilder,
    ResourceState, SurfaceFrame,
};

pub const COMPUTE_SHADER: &str = "mandelbrot.comp";
pub const WORKGROUP_SIZE: u32 = 32;
pub const MAX_ITERATIONS: u32 = 128;

pub const PIXELS_SLOT: u32 = 0;
pub const SIZE_SLOT: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Colour of the pixel at (`x`, `y`), the way the compute shader computes it.
pub fn shade(x: u32, y: u32, size: ImageSize) -> [f32; 4] {
    let uv = Vec2::new(
        x as f32 / size.width as f32,
        y as f32 / size.height as f32,
    );
    let c = Vec2::new(-0.445, 0.0) + (uv - Vec2::broadcast(0.5)) * (2.0 + 1.7 * 0.2);

    let mut z = Vec2::zero();
    let mut iterations = 0;
    for _ in 0..MAX_ITERATIONS {
        z = Vec2::new(z.x * z.x - z.y * z.y, 2.0 * z.x * z.y) + c;
        if z.dot(z) > 2.0 {
            break;
        }
        iterations += 1;
    }

    let t = iterations as f32 / MAX_ITERATIONS as f32;
    let palette = |d: f32, e: f32, f: f32, g: f32| d + e * (6.28318 * (f * t + g)).cos();
    [
        palette(0.3, -0.2, 2.1, 0.0),
        palette(0.3, -0.3, 2.0, 0.1),
        palette(0.5, -0.5, 3.0, 0.0),
        1.0,
    ]
}

/// Computes the set once into a storage buffer, then draws it with a fullscreen triangle.
pub struct MandelbrotScene {
    pass: Pass,
    _raster_pipeline: RasterPipeline,
    _compute_pipeline: ComputePipeline,
    _layout: PipelineLayout,
    _descriptor_set: DescriptorSet,
    _descriptor_table: DescriptorTable,
    pixels: Buffer<[f32; 4]>,
    _size: Buffer<ImageSize>,
    extent: vk::Extent2D,
}

impl MandelbrotScene {
    pub fn new(context: &Arc<Context>) -> Result<Self, SceneError> {
        let surface = context.surface();
        let extent = surface.extent();
        let size = ImageSize {
            width: extent.width,
            height: extent.height,
        };

        let pixels = Buffer::<[f32; 4]>::new(
            context.clone(),
            "Mandelbrot Pixels",
            (size.width * size.height) as usize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::GpuOnly,
        )?;
        let size_buffer = Buffer::<ImageSize>::new(
            context.clone(),
            "Mandelbrot Size",
            1,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        size_buffer.fill_whole(&size)?;

        let stages = vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT;
        let mut descriptor_table = DescriptorTable::new(context.clone());
        descriptor_table
            .add_layout_binding(PIXELS_SLOT, 1, vk::DescriptorType::STORAGE_BUFFER, stages)?
            .add_layout_binding(SIZE_SLOT, 1, vk::DescriptorType::UNIFORM_BUFFER, stages)?;
        let mut descriptor_set = descriptor_table.allocate_descriptor_set()?;
        descriptor_set
            .write_buffer(PIXELS_SLOT, &pixels)
            .write_buffer(SIZE_SLOT, &size_buffer)
            .update()?;

        let layout = PipelineLayout::new(context.clone(), &[descriptor_table.layout()?], &[])?;
        let compute_pipeline = ComputePipeline::new(
            context.clone(),
            &layout,
            &context.load_shader(COMPUTE_SHADER, vk::ShaderStageFlags::COMPUTE)?,
        )?;

        let mut compute = ImmediatePass::new(context.clone(), QueueKind::Compute)?;
        compute.execute_immediately(|cmd| {
            cmd.buffer_barrier(
                &pixels,
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_WRITE,
            )
            .bind_pipeline(&compute_pipeline)
            .bind_descriptor_sets(
                vk::PipelineBindPoint::COMPUTE,
                &layout,
                0,
                &[&descriptor_set],
            )
            .dispatch(
                size.width.div_ceil(WORKGROUP_SIZE),
                size.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        });
        log::debug!("Computed the Mandelbrot set at {}x{}", size.width, size.height);

        // The compute queue cannot wait on fragment stages, so the graphics queue acquires
        let written = pixels.state().replace(ResourceState::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_READ,
            vk::ImageLayout::UNDEFINED,
        ));
        let acquire_pixels = PipelineBarrier {
            buffer_memory_barriers: vec![BufferMemoryBarrier {
                src_stage_mask: written.stage,
                src_access_mask: written.access,
                dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                dst_access_mask: vk::AccessFlags2::SHADER_READ,
                buffer: pixels.id(),
                offset: 0,
                size: vk::WHOLE_SIZE,
            }],
            ..Default::default()
        };

        let vertex_shader = context.load_shader("post.vert", vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader = context.load_shader("post.frag", vk::ShaderStageFlags::FRAGMENT)?;
        let raster_pipeline = RasterPipelineBuilder::new(&vertex_shader, &fragment_shader)
            .extent(extent)
            .build(context.clone(), &layout, surface.default_render_pass())?;

        let mut pass = Pass::for_surface(context.clone())?;
        pass.record_all_commands(|cmd, index| {
            cmd.pipeline_barrier(acquire_pixels.clone())
                .begin_render_pass(
                    surface.default_render_pass(),
                    surface.framebuffer(index),
                    surface.render_area(),
                    [0.0, 0.0, 0.0, 1.0],
                )
                .bind_pipeline(&raster_pipeline)
                .bind_descriptor_sets(
                    vk::PipelineBindPoint::GRAPHICS,
                    &layout,
                    0,
                    &[&descriptor_set],
                )
                .set_viewport(raster_pipeline.viewport())
                .set_scissor(raster_pipeline.scissor())
                .draw(3, 1, 0, 0)
                .end_render_pass();
        });

        Ok(Self {
            pass,
            _raster_pipeline: raster_pipeline,
            _compute_pipeline: compute_pipeline,
            _layout: layout,
            _descriptor_set: descriptor_set,
            _descriptor_table: descriptor_table,
            pixels,
            _size: size_buffer,
            extent,
        })
    }

    /// One colour per pixel, row by row.
    pub fn pixels(&self) -> &Buffer<[f32; 4]> {
        &self.pixels
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn pass(&self) -> &Pass {
        &self.pass
    }
}

impl Scene for MandelbrotScene {
    fn update(&mut self, _input: &dyn InputSource, _time: &Time) -> Result<(), SceneError> {
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
    fn center_is_inside_the_set() {
        let size = ImageSize {
            width: 64,
            height: 64,
        };
        // (-0.445, 0) never escapes, so the colour is the palette at t = 1
        let inside = shade(32, 32, size);
        let expected_red = 0.3 - 0.2 * (6.28318f32 * 2.1).cos();
        assert!((inside[0] - expected_red).abs() < 1e-5);
        assert_eq!(inside[3], 1.0);
    }

    #[test]
    fn corners_escape_immediately() {
        let size = ImageSize {
            width: 64,
            height: 64,
        };
        let corner = shade(0, 0, size);
        let expected_red = 0.3 - 0.2 * 0.0f32.cos();
        assert!((corner[0] - expected_red).abs() < 1e-5);
    }
}
