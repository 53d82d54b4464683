pub mod physics;

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use self::physics::PARTICLE_RADIUS;
use super::{Scene, SceneError};
use crate::input_map::{InputSource, Key};
use crate::time::Time;
use crate::vulkan::{
    Buffer, ComputePipeline, Context, DescriptorSet, DescriptorTable, ImmediatePass,
    MemoryLocation, Pass, PipelineLayout, QueueKind, RasterPipeline, RasterPipelineBuilder,
    SurfaceFrame,
};

pub const WORKGROUP_SIZE: u32 = 128;
pub const DEFAULT_PARTICLE_COUNT: usize = 20000;

pub const DENSITY_PRESSURE_SHADER: &str = "sph_density_pressure.comp";
pub const FORCE_SHADER: &str = "sph_force.comp";
pub const INTEGRATE_SHADER: &str = "sph_integrate.comp";

/// Descriptor slots shared by the three compute stages.
pub mod slot {
    pub const POSITION: u32 = 0;
    pub const VELOCITY: u32 = 1;
    pub const FORCE: u32 = 2;
    pub const DENSITY: u32 = 3;
    pub const PRESSURE: u32 = 4;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SimulationParams {
    pub particle_count: u32,
}

/// Initial particle layouts, selected with the number keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// 125 columns stacked upwards from the floor.
    Column,
    /// 100 columns hanging down from the top left corner.
    TopLeft,
    /// 100 columns stacked upwards from the bottom right corner, filled leftwards.
    BottomRight,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Column, Preset::TopLeft, Preset::BottomRight];

    pub fn key(self) -> Key {
        match self {
            Preset::Column => Key::Num1,
            Preset::TopLeft => Key::Num2,
            Preset::BottomRight => Key::Num3,
        }
    }

    /// The preset whose key went down this tick. Lower numbers win.
    pub fn triggered(input: &dyn InputSource) -> Option<Preset> {
        Self::ALL
            .into_iter()
            .find(|preset| input.was_pressed(preset.key()))
    }

    pub fn columns(self) -> usize {
        match self {
            Preset::Column => 125,
            Preset::TopLeft | Preset::BottomRight => 100,
        }
    }

    /// Where the first particle sits, and which way columns and rows grow.
    fn origin_and_direction(self) -> ([f32; 2], [f32; 2]) {
        match self {
            Preset::Column => ([-0.625, -1.0], [1.0, 1.0]),
            Preset::TopLeft => ([-1.0, 1.0], [1.0, -1.0]),
            Preset::BottomRight => ([1.0, -1.0], [-1.0, 1.0]),
        }
    }

    /// Grid positions one particle diameter apart.
    pub fn positions(self, count: usize) -> Vec<[f32; 2]> {
        let columns = self.columns();
        let ([origin_x, origin_y], [direction_x, direction_y]) = self.origin_and_direction();
        (0..count)
            .map(|index| {
                let column = (index % columns) as f32;
                let row = (index / columns) as f32;
                [
                    origin_x + direction_x * PARTICLE_RADIUS * 2.0 * column,
                    origin_y + direction_y * PARTICLE_RADIUS * 2.0 * row,
                ]
            })
            .collect()
    }
}

/// The five particle attribute buffers, one element per particle.
pub struct ParticleBuffers {
    pub position: Buffer<[f32; 2]>,
    pub velocity: Buffer<[f32; 2]>,
    pub force: Buffer<[f32; 2]>,
    pub density: Buffer<f32>,
    pub pressure: Buffer<f32>,
}

impl ParticleBuffers {
    fn new(context: &Arc<Context>, count: usize) -> Result<Self, SceneError> {
        let storage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        Ok(Self {
            position: Buffer::new(
                context.clone(),
                "Particle Positions",
                count,
                storage | vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::GpuOnly,
            )?,
            velocity: Buffer::new(
                context.clone(),
                "Particle Velocities",
                count,
                storage | vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::GpuOnly,
            )?,
            force: Buffer::new(
                context.clone(),
                "Particle Forces",
                count,
                storage,
                MemoryLocation::GpuOnly,
            )?,
            density: Buffer::new(
                context.clone(),
                "Particle Densities",
                count,
                storage | vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::GpuOnly,
            )?,
            pressure: Buffer::new(
                context.clone(),
                "Particle Pressures",
                count,
                storage,
                MemoryLocation::GpuOnly,
            )?,
        })
    }

    fn write_to(&self, set: &mut DescriptorSet) {
        set.write_buffer(slot::POSITION, &self.position)
            .write_buffer(slot::VELOCITY, &self.velocity)
            .write_buffer(slot::FORCE, &self.force)
            .write_buffer(slot::DENSITY, &self.density)
            .write_buffer(slot::PRESSURE, &self.pressure);
    }
}

pub struct SphScene {
    render_pass: Pass,
    compute_pass: ImmediatePass,
    upload_pass: ImmediatePass,
    render_pipeline: RasterPipeline,
    _render_layout: PipelineLayout,
    _stages: [ComputePipeline; 3],
    _compute_layout: PipelineLayout,
    _descriptor_set: DescriptorSet,
    _descriptor_table: DescriptorTable,
    buffers: ParticleBuffers,
    particle_count: usize,
    preset: Preset,
    steps: u64,
    context: Arc<Context>,
}

impl SphScene {
    pub fn new(context: &Arc<Context>, particle_count: usize) -> Result<Self, SceneError> {
        let particle_count = particle_count.max(1);
        let buffers = ParticleBuffers::new(context, particle_count)?;

        let mut descriptor_table = DescriptorTable::new(context.clone());
        for slot in [
            slot::POSITION,
            slot::VELOCITY,
            slot::FORCE,
            slot::DENSITY,
            slot::PRESSURE,
        ] {
            descriptor_table.add_layout_binding(
                slot,
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            )?;
        }
        let mut descriptor_set = descriptor_table.allocate_descriptor_set()?;
        buffers.write_to(&mut descriptor_set);
        descriptor_set.update()?;

        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<SimulationParams>() as u32,
        };
        let compute_layout = PipelineLayout::new(
            context.clone(),
            &[descriptor_table.layout()?],
            &[push_constant_range],
        )?;
        let stages = [DENSITY_PRESSURE_SHADER, FORCE_SHADER, INTEGRATE_SHADER].map(|name| {
            context
                .load_shader(name, vk::ShaderStageFlags::COMPUTE)
                .map_err(SceneError::from)
                .and_then(|shader| {
                    ComputePipeline::new(context.clone(), &compute_layout, &shader)
                        .map_err(SceneError::from)
                })
        });
        let [density_pressure, force, integrate] = stages;
        let stages = [density_pressure?, force?, integrate?];

        let params = SimulationParams {
            particle_count: particle_count as u32,
        };
        let group_count = (particle_count as u32).div_ceil(WORKGROUP_SIZE);
        let mut compute_pass = ImmediatePass::new(context.clone(), QueueKind::Compute)?;
        compute_pass.record(|cmd| {
            for stage in &stages {
                cmd.bind_pipeline(stage)
                    .bind_descriptor_sets(
                        vk::PipelineBindPoint::COMPUTE,
                        &compute_layout,
                        0,
                        &[&descriptor_set],
                    )
                    .push_constants(
                        &compute_layout,
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        &params,
                    )
                    .dispatch(group_count, 1, 1)
                    .compute_barrier();
            }
        });

        let surface = context.surface();
        let vertex_shader = context.load_shader("sph_particle.vert", vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader =
            context.load_shader("sph_particle.frag", vk::ShaderStageFlags::FRAGMENT)?;
        let render_layout = PipelineLayout::new(context.clone(), &[], &[])?;
        let render_pipeline = RasterPipelineBuilder::new(&vertex_shader, &fragment_shader)
            .topology(vk::PrimitiveTopology::POINT_LIST)
            .extent(surface.extent())
            .vertex_binding(0, std::mem::size_of::<[f32; 2]>() as u32)
            .vertex_attribute(0, 0, vk::Format::R32G32_SFLOAT, 0)
            .build(context.clone(), &render_layout, surface.default_render_pass())?;

        let mut render_pass = Pass::for_surface(context.clone())?;
        render_pass.record_all_commands(|cmd, index| {
            // Positions come from the compute queue
            cmd.memory_barrier(
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_WRITE,
                vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            )
            .begin_render_pass(
                surface.default_render_pass(),
                surface.framebuffer(index),
                surface.render_area(),
                [0.0, 0.0, 0.0, 1.0],
            )
            .bind_pipeline(&render_pipeline)
            .set_viewport(render_pipeline.viewport())
            .set_scissor(render_pipeline.scissor())
            .bind_vertex_buffer(0, &buffers.position)
            .draw(particle_count as u32, 1, 0, 0)
            .end_render_pass();
        });

        let mut scene = Self {
            render_pass,
            compute_pass,
            upload_pass: ImmediatePass::new(context.clone(), QueueKind::Graphics)?,
            render_pipeline,
            _render_layout: render_layout,
            _stages: stages,
            _compute_layout: compute_layout,
            _descriptor_set: descriptor_set,
            _descriptor_table: descriptor_table,
            buffers,
            particle_count,
            preset: Preset::Column,
            steps: 0,
            context: context.clone(),
        };
        scene.reset(Preset::Column)?;
        log::info!("Simulating {particle_count} particles");
        Ok(scene)
    }

    /// Puts every particle back on the preset grid, at rest.
    pub fn reset(&mut self, preset: Preset) -> Result<(), SceneError> {
        let positions = preset.positions(self.particle_count);
        let staging =
            Buffer::<[f32; 2]>::new_staging(self.context.clone(), "Particle Staging", positions.len())?;
        staging.fill_whole(&positions)?;

        // The previous frames still draw from the position buffer
        self.render_pass.wait();
        let buffers = &self.buffers;
        self.upload_pass.execute_immediately(|cmd| {
            buffers.position.upload_from(cmd, &staging);
            cmd.fill_buffer(&buffers.velocity, 0)
                .fill_buffer(&buffers.force, 0)
                .fill_buffer(&buffers.density, 0)
                .fill_buffer(&buffers.pressure, 0)
                .memory_barrier(
                    vk::PipelineStageFlags2::TRANSFER,
                    vk::AccessFlags2::TRANSFER_WRITE,
                    vk::PipelineStageFlags2::COMPUTE_SHADER
                        | vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
                    vk::AccessFlags2::SHADER_READ
                        | vk::AccessFlags2::SHADER_WRITE
                        | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
                );
        });
        self.preset = preset;
        self.steps = 0;
        log::info!("Reset particles to {preset:?}");
        Ok(())
    }

    /// Runs the three stages once and blocks until the compute queue is idle.
    pub fn simulate(&mut self) {
        self.compute_pass.submit();
        self.compute_pass.wait_queue_idle();
        self.steps += 1;
    }

    pub fn buffers(&self) -> &ParticleBuffers {
        &self.buffers
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn compute_pass(&self) -> &ImmediatePass {
        &self.compute_pass
    }

    pub fn render_pass(&self) -> &Pass {
        &self.render_pass
    }

    pub fn render_pipeline(&self) -> &RasterPipeline {
        &self.render_pipeline
    }
}

impl Scene for SphScene {
    fn update(&mut self, input: &dyn InputSource, _time: &Time) -> Result<(), SceneError> {
        if let Some(preset) = Preset::triggered(input) {
            self.reset(preset)?;
        }
        self.simulate();
        Ok(())
    }

    fn render(&mut self, frame: &SurfaceFrame) {
        self.render_pass.render(frame);
    }

    fn cleanup(&mut self) {
        self.render_pass.wait();
        self.compute_pass.wait_queue_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn preset_grids_are_injective() {
        for preset in Preset::ALL {
            let positions = preset.positions(DEFAULT_PARTICLE_COUNT);
            let distinct: HashSet<[u32; 2]> = positions
                .iter()
                .map(|[x, y]| [x.to_bits(), y.to_bits()])
                .collect();
            assert_eq!(distinct.len(), DEFAULT_PARTICLE_COUNT, "{preset:?}");
        }
    }

    #[test]
    fn presets_are_deterministic() {
        for preset in Preset::ALL {
            assert_eq!(preset.positions(500), preset.positions(500));
        }
    }

    #[test]
    fn column_preset_starts_on_the_floor() {
        let positions = Preset::Column.positions(DEFAULT_PARTICLE_COUNT);
        assert_eq!(positions[0], [-0.625, -1.0]);
        assert!((positions[1][0] - (-0.625 + 2.0 * PARTICLE_RADIUS)).abs() < 1e-6);
        // The first particle of the second row
        assert_eq!(positions[125][0], -0.625);
        assert!((positions[125][1] - (-1.0 + 2.0 * PARTICLE_RADIUS)).abs() < 1e-6);
    }

    #[test]
    fn corner_presets_grow_away_from_their_corner() {
        let top_left = Preset::TopLeft.positions(101);
        assert_eq!(top_left[0], [-1.0, 1.0]);
        assert!(top_left[100][1] < 1.0);
        assert_eq!(top_left[100][0], -1.0);

        let bottom_right = Preset::BottomRight.positions(2);
        assert_eq!(bottom_right[0], [1.0, -1.0]);
        assert!(bottom_right[1][0] < 1.0);
    }
}
