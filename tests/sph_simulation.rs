mod common;

use std::sync::Arc;

use ash::vk;
use labscenes::input_map::InputMap;
use labscenes::scene::sph::physics::ParticleSystem;
use labscenes::scene::sph::{self, slot, Preset, SimulationParams, SphScene};
use labscenes::scene::Scene;
use labscenes::time::Time;
use labscenes::vulkan::{
    Buffer, ComputePipeline, Context, DescriptorTable, ImmediatePass, MemoryLocation,
    PipelineLayout, QueueKind,
};

use common::{contents, software_context};

/// Enough particles for three workgroups, with neighbours across workgroup borders.
const PARTICLES: usize = 300;

fn reference(preset: Preset, steps: usize) -> ParticleSystem {
    let mut system = ParticleSystem::new(&preset.positions(PARTICLES));
    for _ in 0..steps {
        system.step();
    }
    system
}

fn as_arrays(system: &ParticleSystem) -> Vec<[f32; 2]> {
    system.positions.iter().map(|p| [p.x, p.y]).collect()
}

/// Runs the three stages on their own buffers, optionally without barriers in between.
fn run_stages(
    context: &Arc<Context>,
    device: &labscenes::vulkan::SoftwareDevice,
    positions: &[[f32; 2]],
    steps: usize,
    with_barriers: bool,
) -> Vec<[f32; 2]> {
    let count = positions.len();
    let usage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
    let new_vec2 = |name| {
        Buffer::<[f32; 2]>::new(context.clone(), name, count, usage, MemoryLocation::GpuOnly)
            .unwrap()
    };
    let position = new_vec2("Positions");
    let velocity = new_vec2("Velocities");
    let force = new_vec2("Forces");
    let density =
        Buffer::<f32>::new(context.clone(), "Densities", count, usage, MemoryLocation::GpuOnly)
            .unwrap();
    let pressure =
        Buffer::<f32>::new(context.clone(), "Pressures", count, usage, MemoryLocation::GpuOnly)
            .unwrap();
    let mut upload = ImmediatePass::new(context.clone(), QueueKind::Graphics).unwrap();
    position.upload(&mut upload, positions).unwrap();

    let mut table = DescriptorTable::new(context.clone());
    for slot in 0..5 {
        table
            .add_layout_binding(
                slot,
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            )
            .unwrap();
    }
    let mut set = table.allocate_descriptor_set().unwrap();
    set.write_buffer(slot::POSITION, &position)
        .write_buffer(slot::VELOCITY, &velocity)
        .write_buffer(slot::FORCE, &force)
        .write_buffer(slot::DENSITY, &density)
        .write_buffer(slot::PRESSURE, &pressure)
        .update()
        .unwrap();

    let layout = PipelineLayout::new(
        context.clone(),
        &[table.layout().unwrap()],
        &[vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<SimulationParams>() as u32,
        }],
    )
    .unwrap();
    let stages: Vec<ComputePipeline> = [
        sph::DENSITY_PRESSURE_SHADER,
        sph::FORCE_SHADER,
        sph::INTEGRATE_SHADER,
    ]
    .into_iter()
    .map(|name| {
        let shader = context
            .load_shader(name, vk::ShaderStageFlags::COMPUTE)
            .unwrap();
        ComputePipeline::new(context.clone(), &layout, &shader).unwrap()
    })
    .collect();

    let params = SimulationParams {
        particle_count: count as u32,
    };
    let mut pass = ImmediatePass::new(context.clone(), QueueKind::Compute).unwrap();
    pass.record(|cmd| {
        for stage in &stages {
            cmd.bind_pipeline(stage)
                .bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, &layout, 0, &[&set])
                .push_constants(&layout, vk::ShaderStageFlags::COMPUTE, 0, &params)
                .dispatch((count as u32).div_ceil(sph::WORKGROUP_SIZE), 1, 1);
            if with_barriers {
                cmd.compute_barrier();
            }
        }
    });
    for _ in 0..steps {
        pass.submit_and_wait();
    }

    contents(device, position.id())
}

#[test]
fn barriers_between_stages_match_the_sequential_reference() {
    let (device, context) = software_context(16, 16);
    let positions = Preset::Column.positions(PARTICLES);

    let simulated = run_stages(&context, &device, &positions, 2, true);

    assert_eq!(simulated, as_arrays(&reference(Preset::Column, 2)));
    assert_eq!(device.stats().interleaved_batches, 0);
    assert_eq!(device.stats().invalid_accesses, 0);
}

#[test]
fn missing_barriers_let_stages_see_partial_results() {
    let (device, context) = software_context(16, 16);
    let positions = Preset::Column.positions(PARTICLES);

    let simulated = run_stages(&context, &device, &positions, 1, false);

    assert_ne!(simulated, as_arrays(&reference(Preset::Column, 1)));
    assert_eq!(device.stats().interleaved_batches, 1);
}

#[test]
fn scene_steps_match_the_sequential_reference() {
    let (device, context) = software_context(16, 16);
    let mut scene = SphScene::new(&context, PARTICLES).unwrap();
    scene.simulate();
    scene.simulate();

    let expected = reference(Preset::Column, 2);
    let buffers = scene.buffers();
    assert_eq!(contents::<[f32; 2]>(&device, buffers.position.id()), as_arrays(&expected));
    assert_eq!(contents::<f32>(&device, buffers.density.id()), expected.densities);
    assert_eq!(scene.steps(), 2);

    let stats = device.stats();
    assert_eq!(stats.dispatches, 6);
    assert_eq!(stats.interleaved_batches, 0);
    // The simulation blocks until the compute queue is idle
    assert_eq!(device.pending_submissions(), 0);
}

#[test]
fn reset_puts_every_particle_back_on_the_grid() {
    let (device, context) = software_context(16, 16);
    let mut scene = SphScene::new(&context, PARTICLES).unwrap();
    scene.simulate();

    scene.reset(Preset::TopLeft).unwrap();

    let buffers = scene.buffers();
    assert_eq!(
        contents::<[f32; 2]>(&device, buffers.position.id()),
        Preset::TopLeft.positions(PARTICLES)
    );
    assert!(contents::<[f32; 2]>(&device, buffers.velocity.id())
        .iter()
        .all(|velocity| *velocity == [0.0, 0.0]));
    assert!(contents::<f32>(&device, buffers.density.id())
        .iter()
        .all(|density| *density == 0.0));
    assert_eq!(scene.preset(), Preset::TopLeft);
    assert_eq!(scene.steps(), 0);
}

#[test]
fn preset_keys_give_the_same_simulation_every_time() {
    let run = || {
        let (device, context) = software_context(16, 16);
        let mut scene = SphScene::new(&context, PARTICLES).unwrap();
        let mut input = InputMap::new();
        input.update_key_press(Preset::BottomRight.key());
        scene.update(&input, &Time::new()).unwrap();
        input.advance();
        scene.update(&input, &Time::new()).unwrap();
        assert_eq!(scene.preset(), Preset::BottomRight);
        assert_eq!(scene.steps(), 2);
        contents::<[f32; 2]>(&device, scene.buffers().position.id())
    };

    let first = run();
    assert_eq!(first, run());
    assert_eq!(first, as_arrays(&reference(Preset::BottomRight, 2)));
}

#[test]
fn particles_are_drawn_from_the_position_buffer() {
    let (device, context) = software_context(16, 16);
    let mut scene = SphScene::new(&context, PARTICLES).unwrap();

    let frame = context.surface().acquire_next_frame().unwrap();
    scene.update(&InputMap::new(), &Time::new()).unwrap();
    scene.render(&frame);
    scene.cleanup();

    let names = scene.render_pass().recorded(frame.index).names();
    assert!(names.contains(&"bind_vertex_buffers"));
    let stats = device.stats();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.vertices, PARTICLES as u64);
}
