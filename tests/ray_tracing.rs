mod common;

use std::sync::Arc;

use ash::vk;
use ultraviolet::{Mat4, Vec3};

use labscenes::scene::ray_trace_triangle::{
    RayTraceTriangleScene, MISS_COLOR, TRIANGLE_INDICES, TRIANGLE_VERTICES,
};
use labscenes::scene::Scene;
use labscenes::vulkan::{
    AccelerationStructureError, Blas, Buffer, Context, DescriptorTable, ImmediatePass,
    MemoryLocation, PipelineLayout, QueueKind, RayTracePipeline, RayTraceShaders,
    SoftwareDevice, SurfaceFrame, Tlas,
};

use common::{contents, software_context};

const SINGLE_RAY_SHADER: &str = "single_ray.rgen";

fn pixel(device: &SoftwareDevice, scene: &RayTraceTriangleScene, x: u32, y: u32) -> [f32; 4] {
    let extent = scene.offscreen().extent();
    let texels = device.read_image(scene.offscreen().id()).unwrap();
    texels[(y * extent.width + x) as usize]
}

fn is_miss(color: [f32; 4]) -> bool {
    color
        .iter()
        .zip(MISS_COLOR)
        .all(|(channel, miss)| (channel - miss).abs() < 1.0 / 255.0)
}

fn render(scene: &mut RayTraceTriangleScene, frame: usize) {
    scene.render(&SurfaceFrame::unsynchronized(frame));
    scene.cleanup();
}

#[test]
fn triangle_covers_the_center_of_the_image() {
    let (device, context) = software_context(32, 32);
    let mut scene = RayTraceTriangleScene::new(&context).unwrap();
    render(&mut scene, 0);

    let center = pixel(&device, &scene, 16, 16);
    assert!(!is_miss(center), "{center:?}");
    assert!(is_miss(pixel(&device, &scene, 0, 31)));
    assert_eq!(device.stats().rays, 32 * 32);

    let names = scene.pass().recorded(SurfaceFrame::unsynchronized(0).index).names();
    assert_eq!(
        names,
        [
            "pipeline_barrier",
            "bind_pipeline",
            "bind_descriptor_sets",
            "trace_rays",
            "pipeline_barrier",
            "pipeline_barrier",
            "blit_image",
            "pipeline_barrier",
        ]
    );
}

#[test]
fn the_surface_image_receives_the_traced_image() {
    let (device, context) = software_context(32, 32);
    let mut scene = RayTraceTriangleScene::new(&context).unwrap();
    render(&mut scene, 1);

    let target = context
        .surface()
        .image(SurfaceFrame::unsynchronized(1).index);
    assert_eq!(
        device.read_image(target).unwrap(),
        device.read_image(scene.offscreen().id()).unwrap()
    );
}

#[test]
fn moving_the_instance_rebuilds_the_top_level_structure() {
    let (device, context) = software_context(32, 32);
    let mut scene = RayTraceTriangleScene::new(&context).unwrap();

    scene.move_instance(Vec3::new(10.0, 0.0, 0.0)).unwrap();
    render(&mut scene, 0);

    assert!(is_miss(pixel(&device, &scene, 16, 16)));
    assert_eq!(scene.rebuilds(), 1);
    assert_eq!(scene.tlas().instances()[0].transform[3], 10.0);
}

/// Traces a single ray from the camera straight through the origin.
/// `hits` holds the hit flag followed by the world space hit position.
struct SingleRay {
    pass: ImmediatePass,
    _pipeline: RayTracePipeline,
    _layout: PipelineLayout,
    _set: labscenes::vulkan::DescriptorSet,
    _table: DescriptorTable,
    hits: Buffer<f32>,
}

impl SingleRay {
    fn new(device: &SoftwareDevice, context: &Arc<Context>, tlas: &Tlas) -> Self {
        device.register_ray_gen_kernel(SINGLE_RAY_SHADER, |ray| {
            let hit = ray.trace_ray(
                0,
                Vec3::new(0.0, 0.0, -1.5),
                Vec3::unit_z(),
                0.001,
                100.0,
            );
            ray.resources
                .store(1, 0, if hit.is_some() { 1.0f32 } else { 0.0 });
            let position = hit.map_or(Vec3::zero(), |hit| hit.position);
            for (index, value) in [position.x, position.y, position.z].into_iter().enumerate() {
                ray.resources.store(1, index + 1, value);
            }
        });

        let hits = Buffer::<f32>::new(
            context.clone(),
            "Hits",
            4,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::GpuOnly,
        )
        .unwrap();
        let mut table = DescriptorTable::new(context.clone());
        table
            .add_layout_binding(
                0,
                1,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                vk::ShaderStageFlags::RAYGEN_KHR,
            )
            .unwrap()
            .add_layout_binding(
                1,
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::RAYGEN_KHR,
            )
            .unwrap();
        let mut set = table.allocate_descriptor_set().unwrap();
        set.write_acceleration_structure(0, tlas)
            .write_buffer(1, &hits)
            .update()
            .unwrap();
        let layout = PipelineLayout::new(context.clone(), &[table.layout().unwrap()], &[]).unwrap();
        let shaders = RayTraceShaders {
            raygen: context
                .load_shader(SINGLE_RAY_SHADER, vk::ShaderStageFlags::RAYGEN_KHR)
                .unwrap(),
            miss: Vec::new(),
            closest_hit: Vec::new(),
            callable: Vec::new(),
        };
        let pipeline = RayTracePipeline::new(context.clone(), &layout, &shaders, 1).unwrap();

        let mut pass = ImmediatePass::new(context.clone(), QueueKind::Graphics).unwrap();
        pass.record(|cmd| {
            cmd.bind_pipeline(&pipeline)
                .bind_descriptor_sets(
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    &layout,
                    0,
                    &[&set],
                )
                .trace_rays(pipeline.shader_binding_table(), 1, 1, 1);
        });

        Self {
            pass,
            _pipeline: pipeline,
            _layout: layout,
            _set: set,
            _table: table,
            hits,
        }
    }

    fn hits(&mut self, device: &SoftwareDevice) -> bool {
        self.pass.submit_and_wait();
        contents::<f32>(device, self.hits.id())[0] == 1.0
    }

    fn hit_position(&mut self, device: &SoftwareDevice) -> Option<Vec3> {
        self.pass.submit_and_wait();
        match contents::<f32>(device, self.hits.id())[..] {
            [flag, x, y, z] if flag == 1.0 => Some(Vec3::new(x, y, z)),
            _ => None,
        }
    }
}

fn triangle_blas(context: &Arc<Context>, build: &mut ImmediatePass) -> Blas {
    let usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        | vk::BufferUsageFlags::TRANSFER_DST;
    let vertices =
        Buffer::<[f32; 3]>::new(context.clone(), "Vertices", 3, usage, MemoryLocation::GpuOnly)
            .unwrap();
    vertices.upload(build, &TRIANGLE_VERTICES[..]).unwrap();
    let indices =
        Buffer::<u32>::new(context.clone(), "Indices", 3, usage, MemoryLocation::GpuOnly).unwrap();
    indices.upload(build, &TRIANGLE_INDICES[..]).unwrap();
    Blas::new(context.clone(), build, &vertices, &indices).unwrap()
}

#[test]
fn structures_keep_what_they_were_built_from() {
    let (device, context) = software_context(4, 4);
    let mut build = ImmediatePass::new(context.clone(), QueueKind::Graphics).unwrap();
    let usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        | vk::BufferUsageFlags::TRANSFER_DST;
    let vertices = Buffer::<[f32; 3]>::new(
        context.clone(),
        "Vertices",
        3,
        usage,
        MemoryLocation::GpuOnly,
    )
    .unwrap();
    vertices.upload(&mut build, &TRIANGLE_VERTICES[..]).unwrap();
    let indices =
        Buffer::<u32>::new(context.clone(), "Indices", 3, usage, MemoryLocation::GpuOnly).unwrap();
    indices.upload(&mut build, &TRIANGLE_INDICES[..]).unwrap();

    let blas = Blas::new(context.clone(), &mut build, &vertices, &indices).unwrap();
    let mut tlas = Tlas::new(context.clone(), &mut build, &[blas.create_instance()]).unwrap();
    let mut ray = SingleRay::new(&device, &context, &tlas);
    assert!(ray.hits(&device));

    // New geometry without a bottom level rebuild is not seen
    let moved: Vec<[f32; 3]> = TRIANGLE_VERTICES
        .iter()
        .map(|[x, y, z]| [x + 10.0, *y, *z])
        .collect();
    vertices.upload(&mut build, &moved).unwrap();
    assert!(ray.hits(&device));

    // A top level rebuild is
    let away = blas.create_instance_with_transform(&Mat4::from_translation(Vec3::new(
        10.0, 0.0, 0.0,
    )));
    tlas.rebuild(&mut build, &[away]).unwrap();
    assert!(!ray.hits(&device));

    tlas.rebuild(&mut build, &[blas.create_instance()]).unwrap();
    assert!(ray.hits(&device));
}

#[test]
fn top_level_capacity_is_fixed_at_creation() {
    let (_device, context) = software_context(4, 4);
    let mut build = ImmediatePass::new(context.clone(), QueueKind::Graphics).unwrap();
    let usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        | vk::BufferUsageFlags::TRANSFER_DST;
    let vertices =
        Buffer::<[f32; 3]>::new(context.clone(), "Vertices", 3, usage, MemoryLocation::GpuOnly)
            .unwrap();
    vertices.upload(&mut build, &TRIANGLE_VERTICES[..]).unwrap();
    let indices =
        Buffer::<u32>::new(context.clone(), "Indices", 3, usage, MemoryLocation::GpuOnly).unwrap();
    indices.upload(&mut build, &TRIANGLE_INDICES[..]).unwrap();
    let blas = Blas::new(context.clone(), &mut build, &vertices, &indices).unwrap();

    assert!(matches!(
        Tlas::new(context.clone(), &mut build, &[]),
        Err(AccelerationStructureError::NoInstances)
    ));
    let mut tlas = Tlas::new(context.clone(), &mut build, &[blas.create_instance()]).unwrap();
    let two = [blas.create_instance(), blas.create_instance()];
    assert!(matches!(
        tlas.rebuild(&mut build, &two),
        Err(AccelerationStructureError::CapacityExceeded {
            capacity: 1,
            requested: 2
        })
    ));
    assert_eq!(tlas.instances().len(), 1);
}

#[test]
fn instance_transforms_apply_only_after_a_top_level_rebuild() {
    let (device, context) = software_context(4, 4);
    let mut build = ImmediatePass::new(context.clone(), QueueKind::Graphics).unwrap();
    let blas = triangle_blas(&context, &mut build);
    let mut tlas = Tlas::new(context.clone(), &mut build, &[blas.create_instance()]).unwrap();
    let mut ray = SingleRay::new(&device, &context, &tlas);
    let near = |position: Option<Vec3>, expected: Vec3| {
        position.map_or(false, |position| (position - expected).mag() < 1e-5)
    };
    assert!(near(ray.hit_position(&device), Vec3::zero()));

    let shifted = blas.create_instance_with_transform(&Mat4::from_translation(Vec3::new(
        0.25, 0.0, 0.25,
    )));
    tlas.instance_buffer().upload(&mut build, &[shifted][..]).unwrap();
    assert!(near(ray.hit_position(&device), Vec3::zero()));

    tlas.rebuild(&mut build, &[shifted]).unwrap();
    assert!(near(ray.hit_position(&device), Vec3::new(0.0, 0.0, 0.25)));
}
