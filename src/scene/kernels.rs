//! CPU versions of the scene shaders, for running the scenes on the software device.

use ultraviolet::Vec2;

use super::mandelbrot::{self, ImageSize};
use super::ray_trace_triangle::{
    hit_color, primary_ray, MISS_COLOR, OUTPUT_SLOT, RAYGEN_SHADER, TLAS_SLOT,
};
use super::sph::physics::{self, ParticleSample};
use super::sph::{self, slot, SimulationParams};
use crate::vulkan::software::Invocation;
use crate::vulkan::SoftwareDevice;

/// Registers every compute and ray generation shader the scenes use.
pub fn register_all(device: &SoftwareDevice) {
    register_mandelbrot(device);
    register_sph(device);
    register_ray_trace_triangle(device);
}

pub fn register_mandelbrot(device: &SoftwareDevice) {
    let local_size = [mandelbrot::WORKGROUP_SIZE, mandelbrot::WORKGROUP_SIZE, 1];
    device.register_compute_kernel(mandelbrot::COMPUTE_SHADER, local_size, |invocation| {
        let [x, y, _] = invocation.global_id;
        let size: ImageSize = invocation.load(mandelbrot::SIZE_SLOT, 0);
        if x >= size.width || y >= size.height {
            return;
        }
        let index = (y * size.width + x) as usize;
        invocation.store(mandelbrot::PIXELS_SLOT, index, mandelbrot::shade(x, y, size));
    });
}

fn load_vec2(invocation: &mut Invocation<'_>, slot: u32, index: usize) -> Vec2 {
    Vec2::from(invocation.load::<[f32; 2]>(slot, index))
}

fn load_sample(invocation: &mut Invocation<'_>, index: usize) -> ParticleSample {
    ParticleSample {
        position: load_vec2(invocation, slot::POSITION, index),
        velocity: load_vec2(invocation, slot::VELOCITY, index),
        density: invocation.load(slot::DENSITY, index),
        pressure: invocation.load(slot::PRESSURE, index),
    }
}

/// The particle this invocation works on, or `None` past the end of the last workgroup.
fn particle(invocation: &Invocation<'_>) -> Option<(usize, usize)> {
    let count = invocation.push_constants::<SimulationParams>().particle_count as usize;
    let index = invocation.global_id[0] as usize;
    (index < count).then_some((index, count))
}

pub fn register_sph(device: &SoftwareDevice) {
    let local_size = [sph::WORKGROUP_SIZE, 1, 1];
    device.register_compute_kernel(sph::DENSITY_PRESSURE_SHADER, local_size, |invocation| {
        let Some((index, count)) = particle(invocation) else {
            return;
        };
        let density = physics::density(index, count, |other| {
            load_vec2(invocation, slot::POSITION, other)
        });
        invocation.store(slot::DENSITY, index, density);
        invocation.store(slot::PRESSURE, index, physics::pressure(density));
    });
    device.register_compute_kernel(sph::FORCE_SHADER, local_size, |invocation| {
        let Some((index, count)) = particle(invocation) else {
            return;
        };
        let force = physics::force(index, count, |other| load_sample(invocation, other));
        invocation.store(slot::FORCE, index, [force.x, force.y]);
    });
    device.register_compute_kernel(sph::INTEGRATE_SHADER, local_size, |invocation| {
        let Some((index, _)) = particle(invocation) else {
            return;
        };
        let sample = load_sample(invocation, index);
        let force = load_vec2(invocation, slot::FORCE, index);
        let (position, velocity) = physics::integrate(sample, force);
        invocation.store(slot::POSITION, index, [position.x, position.y]);
        invocation.store(slot::VELOCITY, index, [velocity.x, velocity.y]);
    });
}

pub fn register_ray_trace_triangle(device: &SoftwareDevice) {
    device.register_ray_gen_kernel(RAYGEN_SHADER, |ray| {
        let launch_id = [ray.launch_id[0], ray.launch_id[1]];
        let launch_size = [ray.launch_size[0], ray.launch_size[1]];
        let (origin, direction) = primary_ray(launch_id, launch_size);
        let color = ray
            .trace_ray(TLAS_SLOT, origin, direction, 0.001, 100.0)
            .map_or(MISS_COLOR, |hit| hit_color(hit.barycentrics));
        ray.resources
            .image_store(OUTPUT_SLOT, launch_id[0], launch_id[1], color);
    });
}
