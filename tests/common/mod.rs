#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use labscenes::scene::kernels;
use labscenes::vulkan::device::BufferId;
use labscenes::vulkan::{Context, HeadlessSurface, NamedShaders, SoftwareDevice};

pub const SURFACE_IMAGES: usize = 3;

/// A context over the software device, with every scene kernel registered.
pub fn software_context(width: u32, height: u32) -> (SoftwareDevice, Arc<Context>) {
    let device = SoftwareDevice::new();
    kernels::register_all(&device);
    let surface = HeadlessSurface::new(
        &device,
        vk::Extent2D { width, height },
        SURFACE_IMAGES,
        vk::Format::R8G8B8A8_UNORM,
    )
    .expect("headless surface");
    let context = Arc::new(Context::new(
        Box::new(device.clone()),
        Box::new(surface),
        Box::new(NamedShaders::any()),
    ));
    (device, context)
}

/// Whatever the device currently holds in `buffer`, as `T`s.
pub fn contents<T: Pod>(device: &SoftwareDevice, buffer: BufferId) -> Vec<T> {
    let bytes = device.read_buffer_contents(buffer).expect("buffer contents");
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}
