mod common;

use ash::vk;

use labscenes::scene::overlay::OverlayScene;
use labscenes::vulkan::{Buffer, DeviceError, ImmediatePass, MemoryLocation, QueueKind};

use common::software_context;

#[test]
fn upload_and_read_back_keep_every_bit() {
    let (device, context) = software_context(4, 4);
    let mut pass = ImmediatePass::new(context.clone(), QueueKind::Graphics).unwrap();
    let values = [
        0.0f32,
        -0.0,
        1.5,
        f32::MIN_POSITIVE / 2.0,
        f32::INFINITY,
        f32::from_bits(0x7fc0_1234),
    ];
    let buffer = Buffer::<f32>::new(
        context.clone(),
        "Values",
        values.len(),
        vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::GpuOnly,
    )
    .unwrap();

    buffer.upload(&mut pass, &values[..]).unwrap();
    assert_eq!(device.pending_submissions(), 0);

    let read: Vec<u32> = buffer
        .read_back(&mut pass)
        .unwrap()
        .into_iter()
        .map(f32::to_bits)
        .collect();
    let expected: Vec<u32> = values.iter().map(|value| value.to_bits()).collect();
    assert_eq!(read, expected);
}

#[test]
fn device_local_memory_is_not_mapped() {
    let (_device, context) = software_context(4, 4);
    let buffer = Buffer::<u32>::new(
        context,
        "Device Local",
        4,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryLocation::GpuOnly,
    )
    .unwrap();

    assert!(matches!(
        buffer.fill_whole(&[1u32, 2, 3, 4][..]),
        Err(DeviceError::NotHostVisible(_))
    ));
}

#[test]
fn staging_buffers_are_host_writable() {
    let (_device, context) = software_context(4, 4);
    let staging = Buffer::<u32>::new_staging(context, "Staging", 3).unwrap();

    staging.fill_whole(&vec![7u32, 8, 9]).unwrap();

    assert_eq!(staging.read().unwrap(), [7, 8, 9]);
    assert!(staging
        .usage()
        .contains(vk::BufferUsageFlags::TRANSFER_SRC));
}

#[test]
fn font_atlas_is_ready_for_sampling_after_creation() {
    let (device, context) = software_context(64, 48);
    let overlay = OverlayScene::new(&context).unwrap();

    assert_eq!(device.pending_submissions(), 0);
    assert_eq!(overlay.font_uploads(), 1);
    assert_eq!(
        overlay.font_texture().layout(),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    let texels = device.read_image(overlay.font_texture().id()).unwrap();
    assert!(texels.iter().any(|texel| texel[3] > 0.0));
}
