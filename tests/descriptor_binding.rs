mod common;

use ash::vk;
use labscenes::vulkan::device::DescriptorResource;
use labscenes::vulkan::{
    Buffer, DescriptorError, DescriptorTable, Image, MemoryLocation,
};

use common::software_context;

fn storage_buffer(context: &std::sync::Arc<labscenes::vulkan::Context>) -> Buffer<u32> {
    Buffer::new(
        context.clone(),
        "Storage",
        16,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryLocation::GpuOnly,
    )
    .unwrap()
}

fn two_buffer_table(context: &std::sync::Arc<labscenes::vulkan::Context>) -> DescriptorTable {
    let mut table = DescriptorTable::new(context.clone());
    table
        .add_layout_binding(
            0,
            1,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::ShaderStageFlags::COMPUTE,
        )
        .unwrap()
        .add_layout_binding(
            1,
            1,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::ShaderStageFlags::COMPUTE,
        )
        .unwrap();
    table
}

#[test]
fn update_commits_every_pending_write() {
    let (device, context) = software_context(4, 4);
    let first = storage_buffer(&context);
    let second = storage_buffer(&context);
    let mut table = two_buffer_table(&context);
    let mut set = table.allocate_descriptor_set().unwrap();

    set.write_buffer(0, &first).write_buffer(1, &second);
    assert!(device.descriptor_set_contents(set.id()).unwrap().is_empty());
    assert!(!set.is_complete());

    set.update().unwrap();
    let contents = device.descriptor_set_contents(set.id()).unwrap();
    assert_eq!(contents.len(), 2);
    assert!(matches!(
        contents[&1],
        DescriptorResource::Buffer { buffer, .. } if buffer == second.id()
    ));
    assert!(set.is_complete());
    assert!(set.pending(0).is_none());
}

#[test]
fn a_kind_mismatch_applies_nothing() {
    let (device, context) = software_context(4, 4);
    let first = storage_buffer(&context);
    let replacement = storage_buffer(&context);
    let image = Image::new_device_local(
        context.clone(),
        "Storage Image",
        vk::Extent2D {
            width: 4,
            height: 4,
        },
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::STORAGE,
    )
    .unwrap();
    let mut table = two_buffer_table(&context);
    let mut set = table.allocate_descriptor_set().unwrap();
    set.write_buffer(0, &first).write_buffer(1, &first).update().unwrap();
    let before = device.descriptor_set_contents(set.id()).unwrap();

    // Slot 0 alone would be fine, but the batch fails as a whole
    let result = set
        .write_buffer(0, &replacement)
        .write_image(1, &image, vk::ImageLayout::GENERAL, None)
        .update();

    assert!(matches!(
        result,
        Err(DescriptorError::KindMismatch { slot: 1, .. })
    ));
    assert_eq!(device.descriptor_set_contents(set.id()).unwrap(), before);
    assert!(set.pending(0).is_some());
    assert!(matches!(
        set.bound(0),
        Some(DescriptorResource::Buffer { buffer, .. }) if *buffer == first.id()
    ));
}

#[test]
fn buffers_need_the_usage_of_their_slot() {
    let (device, context) = software_context(4, 4);
    let storage = storage_buffer(&context);
    let mut table = DescriptorTable::new(context.clone());
    table
        .add_layout_binding(
            0,
            1,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .unwrap();
    let mut set = table.allocate_descriptor_set().unwrap();

    let result = set.write_buffer(0, &storage).update();
    assert!(matches!(
        result,
        Err(DescriptorError::UsageMismatch {
            slot: 0,
            expected: vk::DescriptorType::UNIFORM_BUFFER
        })
    ));
    assert!(device.descriptor_set_contents(set.id()).unwrap().is_empty());
    assert!(set.bound(0).is_none());

    let uniform = Buffer::<u32>::new(
        context.clone(),
        "Uniform",
        4,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
    )
    .unwrap();
    set.write_buffer(0, &uniform).update().unwrap();
    assert!(set.is_complete());
}

#[test]
fn storage_images_need_storage_usage() {
    let (_device, context) = software_context(4, 4);
    let sampled_only = Image::new_device_local(
        context.clone(),
        "Sampled Image",
        vk::Extent2D {
            width: 4,
            height: 4,
        },
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED,
    )
    .unwrap();
    let mut table = DescriptorTable::new(context.clone());
    table
        .add_layout_binding(
            0,
            1,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ShaderStageFlags::COMPUTE,
        )
        .unwrap();
    let mut set = table.allocate_descriptor_set().unwrap();

    let result = set
        .write_image(0, &sampled_only, vk::ImageLayout::GENERAL, None)
        .update();
    assert!(matches!(
        result,
        Err(DescriptorError::UsageMismatch { slot: 0, .. })
    ));
}

#[test]
fn unknown_slots_are_rejected() {
    let (device, context) = software_context(4, 4);
    let buffer = storage_buffer(&context);
    let mut table = two_buffer_table(&context);
    let mut set = table.allocate_descriptor_set().unwrap();

    let result = set.write_buffer(0, &buffer).write_buffer(7, &buffer).update();

    assert!(matches!(result, Err(DescriptorError::UnknownSlot { slot: 7 })));
    assert!(device.descriptor_set_contents(set.id()).unwrap().is_empty());
}

#[test]
fn layout_is_frozen_once_handed_out() {
    let (_device, context) = software_context(4, 4);
    let mut table = two_buffer_table(&context);

    assert!(matches!(
        table.add_layout_binding(
            1,
            1,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT
        ),
        Err(DescriptorError::DuplicateSlot { slot: 1 })
    ));

    let layout = table.layout().unwrap();
    assert_eq!(table.layout().unwrap(), layout);
    assert!(matches!(
        table.add_layout_binding(
            2,
            1,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT
        ),
        Err(DescriptorError::LayoutFrozen { slot: 2 })
    ));
    assert_eq!(table.bindings().len(), 2);
}
