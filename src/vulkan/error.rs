use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("Could not allocate memory: {0}")]
    Allocation(String),
    #[error("Unknown {kind} {id}")]
    UnknownId { kind: &'static str, id: u64 },
    #[error("No kernel is registered for shader {0}")]
    MissingKernel(String),
    #[error("Buffer {0} is not host visible")]
    NotHostVisible(u64),
    #[error("Access of {len} bytes at offset {offset} exceeds the size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("{0} does not support ray tracing")]
    RayTracingUnsupported(String),
    #[error("Could not load the Vulkan library: {0}")]
    Loading(String),
    #[error("No suitable physical device found")]
    NoSuitableDevice,
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("Could not read shader {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Shader {name} is not registered")]
    Unknown { name: String },
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Binding {slot} was added after the layout was frozen")]
    LayoutFrozen { slot: u32 },
    #[error("Binding {slot} is declared twice")]
    DuplicateSlot { slot: u32 },
    #[error("Slot {slot} is not part of the layout")]
    UnknownSlot { slot: u32 },
    #[error("Slot {slot} expects {expected:?}, but a {actual} was written")]
    KindMismatch {
        slot: u32,
        expected: vk::DescriptorType,
        actual: &'static str,
    },
    #[error("Slot {slot} expects {expected:?}, but the resource was not created for that usage")]
    UsageMismatch {
        slot: u32,
        expected: vk::DescriptorType,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error)]
pub enum AccelerationStructureError {
    #[error("A top level structure needs at least one instance")]
    NoInstances,
    #[error("Structure was created for {capacity} instances, but {requested} were given")]
    CapacityExceeded { capacity: usize, requested: usize },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Surface is out of date and has to be recreated")]
    OutOfDate,
    #[error(transparent)]
    Device(#[from] DeviceError),
}
