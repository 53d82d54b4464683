use std::sync::Arc;

use ash::vk;

use super::context::Context;
use super::device::{ImageDesc, ImageId, MemoryLocation, SamplerDesc, SamplerId};
use super::error::DeviceError;
use super::resource_state::{ResourceState, TrackedState};

/// A 2D, single mip level image with its tracked layout.
pub struct Image {
    id: ImageId,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    extent: vk::Extent2D,
    state: TrackedState,
    context: Arc<Context>,
}

impl Image {
    pub fn new(context: Arc<Context>, desc: &ImageDesc) -> Result<Image, DeviceError> {
        let id = context.device().create_image(desc)?;
        Ok(Self {
            id,
            format: desc.format,
            usage: desc.usage,
            extent: desc.extent,
            state: TrackedState::new(ResourceState::UNDEFINED),
            context,
        })
    }

    pub fn new_device_local(
        context: Arc<Context>,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Image, DeviceError> {
        Self::new(
            context,
            &ImageDesc {
                name,
                extent,
                format,
                usage,
                location: MemoryLocation::GpuOnly,
            },
        )
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.state.get().layout
    }

    pub fn state(&self) -> &TrackedState {
        &self.state
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.context.device().destroy_image(self.id);
    }
}

pub struct Sampler {
    id: SamplerId,
    context: Arc<Context>,
}

impl Sampler {
    pub fn new(context: Arc<Context>, desc: &SamplerDesc) -> Result<Self, DeviceError> {
        let id = context.device().create_sampler(desc)?;
        Ok(Self { id, context })
    }

    pub fn linear(context: Arc<Context>) -> Result<Self, DeviceError> {
        Self::new(
            context,
            &SamplerDesc {
                filter: vk::Filter::LINEAR,
                address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            },
        )
    }

    pub fn id(&self) -> SamplerId {
        self.id
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.context.device().destroy_sampler(self.id);
    }
}

/// Bytes per texel of the formats this crate creates images with.
pub fn texel_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT => Some(4),
        vk::Format::R32G32_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}
