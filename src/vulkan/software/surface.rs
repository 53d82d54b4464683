use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use ash::vk;

use super::SoftwareDevice;
use crate::vulkan::context::{Surface, SurfaceFrame, SwapchainIndex};
use crate::vulkan::device::{FramebufferId, ImageId, RenderPassId};
use crate::vulkan::error::{DeviceError, SurfaceError};

struct Targets {
    extent: vk::Extent2D,
    images: Vec<(ImageId, FramebufferId)>,
}

/// A swapchain stand-in with no window. Images are handed out round robin and presenting
/// only counts.
pub struct HeadlessSurface {
    device: SoftwareDevice,
    render_pass: RenderPassId,
    format: vk::Format,
    image_count: usize,
    targets: RwLock<Targets>,
    next_image: AtomicUsize,
}

impl HeadlessSurface {
    pub fn new(
        device: &SoftwareDevice,
        extent: vk::Extent2D,
        image_count: usize,
        format: vk::Format,
    ) -> Result<Self, DeviceError> {
        let images = Self::create_targets(device, extent, image_count, format)?;
        Ok(Self {
            device: device.clone(),
            render_pass: device.create_render_pass(),
            format,
            image_count,
            targets: RwLock::new(Targets { extent, images }),
            next_image: AtomicUsize::new(0),
        })
    }

    fn create_targets(
        device: &SoftwareDevice,
        extent: vk::Extent2D,
        image_count: usize,
        format: vk::Format,
    ) -> Result<Vec<(ImageId, FramebufferId)>, DeviceError> {
        (0..image_count)
            .map(|index| {
                device.create_render_target(&format!("Surface Image {index}"), extent, format)
            })
            .collect()
    }

    fn target(&self, index: SwapchainIndex) -> (ImageId, FramebufferId) {
        let targets = self
            .targets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        targets.images[index.get() % targets.images.len()]
    }
}

impl Surface for HeadlessSurface {
    fn image_count(&self) -> usize {
        self.image_count
    }

    fn extent(&self) -> vk::Extent2D {
        self.targets
            .read()
            .map(|targets| targets.extent)
            .unwrap_or_default()
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn default_render_pass(&self) -> RenderPassId {
        self.render_pass
    }

    fn framebuffer(&self, index: SwapchainIndex) -> FramebufferId {
        self.target(index).1
    }

    fn image(&self, index: SwapchainIndex) -> ImageId {
        self.target(index).0
    }

    fn acquire_next_frame(&self) -> Result<SurfaceFrame, SurfaceError> {
        let index = self.next_image.fetch_add(1, Ordering::Relaxed) % self.image_count;
        Ok(SurfaceFrame::unsynchronized(index))
    }

    fn present(&self, _frame: &SurfaceFrame) -> Result<(), SurfaceError> {
        self.device.count_present();
        Ok(())
    }

    fn recreate(&self, extent: vk::Extent2D) -> Result<(), SurfaceError> {
        let images = Self::create_targets(&self.device, extent, self.image_count, self.format)?;
        let mut targets = self
            .targets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (image, framebuffer) in std::mem::replace(&mut targets.images, images) {
            self.device.destroy_render_target(image, framebuffer);
        }
        targets.extent = extent;
        log::debug!("Recreated headless surface at {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        let targets = self
            .targets
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (image, framebuffer) in targets.images.drain(..) {
            self.device.destroy_render_target(image, framebuffer);
        }
        self.device.destroy_render_pass(self.render_pass);
    }
}
