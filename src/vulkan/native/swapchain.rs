use std::sync::RwLock;

use ash::vk;

use super::NativeDevice;
use crate::vulkan::context::{AcquireSlots, Surface, SurfaceFrame, SwapchainIndex};
use crate::vulkan::device::{
    Device, FramebufferId, ImageId, QueueKind, RenderPassId, SemaphoreId,
};
use crate::vulkan::error::{DeviceError, SurfaceError};
use crate::vulkan::window_settings::PresentMode;

struct SwapchainImages {
    swapchain: vk::SwapchainKHR,
    extent: vk::Extent2D,
    images: Vec<(ImageId, FramebufferId)>,
    /// One per image, signaled by the frame that renders into it.
    render_finished: Vec<SemaphoreId>,
    /// One more than there are images. `None` only while tearing down.
    image_available: Option<AcquireSlots>,
}

/// The window surface of the native backend.
pub struct SwapchainSurface {
    device: NativeDevice,
    loader: ash::extensions::khr::Swapchain,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    render_pass: RenderPassId,
    inner: RwLock<SwapchainImages>,
}

impl SwapchainSurface {
    pub fn new(
        device: &NativeDevice,
        window_size: vk::Extent2D,
        present_mode: PresentMode,
    ) -> Result<Self, DeviceError> {
        let context = device.vulkan();
        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, context.surface)
        }?;
        let present_modes = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_present_modes(context.physical_device, context.surface)
        }?;

        let surface_format = formats
            .into_iter()
            .min_by_key(|fmt| match (fmt.format, fmt.color_space) {
                (vk::Format::B8G8R8A8_SRGB, _) => 1,
                (vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR) => 2,
                (_, _) => 3,
            })
            .ok_or(DeviceError::Vulkan(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;

        let wanted: vk::PresentModeKHR = present_mode.into();
        let present_mode = present_modes
            .into_iter()
            .find(|&pm| pm == wanted)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let loader = ash::extensions::khr::Swapchain::new(&context.instance, &context.device);
        let render_pass =
            device.create_render_pass(surface_format.format, vk::ImageLayout::PRESENT_SRC_KHR)?;

        let surface = Self {
            device: device.clone(),
            loader,
            surface_format,
            present_mode,
            render_pass,
            inner: RwLock::new(SwapchainImages {
                swapchain: vk::SwapchainKHR::null(),
                extent: window_size,
                images: Vec::new(),
                render_finished: Vec::new(),
                image_available: None,
            }),
        };
        surface.rebuild(window_size)?;
        log::info!(
            "Created swapchain with {:?} in {:?}",
            surface.surface_format.format,
            surface.present_mode
        );
        Ok(surface)
    }

    fn images(&self) -> std::sync::RwLockReadGuard<'_, SwapchainImages> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates a swapchain replacing the current one, then swaps every per-image object.
    fn rebuild(&self, window_size: vk::Extent2D) -> Result<(), DeviceError> {
        let context = self.device.vulkan();
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, context.surface)
        }?;

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: window_size.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: window_size.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let num_images = capabilities.min_image_count.max(2);
        let old_swapchain = self.images().swapchain;

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(num_images)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }?;
        let raw_images = unsafe { self.loader.get_swapchain_images(swapchain) }?;

        let mut images = Vec::with_capacity(raw_images.len());
        for image in raw_images {
            let id = self
                .device
                .register_external_image(image, self.surface_format.format, extent)?;
            let framebuffer = self.device.create_framebuffer(self.render_pass, id)?;
            images.push((id, framebuffer));
        }
        let render_finished = (0..images.len())
            .map(|_| self.device.create_semaphore())
            .collect::<Result<Vec<_>, _>>()?;
        let image_available = AcquireSlots::new(&self.device, images.len() + 1)?;

        let old = {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(
                &mut *inner,
                SwapchainImages {
                    swapchain,
                    extent,
                    images,
                    render_finished,
                    image_available: Some(image_available),
                },
            )
        };
        // We brutally assume that the old swapchain is not in use anymore
        self.destroy_images(old);
        Ok(())
    }

    fn destroy_images(&self, old: SwapchainImages) {
        for (image, framebuffer) in old.images {
            self.device.destroy_framebuffer(framebuffer);
            self.device.destroy_image(image);
        }
        for semaphore in old.render_finished {
            self.device.destroy_semaphore(semaphore);
        }
        if let Some(slots) = old.image_available {
            slots.destroy(&self.device);
        }
        if old.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old.swapchain, None) };
        }
    }

    fn target(&self, index: SwapchainIndex) -> (ImageId, FramebufferId) {
        let inner = self.images();
        inner.images[index.get() % inner.images.len()]
    }
}

fn surface_error(err: vk::Result) -> SurfaceError {
    match err {
        vk::Result::ERROR_OUT_OF_DATE_KHR => SurfaceError::OutOfDate,
        err => SurfaceError::Device(err.into()),
    }
}

impl Surface for SwapchainSurface {
    fn image_count(&self) -> usize {
        self.images().images.len()
    }

    fn extent(&self) -> vk::Extent2D {
        self.images().extent
    }

    fn format(&self) -> vk::Format {
        self.surface_format.format
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
        let inner = self.images();
        let image_available = inner
            .image_available
            .as_ref()
            .ok_or(SurfaceError::OutOfDate)?
            .next(&self.device)?;
        let semaphore = self.device.semaphore(image_available)?;

        let (index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                inner.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(surface_error)?;
        if suboptimal {
            log::debug!("Acquired a suboptimal swapchain image");
        }

        Ok(SurfaceFrame {
            index: SwapchainIndex::new(index as usize),
            image_available: Some(image_available),
            render_finished: Some(inner.render_finished[index as usize]),
        })
    }

    fn present(&self, frame: &SurfaceFrame) -> Result<(), SurfaceError> {
        let inner = self.images();
        let wait_semaphores = frame
            .render_finished
            .map(|semaphore| self.device.semaphore(semaphore))
            .transpose()?
            .into_iter()
            .collect::<Vec<_>>();
        let swapchains = [inner.swapchain];
        let image_indices = [frame.index.get() as u32];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        if let (Some(slots), Some(semaphore)) = (&inner.image_available, frame.image_available) {
            slots.retire(&self.device, QueueKind::Graphics, semaphore)?;
        }
        let queue = self.device.graphics_queue();
        let suboptimal = unsafe { self.loader.queue_present(*queue, &present_info) }
            .map_err(surface_error)?;
        if suboptimal {
            return Err(SurfaceError::OutOfDate);
        }
        Ok(())
    }

    fn recreate(&self, extent: vk::Extent2D) -> Result<(), SurfaceError> {
        self.device.wait_idle()?;
        self.rebuild(extent)?;
        let extent = self.extent();
        log::debug!("Recreated swapchain at {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl Drop for SwapchainSurface {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("Could not wait for device idle: {err}");
        }
        let inner = std::mem::replace(
            self.inner
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            SwapchainImages {
                swapchain: vk::SwapchainKHR::null(),
                extent: vk::Extent2D::default(),
                images: Vec::new(),
                render_finished: Vec::new(),
                image_available: None,
            },
        );
        self.destroy_images(inner);
        self.device.destroy_render_pass(self.render_pass);
    }
}
