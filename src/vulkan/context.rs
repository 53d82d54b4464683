use std::sync::atomic::{AtomicUsize, Ordering};

use ash::vk;

use super::device::{
    Device, FenceId, FramebufferId, ImageId, QueueKind, RenderPassId, SemaphoreId, Shader,
};
use super::error::{DeviceError, ShaderError, SurfaceError};

/// Everything a scene needs to talk to the GPU. Constructed once and shared as `Arc<Context>`.
// Rust will drop these fields in the order they are declared
pub struct Context {
    surface: Box<dyn Surface>,
    shaders: Box<dyn ShaderSource>,
    device: Box<dyn Device>,
}

impl Context {
    pub fn new(
        device: Box<dyn Device>,
        surface: Box<dyn Surface>,
        shaders: Box<dyn ShaderSource>,
    ) -> Self {
        log::info!("Created context on {}", device.name());
        Self {
            surface,
            shaders,
            device,
        }
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn surface(&self) -> &dyn Surface {
        self.surface.as_ref()
    }

    pub fn load_shader(
        &self,
        name: &str,
        stage: vk::ShaderStageFlags,
    ) -> Result<Shader, ShaderError> {
        self.shaders.load(name, stage)
    }
}

/// Supplies shader code by file name.
pub trait ShaderSource: Send + Sync {
    fn load(&self, name: &str, stage: vk::ShaderStageFlags) -> Result<Shader, ShaderError>;
}

/// The index of the swapchain image that a frame renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainIndex(usize);

impl SwapchainIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

/// An acquired surface image, plus the semaphores the frame's submission has to honour.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceFrame {
    pub index: SwapchainIndex,
    pub image_available: Option<SemaphoreId>,
    pub render_finished: Option<SemaphoreId>,
}

impl SurfaceFrame {
    pub fn unsynchronized(index: usize) -> Self {
        Self {
            index: SwapchainIndex::new(index),
            image_available: None,
            render_finished: None,
        }
    }
}

/// Image-available semaphores of a swapchain, each guarded by a fence.
///
/// A slot is only handed out again once the queue finished every submission
/// that could still wait on its semaphore.
pub struct AcquireSlots {
    slots: Vec<(SemaphoreId, FenceId)>,
    next: AtomicUsize,
}

impl AcquireSlots {
    pub fn new(device: &dyn Device, count: usize) -> Result<Self, DeviceError> {
        let slots = (0..count.max(1))
            .map(|_| Ok((device.create_semaphore()?, device.create_fence(true)?)))
            .collect::<Result<Vec<_>, DeviceError>>()?;
        Ok(Self {
            slots,
            next: AtomicUsize::new(0),
        })
    }

    /// Blocks until the next slot is free, then returns its semaphore.
    pub fn next(&self, device: &dyn Device) -> Result<SemaphoreId, DeviceError> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let (semaphore, fence) = self.slots[slot];
        device.wait_for_fence(fence)?;
        Ok(semaphore)
    }

    /// Keeps the slot of `semaphore` busy until `queue` is done with what was submitted so far.
    pub fn retire(
        &self,
        device: &dyn Device,
        queue: QueueKind,
        semaphore: SemaphoreId,
    ) -> Result<(), DeviceError> {
        match self.slots.iter().find(|(slot, _)| *slot == semaphore) {
            Some(&(_, fence)) => device.signal_fence(queue, fence),
            None => Ok(()),
        }
    }

    pub fn destroy(self, device: &dyn Device) {
        for (semaphore, fence) in self.slots {
            device.destroy_semaphore(semaphore);
            device.destroy_fence(fence);
        }
    }
}

/// The presentation target. Passes size their per-frame arrays with [`Surface::image_count`].
pub trait Surface: Send + Sync {
    fn image_count(&self) -> usize;
    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;
    fn default_render_pass(&self) -> RenderPassId;
    fn framebuffer(&self, index: SwapchainIndex) -> FramebufferId;
    fn image(&self, index: SwapchainIndex) -> ImageId;

    fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent(),
        }
    }

    fn acquire_next_frame(&self) -> Result<SurfaceFrame, SurfaceError>;
    fn present(&self, frame: &SurfaceFrame) -> Result<(), SurfaceError>;

    /// Invalidates every framebuffer and image id handed out before.
    fn recreate(&self, extent: vk::Extent2D) -> Result<(), SurfaceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::command_buffer::CommandList;
    use crate::vulkan::device::SubmitInfo;
    use crate::vulkan::software::SoftwareDevice;

    #[test]
    fn a_slot_is_reused_only_after_its_waiting_submission_ran() {
        let device = SoftwareDevice::new();
        let slots = AcquireSlots::new(&device, 2).unwrap();

        let first = slots.next(&device).unwrap();
        let command_buffer = device.create_command_buffer(QueueKind::Graphics).unwrap();
        device
            .record_command_buffer(
                command_buffer,
                &CommandList::default(),
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
            .unwrap();
        device
            .submit(
                QueueKind::Graphics,
                command_buffer,
                &SubmitInfo {
                    wait_semaphore: Some((first, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
                    ..Default::default()
                },
            )
            .unwrap();
        slots.retire(&device, QueueKind::Graphics, first).unwrap();
        assert_eq!(device.pending_submissions(), 2);

        let second = slots.next(&device).unwrap();
        assert_ne!(first, second);
        assert_eq!(device.pending_submissions(), 2);

        assert_eq!(slots.next(&device).unwrap(), first);
        assert_eq!(device.pending_submissions(), 0);
        slots.destroy(&device);
    }
}
