use std::sync::Mutex;

use ash::vk;

/// The last recorded access of a resource. Only a recorded barrier moves it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl ResourceState {
    pub const UNDEFINED: ResourceState = ResourceState {
        stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::UNDEFINED,
    };

    pub fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            stage,
            access,
            layout,
        }
    }

    pub fn is_write(&self) -> bool {
        self.access.intersects(
            vk::AccessFlags2::SHADER_WRITE
                | vk::AccessFlags2::SHADER_STORAGE_WRITE
                | vk::AccessFlags2::TRANSFER_WRITE
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::MEMORY_WRITE
                | vk::AccessFlags2::HOST_WRITE
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        )
    }
}

/// Interior mutable state cell owned by a buffer or an image.
#[derive(Debug)]
pub struct TrackedState {
    inner: Mutex<ResourceState>,
}

impl TrackedState {
    pub fn new(state: ResourceState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    pub fn get(&self) -> ResourceState {
        *self.lock()
    }

    /// Records the transition and returns the state it replaced.
    pub fn replace(&self, state: ResourceState) -> ResourceState {
        std::mem::replace(&mut *self.lock(), state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResourceState> {
        // A poisoned lock still holds a valid state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_returns_previous_state() {
        let state = TrackedState::new(ResourceState::UNDEFINED);
        let general = ResourceState::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_WRITE,
            vk::ImageLayout::GENERAL,
        );

        assert_eq!(state.replace(general), ResourceState::UNDEFINED);
        assert_eq!(state.get(), general);
        assert!(general.is_write());
    }
}
