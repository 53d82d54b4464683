use std::sync::Arc;

use ash::vk;

use super::command_buffer::{CommandList, CommandRecorder};
use super::context::{Context, SurfaceFrame, SwapchainIndex};
use super::device::{CommandBufferId, FenceId, QueueKind, SubmitInfo};
use super::error::DeviceError;

/// Device failures at submission time cannot be handled by the caller.
pub(crate) fn check<T>(result: Result<T, DeviceError>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::error!("{what}: {err}");
            std::process::abort();
        }
    }
}

struct FrameSlot {
    command_buffer: CommandBufferId,
    /// Signaled once the last submission of `command_buffer` finished.
    fence: FenceId,
    recorded: CommandList,
}

/// One command buffer per frame in flight, replayed by explicit frame index.
pub struct Pass {
    queue: QueueKind,
    frames: Vec<FrameSlot>,
    context: Arc<Context>,
}

impl Pass {
    pub fn new(
        context: Arc<Context>,
        queue: QueueKind,
        frame_count: usize,
    ) -> Result<Self, DeviceError> {
        let device = context.device();
        let frames = (0..frame_count)
            .map(|_| {
                Ok(FrameSlot {
                    command_buffer: device.create_command_buffer(queue)?,
                    fence: device.create_fence(true)?,
                    recorded: CommandList::default(),
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        Ok(Self {
            queue,
            frames,
            context,
        })
    }

    /// A graphics pass with one buffer per surface image.
    pub fn for_surface(context: Arc<Context>) -> Result<Self, DeviceError> {
        let frame_count = context.surface().image_count();
        Self::new(context, QueueKind::Graphics, frame_count)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Records every frame's buffer once. They are replayed unchanged by [`Pass::render`].
    pub fn record_all_commands(
        &mut self,
        mut record: impl FnMut(&mut CommandRecorder, SwapchainIndex),
    ) {
        for index in 0..self.frames.len() {
            let mut recorder = CommandRecorder::new();
            record(&mut recorder, SwapchainIndex::new(index));
            self.store(
                index,
                recorder.finish(),
                vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            );
        }
    }

    /// Re-records only the buffer of `frame`, right before it gets submitted.
    pub fn record_current_command(
        &mut self,
        frame: SwapchainIndex,
        record: impl FnOnce(&mut CommandRecorder),
    ) {
        let mut recorder = CommandRecorder::new();
        record(&mut recorder);
        self.store(
            frame.get(),
            recorder.finish(),
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        );
    }

    fn store(&mut self, index: usize, commands: CommandList, usage: vk::CommandBufferUsageFlags) {
        let device = self.context.device();
        let slot = &mut self.frames[index];
        check(
            device.wait_for_fence(slot.fence),
            "Could not wait for the frame fence",
        );
        check(
            device.record_command_buffer(slot.command_buffer, &commands, usage),
            "Could not record command buffer",
        );
        slot.recorded = commands;
    }

    /// Blocks until the previous submission of `frame` is done. Host writes to per-frame
    /// resources are safe afterwards.
    pub fn wait_frame(&self, frame: SwapchainIndex) {
        let slot = &self.frames[frame.get()];
        check(
            self.context.device().wait_for_fence(slot.fence),
            "Could not wait for the frame fence",
        );
    }

    /// Submits the buffer of `frame`. Does not wait for it.
    pub fn render(&mut self, frame: &SurfaceFrame) {
        let device = self.context.device();
        let slot = &self.frames[frame.index.get()];
        check(
            device.wait_for_fence(slot.fence),
            "Could not wait for the frame fence",
        );
        check(device.reset_fence(slot.fence), "Could not reset fence");

        let info = SubmitInfo {
            wait_semaphore: frame
                .image_available
                .map(|semaphore| (semaphore, vk::PipelineStageFlags::ALL_COMMANDS)),
            signal_semaphore: frame.render_finished,
            fence: Some(slot.fence),
        };
        check(
            device.submit(self.queue, slot.command_buffer, &info),
            "Could not submit to queue",
        );
    }

    pub fn recorded(&self, frame: SwapchainIndex) -> &CommandList {
        &self.frames[frame.get()].recorded
    }

    /// Waits for every frame in flight.
    pub fn wait(&self) {
        for slot in &self.frames {
            check(
                self.context.device().wait_for_fence(slot.fence),
                "Could not wait for the frame fence",
            );
        }
    }
}

impl Drop for Pass {
    fn drop(&mut self) {
        let device = self.context.device();
        for slot in &self.frames {
            if let Err(err) = device.wait_for_fence(slot.fence) {
                log::warn!("Dropping a pass that could still be in flight: {err}");
            }
            device.destroy_command_buffer(slot.command_buffer);
            device.destroy_fence(slot.fence);
        }
    }
}

/// A single reusable command buffer whose submissions are waited on.
pub struct ImmediatePass {
    queue: QueueKind,
    command_buffer: CommandBufferId,
    fence: FenceId,
    recorded: Option<CommandList>,
    context: Arc<Context>,
}

impl ImmediatePass {
    pub fn new(context: Arc<Context>, queue: QueueKind) -> Result<Self, DeviceError> {
        let device = context.device();
        let command_buffer = device.create_command_buffer(queue)?;
        let fence = device.create_fence(false)?;
        Ok(Self {
            queue,
            command_buffer,
            fence,
            recorded: None,
            context,
        })
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Records a buffer that can be submitted any number of times.
    pub fn record(&mut self, record: impl FnOnce(&mut CommandRecorder)) {
        let mut recorder = CommandRecorder::new();
        record(&mut recorder);
        let commands = recorder.finish();
        check(
            self.context.device().record_command_buffer(
                self.command_buffer,
                &commands,
                vk::CommandBufferUsageFlags::empty(),
            ),
            "Could not record command buffer",
        );
        self.recorded = Some(commands);
    }

    /// Submits without waiting. The caller waits for the queue before resubmitting.
    pub fn submit(&mut self) {
        check(
            self.context.device().submit(
                self.queue,
                self.command_buffer,
                &SubmitInfo::default(),
            ),
            "Could not submit to queue",
        );
    }

    /// Blocks until the queue this pass submits to is idle.
    pub fn wait_queue_idle(&self) {
        check(
            self.context.device().queue_wait_idle(self.queue),
            "Could not wait for queue idle",
        );
    }

    /// Submits the recorded buffer and blocks until the device has executed it.
    pub fn submit_and_wait(&mut self) {
        let device = self.context.device();
        let info = SubmitInfo {
            fence: Some(self.fence),
            ..Default::default()
        };
        check(
            device.submit(self.queue, self.command_buffer, &info),
            "Could not submit to queue",
        );
        check(
            device.wait_for_fence(self.fence),
            "Could not wait for the immediate fence",
        );
        check(device.reset_fence(self.fence), "Could not reset fence");
    }

    /// Records, submits and waits. Everything the commands wrote is usable when this returns.
    pub fn execute_immediately(&mut self, record: impl FnOnce(&mut CommandRecorder)) {
        let mut recorder = CommandRecorder::new();
        record(&mut recorder);
        let commands = recorder.finish();
        check(
            self.context.device().record_command_buffer(
                self.command_buffer,
                &commands,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ),
            "Could not record command buffer",
        );
        self.recorded = Some(commands);
        self.submit_and_wait();
    }

    pub fn recorded(&self) -> Option<&CommandList> {
        self.recorded.as_ref()
    }
}

impl Drop for ImmediatePass {
    fn drop(&mut self) {
        let device = self.context.device();
        device.destroy_command_buffer(self.command_buffer);
        device.destroy_fence(self.fence);
    }
}
