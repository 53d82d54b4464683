use ash::vk;

use super::sync_commands::PipelineBarrier;
use crate::vulkan::device::{
    AccelerationStructureId, BufferId, DescriptorSetId, FramebufferId, ImageId, PipelineId,
    PipelineLayoutId, RenderPassId, SbtRegions,
};

/// A single recorded GPU command. Resources are referenced by id, never owned.
#[derive(Debug, Clone)]
pub enum Command {
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: PipelineId,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: PipelineLayoutId,
        first_set: u32,
        sets: Vec<DescriptorSetId>,
    },
    PushConstants {
        layout: PipelineLayoutId,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<(BufferId, vk::DeviceSize)>,
    },
    BindIndexBuffer {
        buffer: BufferId,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    BeginRenderPass {
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
        render_area: vk::Rect2D,
        clear_color: [f32; 4],
    },
    EndRenderPass,
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        group_count: [u32; 3],
    },
    TraceRays {
        sbt: SbtRegions,
        extent: [u32; 3],
    },
    PipelineBarrier(PipelineBarrier),
    CopyBuffer {
        src: BufferId,
        dst: BufferId,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: BufferId,
        dst: ImageId,
        dst_layout: vk::ImageLayout,
        offset: vk::Offset2D,
        extent: vk::Extent2D,
    },
    CopyImageToBuffer {
        src: ImageId,
        src_layout: vk::ImageLayout,
        dst: BufferId,
        extent: vk::Extent2D,
    },
    BlitImage {
        src: ImageId,
        src_layout: vk::ImageLayout,
        src_extent: vk::Extent2D,
        dst: ImageId,
        dst_layout: vk::ImageLayout,
        dst_extent: vk::Extent2D,
        filter: vk::Filter,
    },
    FillBuffer {
        buffer: BufferId,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    },
    BuildBottomLevel {
        structure: AccelerationStructureId,
    },
    BuildTopLevel {
        structure: AccelerationStructureId,
        instances: BufferId,
        instance_count: u32,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::BindPipeline { .. } => "bind_pipeline",
            Command::BindDescriptorSets { .. } => "bind_descriptor_sets",
            Command::PushConstants { .. } => "push_constants",
            Command::BindVertexBuffers { .. } => "bind_vertex_buffers",
            Command::BindIndexBuffer { .. } => "bind_index_buffer",
            Command::BeginRenderPass { .. } => "begin_render_pass",
            Command::EndRenderPass => "end_render_pass",
            Command::SetViewport(_) => "set_viewport",
            Command::SetScissor(_) => "set_scissor",
            Command::Draw { .. } => "draw",
            Command::DrawIndexed { .. } => "draw_indexed",
            Command::Dispatch { .. } => "dispatch",
            Command::TraceRays { .. } => "trace_rays",
            Command::PipelineBarrier(_) => "pipeline_barrier",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::CopyBufferToImage { .. } => "copy_buffer_to_image",
            Command::CopyImageToBuffer { .. } => "copy_image_to_buffer",
            Command::BlitImage { .. } => "blit_image",
            Command::FillBuffer { .. } => "fill_buffer",
            Command::BuildBottomLevel { .. } => "build_bottom_level",
            Command::BuildTopLevel { .. } => "build_top_level",
        }
    }
}

/// A finished recording. Cheap to inspect, replayed by the device as often as needed.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub(crate) fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(Command::name).collect()
    }
}
