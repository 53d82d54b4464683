mod commands;
mod sync_commands;
pub use commands::*;
pub use sync_commands::*;

use ash::vk;
use bytemuck::Pod;

use super::buffer::{Buffer, IndexElement};
use super::descriptor_set::DescriptorSet;
use super::device::{FramebufferId, ImageId, RenderPassId};
use super::image::Image;
use super::pipeline::{Pipeline, PipelineLayout, ShaderBindingTable};
use super::resource_state::ResourceState;

/// The builder handed to every recording function.
///
/// Recording is infallible and has no side effects on the device. The only state it touches
/// is the tracked access state of buffers and images, which every recorded barrier moves
/// forward, so the state a barrier starts from is always the one the previous barrier left.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    commands: Vec<Command>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn finish(self) -> CommandList {
        CommandList::new(self.commands)
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn bind_pipeline(&mut self, pipeline: &impl Pipeline) -> &mut Self {
        self.push(Command::BindPipeline {
            bind_point: pipeline.bind_point(),
            pipeline: pipeline.id(),
        })
    }

    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[&DescriptorSet],
    ) -> &mut Self {
        self.push(Command::BindDescriptorSets {
            bind_point,
            layout: layout.id(),
            first_set,
            sets: sets.iter().map(|set| set.id()).collect(),
        })
    }

    pub fn push_constants<T: Pod>(
        &mut self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: &T,
    ) -> &mut Self {
        self.push(Command::PushConstants {
            layout: layout.id(),
            stages,
            offset,
            data: bytemuck::bytes_of(value).to_vec(),
        })
    }

    pub fn bind_vertex_buffer<T>(&mut self, binding: u32, buffer: &Buffer<T>) -> &mut Self {
        self.push(Command::BindVertexBuffers {
            first_binding: binding,
            buffers: vec![(buffer.id(), 0)],
        })
    }

    pub fn bind_index_buffer<T: IndexElement>(&mut self, buffer: &Buffer<T>) -> &mut Self {
        self.push(Command::BindIndexBuffer {
            buffer: buffer.id(),
            offset: 0,
            index_type: T::INDEX_TYPE,
        })
    }

    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
        render_area: vk::Rect2D,
        clear_color: [f32; 4],
    ) -> &mut Self {
        self.push(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            render_area,
            clear_color,
        })
    }

    pub fn end_render_pass(&mut self) -> &mut Self {
        self.push(Command::EndRenderPass)
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) -> &mut Self {
        self.push(Command::SetViewport(viewport))
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) -> &mut Self {
        self.push(Command::SetScissor(scissor))
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> &mut Self {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> &mut Self {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        })
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> &mut Self {
        self.push(Command::Dispatch {
            group_count: [x, y, z],
        })
    }

    /// Launches `width * height * depth` independent rays through the table.
    pub fn trace_rays(
        &mut self,
        sbt: &ShaderBindingTable,
        width: u32,
        height: u32,
        depth: u32,
    ) -> &mut Self {
        self.push(Command::TraceRays {
            sbt: sbt.regions(),
            extent: [width, height, depth],
        })
    }

    /// Copies as many bytes as fit into `dst`.
    pub fn copy_buffer<T>(&mut self, src: &Buffer<T>, dst: &Buffer<T>) -> &mut Self {
        let size = src.size_bytes().min(dst.size_bytes());
        self.push(Command::CopyBuffer {
            src: src.id(),
            dst: dst.id(),
            regions: vec![vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        })
    }

    pub fn copy_buffer_to_image<T>(
        &mut self,
        src: &Buffer<T>,
        dst: &Image,
        dst_layout: vk::ImageLayout,
        offset: vk::Offset2D,
        extent: vk::Extent2D,
    ) -> &mut Self {
        self.push(Command::CopyBufferToImage {
            src: src.id(),
            dst: dst.id(),
            dst_layout,
            offset,
            extent,
        })
    }

    pub fn copy_image_to_buffer<T>(
        &mut self,
        src: &Image,
        src_layout: vk::ImageLayout,
        dst: &Buffer<T>,
    ) -> &mut Self {
        self.push(Command::CopyImageToBuffer {
            src: src.id(),
            src_layout,
            dst: dst.id(),
            extent: src.extent(),
        })
    }

    pub fn blit_image(
        &mut self,
        src: &Image,
        src_layout: vk::ImageLayout,
        dst: ImageId,
        dst_layout: vk::ImageLayout,
        dst_extent: vk::Extent2D,
    ) -> &mut Self {
        self.push(Command::BlitImage {
            src: src.id(),
            src_layout,
            src_extent: src.extent(),
            dst,
            dst_layout,
            dst_extent,
            filter: vk::Filter::NEAREST,
        })
    }

    pub fn fill_buffer<T>(&mut self, buffer: &Buffer<T>, data: u32) -> &mut Self {
        self.push(Command::FillBuffer {
            buffer: buffer.id(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            data,
        })
    }

    pub fn pipeline_barrier(&mut self, barrier: PipelineBarrier) -> &mut Self {
        self.push(Command::PipelineBarrier(barrier))
    }

    /// Stage k+1 of a compute chain may only start after this.
    pub fn compute_barrier(&mut self) -> &mut Self {
        self.pipeline_barrier(PipelineBarrier::compute_to_compute())
    }

    pub fn full_barrier(&mut self) -> &mut Self {
        self.pipeline_barrier(PipelineBarrier::full())
    }

    pub fn memory_barrier(
        &mut self,
        src_stage_mask: vk::PipelineStageFlags2,
        src_access_mask: vk::AccessFlags2,
        dst_stage_mask: vk::PipelineStageFlags2,
        dst_access_mask: vk::AccessFlags2,
    ) -> &mut Self {
        self.pipeline_barrier(PipelineBarrier {
            memory_barriers: vec![MemoryBarrier {
                src_stage_mask,
                src_access_mask,
                dst_stage_mask,
                dst_access_mask,
            }],
            ..Default::default()
        })
    }

    /// Declares the buffer's next access. The previous access is taken from the buffer.
    pub fn buffer_barrier<T>(
        &mut self,
        buffer: &Buffer<T>,
        dst_stage_mask: vk::PipelineStageFlags2,
        dst_access_mask: vk::AccessFlags2,
    ) -> &mut Self {
        let previous = buffer.state().replace(ResourceState::new(
            dst_stage_mask,
            dst_access_mask,
            vk::ImageLayout::UNDEFINED,
        ));
        self.pipeline_barrier(PipelineBarrier {
            buffer_memory_barriers: vec![BufferMemoryBarrier {
                src_stage_mask: previous.stage,
                src_access_mask: previous.access,
                dst_stage_mask,
                dst_access_mask,
                buffer: buffer.id(),
                offset: 0,
                size: vk::WHOLE_SIZE,
            }],
            ..Default::default()
        })
    }

    /// A fully declared image barrier. The image's tracked state becomes the destination state.
    pub fn image_barrier(&mut self, image: &Image, transition: ImageTransition) -> &mut Self {
        image.state().replace(ResourceState::new(
            transition.dst_stage_mask,
            transition.dst_access_mask,
            transition.new_layout,
        ));
        self.pipeline_barrier(PipelineBarrier {
            image_memory_barriers: vec![transition.for_image(image.id())],
            ..Default::default()
        })
    }

    /// Moves the image from its tracked state into `to`.
    pub fn transition_image(&mut self, image: &Image, to: ResourceState) -> &mut Self {
        let from = image.state().get();
        self.image_barrier(image, ImageTransition::new(from, to))
    }

    /// Barrier on an image this crate does not own, such as a swapchain image.
    pub fn external_image_barrier(
        &mut self,
        image: ImageId,
        transition: ImageTransition,
    ) -> &mut Self {
        self.pipeline_barrier(PipelineBarrier {
            image_memory_barriers: vec![transition.for_image(image)],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_keeps_command_order() {
        let mut recorder = CommandRecorder::new();
        recorder
            .dispatch(4, 1, 1)
            .compute_barrier()
            .dispatch(2, 2, 1)
            .full_barrier();

        let list = recorder.finish();
        assert_eq!(
            list.names(),
            ["dispatch", "pipeline_barrier", "dispatch", "pipeline_barrier"]
        );
        match &list.commands()[1] {
            Command::PipelineBarrier(barrier) => {
                assert_eq!(barrier.src_stages(), vk::PipelineStageFlags2::COMPUTE_SHADER)
            }
            other => panic!("expected a barrier, got {other:?}"),
        }
    }

    #[test]
    fn external_barrier_does_not_need_an_owned_image() {
        let mut recorder = CommandRecorder::new();
        recorder.external_image_barrier(
            ImageId(7),
            ImageTransition::new(
                ResourceState::UNDEFINED,
                ResourceState::new(
                    vk::PipelineStageFlags2::TRANSFER,
                    vk::AccessFlags2::TRANSFER_WRITE,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ),
            ),
        );
        let list = recorder.finish();
        let Command::PipelineBarrier(barrier) = &list.commands()[0] else {
            panic!("expected a barrier");
        };
        assert_eq!(barrier.image_memory_barriers[0].image, ImageId(7));
        assert_eq!(
            barrier.image_memory_barriers[0].new_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
    }
}
