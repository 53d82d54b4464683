use ash::vk;

use super::resources::{lookup, Registry};
use super::NativeShared;
use crate::vulkan::command_buffer::{Command, CommandList, PipelineBarrier};
use crate::vulkan::device::BufferId;
use crate::vulkan::error::DeviceError;

fn subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

impl NativeShared {
    /// Resets `command_buffer` and translates the list into it.
    pub(super) fn record(
        &self,
        registry: &Registry,
        command_buffer: vk::CommandBuffer,
        commands: &CommandList,
        usage: vk::CommandBufferUsageFlags,
    ) -> Result<(), DeviceError> {
        let device = self.device();
        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;

        for command in commands.commands() {
            self.record_command(registry, command_buffer, command)?;
        }

        unsafe { device.end_command_buffer(command_buffer) }?;
        Ok(())
    }

    fn record_command(
        &self,
        registry: &Registry,
        cb: vk::CommandBuffer,
        command: &Command,
    ) -> Result<(), DeviceError> {
        let device = self.device();
        let buffer = |id: BufferId| lookup(&registry.buffers, id, "buffer").map(|b| b.buffer);
        match command {
            Command::BindPipeline {
                bind_point,
                pipeline,
            } => {
                let pipeline = lookup(&registry.pipelines, *pipeline, "pipeline")?.pipeline;
                unsafe { device.cmd_bind_pipeline(cb, *bind_point, pipeline) };
            }
            Command::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
            } => {
                let layout = *lookup(&registry.pipeline_layouts, *layout, "pipeline layout")?;
                let sets = sets
                    .iter()
                    .map(|&set| lookup(&registry.sets, set, "descriptor set").map(|s| s.set))
                    .collect::<Result<Vec<_>, _>>()?;
                unsafe {
                    device.cmd_bind_descriptor_sets(cb, *bind_point, layout, *first_set, &sets, &[])
                };
            }
            Command::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => {
                let layout = *lookup(&registry.pipeline_layouts, *layout, "pipeline layout")?;
                unsafe { device.cmd_push_constants(cb, layout, *stages, *offset, data) };
            }
            Command::BindVertexBuffers {
                first_binding,
                buffers,
            } => {
                let raw = buffers
                    .iter()
                    .map(|&(id, _)| buffer(id))
                    .collect::<Result<Vec<_>, _>>()?;
                let offsets: Vec<_> = buffers.iter().map(|&(_, offset)| offset).collect();
                unsafe { device.cmd_bind_vertex_buffers(cb, *first_binding, &raw, &offsets) };
            }
            Command::BindIndexBuffer {
                buffer: id,
                offset,
                index_type,
            } => {
                let raw = buffer(*id)?;
                unsafe { device.cmd_bind_index_buffer(cb, raw, *offset, *index_type) };
            }
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                render_area,
                clear_color,
            } => {
                let render_pass = *lookup(&registry.render_passes, *render_pass, "render pass")?;
                let framebuffer = *lookup(&registry.framebuffers, *framebuffer, "framebuffer")?;
                let clear_values = [vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: *clear_color,
                    },
                }];
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(*render_area)
                    .clear_values(&clear_values);
                unsafe {
                    device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE)
                };
            }
            Command::EndRenderPass => unsafe { device.cmd_end_render_pass(cb) },
            Command::SetViewport(viewport) => unsafe {
                device.cmd_set_viewport(cb, 0, std::slice::from_ref(viewport))
            },
            Command::SetScissor(scissor) => unsafe {
                device.cmd_set_scissor(cb, 0, std::slice::from_ref(scissor))
            },
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                device.cmd_draw(
                    cb,
                    *vertex_count,
                    *instance_count,
                    *first_vertex,
                    *first_instance,
                )
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => unsafe {
                device.cmd_draw_indexed(
                    cb,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                )
            },
            Command::Dispatch { group_count } => unsafe {
                device.cmd_dispatch(cb, group_count[0], group_count[1], group_count[2])
            },
            Command::TraceRays { sbt, extent } => {
                let raytracing = self.raytracing()?;
                unsafe {
                    raytracing.ray_tracing_pipeline.cmd_trace_rays(
                        cb,
                        &sbt.raygen,
                        &sbt.miss,
                        &sbt.hit,
                        &sbt.callable,
                        extent[0],
                        extent[1],
                        extent[2],
                    )
                };
            }
            Command::PipelineBarrier(barrier) => self.record_barrier(registry, cb, barrier)?,
            Command::CopyBuffer { src, dst, regions } => {
                let (src, dst) = (buffer(*src)?, buffer(*dst)?);
                unsafe { device.cmd_copy_buffer(cb, src, dst, regions) };
            }
            Command::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                offset,
                extent,
            } => {
                let src = buffer(*src)?;
                let dst = lookup(&registry.images, *dst, "image")?.image;
                let region = vk::BufferImageCopy::builder()
                    .image_subresource(subresource_layers())
                    .image_offset(vk::Offset3D {
                        x: offset.x,
                        y: offset.y,
                        z: 0,
                    })
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .build();
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cb,
                        src,
                        dst,
                        *dst_layout,
                        std::slice::from_ref(&region),
                    )
                };
            }
            Command::CopyImageToBuffer {
                src,
                src_layout,
                dst,
                extent,
            } => {
                let src = lookup(&registry.images, *src, "image")?.image;
                let dst = buffer(*dst)?;
                let region = vk::BufferImageCopy::builder()
                    .image_subresource(subresource_layers())
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .build();
                unsafe {
                    device.cmd_copy_image_to_buffer(
                        cb,
                        src,
                        *src_layout,
                        dst,
                        std::slice::from_ref(&region),
                    )
                };
            }
            Command::BlitImage {
                src,
                src_layout,
                src_extent,
                dst,
                dst_layout,
                dst_extent,
                filter,
            } => {
                let src = lookup(&registry.images, *src, "image")?.image;
                let dst = lookup(&registry.images, *dst, "image")?.image;
                let region = vk::ImageBlit {
                    src_subresource: subresource_layers(),
                    src_offsets: [vk::Offset3D::default(), corner(*src_extent)],
                    dst_subresource: subresource_layers(),
                    dst_offsets: [vk::Offset3D::default(), corner(*dst_extent)],
                };
                unsafe {
                    device.cmd_blit_image(
                        cb,
                        src,
                        *src_layout,
                        dst,
                        *dst_layout,
                        std::slice::from_ref(&region),
                        *filter,
                    )
                };
            }
            Command::FillBuffer {
                buffer: id,
                offset,
                size,
                data,
            } => {
                let raw = buffer(*id)?;
                unsafe { device.cmd_fill_buffer(cb, raw, *offset, *size, *data) };
            }
            Command::BuildBottomLevel { structure } => {
                self.record_bottom_level_build(registry, cb, *structure)?
            }
            Command::BuildTopLevel {
                structure,
                instances,
                instance_count,
            } => self.record_top_level_build(registry, cb, *structure, *instances, *instance_count)?,
        }
        Ok(())
    }

    fn record_barrier(
        &self,
        registry: &Registry,
        cb: vk::CommandBuffer,
        barrier: &PipelineBarrier,
    ) -> Result<(), DeviceError> {
        let memory_barriers: Vec<_> = barrier
            .memory_barriers
            .iter()
            .map(|v| {
                vk::MemoryBarrier2::builder()
                    .src_stage_mask(v.src_stage_mask)
                    .src_access_mask(v.src_access_mask)
                    .dst_stage_mask(v.dst_stage_mask)
                    .dst_access_mask(v.dst_access_mask)
                    .build()
            })
            .collect();

        let buffer_memory_barriers = barrier
            .buffer_memory_barriers
            .iter()
            .map(|v| {
                let buffer = lookup(&registry.buffers, v.buffer, "buffer")?.buffer;
                Ok(vk::BufferMemoryBarrier2::builder()
                    .src_stage_mask(v.src_stage_mask)
                    .src_access_mask(v.src_access_mask)
                    .dst_stage_mask(v.dst_stage_mask)
                    .dst_access_mask(v.dst_access_mask)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer)
                    .offset(v.offset)
                    .size(v.size)
                    .build())
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        let image_memory_barriers = barrier
            .image_memory_barriers
            .iter()
            .map(|v| {
                let image = lookup(&registry.images, v.image, "image")?.image;
                Ok(vk::ImageMemoryBarrier2::builder()
                    .src_stage_mask(v.src_stage_mask)
                    .src_access_mask(v.src_access_mask)
                    .dst_stage_mask(v.dst_stage_mask)
                    .dst_access_mask(v.dst_access_mask)
                    .old_layout(v.old_layout)
                    .new_layout(v.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(v.subresource_range)
                    .build())
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        let dependency_info = vk::DependencyInfo::builder()
            .dependency_flags(barrier.dependency_flags)
            .memory_barriers(&memory_barriers)
            .buffer_memory_barriers(&buffer_memory_barriers)
            .image_memory_barriers(&image_memory_barriers);

        unsafe {
            self.context
                .synchronisation2_loader
                .cmd_pipeline_barrier2(cb, &dependency_info)
        };
        Ok(())
    }
}
