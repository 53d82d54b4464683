use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use super::{Scene, SceneError};
use crate::input_map::InputSource;
use crate::time::Time;
use crate::vulkan::device::BlendMode;
use crate::vulkan::{
    Buffer, Context, DescriptorSet, DescriptorTable, Image, ImmediatePass, MemoryLocation, Pass,
    PipelineLayout, QueueKind, RasterPipeline, RasterPipelineBuilder, ResourceState, Sampler,
    SurfaceFrame,
};

pub const FONT_SLOT: u32 = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct OverlayVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [u8; 4],
}

impl From<&egui::epaint::Vertex> for OverlayVertex {
    fn from(vertex: &egui::epaint::Vertex) -> Self {
        Self {
            position: [vertex.pos.x, vertex.pos.y],
            uv: [vertex.uv.x, vertex.uv.y],
            color: vertex.color.to_array(),
        }
    }
}

/// One draw of the overlay, into the shared per-frame vertex and index buffers.
#[derive(Debug, Clone, Copy)]
struct MeshDraw {
    clip: vk::Rect2D,
    first_index: u32,
    index_count: u32,
    vertex_offset: i32,
}

/// Host visible geometry of one frame in flight.
struct FrameGeometry {
    vertices: Buffer<OverlayVertex>,
    indices: Buffer<u32>,
}

impl FrameGeometry {
    fn new(
        context: &Arc<Context>,
        vertex_capacity: usize,
        index_capacity: usize,
    ) -> Result<Self, SceneError> {
        Ok(Self {
            vertices: Buffer::new(
                context.clone(),
                "Overlay Vertices",
                vertex_capacity,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                MemoryLocation::CpuToGpu,
            )?,
            indices: Buffer::new(
                context.clone(),
                "Overlay Indices",
                index_capacity,
                vk::BufferUsageFlags::INDEX_BUFFER,
                MemoryLocation::CpuToGpu,
            )?,
        })
    }
}

fn shader_read() -> ResourceState {
    ResourceState::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
}

fn transfer_write() -> ResourceState {
    ResourceState::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )
}

fn clip_to_scissor(clip: egui::Rect, extent: vk::Extent2D) -> vk::Rect2D {
    let min_x = clip.min.x.clamp(0.0, extent.width as f32);
    let min_y = clip.min.y.clamp(0.0, extent.height as f32);
    let max_x = clip.max.x.clamp(min_x, extent.width as f32);
    let max_y = clip.max.y.clamp(min_y, extent.height as f32);
    vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x.round() as i32,
            y: min_y.round() as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x).round() as u32,
            height: (max_y - min_y).round() as u32,
        },
    }
}

/// An egui window with frame statistics. The geometry changes every frame, so each frame's
/// command buffer is recorded right before it is submitted.
pub struct OverlayScene {
    pass: Pass,
    pipeline: RasterPipeline,
    layout: PipelineLayout,
    descriptor_set: DescriptorSet,
    _descriptor_table: DescriptorTable,
    frames: Vec<Option<FrameGeometry>>,
    font_texture: Image,
    sampler: Sampler,
    upload_pass: ImmediatePass,
    egui: egui::Context,
    draws: Vec<MeshDraw>,
    vertices: Vec<OverlayVertex>,
    indices: Vec<u32>,
    font_uploads: u64,
    context: Arc<Context>,
}

impl OverlayScene {
    pub fn new(context: &Arc<Context>) -> Result<Self, SceneError> {
        let surface = context.surface();
        let egui = egui::Context::default();

        // The first run hands out the font atlas
        let output = egui.run(Self::raw_input(surface.extent(), 0.0), |_| {});
        let font = output
            .textures_delta
            .set
            .iter()
            .find_map(|(id, delta)| match &delta.image {
                egui::ImageData::Font(font) if *id == egui::TextureId::default() => Some(font),
                _ => None,
            })
            .ok_or(SceneError::MissingFontAtlas)?;
        let font_texture = Image::new_device_local(
            context.clone(),
            "Overlay Font",
            vk::Extent2D {
                width: font.size[0] as u32,
                height: font.size[1] as u32,
            },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        let mut upload_pass = ImmediatePass::new(context.clone(), QueueKind::Graphics)?;
        Self::upload_font(context, &mut upload_pass, &font_texture, font, [0, 0])?;

        let sampler = Sampler::linear(context.clone())?;
        let mut descriptor_table = DescriptorTable::new(context.clone());
        descriptor_table.add_layout_binding(
            FONT_SLOT,
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )?;
        let mut descriptor_set = descriptor_table.allocate_descriptor_set()?;
        descriptor_set
            .write_image(
                FONT_SLOT,
                &font_texture,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                Some(&sampler),
            )
            .update()?;

        let layout = PipelineLayout::new(
            context.clone(),
            &[descriptor_table.layout()?],
            &[vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<[f32; 2]>() as u32,
            }],
        )?;
        let vertex_shader = context.load_shader("overlay.vert", vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader =
            context.load_shader("overlay.frag", vk::ShaderStageFlags::FRAGMENT)?;
        let pipeline = RasterPipelineBuilder::new(&vertex_shader, &fragment_shader)
            .extent(surface.extent())
            .blend(BlendMode::PremultipliedAlpha)
            .vertex_binding(0, std::mem::size_of::<OverlayVertex>() as u32)
            .vertex_attribute(0, 0, vk::Format::R32G32_SFLOAT, 0)
            .vertex_attribute(1, 0, vk::Format::R32G32_SFLOAT, 8)
            .vertex_attribute(2, 0, vk::Format::R8G8B8A8_UNORM, 16)
            .build(context.clone(), &layout, surface.default_render_pass())?;

        let pass = Pass::for_surface(context.clone())?;
        let frames = (0..pass.frame_count()).map(|_| None).collect();

        Ok(Self {
            pass,
            pipeline,
            layout,
            descriptor_set,
            _descriptor_table: descriptor_table,
            frames,
            font_texture,
            sampler,
            upload_pass,
            egui,
            draws: Vec::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            font_uploads: 1,
            context: context.clone(),
        })
    }

    fn raw_input(extent: vk::Extent2D, time: f64) -> egui::RawInput {
        egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(
                egui::Pos2::ZERO,
                egui::vec2(extent.width as f32, extent.height as f32),
            )),
            time: Some(time),
            ..Default::default()
        }
    }

    /// Copies (part of) the font atlas through a staging buffer and waits for it.
    fn upload_font(
        context: &Arc<Context>,
        pass: &mut ImmediatePass,
        texture: &Image,
        font: &egui::FontImage,
        position: [usize; 2],
    ) -> Result<(), SceneError> {
        let pixels: Vec<[u8; 4]> = font
            .srgba_pixels(None)
            .map(|color| color.to_array())
            .collect();
        let staging = Buffer::<[u8; 4]>::new_staging(context.clone(), "Font Staging", pixels.len())?;
        staging.fill_whole(&pixels)?;

        pass.execute_immediately(|cmd| {
            cmd.transition_image(texture, transfer_write())
                .copy_buffer_to_image(
                    &staging,
                    texture,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::Offset2D {
                        x: position[0] as i32,
                        y: position[1] as i32,
                    },
                    vk::Extent2D {
                        width: font.size[0] as u32,
                        height: font.size[1] as u32,
                    },
                )
                .transition_image(texture, shader_read());
        });
        Ok(())
    }

    /// Applies the font atlas changes of one egui frame.
    fn update_textures(&mut self, delta: &egui::TexturesDelta) -> Result<(), SceneError> {
        for (id, image_delta) in &delta.set {
            let egui::ImageData::Font(font) = &image_delta.image else {
                continue;
            };
            if *id != egui::TextureId::default() {
                continue;
            }
            let position = image_delta.pos.unwrap_or([0, 0]);
            let extent = self.font_texture.extent();
            let fits = position[0] + font.size[0] <= extent.width as usize
                && position[1] + font.size[1] <= extent.height as usize;

            // The texture is sampled by frames in flight
            self.pass.wait();
            if !fits {
                self.font_texture = Image::new_device_local(
                    self.context.clone(),
                    "Overlay Font",
                    vk::Extent2D {
                        width: font.size[0] as u32,
                        height: font.size[1] as u32,
                    },
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                )?;
                self.descriptor_set
                    .write_image(
                        FONT_SLOT,
                        &self.font_texture,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        Some(&self.sampler),
                    )
                    .update()?;
            }
            Self::upload_font(
                &self.context,
                &mut self.upload_pass,
                &self.font_texture,
                font,
                position,
            )?;
            self.font_uploads += 1;
        }
        Ok(())
    }

    fn build_ui(ctx: &egui::Context, time: &Time) {
        let frame_time = time.delta_seconds();
        egui::Window::new("Frame Time").show(ctx, |ui| {
            ui.label(format!("{:.2} ms", frame_time * 1000.0));
            if frame_time > 0.0 {
                ui.label(format!("{:.0} fps", 1.0 / frame_time));
            }
            ui.label(format!("Running for {:.1} s", time.elapsed_seconds()));
            ui.separator();
            ui.label("Tab switches the scene, Escape quits");
        });
    }

    /// Flattens the tessellated meshes into one vertex and one index list.
    fn collect_meshes(&mut self, primitives: Vec<egui::ClippedPrimitive>) {
        self.draws.clear();
        self.vertices.clear();
        self.indices.clear();
        let extent = self.context.surface().extent();
        for primitive in primitives {
            let egui::epaint::Primitive::Mesh(mesh) = primitive.primitive else {
                continue;
            };
            if mesh.indices.is_empty() {
                continue;
            }
            self.draws.push(MeshDraw {
                clip: clip_to_scissor(primitive.clip_rect, extent),
                first_index: self.indices.len() as u32,
                index_count: mesh.indices.len() as u32,
                vertex_offset: self.vertices.len() as i32,
            });
            self.vertices
                .extend(mesh.vertices.iter().map(OverlayVertex::from));
            self.indices.extend_from_slice(&mesh.indices);
        }
    }

    /// Writes this frame's geometry, growing its buffers when they are too small.
    fn upload_geometry(&mut self, frame: usize) -> Result<(), SceneError> {
        let slot = &mut self.frames[frame];
        let too_small = slot.as_ref().map_or(true, |geometry| {
            geometry.vertices.len() < self.vertices.len()
                || geometry.indices.len() < self.indices.len()
        });
        if too_small {
            *slot = Some(FrameGeometry::new(
                &self.context,
                self.vertices.len().next_power_of_two().max(1024),
                self.indices.len().next_power_of_two().max(1024),
            )?);
        }
        if let Some(geometry) = slot {
            geometry.vertices.fill_whole(&self.vertices)?;
            geometry.indices.fill_whole(&self.indices)?;
        }
        Ok(())
    }

    pub fn font_texture(&self) -> &Image {
        &self.font_texture
    }

    pub fn font_uploads(&self) -> u64 {
        self.font_uploads
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    pub fn pass(&self) -> &Pass {
        &self.pass
    }
}

impl Scene for OverlayScene {
    fn update(&mut self, _input: &dyn InputSource, time: &Time) -> Result<(), SceneError> {
        let extent = self.context.surface().extent();
        let output = self.egui.run(
            Self::raw_input(extent, time.elapsed().as_secs_f64()),
            |ctx| Self::build_ui(ctx, time),
        );
        self.update_textures(&output.textures_delta)?;
        let primitives = self.egui.tessellate(output.shapes);
        self.collect_meshes(primitives);
        Ok(())
    }

    fn render(&mut self, frame: &SurfaceFrame) {
        let index = frame.index;
        self.pass.wait_frame(index);
        if let Err(err) = self.upload_geometry(index.get()) {
            log::error!("Could not upload the overlay geometry: {err}");
            return;
        }

        let surface = self.context.surface();
        let extent = surface.extent();
        let screen_size = [extent.width as f32, extent.height as f32];
        let Some(geometry) = &self.frames[index.get()] else {
            return;
        };
        let pipeline = &self.pipeline;
        let layout = &self.layout;
        let descriptor_set = &self.descriptor_set;
        let draws = &self.draws;
        self.pass.record_current_command(index, |cmd| {
            cmd.begin_render_pass(
                surface.default_render_pass(),
                surface.framebuffer(index),
                surface.render_area(),
                [0.1, 0.1, 0.1, 1.0],
            )
            .bind_pipeline(pipeline)
            .bind_descriptor_sets(
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[descriptor_set],
            )
            .push_constants(layout, vk::ShaderStageFlags::VERTEX, 0, &screen_size)
            .set_viewport(pipeline.viewport())
            .bind_vertex_buffer(0, &geometry.vertices)
            .bind_index_buffer(&geometry.indices);
            for draw in draws {
                cmd.set_scissor(draw.clip).draw_indexed(
                    draw.index_count,
                    1,
                    draw.first_index,
                    draw.vertex_offset,
                    0,
                );
            }
            cmd.end_render_pass();
        });
        self.pass.render(frame);
    }

    fn cleanup(&mut self) {
        self.pass.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_the_attributes() {
        assert_eq!(std::mem::size_of::<OverlayVertex>(), 20);
    }

    #[test]
    fn clip_rects_are_clamped_to_the_surface() {
        let extent = vk::Extent2D {
            width: 100,
            height: 50,
        };
        let scissor = clip_to_scissor(
            egui::Rect::from_min_max(egui::pos2(-10.0, 10.0), egui::pos2(150.0, 40.0)),
            extent,
        );
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 10 });
        assert_eq!(
            scissor.extent,
            vk::Extent2D {
                width: 100,
                height: 30
            }
        );
    }
}
