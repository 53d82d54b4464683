use std::ffi::CStr;

use ash::vk;

use super::resources::{lookup, BufferRecord, PipelineRecord};
use super::{locked, NativeShared};
use crate::vulkan::acceleration_structure::align_up;
use crate::vulkan::device::*;
use crate::vulkan::error::DeviceError;

fn entry_point() -> &'static CStr {
    unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") }
}

/// Where each group kind lives inside the shader binding table, relative to its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SbtLayout {
    handle_size: u64,
    handle_stride: u64,
    raygen_size: u64,
    miss: (u64, u64),
    hit: (u64, u64),
    callable: (u64, u64),
    total_size: u64,
}

impl SbtLayout {
    fn new(
        properties: &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,
        miss_count: u64,
        hit_count: u64,
        callable_count: u64,
    ) -> Self {
        let handle_size = properties.shader_group_handle_size as u64;
        let base_alignment = properties.shader_group_base_alignment as u64;
        let handle_stride = align_up(handle_size, properties.shader_group_handle_alignment as u64);

        // The raygen region is a single record whose size has to equal its stride
        let raygen_size = align_up(handle_stride, base_alignment);
        let region = |count: u64| align_up(count * handle_stride, base_alignment);

        let miss = (raygen_size, region(miss_count));
        let hit = (miss.0 + miss.1, region(hit_count));
        let callable = (hit.0 + hit.1, region(callable_count));
        Self {
            handle_size,
            handle_stride,
            raygen_size,
            miss,
            hit,
            callable,
            total_size: callable.0 + callable.1,
        }
    }

    fn regions(&self, base: vk::DeviceAddress) -> SbtRegions {
        let region = |(offset, size): (u64, u64)| vk::StridedDeviceAddressRegionKHR {
            device_address: if size == 0 { 0 } else { base + offset },
            stride: if size == 0 { 0 } else { self.handle_stride },
            size,
        };
        SbtRegions {
            raygen: vk::StridedDeviceAddressRegionKHR {
                device_address: base,
                stride: self.raygen_size,
                size: self.raygen_size,
            },
            miss: region(self.miss),
            hit: region(self.hit),
            callable: region(self.callable),
        }
    }

    /// Offset of every group handle, in group order.
    fn handle_offsets(&self, miss_count: u64, hit_count: u64, callable_count: u64) -> Vec<u64> {
        let within = |start: u64, count: u64| (0..count).map(move |i| start + i * self.handle_stride);
        std::iter::once(0)
            .chain(within(self.miss.0, miss_count))
            .chain(within(self.hit.0, hit_count))
            .chain(within(self.callable.0, callable_count))
            .collect()
    }
}

impl NativeShared {
    pub(super) fn insert_pipeline(&self, record: PipelineRecord) -> PipelineId {
        let mut registry = locked(&self.registry);
        let id = PipelineId(registry.next_id());
        registry.pipelines.insert(id, record);
        id
    }

    fn pipeline_layout(&self, layout: PipelineLayoutId) -> Result<vk::PipelineLayout, DeviceError> {
        let registry = locked(&self.registry);
        lookup(&registry.pipeline_layouts, layout, "pipeline layout").copied()
    }

    fn destroy_modules(&self, modules: &[vk::ShaderModule]) {
        for &module in modules {
            unsafe { self.device().destroy_shader_module(module, None) };
        }
    }

    pub(super) fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<PipelineRecord, DeviceError> {
        let layout = self.pipeline_layout(desc.layout)?;
        let module = self.shader_module(desc.shader)?;

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .module(module)
            .name(entry_point())
            .stage(vk::ShaderStageFlags::COMPUTE);
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(layout)
            .build();

        let pipelines = unsafe {
            self.device().create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        };
        self.destroy_modules(&[module]);

        let pipeline = pipelines.map_err(|(_, err)| err)?[0];
        Ok(PipelineRecord {
            pipeline,
            shader_binding_table: None,
        })
    }

    pub(super) fn create_raster_pipeline(
        &self,
        desc: &RasterPipelineDesc,
    ) -> Result<PipelineRecord, DeviceError> {
        let layout = self.pipeline_layout(desc.layout)?;
        let render_pass = {
            let registry = locked(&self.registry);
            *lookup(&registry.render_passes, desc.render_pass, "render pass")?
        };

        let vertex_module = self.shader_module(desc.vertex_shader)?;
        let fragment_module = match self.shader_module(desc.fragment_shader) {
            Ok(module) => module,
            Err(err) => {
                self.destroy_modules(&[vertex_module]);
                return Err(err);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .module(vertex_module)
                .name(entry_point())
                .stage(vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .module(fragment_module)
                .name(entry_point())
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];

        let vertex_input_state_create_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly_state_create_info = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(desc.primitive_restart);

        let viewport_state_create_info = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state_create_info = vk::PipelineRasterizationStateCreateInfo::builder()
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0)
            .polygon_mode(desc.polygon_mode);

        let multisample_state_create_info = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment_states = [match desc.blend {
            BlendMode::Opaque => vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::FALSE,
                color_write_mask: vk::ColorComponentFlags::RGBA,
                ..Default::default()
            },
            // Colors arrive already multiplied by their alpha
            BlendMode::PremultipliedAlpha => vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::TRUE,
                src_color_blend_factor: vk::BlendFactor::ONE,
                dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
                color_blend_op: vk::BlendOp::ADD,
                src_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_DST_ALPHA,
                dst_alpha_blend_factor: vk::BlendFactor::ONE,
                alpha_blend_op: vk::BlendOp::ADD,
                color_write_mask: vk::ColorComponentFlags::RGBA,
            },
        }];

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&color_blend_attachment_states);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state_create_info)
            .input_assembly_state(&input_assembly_state_create_info)
            .viewport_state(&viewport_state_create_info)
            .rasterization_state(&rasterization_state_create_info)
            .multisample_state(&multisample_state_create_info)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .build();

        let pipelines = unsafe {
            self.device().create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        };
        self.destroy_modules(&[vertex_module, fragment_module]);

        let pipeline = pipelines.map_err(|(_, err)| err)?[0];
        Ok(PipelineRecord {
            pipeline,
            shader_binding_table: None,
        })
    }

    pub(super) fn create_ray_trace_pipeline(
        &self,
        desc: &RayTracePipelineDesc,
    ) -> Result<(PipelineRecord, SbtRegions), DeviceError> {
        let raytracing = self.raytracing()?;
        let layout = self.pipeline_layout(desc.layout)?;

        // Stages and groups share one order: raygen, misses, closest hits, callables
        let shaders: Vec<&Shader> = std::iter::once(desc.raygen)
            .chain(desc.miss)
            .chain(desc.closest_hit)
            .chain(desc.callable)
            .collect();
        let mut modules = Vec::with_capacity(shaders.len());
        for shader in &shaders {
            match self.shader_module(shader) {
                Ok(module) => modules.push(module),
                Err(err) => {
                    self.destroy_modules(&modules);
                    return Err(err);
                }
            }
        }

        let stages: Vec<_> = shaders
            .iter()
            .zip(&modules)
            .map(|(shader, &module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(shader.stage)
                    .module(module)
                    .name(entry_point())
                    .build()
            })
            .collect();

        let hit_range = 1 + desc.miss.len()..1 + desc.miss.len() + desc.closest_hit.len();
        let groups: Vec<_> = (0..shaders.len() as u32)
            .map(|index| {
                if hit_range.contains(&(index as usize)) {
                    vk::RayTracingShaderGroupCreateInfoKHR::builder()
                        .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                        .general_shader(vk::SHADER_UNUSED_KHR)
                        .closest_hit_shader(index)
                        .any_hit_shader(vk::SHADER_UNUSED_KHR)
                        .intersection_shader(vk::SHADER_UNUSED_KHR)
                        .build()
                } else {
                    vk::RayTracingShaderGroupCreateInfoKHR::builder()
                        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                        .general_shader(index)
                        .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                        .any_hit_shader(vk::SHADER_UNUSED_KHR)
                        .intersection_shader(vk::SHADER_UNUSED_KHR)
                        .build()
                }
            })
            .collect();

        let properties = &raytracing.physical_device_ray_tracing_pipeline_properties_khr;
        let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(
                desc.max_recursion_depth
                    .min(properties.max_ray_recursion_depth),
            )
            .layout(layout)
            .build();

        let pipelines = unsafe {
            raytracing.ray_tracing_pipeline.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        };
        self.destroy_modules(&modules);
        let pipeline = pipelines?[0];

        match self.create_shader_binding_table(pipeline, desc, properties) {
            Ok((table, regions)) => Ok((
                PipelineRecord {
                    pipeline,
                    shader_binding_table: Some(table),
                },
                regions,
            )),
            Err(err) => {
                unsafe { self.device().destroy_pipeline(pipeline, None) };
                Err(err)
            }
        }
    }

    fn create_shader_binding_table(
        &self,
        pipeline: vk::Pipeline,
        desc: &RayTracePipelineDesc,
        properties: &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,
    ) -> Result<(BufferRecord, SbtRegions), DeviceError> {
        let raytracing = self.raytracing()?;
        let (miss_count, hit_count, callable_count) = (
            desc.miss.len() as u64,
            desc.closest_hit.len() as u64,
            desc.callable.len() as u64,
        );
        let group_count = 1 + miss_count + hit_count + callable_count;
        let layout = SbtLayout::new(properties, miss_count, hit_count, callable_count);

        let handles = unsafe {
            raytracing
                .ray_tracing_pipeline
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count as u32,
                    (group_count * layout.handle_size) as usize,
                )
        }?;

        // Extra room so the start can be moved up to the base alignment
        let base_alignment = properties.shader_group_base_alignment as u64;
        let mut table = self.create_raw_buffer(
            "Shader Binding Table",
            layout.total_size + base_alignment,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
        )?;
        let raw_address = self.raw_buffer_address(table.buffer);
        let base = align_up(raw_address, base_alignment);
        let start = (base - raw_address) as usize;

        let Some(mapped) = table.allocation.mapped_slice_mut() else {
            self.destroy_raw_buffer(table);
            return Err(DeviceError::NotHostVisible(0));
        };
        mapped.fill(0);
        let handle_size = layout.handle_size as usize;
        for (group, offset) in layout
            .handle_offsets(miss_count, hit_count, callable_count)
            .into_iter()
            .enumerate()
        {
            let dst = start + offset as usize;
            mapped[dst..dst + handle_size]
                .copy_from_slice(&handles[group * handle_size..(group + 1) * handle_size]);
        }

        let regions = layout.regions(base);
        log::debug!(
            "Shader binding table for {} at 0x{base:X}, {} bytes",
            desc.raygen.name,
            layout.total_size
        );
        Ok((table, regions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(
        handle_size: u32,
        handle_alignment: u32,
        base_alignment: u32,
    ) -> vk::PhysicalDeviceRayTracingPipelinePropertiesKHR {
        vk::PhysicalDeviceRayTracingPipelinePropertiesKHR {
            shader_group_handle_size: handle_size,
            shader_group_handle_alignment: handle_alignment,
            shader_group_base_alignment: base_alignment,
            ..Default::default()
        }
    }

    #[test]
    fn regions_start_on_base_alignment() {
        let layout = SbtLayout::new(&properties(32, 32, 64), 1, 1, 0);
        let regions = layout.regions(0x1000);

        assert_eq!(regions.raygen.stride, regions.raygen.size);
        assert_eq!(regions.raygen.size, 64);
        assert_eq!(regions.miss.device_address, 0x1040);
        assert_eq!(regions.miss.stride, 32);
        assert_eq!(regions.hit.device_address, 0x1080);
        assert_eq!(regions.callable.size, 0);
        assert_eq!(regions.callable.device_address, 0);
        assert_eq!(layout.total_size, 192);
    }

    #[test]
    fn handles_are_packed_at_their_stride() {
        let layout = SbtLayout::new(&properties(32, 64, 64), 2, 1, 0);
        assert_eq!(layout.handle_offsets(2, 1, 0), [0, 64, 128, 192]);
        assert_eq!(layout.hit, (192, 64));
    }
}
