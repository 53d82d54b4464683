use std::sync::Arc;

use ash::vk;

use super::context::Context;
use super::device::{
    BlendMode, ComputePipelineDesc, DescriptorSetLayoutId, PipelineId, PipelineLayoutId,
    RasterPipelineDesc, RayTracePipelineDesc, RenderPassId, SbtRegions, Shader,
};
use super::error::DeviceError;

pub trait Pipeline {
    fn id(&self) -> PipelineId;
    fn bind_point(&self) -> vk::PipelineBindPoint;
    fn layout(&self) -> PipelineLayoutId;
}

pub struct PipelineLayout {
    id: PipelineLayoutId,
    context: Arc<Context>,
}

impl PipelineLayout {
    pub fn new(
        context: Arc<Context>,
        set_layouts: &[DescriptorSetLayoutId],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self, DeviceError> {
        let id = context
            .device()
            .create_pipeline_layout(set_layouts, push_constant_ranges)?;
        Ok(Self { id, context })
    }

    pub fn id(&self) -> PipelineLayoutId {
        self.id
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.context.device().destroy_pipeline_layout(self.id);
    }
}

pub struct ComputePipeline {
    id: PipelineId,
    layout: PipelineLayoutId,
    context: Arc<Context>,
}

impl ComputePipeline {
    pub fn new(
        context: Arc<Context>,
        layout: &PipelineLayout,
        shader: &Shader,
    ) -> Result<Self, DeviceError> {
        let id = context.device().create_compute_pipeline(&ComputePipelineDesc {
            layout: layout.id(),
            shader,
        })?;
        log::debug!("Created compute pipeline for {}", shader.name);
        Ok(Self {
            id,
            layout: layout.id(),
            context,
        })
    }
}

impl Pipeline for ComputePipeline {
    fn id(&self) -> PipelineId {
        self.id
    }

    fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::COMPUTE
    }

    fn layout(&self) -> PipelineLayoutId {
        self.layout
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        self.context.device().destroy_pipeline(self.id);
    }
}

pub struct RasterPipelineBuilder<'a> {
    vertex_shader: &'a Shader,
    fragment_shader: &'a Shader,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    primitive_restart: bool,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    polygon_mode: vk::PolygonMode,
    front_face: vk::FrontFace,
    cull_mode: vk::CullModeFlags,
    blend: BlendMode,
}

impl<'a> RasterPipelineBuilder<'a> {
    pub fn new(vertex_shader: &'a Shader, fragment_shader: &'a Shader) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
            polygon_mode: vk::PolygonMode::FILL,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            cull_mode: vk::CullModeFlags::NONE,
            blend: BlendMode::Opaque,
        }
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn primitive_restart(mut self, enable: bool) -> Self {
        self.primitive_restart = enable;
        self
    }

    /// The viewport and scissor both cover `extent`.
    pub fn extent(mut self, extent: vk::Extent2D) -> Self {
        self.viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        self
    }

    pub fn polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    pub fn front_face(mut self, front_face: vk::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn vertex_binding(mut self, binding: u32, stride: u32) -> Self {
        self.vertex_bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        self
    }

    pub fn vertex_attribute(
        mut self,
        location: u32,
        binding: u32,
        format: vk::Format,
        offset: u32,
    ) -> Self {
        self.vertex_attributes
            .push(vk::VertexInputAttributeDescription {
                location,
                binding,
                format,
                offset,
            });
        self
    }

    pub fn build(
        self,
        context: Arc<Context>,
        layout: &PipelineLayout,
        render_pass: RenderPassId,
    ) -> Result<RasterPipeline, DeviceError> {
        let id = context.device().create_raster_pipeline(&RasterPipelineDesc {
            layout: layout.id(),
            render_pass,
            vertex_shader: self.vertex_shader,
            fragment_shader: self.fragment_shader,
            vertex_bindings: &self.vertex_bindings,
            vertex_attributes: &self.vertex_attributes,
            topology: self.topology,
            primitive_restart: self.primitive_restart,
            polygon_mode: self.polygon_mode,
            front_face: self.front_face,
            cull_mode: self.cull_mode,
            blend: self.blend,
        })?;
        log::debug!(
            "Created raster pipeline for {} and {}",
            self.vertex_shader.name,
            self.fragment_shader.name
        );

        Ok(RasterPipeline {
            id,
            layout: layout.id(),
            viewport: self.viewport,
            scissor: self.scissor,
            context,
        })
    }
}

/// Viewport and scissor are dynamic state; the ones given at creation are the defaults.
pub struct RasterPipeline {
    id: PipelineId,
    layout: PipelineLayoutId,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    context: Arc<Context>,
}

impl RasterPipeline {
    pub fn viewport(&self) -> vk::Viewport {
        self.viewport
    }

    pub fn scissor(&self) -> vk::Rect2D {
        self.scissor
    }
}

impl Pipeline for RasterPipeline {
    fn id(&self) -> PipelineId {
        self.id
    }

    fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }

    fn layout(&self) -> PipelineLayoutId {
        self.layout
    }
}

impl Drop for RasterPipeline {
    fn drop(&mut self) {
        self.context.device().destroy_pipeline(self.id);
    }
}

/// The shaders of a ray tracing pipeline, one group per shader.
pub struct RayTraceShaders {
    pub raygen: Shader,
    pub miss: Vec<Shader>,
    pub closest_hit: Vec<Shader>,
    pub callable: Vec<Shader>,
}

/// Couples the shader groups of one ray tracing pipeline to launches.
#[derive(Debug, Clone, Copy)]
pub struct ShaderBindingTable {
    regions: SbtRegions,
    pub miss_count: usize,
    pub hit_count: usize,
    pub callable_count: usize,
}

impl ShaderBindingTable {
    pub fn regions(&self) -> SbtRegions {
        self.regions
    }
}

pub struct RayTracePipeline {
    id: PipelineId,
    layout: PipelineLayoutId,
    sbt: ShaderBindingTable,
    context: Arc<Context>,
}

impl RayTracePipeline {
    pub fn new(
        context: Arc<Context>,
        layout: &PipelineLayout,
        shaders: &RayTraceShaders,
        max_recursion_depth: u32,
    ) -> Result<Self, DeviceError> {
        let device = context.device();
        if !device.supports_ray_tracing() {
            return Err(DeviceError::RayTracingUnsupported(device.name().to_owned()));
        }
        let (id, regions) = device.create_ray_trace_pipeline(&RayTracePipelineDesc {
            layout: layout.id(),
            raygen: &shaders.raygen,
            miss: &shaders.miss,
            closest_hit: &shaders.closest_hit,
            callable: &shaders.callable,
            max_recursion_depth,
        })?;
        log::debug!("Created ray tracing pipeline for {}", shaders.raygen.name);

        Ok(Self {
            id,
            layout: layout.id(),
            sbt: ShaderBindingTable {
                regions,
                miss_count: shaders.miss.len(),
                hit_count: shaders.closest_hit.len(),
                callable_count: shaders.callable.len(),
            },
            context,
        })
    }

    pub fn shader_binding_table(&self) -> &ShaderBindingTable {
        &self.sbt
    }
}

impl Pipeline for RayTracePipeline {
    fn id(&self) -> PipelineId {
        self.id
    }

    fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::RAY_TRACING_KHR
    }

    fn layout(&self) -> PipelineLayoutId {
        self.layout
    }
}

impl Drop for RayTracePipeline {
    fn drop(&mut self) {
        self.context.device().destroy_pipeline(self.id);
    }
}
