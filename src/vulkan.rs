pub mod acceleration_structure;
pub mod buffer;
pub mod command_buffer;
pub mod context;
pub mod descriptor_set;
pub mod device;
pub mod error;
pub mod image;
#[cfg(feature = "vulkan")]
pub mod native;
pub mod pass;
pub mod pipeline;
pub mod resource_state;
pub mod shader;
pub mod software;
pub mod window_settings;

pub use acceleration_structure::{Blas, InstanceRecord, Tlas};
pub use buffer::{Buffer, UntypedBuffer};
pub use command_buffer::{Command, CommandList, CommandRecorder, ImageTransition};
pub use context::{Context, ShaderSource, Surface, SurfaceFrame, SwapchainIndex};
pub use descriptor_set::{DescriptorSet, DescriptorTable};
pub use device::{Device, MemoryLocation, QueueKind};
pub use error::{AccelerationStructureError, DescriptorError, DeviceError, ShaderError, SurfaceError};
pub use image::{Image, Sampler};
pub use pass::{ImmediatePass, Pass};
pub use pipeline::{
    ComputePipeline, Pipeline, PipelineLayout, RasterPipeline, RasterPipelineBuilder,
    RayTracePipeline, RayTraceShaders, ShaderBindingTable,
};
pub use resource_state::ResourceState;
pub use shader::{NamedShaders, SpirvDirectory};
pub use software::{HeadlessSurface, SoftwareDevice, SoftwareStats};
