use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use super::command_buffer::CommandRecorder;
use super::context::Context;
use super::device::{BufferDesc, BufferId, MemoryLocation};
use super::error::DeviceError;
use super::pass::ImmediatePass;
use super::resource_state::{ResourceState, TrackedState};

pub trait IntoSlice<T> {
    fn as_sliced(&self) -> &[T];
}

impl<T> IntoSlice<T> for T {
    fn as_sliced(&self) -> &[T] {
        std::slice::from_ref(self)
    }
}

impl<T> IntoSlice<T> for [T] {
    fn as_sliced(&self) -> &[T] {
        self
    }
}

impl<T> IntoSlice<T> for Vec<T> {
    fn as_sliced(&self) -> &[T] {
        self
    }
}

pub trait IndexElement: Pod {
    const INDEX_TYPE: vk::IndexType;
}

impl IndexElement for u16 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;
}

impl IndexElement for u32 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT32;
}

pub struct UntypedBuffer {
    id: BufferId,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    pub size: vk::DeviceSize,
    state: TrackedState,
    context: Arc<Context>,
}

impl UntypedBuffer {
    pub fn new(context: Arc<Context>, desc: &BufferDesc) -> Result<Self, DeviceError> {
        let id = context.device().create_buffer(desc)?;
        Ok(Self {
            id,
            usage: desc.usage,
            location: desc.location,
            size: desc.size,
            state: TrackedState::new(ResourceState::UNDEFINED),
            context,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn get_device_address(&self) -> Result<vk::DeviceAddress, DeviceError> {
        self.context.device().buffer_device_address(self.id)
    }
}

impl Drop for UntypedBuffer {
    fn drop(&mut self) {
        self.context.device().destroy_buffer(self.id);
    }
}

/// A buffer of `len` elements of `T`. Exclusively owns its device memory.
pub struct Buffer<T> {
    inner: UntypedBuffer,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> Buffer<T> {
    pub fn new(
        context: Arc<Context>,
        name: &str,
        len: usize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self, DeviceError> {
        let size = (len.max(1) * std::mem::size_of::<T>()) as vk::DeviceSize;
        let inner = UntypedBuffer::new(
            context,
            &BufferDesc {
                name,
                size,
                usage,
                location,
            },
        )?;
        Ok(Self {
            inner,
            len,
            _marker: PhantomData,
        })
    }

    /// A host visible transfer source.
    pub fn new_staging(context: Arc<Context>, name: &str, len: usize) -> Result<Self, DeviceError> {
        Self::new(
            context,
            name,
            len,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> vk::DeviceSize {
        self.inner.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.inner.usage
    }

    pub fn state(&self) -> &TrackedState {
        &self.inner.state
    }

    pub fn get_untyped(&self) -> &UntypedBuffer {
        &self.inner
    }

    pub fn get_device_address(&self) -> Result<vk::DeviceAddress, DeviceError> {
        self.inner.get_device_address()
    }

    fn context(&self) -> &Arc<Context> {
        &self.inner.context
    }
}

impl<T: Pod> Buffer<T> {
    /// Writes `data` from the start of a host visible buffer.
    pub fn fill_whole<U: IntoSlice<T> + ?Sized>(&self, data: &U) -> Result<(), DeviceError> {
        let bytes: &[u8] = bytemuck::cast_slice(data.as_sliced());
        if bytes.len() as u64 > self.inner.size {
            return Err(DeviceError::OutOfBounds {
                offset: 0,
                len: bytes.len() as u64,
                size: self.inner.size,
            });
        }
        self.context().device().write_buffer(self.id(), 0, bytes)
    }

    /// Reads a host visible buffer. Only meaningful once the writing work has completed.
    pub fn read(&self) -> Result<Vec<T>, DeviceError> {
        let len = (self.len * std::mem::size_of::<T>()) as u64;
        let bytes = self.context().device().read_buffer(self.id(), 0, len)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Records a copy from a filled staging buffer.
    pub fn upload_from(&self, cmd: &mut CommandRecorder, staging: &Buffer<T>) {
        debug_assert!(staging.usage().contains(vk::BufferUsageFlags::TRANSFER_SRC));
        debug_assert!(self.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        cmd.copy_buffer(staging, self);
    }

    /// Copies host data into this buffer through a temporary staging buffer and waits for it.
    pub fn upload<U: IntoSlice<T> + ?Sized>(
        &self,
        pass: &mut ImmediatePass,
        data: &U,
    ) -> Result<(), DeviceError> {
        let data = data.as_sliced();
        let staging = Buffer::<T>::new_staging(self.context().clone(), "Staging Buffer", data.len())?;
        staging.fill_whole(data)?;
        pass.execute_immediately(|cmd| self.upload_from(cmd, &staging));
        Ok(())
    }

    /// Copies the buffer into host visible memory, waits for the copy and returns the contents.
    pub fn read_back(&self, pass: &mut ImmediatePass) -> Result<Vec<T>, DeviceError> {
        let readback = Buffer::<T>::new(
            self.context().clone(),
            "Readback Buffer",
            self.len,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;
        pass.execute_immediately(|cmd| {
            cmd.memory_barrier(
                vk::PipelineStageFlags2::ALL_COMMANDS,
                vk::AccessFlags2::MEMORY_WRITE,
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
            )
            .copy_buffer(self, &readback);
        });
        readback.read()
    }
}
