use std::collections::HashMap;

use ash::vk;

use crate::vulkan::device::{BufferId, ImageId, MemoryLocation};
use crate::vulkan::error::DeviceError;

pub(super) struct SoftBuffer {
    pub bytes: Vec<u8>,
    pub location: MemoryLocation,
    pub address: vk::DeviceAddress,
}

pub(super) struct SoftImage {
    pub bytes: Vec<u8>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub texel_size: usize,
}

impl SoftImage {
    pub fn texel_offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.extent.width || y >= self.extent.height {
            return None;
        }
        Some((y as usize * self.extent.width as usize + x as usize) * self.texel_size)
    }

    pub fn load(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        let offset = self.texel_offset(x, y)?;
        Some(decode_texel(
            self.format,
            &self.bytes[offset..offset + self.texel_size],
        ))
    }

    pub fn store(&mut self, x: u32, y: u32, value: [f32; 4]) -> bool {
        let Some(offset) = self.texel_offset(x, y) else {
            return false;
        };
        let encoded = encode_texel(self.format, value);
        self.bytes[offset..offset + self.texel_size].copy_from_slice(&encoded[..self.texel_size]);
        true
    }

    pub fn clear(&mut self, value: [f32; 4]) {
        let encoded = encode_texel(self.format, value);
        for texel in self.bytes.chunks_exact_mut(self.texel_size) {
            texel.copy_from_slice(&encoded[..self.texel_size]);
        }
    }
}

/// Everything that lives in device memory.
#[derive(Default)]
pub(super) struct Memory {
    pub buffers: HashMap<BufferId, SoftBuffer>,
    pub images: HashMap<ImageId, SoftImage>,
}

impl Memory {
    pub fn buffer(&self, id: BufferId) -> Result<&SoftBuffer, DeviceError> {
        self.buffers.get(&id).ok_or(DeviceError::UnknownId {
            kind: "buffer",
            id: id.raw(),
        })
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Result<&mut SoftBuffer, DeviceError> {
        self.buffers.get_mut(&id).ok_or(DeviceError::UnknownId {
            kind: "buffer",
            id: id.raw(),
        })
    }

    pub fn image(&self, id: ImageId) -> Result<&SoftImage, DeviceError> {
        self.images.get(&id).ok_or(DeviceError::UnknownId {
            kind: "image",
            id: id.raw(),
        })
    }

    pub fn image_mut(&mut self, id: ImageId) -> Result<&mut SoftImage, DeviceError> {
        self.images.get_mut(&id).ok_or(DeviceError::UnknownId {
            kind: "image",
            id: id.raw(),
        })
    }

    pub fn read_bytes(&self, id: BufferId, offset: u64, len: u64) -> Result<&[u8], DeviceError> {
        let buffer = self.buffer(id)?;
        let range = checked_range(offset, len, buffer.bytes.len())?;
        Ok(&buffer.bytes[range])
    }

    pub fn write_bytes(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let buffer = self.buffer_mut(id)?;
        let range = checked_range(offset, data.len() as u64, buffer.bytes.len())?;
        buffer.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        src: BufferId,
        dst: BufferId,
        region: &vk::BufferCopy,
    ) -> Result<(), DeviceError> {
        let data = self
            .read_bytes(src, region.src_offset, region.size)?
            .to_vec();
        self.write_bytes(dst, region.dst_offset, &data)
    }
}

pub(super) fn checked_range(
    offset: u64,
    len: u64,
    size: usize,
) -> Result<std::ops::Range<usize>, DeviceError> {
    let end = offset.checked_add(len).filter(|&end| end <= size as u64);
    match end {
        Some(end) => Ok(offset as usize..end as usize),
        None => Err(DeviceError::OutOfBounds {
            offset,
            len,
            size: size as u64,
        }),
    }
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Encodes into the first `texel_size` bytes of the result.
pub(super) fn encode_texel(format: vk::Format, [r, g, b, a]: [f32; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    match format {
        vk::Format::R8_UNORM => out[0] = unorm8(r),
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => {
            out[..4].copy_from_slice(&[unorm8(r), unorm8(g), unorm8(b), unorm8(a)])
        }
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => {
            out[..4].copy_from_slice(&[unorm8(b), unorm8(g), unorm8(r), unorm8(a)])
        }
        vk::Format::R32_SFLOAT => out[..4].copy_from_slice(&r.to_le_bytes()),
        vk::Format::R32_UINT => out[..4].copy_from_slice(&(r as u32).to_le_bytes()),
        vk::Format::R32G32_SFLOAT => {
            out[..4].copy_from_slice(&r.to_le_bytes());
            out[4..8].copy_from_slice(&g.to_le_bytes());
        }
        _ => {
            for (chunk, value) in out.chunks_exact_mut(4).zip([r, g, b, a]) {
                chunk.copy_from_slice(&value.to_le_bytes());
            }
        }
    }
    out
}

pub(super) fn decode_texel(format: vk::Format, bytes: &[u8]) -> [f32; 4] {
    let unorm = |value: u8| value as f32 / 255.0;
    let float = |index: usize| {
        bytes
            .get(index * 4..index * 4 + 4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .unwrap_or(0.0)
    };
    match format {
        vk::Format::R8_UNORM => [unorm(bytes[0]), 0.0, 0.0, 1.0],
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => [
            unorm(bytes[0]),
            unorm(bytes[1]),
            unorm(bytes[2]),
            unorm(bytes[3]),
        ],
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => [
            unorm(bytes[2]),
            unorm(bytes[1]),
            unorm(bytes[0]),
            unorm(bytes[3]),
        ],
        vk::Format::R32_SFLOAT => [float(0), 0.0, 0.0, 1.0],
        vk::Format::R32_UINT => [
            bytemuck::pod_read_unaligned::<u32>(&bytes[..4]) as f32,
            0.0,
            0.0,
            1.0,
        ],
        vk::Format::R32G32_SFLOAT => [float(0), float(1), 0.0, 1.0],
        _ => [float(0), float(1), float(2), float(3)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_swizzles_on_encode_and_decode() {
        let encoded = encode_texel(vk::Format::B8G8R8A8_UNORM, [1.0, 0.0, 0.2, 1.0]);
        assert_eq!(&encoded[..4], &[51, 0, 255, 255]);
        let decoded = decode_texel(vk::Format::B8G8R8A8_UNORM, &encoded[..4]);
        assert_eq!(decoded[0], 1.0);
        assert_eq!(decoded[2], 51.0 / 255.0);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        assert!(checked_range(4, 4, 8).is_ok());
        assert!(checked_range(5, 4, 8).is_err());
        assert!(checked_range(u64::MAX, 2, 8).is_err());
    }
}
