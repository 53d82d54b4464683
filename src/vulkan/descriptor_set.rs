use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use super::acceleration_structure::Tlas;
use super::buffer::Buffer;
use super::context::Context;
use super::device::{
    DescriptorBinding, DescriptorPoolId, DescriptorResource, DescriptorSetId,
    DescriptorSetLayoutId, DescriptorWrite, ResourceUsage,
};
use super::error::DescriptorError;
use super::image::{Image, Sampler};

const MAX_SETS_PER_TABLE: u32 = 16;

/// Accumulates a layout, then hands out sets that match it.
pub struct DescriptorTable {
    bindings: Vec<DescriptorBinding>,
    layout: Option<DescriptorSetLayoutId>,
    pool: Option<DescriptorPoolId>,
    context: Arc<Context>,
}

impl DescriptorTable {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            bindings: Vec::new(),
            layout: None,
            pool: None,
            context,
        }
    }

    /// Fails once the layout was handed out or a set was allocated.
    pub fn add_layout_binding(
        &mut self,
        slot: u32,
        count: u32,
        kind: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Result<&mut Self, DescriptorError> {
        if self.layout.is_some() {
            return Err(DescriptorError::LayoutFrozen { slot });
        }
        if self.bindings.iter().any(|binding| binding.slot == slot) {
            return Err(DescriptorError::DuplicateSlot { slot });
        }
        self.bindings.push(DescriptorBinding {
            slot,
            count,
            kind,
            stages,
        });
        Ok(self)
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Freezes the layout.
    pub fn layout(&mut self) -> Result<DescriptorSetLayoutId, DescriptorError> {
        if let Some(layout) = self.layout {
            return Ok(layout);
        }
        let layout = self
            .context
            .device()
            .create_descriptor_set_layout(&self.bindings)?;
        self.layout = Some(layout);
        Ok(layout)
    }

    pub fn allocate_descriptor_set(&mut self) -> Result<DescriptorSet, DescriptorError> {
        let layout = self.layout()?;
        let pool = match self.pool {
            Some(pool) => pool,
            None => {
                let pool = self
                    .context
                    .device()
                    .create_descriptor_pool(&self.bindings, MAX_SETS_PER_TABLE)?;
                self.pool = Some(pool);
                pool
            }
        };
        let id = self.context.device().allocate_descriptor_set(pool, layout)?;

        Ok(DescriptorSet {
            id,
            bindings: self.bindings.clone(),
            pending: BTreeMap::new(),
            bound: BTreeMap::new(),
            context: self.context.clone(),
        })
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        let device = self.context.device();
        if let Some(pool) = self.pool.take() {
            device.destroy_descriptor_pool(pool);
        }
        if let Some(layout) = self.layout.take() {
            device.destroy_descriptor_set_layout(layout);
        }
    }
}

/// Slot to resource mapping. Writes are staged and only applied by [`DescriptorSet::update`].
///
/// The set is freed together with the pool of its table, so it must not outlive it.
pub struct DescriptorSet {
    id: DescriptorSetId,
    bindings: Vec<DescriptorBinding>,
    pending: BTreeMap<u32, (DescriptorResource, ResourceUsage)>,
    bound: BTreeMap<u32, DescriptorResource>,
    context: Arc<Context>,
}

impl DescriptorSet {
    pub fn id(&self) -> DescriptorSetId {
        self.id
    }

    pub fn write_buffer<T>(&mut self, slot: u32, buffer: &Buffer<T>) -> &mut Self {
        self.stage(
            slot,
            DescriptorResource::Buffer {
                buffer: buffer.id(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            },
            ResourceUsage::Buffer(buffer.usage()),
        )
    }

    /// Without a sampler, the image is bound as a storage image.
    pub fn write_image(
        &mut self,
        slot: u32,
        image: &Image,
        layout: vk::ImageLayout,
        sampler: Option<&Sampler>,
    ) -> &mut Self {
        self.stage(
            slot,
            DescriptorResource::Image {
                image: image.id(),
                layout,
                sampler: sampler.map(Sampler::id),
            },
            ResourceUsage::Image(image.usage),
        )
    }

    pub fn write_acceleration_structure(&mut self, slot: u32, tlas: &Tlas) -> &mut Self {
        self.stage(
            slot,
            DescriptorResource::AccelerationStructure(tlas.id()),
            ResourceUsage::AccelerationStructure,
        )
    }

    fn stage(
        &mut self,
        slot: u32,
        resource: DescriptorResource,
        usage: ResourceUsage,
    ) -> &mut Self {
        // Last write wins.
        self.pending.insert(slot, (resource, usage));
        self
    }

    /// Commits every pending write at once. On error, nothing is applied and the pending
    /// writes are kept.
    pub fn update(&mut self) -> Result<(), DescriptorError> {
        let mut writes = Vec::with_capacity(self.pending.len());
        for (&slot, (resource, usage)) in &self.pending {
            let binding = self
                .bindings
                .iter()
                .find(|binding| binding.slot == slot)
                .ok_or(DescriptorError::UnknownSlot { slot })?;
            if !resource.fits(binding.kind) {
                return Err(DescriptorError::KindMismatch {
                    slot,
                    expected: binding.kind,
                    actual: resource.describe(),
                });
            }
            if !usage.allows(binding.kind) {
                return Err(DescriptorError::UsageMismatch {
                    slot,
                    expected: binding.kind,
                });
            }
            writes.push(DescriptorWrite {
                slot,
                resource: *resource,
            });
        }

        if !writes.is_empty() {
            self.context
                .device()
                .update_descriptor_set(self.id, &writes)?;
        }
        let committed = std::mem::take(&mut self.pending);
        self.bound
            .extend(committed.into_iter().map(|(slot, (resource, _))| (slot, resource)));
        Ok(())
    }

    pub fn pending(&self, slot: u32) -> Option<&DescriptorResource> {
        self.pending.get(&slot).map(|(resource, _)| resource)
    }

    pub fn bound(&self, slot: u32) -> Option<&DescriptorResource> {
        self.bound.get(&slot)
    }

    /// Whether every slot of the layout had a resource committed.
    pub fn is_complete(&self) -> bool {
        self.bindings
            .iter()
            .all(|binding| self.bound.contains_key(&binding.slot))
    }
}
