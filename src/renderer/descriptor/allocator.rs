use std::sync::Arc;
use ash::vk;
use gpu_descriptor::DescriptorTotalCount;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::descriptor::instance::DescriptorSetInstance;
use crate::renderer::descriptor::layout::DescriptorSetLayout;
use crate::renderer::descriptor::{accumulate, empty_total, pool_sizes};
use crate::renderer::error::{GfxResult, GraphicsError};

pub const DEFAULT_ALLOC_COUNT: u32 = 100;

/// Hands out descriptor sets from a growing list of identically sized pools.
///
/// Sets are never freed one by one. `reset` recycles every active pool at once, which is how
/// per-frame descriptor churn stays cheap; only `clear` destroys pools.
pub struct DescriptorSetAllocator {
    active_pools: Vec<vk::DescriptorPool>,
    free_pools: Vec<vk::DescriptorPool>,
    pool_counts: DescriptorTotalCount,
    expected_allocations: u32,
    ctx: Arc<DeviceContext>,
}

impl DescriptorSetAllocator {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            active_pools: Vec::new(),
            free_pools: Vec::new(),
            pool_counts: empty_total(),
            expected_allocations: 0,
            ctx,
        }
    }

    /// Reserves room for `alloc_count` sets of `layout` in every pool. Call for each layout
    /// this allocator serves before `initialize`.
    pub fn add_descriptor_layout(&mut self, layout: &DescriptorSetLayout, alloc_count: u32) {
        assert!(layout.is_initialized(), "descriptor set layout must be initialized first");
        assert!(
            self.active_pools.is_empty() && self.free_pools.is_empty(),
            "layouts must be registered before the first pool exists"
        );
        accumulate(&mut self.pool_counts, layout.descriptor_counts(), alloc_count);
        self.expected_allocations += alloc_count;
    }

    pub fn initialize(&mut self) -> GfxResult<()> {
        if self.expected_allocations == 0 || !self.active_pools.is_empty() {
            return Ok(());
        }
        self.acquire_pool()?;
        Ok(())
    }

    /// Allocates one set per instance and hands each its set.
    pub fn allocate_descriptor_sets(&mut self, instances: &mut [&mut DescriptorSetInstance]) -> GfxResult<()> {
        if instances.is_empty() {
            return Ok(());
        }
        let layouts = instances.iter().map(|i| i.layout_handle()).collect::<Vec<_>>();

        let pool = match self.active_pools.last() {
            Some(pool) => *pool,
            None => self.acquire_pool()?,
        };

        let sets = match self.allocate_from(pool, &layouts) {
            Ok(sets) => sets,
            Err(vk::Result::ERROR_FRAGMENTED_POOL | vk::Result::ERROR_OUT_OF_POOL_MEMORY) => {
                log::warn!(
                    "Descriptor pool exhausted, moving to pool {}",
                    self.active_pools.len() + 1
                );
                let pool = self.acquire_pool()?;
                self.allocate_from(pool, &layouts).map_err(|e| {
                    log::error!("Descriptor set allocation failed on a fresh pool: {}", e);
                    GraphicsError::DescriptorSetCreateError
                })?
            }
            Err(e) => {
                log::error!("Descriptor set allocation failed: {}", e);
                return Err(GraphicsError::DescriptorSetCreateError);
            }
        };

        for (instance, set) in instances.iter_mut().zip(sets) {
            instance.set_internal_descriptor_set(set);
        }
        Ok(())
    }

    /// Recycles every active pool. Sets handed out before are invalid afterwards.
    pub fn reset(&mut self) {
        for pool in self.active_pools.drain(..) {
            if let Err(e) = unsafe { self.ctx.device().reset_descriptor_pool(pool) } {
                log::warn!("Unable to reset descriptor pool: {}", e);
            }
            self.free_pools.push(pool);
        }
    }

    pub fn clear(&mut self) {
        self.reset();
        for pool in self.free_pools.drain(..) {
            unsafe { self.ctx.device().destroy_descriptor_pool(pool) };
        }
    }

    pub fn active_pool_count(&self) -> usize {
        self.active_pools.len()
    }

    pub fn free_pool_count(&self) -> usize {
        self.free_pools.len()
    }

    pub fn expected_allocations(&self) -> u32 {
        self.expected_allocations
    }

    /// Takes a pool from the free list, or creates one, and makes it the current pool.
    fn acquire_pool(&mut self) -> GfxResult<vk::DescriptorPool> {
        let pool = match self.free_pools.pop() {
            Some(pool) => pool,
            None => self.create_pool()?,
        };
        self.active_pools.push(pool);
        Ok(pool)
    }

    fn create_pool(&self) -> GfxResult<vk::DescriptorPool> {
        assert!(self.expected_allocations > 0, "no descriptor layouts registered");
        let sizes = pool_sizes(&self.pool_counts);
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(self.expected_allocations)
            .pool_sizes(&sizes);
        let pool = unsafe {
            self.ctx.device().create_descriptor_pool(&info).map_err(|e| {
                log::error!("Unable to create descriptor pool: {}", e);
                GraphicsError::DescriptorPoolCreateError
            })?
        };
        log::debug!(
            "Created descriptor pool for {} sets ({} descriptor types)",
            self.expected_allocations,
            sizes.len()
        );
        Ok(pool)
    }

    fn allocate_from(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        unsafe { self.ctx.device().allocate_descriptor_sets(&info) }
    }
}

impl Drop for DescriptorSetAllocator {
    fn drop(&mut self) {
        self.clear();
    }
}
