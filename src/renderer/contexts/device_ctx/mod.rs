pub mod api;
pub mod device;
pub mod features;
pub mod instance;
pub mod queue;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::api::DeviceApi;
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamilySelection, QueueRole};
use crate::renderer::error::{GfxResult, GraphicsError};

/// Responsibilities:
/// - Own the device backend and the queue handle of every role
/// - Own the per-role command pools and the transient pools used for uploads
/// - Answer memory-type and format-support queries
pub struct DeviceContext {
    device: Arc<dyn DeviceApi>,
    queues: [Queue; 3],
    command_pools: [vk::CommandPool; 2],
    transient_pools: [vk::CommandPool; 2],
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    pub fn new(
        device: Arc<dyn DeviceApi>,
        queue_families: QueueFamilySelection,
    ) -> GfxResult<Arc<Self>> {
        let queues = QueueRole::ALL.map(|role| {
            let family = queue_families.family(role).clone();
            let handle = unsafe { device.get_device_queue(family.index, 0) };
            Queue::new(family, handle)
        });

        let graphics_family = queue_families.graphics.index;
        let transfer_family = queue_families.transfer.index;

        let mut created = Vec::with_capacity(4);
        let (command_pools, transient_pools) = match Self::create_command_pools(
            device.as_ref(),
            graphics_family,
            transfer_family,
            &mut created,
        ) {
            Ok(pools) => pools,
            Err(e) => {
                for pool in created {
                    unsafe { device.destroy_command_pool(pool) };
                }
                return Err(e);
            }
        };

        log::debug!(
            "Device context ready (graphics family {}, transfer family {}, present family {})",
            graphics_family,
            transfer_family,
            queue_families.present.index,
        );

        let memory_properties = device.memory_properties();
        Ok(Arc::new(Self {
            device,
            queues,
            command_pools,
            transient_pools,
            memory_properties,
        }))
    }

    pub fn device(&self) -> &dyn DeviceApi {
        self.device.as_ref()
    }

    pub fn queue(&self, role: QueueRole) -> &Queue {
        &self.queues[role_index(role)]
    }

    pub fn queue_family_index(&self, role: QueueRole) -> u32 {
        self.queue(role).family.index
    }

    /// True when uploads run on a queue family other than graphics and need an ownership transfer
    pub fn has_dedicated_transfer_queue(&self) -> bool {
        self.queue_family_index(QueueRole::Transfer) != self.queue_family_index(QueueRole::Graphics)
    }

    /// Distinct family indices among the given roles, for resource sharing
    pub fn unique_family_indices(&self, roles: &[QueueRole]) -> Vec<u32> {
        let mut indices = Vec::with_capacity(roles.len());
        for role in roles {
            let index = self.queue_family_index(*role);
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
        indices
    }

    /// Memory type matching `type_filter` with all of `properties`, on a heap with all of `heap_flags`.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
        heap_flags: vk::MemoryHeapFlags,
    ) -> GfxResult<u32> {
        let props = &self.memory_properties;
        (0..props.memory_type_count)
            .find(|&i| {
                let memory_type = props.memory_types[i as usize];
                let heap = props.memory_heaps[memory_type.heap_index as usize];
                type_filter & (1 << i) != 0
                    && memory_type.property_flags.contains(properties)
                    && heap.flags.contains(heap_flags)
            })
            .ok_or_else(|| {
                log::error!("No memory type for filter {:#b} with {:?}", type_filter, properties);
                GraphicsError::NoSupportedMemory
            })
    }

    pub fn is_format_supported(
        &self,
        format: vk::Format,
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> bool {
        let props = self.device.format_properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    }

    pub fn limits(&self) -> vk::PhysicalDeviceLimits {
        self.device.limits()
    }

    pub fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        self.device.enabled_features()
    }

    pub fn command_pool(&self, role: QueueRole) -> vk::CommandPool {
        self.command_pools[pool_index(role)]
    }

    pub fn transient_pool(&self, role: QueueRole) -> vk::CommandPool {
        self.transient_pools[pool_index(role)]
    }

    pub fn allocate_command_buffers(
        &self,
        role: QueueRole,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> GfxResult<Vec<vk::CommandBuffer>> {
        log::trace!("Allocate {} command buffers for {:?}", count, role);
        self.allocate_from(self.command_pool(role), level, count)
    }

    pub fn free_command_buffers(&self, role: QueueRole, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.command_pool(role), buffers) }
    }

    pub fn allocate_transient_command_buffers(
        &self,
        role: QueueRole,
        count: u32,
    ) -> GfxResult<Vec<vk::CommandBuffer>> {
        self.allocate_from(self.transient_pool(role), vk::CommandBufferLevel::PRIMARY, count)
    }

    pub fn free_transient_command_buffers(&self, role: QueueRole, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.transient_pool(role), buffers) }
    }

    /// Hands the memory held by the transient pools back to the driver
    pub fn reset_transient_pools(&self) {
        let mut pools = self.transient_pools.to_vec();
        pools.dedup();
        for pool in pools {
            if let Err(e) = unsafe {
                self.device
                    .reset_command_pool(pool, vk::CommandPoolResetFlags::RELEASE_RESOURCES)
            } {
                log::warn!("Unable to reset transient command pool: {}", e);
            }
        }
    }

    pub fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle().map_err(GraphicsError::from) }
    }

    /// Returns the regular and transient pools, indexed graphics then transfer. Pools are shared
    /// when both roles live on the same family.
    fn create_command_pools(
        device: &dyn DeviceApi,
        graphics_family: u32,
        transfer_family: u32,
        created: &mut Vec<vk::CommandPool>,
    ) -> GfxResult<([vk::CommandPool; 2], [vk::CommandPool; 2])> {
        let mut create = |family: u32, flags: vk::CommandPoolCreateFlags| -> GfxResult<vk::CommandPool> {
            let info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family)
                .flags(flags);
            let pool = unsafe { device.create_command_pool(&info) }.map_err(|e| {
                log::error!("Unable to create command pool for queue family {}: {}", family, e);
                GraphicsError::CommandPoolCreateError
            })?;
            created.push(pool);
            Ok(pool)
        };

        let shared = graphics_family == transfer_family;

        let graphics = create(graphics_family, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?;
        let transfer = if shared {
            graphics
        } else {
            create(transfer_family, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?
        };

        let transient_graphics = create(graphics_family, vk::CommandPoolCreateFlags::TRANSIENT)?;
        let transient_transfer = if shared {
            transient_graphics
        } else {
            create(transfer_family, vk::CommandPoolCreateFlags::TRANSIENT)?
        };

        Ok(([graphics, transfer], [transient_graphics, transient_transfer]))
    }

    fn allocate_from(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> GfxResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(count);
        unsafe {
            self.device.allocate_command_buffers(&info).map_err(|e| {
                log::error!("Unable to allocate command buffers: {}", e);
                GraphicsError::CommandBufferCreateError
            })
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        let mut pools = self.command_pools.to_vec();
        pools.extend_from_slice(&self.transient_pools);
        pools.sort_by_key(|pool| vk::Handle::as_raw(*pool));
        pools.dedup();
        for pool in pools {
            unsafe { self.device.destroy_command_pool(pool) };
        }
    }
}

// Matches the order of `QueueRole::ALL`
fn role_index(role: QueueRole) -> usize {
    match role {
        QueueRole::Graphics => 0,
        QueueRole::Present => 1,
        QueueRole::Transfer => 2,
    }
}

fn pool_index(role: QueueRole) -> usize {
    match role {
        QueueRole::Graphics => 0,
        QueueRole::Transfer => 1,
        QueueRole::Present => panic!("no command pool for the present role"),
    }
}
