use std::ptr::NonNull;
use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{GfxResult, GraphicsError};
use crate::renderer::resources::{allocate_memory, sharing_mode, write_mapped};

/// Linear device storage. The handle is created by `initialize`, memory only by `allocate`.
pub struct Buffer {
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    allocation_size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,

    ctx: Arc<DeviceContext>,
}

impl Buffer {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            handle: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: 0,
            allocation_size: 0,
            mapped: None,
            ctx,
        }
    }

    pub fn initialize(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        queue_families: &[u32],
    ) -> GfxResult<()> {
        assert_eq!(self.handle, vk::Buffer::null(), "buffer already initialized");

        let (mode, families) = sharing_mode(queue_families);
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(mode)
            .queue_family_indices(&families);

        self.handle = unsafe {
            self.ctx.device().create_buffer(&info).map_err(|e| {
                log::error!("Unable to create buffer of {} bytes: {}", size, e);
                GraphicsError::InitializationFailed
            })?
        };
        self.size = size;
        Ok(())
    }

    /// Allocates and binds backing memory. Does nothing when memory is already bound.
    pub fn allocate(&mut self, properties: vk::MemoryPropertyFlags) -> GfxResult<()> {
        assert_ne!(self.handle, vk::Buffer::null(), "allocate called before initialize");
        if self.memory != vk::DeviceMemory::null() {
            return Ok(());
        }

        let device = self.ctx.device();
        let requirements = unsafe { device.buffer_memory_requirements(self.handle) };
        let memory = allocate_memory(&self.ctx, &requirements, requirements.size, properties)?;

        if let Err(e) = unsafe { device.bind_buffer_memory(self.handle, memory, 0) } {
            log::error!("Unable to bind buffer memory: {}", e);
            unsafe { device.free_memory(memory) };
            return Err(GraphicsError::InitializationFailed);
        }

        self.memory = memory;
        self.allocation_size = requirements.size;
        Ok(())
    }

    /// Maps the whole allocation on first use and returns the cached pointer afterwards.
    pub fn mapped_memory(&mut self) -> GfxResult<NonNull<u8>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        assert_ne!(self.memory, vk::DeviceMemory::null(), "buffer has no memory to map");

        let ptr = unsafe {
            self.ctx
                .device()
                .map_memory(self.memory, 0, vk::WHOLE_SIZE)
                .map_err(|e| {
                    log::error!("Unable to map buffer memory: {}", e);
                    GraphicsError::from(e)
                })?
        };
        let ptr = NonNull::new(ptr as *mut u8).ok_or(GraphicsError::Unknown)?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    pub fn unmap_memory(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.ctx.device().unmap_memory(self.memory) };
        }
    }

    /// Copies `data` into host-visible memory at byte `offset`, mapping it if needed.
    pub fn write<T: Copy>(&mut self, data: &[T], offset: usize) -> GfxResult<presser::CopyRecord> {
        let base = self.mapped_memory()?;
        write_mapped(base, self.size as usize, data, offset)
    }

    /// Unmaps, frees and destroys. Safe on a buffer that was never initialized.
    pub fn clear(&mut self) {
        self.unmap_memory();
        let device = self.ctx.device();
        if self.memory != vk::DeviceMemory::null() {
            unsafe { device.free_memory(self.memory) };
            self.memory = vk::DeviceMemory::null();
        }
        if self.handle != vk::Buffer::null() {
            unsafe { device.destroy_buffer(self.handle) };
            self.handle = vk::Buffer::null();
        }
        self.size = 0;
        self.allocation_size = 0;
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation_size
    }

    pub fn is_allocated(&self) -> bool {
        self.memory != vk::DeviceMemory::null()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.clear();
    }
}
