use std::ptr::NonNull;
use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{GfxResult, GraphicsError};
use crate::renderer::resources::{allocate_memory, sharing_mode, write_mapped};

/// N equally sized buffers behind a single allocation, one per frame in flight.
///
/// The per-slot size is rounded up to the alignment the first buffer reports, so slot `i`
/// lives at `size_per_buffer * i` and slots never overlap.
pub struct MultiBuffer {
    buffers: Vec<vk::Buffer>,
    memory: vk::DeviceMemory,
    size_per_buffer: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,

    ctx: Arc<DeviceContext>,
}

pub(crate) fn align_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    assert!(alignment.is_power_of_two(), "alignment {} is not a power of two", alignment);
    (size + alignment - 1) & !(alignment - 1)
}

impl MultiBuffer {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            buffers: Vec::new(),
            memory: vk::DeviceMemory::null(),
            size_per_buffer: 0,
            mapped: None,
            ctx,
        }
    }

    pub fn initialize(
        &mut self,
        size_per_buffer: vk::DeviceSize,
        count: usize,
        usage: vk::BufferUsageFlags,
        queue_families: &[u32],
    ) -> GfxResult<()> {
        assert!(self.buffers.is_empty(), "multi buffer already initialized");

        let (mode, families) = sharing_mode(queue_families);
        let info = vk::BufferCreateInfo::default()
            .size(size_per_buffer)
            .usage(usage)
            .sharing_mode(mode)
            .queue_family_indices(&families);

        self.buffers.reserve(count);
        for _ in 0..count {
            match unsafe { self.ctx.device().create_buffer(&info) } {
                Ok(buffer) => self.buffers.push(buffer),
                Err(e) => {
                    log::error!("Unable to create buffer {} of {}: {}", self.buffers.len(), count, e);
                    self.clear();
                    return Err(GraphicsError::InitializationFailed);
                }
            }
        }
        self.size_per_buffer = size_per_buffer;
        Ok(())
    }

    /// One allocation for every slot, bound slot by slot. Does nothing when already allocated.
    pub fn allocate(&mut self, properties: vk::MemoryPropertyFlags) -> GfxResult<()> {
        if self.memory != vk::DeviceMemory::null() || self.buffers.is_empty() {
            return Ok(());
        }

        let device = self.ctx.device();
        let requirements = unsafe { device.buffer_memory_requirements(self.buffers[0]) };
        let size_per_buffer = align_up(
            requirements.size.max(self.size_per_buffer),
            requirements.alignment,
        );
        let total = size_per_buffer * self.buffers.len() as vk::DeviceSize;

        let memory = allocate_memory(&self.ctx, &requirements, total, properties)?;
        for (i, buffer) in self.buffers.iter().enumerate() {
            let offset = size_per_buffer * i as vk::DeviceSize;
            if let Err(e) = unsafe { device.bind_buffer_memory(*buffer, memory, offset) } {
                log::error!("Unable to bind buffer {} at offset {}: {}", i, offset, e);
                unsafe { device.free_memory(memory) };
                return Err(GraphicsError::InitializationFailed);
            }
        }

        self.memory = memory;
        self.size_per_buffer = size_per_buffer;
        Ok(())
    }

    /// Pointer to slot `index`. The allocation is mapped once on first use.
    pub fn mapped_memory(&mut self, index: usize) -> GfxResult<NonNull<u8>> {
        assert!(index < self.buffers.len(), "slot {} out of range", index);
        let base = match self.mapped {
            Some(base) => base,
            None => {
                assert_ne!(self.memory, vk::DeviceMemory::null(), "multi buffer has no memory to map");
                let ptr = unsafe {
                    self.ctx
                        .device()
                        .map_memory(self.memory, 0, vk::WHOLE_SIZE)
                        .map_err(GraphicsError::from)?
                };
                let base = NonNull::new(ptr as *mut u8).ok_or(GraphicsError::Unknown)?;
                self.mapped = Some(base);
                base
            }
        };
        // The slot lies inside the mapped allocation
        Ok(unsafe { base.add(self.offset(index) as usize) })
    }

    pub fn unmap_memory(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.ctx.device().unmap_memory(self.memory) };
        }
    }

    /// Copies `data` into slot `index` at byte `offset` within the slot.
    pub fn write<T: Copy>(
        &mut self,
        index: usize,
        data: &[T],
        offset: usize,
    ) -> GfxResult<presser::CopyRecord> {
        let base = self.mapped_memory(index)?;
        write_mapped(base, self.size_per_buffer as usize, data, offset)
    }

    pub fn offset(&self, index: usize) -> vk::DeviceSize {
        self.size_per_buffer * index as vk::DeviceSize
    }

    pub fn size_per_buffer(&self) -> vk::DeviceSize {
        self.size_per_buffer
    }

    pub fn buffer(&self, index: usize) -> vk::Buffer {
        self.buffers[index]
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn clear(&mut self) {
        self.unmap_memory();
        let device = self.ctx.device();
        if self.memory != vk::DeviceMemory::null() {
            unsafe { device.free_memory(self.memory) };
            self.memory = vk::DeviceMemory::null();
        }
        for buffer in self.buffers.drain(..) {
            unsafe { device.destroy_buffer(buffer) };
        }
        self.size_per_buffer = 0;
    }
}

impl Drop for MultiBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::contexts::device_ctx::mock::{mock_context, Event};

    fn bound_offsets(events: &[Event]) -> Vec<vk::DeviceSize> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::BindBufferMemory { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn aligned_slots_are_packed_back_to_back() {
        let (mock, ctx) = mock_context(false);
        mock.state().buffer_alignment = 64;
        let mut buffer = MultiBuffer::new(ctx);
        buffer.initialize(256, 3, vk::BufferUsageFlags::UNIFORM_BUFFER, &[]).unwrap();
        buffer.allocate(vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();

        assert_eq!(buffer.size_per_buffer(), 256);
        assert_eq!((0..3).map(|i| buffer.offset(i)).collect::<Vec<_>>(), vec![0, 256, 512]);
        let state = mock.state();
        assert_eq!(bound_offsets(&state.events), vec![0, 256, 512]);
        assert_eq!(state.allocations(), 1);
    }

    #[test]
    fn unaligned_slot_size_is_rounded_up() {
        let (mock, ctx) = mock_context(false);
        mock.state().buffer_alignment = 64;
        let mut buffer = MultiBuffer::new(ctx);
        buffer.initialize(200, 3, vk::BufferUsageFlags::UNIFORM_BUFFER, &[]).unwrap();
        buffer.allocate(vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();

        assert_eq!(buffer.size_per_buffer(), 256);
        assert_eq!((0..3).map(|i| buffer.offset(i)).collect::<Vec<_>>(), vec![0, 256, 512]);
        assert!(mock.state().events.iter().any(|e| matches!(
            e,
            Event::AllocateMemory { size: 768, .. }
        )));
    }

    #[test]
    fn round_up_is_a_covering_multiple() {
        for alignment in [1u64, 4, 64, 256] {
            for size in [1u64, 63, 64, 65, 200, 1000] {
                let rounded = align_up(size, alignment);
                assert!(rounded >= size);
                assert_eq!(rounded % alignment, 0);
                assert!(rounded - size < alignment);
            }
        }
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_is_rejected() {
        align_up(100, 48);
    }

    #[test]
    fn slot_pointers_are_offset_from_one_mapping() {
        let (mock, ctx) = mock_context(false);
        let mut buffer = MultiBuffer::new(ctx);
        buffer.initialize(64, 2, vk::BufferUsageFlags::UNIFORM_BUFFER, &[]).unwrap();
        buffer.allocate(vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert!(!mock.state().mapped.contains(&buffer.memory()));

        let first = buffer.mapped_memory(0).unwrap();
        let second = buffer.mapped_memory(1).unwrap();
        assert_eq!(second.as_ptr() as usize - first.as_ptr() as usize, 64);

        buffer.write(1, &[5u8; 4], 0).unwrap();
        let state = mock.state();
        assert_eq!(&state.memory[&buffer.memory()][64..68], &[5, 5, 5, 5]);
    }

    #[test]
    fn allocate_twice_allocates_once() {
        let (mock, ctx) = mock_context(false);
        let mut buffer = MultiBuffer::new(ctx);
        buffer.initialize(64, 3, vk::BufferUsageFlags::UNIFORM_BUFFER, &[]).unwrap();
        buffer.allocate(vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        buffer.allocate(vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(mock.state().allocations(), 1);
    }
}
