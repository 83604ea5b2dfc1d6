use std::marker::PhantomData;
use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::GfxResult;
use crate::renderer::resources::multi_buffer::MultiBuffer;

/// One host-visible copy of `T` per frame in flight.
pub struct UniformBufferObject<T: Pod> {
    buffers: MultiBuffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBufferObject<T> {
    pub fn new(ctx: Arc<DeviceContext>, frames_in_flight: usize) -> GfxResult<Self> {
        let mut buffers = MultiBuffer::new(ctx);
        buffers.initialize(
            std::mem::size_of::<T>() as vk::DeviceSize,
            frames_in_flight,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &[],
        )?;
        buffers.allocate(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)?;
        Ok(Self {
            buffers,
            _marker: PhantomData,
        })
    }

    pub fn write(&mut self, frame: usize, value: &T) -> GfxResult<()> {
        self.buffers.write(frame, bytemuck::bytes_of(value), 0)?;
        Ok(())
    }

    /// Descriptor info covering the slot of `frame`.
    pub fn descriptor_info(&self, frame: usize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffers.buffer(frame),
            offset: 0,
            range: std::mem::size_of::<T>() as vk::DeviceSize,
        }
    }

    pub fn buffer(&self, frame: usize) -> vk::Buffer {
        self.buffers.buffer(frame)
    }

    pub fn frames(&self) -> usize {
        self.buffers.count()
    }
}
