use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};

/// A buffer bundled with its memory allocation. The pair is created together
/// and destroyed together, so the two can never go out of step.
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl AllocatedBuffer {
    pub fn new(
        buffer_size: u64,
        buffer_usage: vk::BufferUsageFlags,
        alloc_name: &str,
        alloc_loc: MemoryLocation,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(buffer_size)
                .usage(buffer_usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let reqs = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name: alloc_name,
                requirements: reqs,
                location: alloc_loc,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        unsafe {
            device.bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset(),
            )?;
        }

        Ok(Self {
            buffer,
            size: buffer_size,

            allocation: Some(allocation),
            memory_allocator,
            device,
        })
    }

    /// Copy `data` into the buffer's host-visible mapping.
    /// The allocation must live in CPU-addressable memory.
    pub fn write<T>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> Result<presser::CopyRecord>
    where
        T: Copy,
    {
        let allocation = self
            .allocation
            .as_mut()
            .ok_or_else(|| eyre!("Buffer allocation already released"))?;
        Ok(presser::copy_from_slice_to_offset(
            data,
            allocation,
            start_offset,
        )?)
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Ok(mut allocator) = self.memory_allocator.lock() {
                if let Err(err) = allocator.free(allocation) {
                    log::error!("Failed to free buffer allocation: {err}");
                }
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}
