//! Linear Buffer Resources
//!
//! [`Tensor`] is the flat-byte-array specialization of [`Memory`]: a
//! device-local primary buffer, an optional persistently-mapped staging
//! buffer, and a host-side byte container that sync operations move data
//! through.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::device::DeviceContext;
use crate::errors::{BasaltError, Result};
use crate::memory::{
    CopySource, DescriptorWrite, ElementType, Memory, MemoryClass, Ownership, ResourceKind,
    Scalar,
};

/// A persistently mapped host-visible allocation.
///
/// The raw pointer is only dereferenced from the pre/post-eval hooks of a
/// sequence; cross-sequence exclusion is the caller's responsibility, per
/// the crate's concurrency model.
#[derive(Debug)]
pub(crate) struct Mapped {
    pub ptr: *mut u8,
    pub len: usize,
}

unsafe impl Send for Mapped {}
unsafe impl Sync for Mapped {}

#[derive(Debug)]
pub(crate) struct BufferHandle {
    pub buffer: vk::Buffer,
    pub memory: Option<vk::DeviceMemory>,
    pub ownership: Ownership,
}

#[derive(Debug)]
struct StagingBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: Mapped,
}

/// Linear GPU buffer with an element type and a host-side container.
#[derive(Debug)]
pub struct Tensor {
    ctx: Arc<DeviceContext>,
    id: Uuid,
    element_type: ElementType,
    stride: vk::DeviceSize,
    len: usize,
    memory_class: MemoryClass,
    primary: BufferHandle,
    staging: Option<StagingBuffer>,
    host_data: RwLock<Vec<u8>>,
    destroyed: AtomicBool,
}

impl Tensor {
    /// Creates a tensor holding `len` elements of `element_type`, optionally
    /// seeded with `data`.
    ///
    /// Classes without a staging path reject initial data: there is no
    /// route by which the bytes could ever reach the device.
    pub(crate) fn new(
        ctx: Arc<DeviceContext>,
        data: Option<&[u8]>,
        len: usize,
        element_type: ElementType,
        stride: vk::DeviceSize,
        memory_class: MemoryClass,
    ) -> Result<Arc<Self>> {
        if memory_class == MemoryClass::Storage {
            return Err(BasaltError::UnsupportedMemoryClass {
                class: memory_class.name(),
                context: "tensor allocation (use import for Storage-class buffers)",
            });
        }

        if stride == 0 {
            return Err(BasaltError::ZeroSized {
                context: "tensor element stride",
            });
        }
        if len == 0 {
            return Err(BasaltError::ZeroSized {
                context: "tensor length",
            });
        }

        let size = len as vk::DeviceSize * stride;
        if let Some(bytes) = data {
            if bytes.len() as vk::DeviceSize != size {
                return Err(BasaltError::DataSizeMismatch {
                    provided: bytes.len(),
                    expected: size as usize,
                });
            }
            if !memory_class.has_staging() {
                return Err(BasaltError::UnsupportedMemoryClass {
                    class: memory_class.name(),
                    context: "tensor with initial data (no staging path to upload it)",
                });
            }
        }

        let primary_props = primary_memory_properties(memory_class);
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;
        let (buffer, memory) = create_buffer(&ctx, size, usage, primary_props)?;
        let primary = BufferHandle {
            buffer,
            memory: Some(memory),
            ownership: Ownership::Owned,
        };

        let staging = if memory_class.has_staging() {
            match create_staging_buffer(&ctx, size) {
                Ok(staging) => Some(staging),
                Err(e) => {
                    unsafe {
                        ctx.device().destroy_buffer(buffer, None);
                        ctx.device().free_memory(memory, None);
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        let host_data = match data {
            Some(bytes) => bytes.to_vec(),
            None => vec![0u8; size as usize],
        };
        if let (Some(staging), Some(bytes)) = (&staging, data) {
            // Seed the mapped staging region so the first SyncDevice works
            // even if the caller never touches the host container.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), staging.mapped.ptr, bytes.len());
            }
        }

        let id = Uuid::new_v4();
        log::debug!(
            "Tensor {id} created: {len} x {stride}B elements, class {}",
            memory_class.name()
        );

        Ok(Arc::new(Self {
            ctx,
            id,
            element_type,
            stride,
            len,
            memory_class,
            primary,
            staging,
            host_data: RwLock::new(host_data),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Wraps an externally owned buffer as a `Storage`-class tensor.
    /// Destruction releases only the local reference.
    pub(crate) fn import(
        ctx: Arc<DeviceContext>,
        buffer: vk::Buffer,
        len: usize,
        element_type: ElementType,
        stride: vk::DeviceSize,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        log::debug!("Tensor {id} imported (borrowed), {len} x {stride}B elements");
        Arc::new(Self {
            ctx,
            id,
            element_type,
            stride,
            len,
            memory_class: MemoryClass::Storage,
            primary: BufferHandle {
                buffer,
                memory: None,
                ownership: Ownership::Borrowed,
            },
            staging: None,
            host_data: RwLock::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replaces the host container contents. The device copy is untouched
    /// until a SyncDevice operation is evaluated.
    pub fn set_data<T: Scalar>(&self, data: &[T]) -> Result<()> {
        self.check_alive("set_data")?;
        self.check_scalar::<T>()?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize != self.memory_size() {
            return Err(BasaltError::DataSizeMismatch {
                provided: bytes.len(),
                expected: self.memory_size() as usize,
            });
        }
        self.host_data.write().copy_from_slice(bytes);
        Ok(())
    }

    /// Host-visible contents reinterpreted as `T`. Fails when `T` disagrees
    /// with the tensor's element type.
    pub fn vector<T: Scalar>(&self) -> Result<Vec<T>> {
        self.check_alive("vector")?;
        self.check_scalar::<T>()?;
        Ok(bytemuck::cast_slice(&self.host_data.read()).to_vec())
    }

    /// Single-element read from the host-visible container.
    pub fn at<T: Scalar>(&self, index: usize) -> Result<T> {
        self.check_alive("at")?;
        self.check_scalar::<T>()?;
        let guard = self.host_data.read();
        let slice: &[T] = bytemuck::cast_slice(&guard);
        slice.get(index).copied().ok_or_else(|| {
            BasaltError::ResourceState(format!(
                "index {index} out of bounds for tensor of {} elements",
                self.len
            ))
        })
    }

    fn check_scalar<T: Scalar>(&self) -> Result<()> {
        if T::ELEMENT_TYPE != self.element_type {
            return Err(BasaltError::ElementTypeMismatch {
                requested: T::ELEMENT_TYPE.name(),
                actual: self.element_type.name(),
            });
        }
        Ok(())
    }

    fn check_alive(&self, action: &str) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(BasaltError::ResourceState(format!(
                "{action} on destroyed tensor {}",
                self.id
            )));
        }
        Ok(())
    }

    fn record_buffer_barrier(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let barrier = vk::BufferMemoryBarrier::default()
            .buffer(buffer)
            .offset(0)
            .size(self.memory_size())
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
        unsafe {
            self.ctx.device().cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
    }
}

impl Memory for Tensor {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Buffer
    }

    fn element_type(&self) -> ElementType {
        self.element_type
    }

    fn memory_class(&self) -> MemoryClass {
        self.memory_class
    }

    fn memory_size(&self) -> vk::DeviceSize {
        self.len as vk::DeviceSize * self.stride
    }

    fn is_initialized(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Tensor {} destroy", self.id);
        let device = self.ctx.device();
        unsafe {
            if let Some(staging) = &self.staging {
                device.unmap_memory(staging.memory);
                device.destroy_buffer(staging.buffer, None);
                device.free_memory(staging.memory, None);
            }
            if self.primary.ownership == Ownership::Owned {
                device.destroy_buffer(self.primary.buffer, None);
                if let Some(memory) = self.primary.memory {
                    device.free_memory(memory, None);
                }
            }
        }
    }

    fn descriptor_type(&self) -> vk::DescriptorType {
        vk::DescriptorType::STORAGE_BUFFER
    }

    fn descriptor_write(&self) -> Result<DescriptorWrite> {
        self.check_alive("descriptor_write")?;
        Ok(DescriptorWrite::Buffer(
            vk::DescriptorBufferInfo::default()
                .buffer(self.primary.buffer)
                .offset(0)
                .range(self.memory_size()),
        ))
    }

    fn copy_source(&self) -> Result<CopySource<'_>> {
        self.check_alive("copy_source")?;
        Ok(CopySource::Buffer {
            buffer: self.primary.buffer,
            size: self.memory_size(),
        })
    }

    fn record_copy_from(&self, cmd: vk::CommandBuffer, source: &dyn Memory) -> Result<()> {
        self.check_alive("record_copy_from")?;
        if source.memory_size() != self.memory_size() {
            return Err(BasaltError::IncompatibleCopy(format!(
                "source is {} bytes, destination tensor is {} bytes",
                source.memory_size(),
                self.memory_size()
            )));
        }
        match source.copy_source()? {
            CopySource::Buffer { buffer, size } => {
                let region = vk::BufferCopy::default().size(size);
                unsafe {
                    self.ctx
                        .device()
                        .cmd_copy_buffer(cmd, buffer, self.primary.buffer, &[region]);
                }
            }
            CopySource::Image { core } => {
                // Image source must sit in a transfer layout; the copy
                // leaves it there, restoration is the caller's concern.
                core.record_primary_layout_transition(
                    cmd,
                    vk::AccessFlags::TRANSFER_READ,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(core.color_layer())
                    .image_extent(core.extent());
                unsafe {
                    self.ctx.device().cmd_copy_image_to_buffer(
                        cmd,
                        core.vk_primary_image(),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        self.primary.buffer,
                        &[region],
                    );
                }
            }
        }
        Ok(())
    }

    fn record_copy_from_staging_to_device(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.check_alive("record_copy_from_staging_to_device")?;
        let Some(staging) = &self.staging else {
            return Ok(());
        };
        let region = vk::BufferCopy::default().size(self.memory_size());
        unsafe {
            self.ctx
                .device()
                .cmd_copy_buffer(cmd, staging.buffer, self.primary.buffer, &[region]);
        }
        // Make the freshly copied data visible to compute reads.
        self.record_buffer_barrier(
            cmd,
            self.primary.buffer,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        );
        Ok(())
    }

    fn record_copy_from_device_to_staging(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.check_alive("record_copy_from_device_to_staging")?;
        let Some(staging) = &self.staging else {
            return Ok(());
        };
        self.record_buffer_barrier(
            cmd,
            self.primary.buffer,
            vk::AccessFlags::SHADER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::TRANSFER,
        );
        let region = vk::BufferCopy::default().size(self.memory_size());
        unsafe {
            self.ctx
                .device()
                .cmd_copy_buffer(cmd, self.primary.buffer, staging.buffer, &[region]);
        }
        Ok(())
    }

    fn record_primary_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) -> Result<()> {
        self.check_alive("record_primary_memory_barrier")?;
        self.record_buffer_barrier(
            cmd,
            self.primary.buffer,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        );
        Ok(())
    }

    fn record_staging_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) -> Result<()> {
        self.check_alive("record_staging_memory_barrier")?;
        if let Some(staging) = &self.staging {
            self.record_buffer_barrier(
                cmd,
                staging.buffer,
                src_access,
                dst_access,
                src_stage,
                dst_stage,
            );
        }
        Ok(())
    }

    fn flush_host_to_staging(&self) -> Result<()> {
        self.check_alive("flush_host_to_staging")?;
        if let Some(staging) = &self.staging {
            let guard = self.host_data.read();
            unsafe {
                std::ptr::copy_nonoverlapping(guard.as_ptr(), staging.mapped.ptr, guard.len());
            }
        }
        Ok(())
    }

    fn read_back_from_staging(&self) -> Result<()> {
        self.check_alive("read_back_from_staging")?;
        if let Some(staging) = &self.staging {
            let mut guard = self.host_data.write();
            unsafe {
                std::ptr::copy_nonoverlapping(
                    staging.mapped.ptr,
                    guard.as_mut_ptr(),
                    staging.mapped.len,
                );
            }
        }
        Ok(())
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// Allocation helpers
// ============================================================================

pub(crate) fn primary_memory_properties(class: MemoryClass) -> vk::MemoryPropertyFlags {
    match class {
        MemoryClass::DeviceAndHost => {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
        }
        _ => vk::MemoryPropertyFlags::DEVICE_LOCAL,
    }
}

pub(crate) fn create_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let device = ctx.device();
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&buffer_info, None) }?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory_type = match ctx.find_memory_type(requirements.memory_type_bits, properties) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }
    };

    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(e.into());
    }

    Ok((buffer, memory))
}

fn create_staging_buffer(ctx: &DeviceContext, size: vk::DeviceSize) -> Result<StagingBuffer> {
    let (buffer, memory) = create_buffer(
        ctx,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    let ptr = match unsafe {
        ctx.device()
            .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
    } {
        Ok(ptr) => ptr.cast::<u8>(),
        Err(e) => {
            unsafe {
                ctx.device().destroy_buffer(buffer, None);
                ctx.device().free_memory(memory, None);
            }
            return Err(e.into());
        }
    };
    Ok(StagingBuffer {
        buffer,
        memory,
        mapped: Mapped {
            ptr,
            len: size as usize,
        },
    })
}
