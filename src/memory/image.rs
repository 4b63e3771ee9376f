//! 2-D Image Resources
//!
//! [`ImageCore`] carries everything the image-shaped resources share: the
//! dual primary/staging image handles, tracked layouts, barrier and copy
//! recording, and the lazily created, memoized image view.
//! [`Image`] is the concrete storage-image resource (kernels read and
//! write arbitrary texels, no sampling); [`Texture`](super::texture::Texture)
//! layers a sampler on top of the same core.
//!
//! Layout discipline: every copy routine transitions the images it touches
//! into transfer layouts and leaves them there. Restoring a kernel-ready
//! layout is the job of the recording operation — the staging↔primary sync
//! methods do exactly that, because they know what "ready" means for the
//! resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::device::DeviceContext;
use crate::errors::{BasaltError, Result};
use crate::memory::format::{format_for, infer_tiling};
use crate::memory::tensor::Mapped;
use crate::memory::{
    CopySource, DescriptorWrite, ElementType, Memory, MemoryClass, Ownership, ResourceKind,
    Scalar,
};

#[derive(Debug)]
struct ImageHandle {
    image: vk::Image,
    memory: Option<vk::DeviceMemory>,
    ownership: Ownership,
}

#[derive(Debug)]
struct StagingImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    mapped: Mapped,
    /// Byte offset of the color subresource inside the mapped allocation.
    base_offset: vk::DeviceSize,
    /// Row stride of the linear staging image; may exceed `width * texel`.
    row_pitch: vk::DeviceSize,
}

/// Shared state and recording routines for 2-D image resources.
#[derive(Debug)]
pub struct ImageCore {
    ctx: Arc<DeviceContext>,
    id: Uuid,
    element_type: ElementType,
    memory_class: MemoryClass,
    width: u32,
    height: u32,
    channels: u32,
    tiling: vk::ImageTiling,
    format: vk::Format,
    /// Layout the primary image must sit in for its descriptor to be valid.
    ready_layout: vk::ImageLayout,
    primary: ImageHandle,
    primary_layout: Mutex<vk::ImageLayout>,
    staging: Option<StagingImage>,
    staging_layout: Mutex<vk::ImageLayout>,
    view: Mutex<Option<vk::ImageView>>,
    host_data: RwLock<Vec<u8>>,
    destroyed: AtomicBool,
}

impl ImageCore {
    /// Allocates the primary (and, for host-reachable classes, staging)
    /// images. `tiling = None` infers the tiling from the memory class.
    pub(crate) fn new(
        ctx: Arc<DeviceContext>,
        width: u32,
        height: u32,
        channels: u32,
        element_type: ElementType,
        memory_class: MemoryClass,
        tiling: Option<vk::ImageTiling>,
        data: Option<&[u8]>,
        primary_usage: vk::ImageUsageFlags,
        ready_layout: vk::ImageLayout,
    ) -> Result<Self> {
        if element_type == ElementType::Custom {
            return Err(BasaltError::CustomElementType);
        }
        if memory_class == MemoryClass::Storage {
            return Err(BasaltError::UnsupportedMemoryClass {
                class: memory_class.name(),
                context: "image allocation (use import for Storage-class images)",
            });
        }
        if width == 0 || height == 0 {
            return Err(BasaltError::ZeroSized {
                context: "image extent",
            });
        }
        let format = format_for(channels, element_type)?;
        let tiling = tiling.unwrap_or_else(|| infer_tiling(memory_class));

        // Custom was rejected above.
        let texel = element_type.size_in_bytes().unwrap_or(1);
        let size = vk::DeviceSize::from(width)
            * vk::DeviceSize::from(height)
            * vk::DeviceSize::from(channels)
            * texel as vk::DeviceSize;

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
                    context: "image with initial data (no staging path to upload it)",
                });
            }
        }

        let extent = vk::Extent3D {
            width,
            height,
            depth: 1,
        };
        let (primary_image, primary_memory) = create_image(
            &ctx,
            extent,
            format,
            tiling,
            primary_usage,
            super::tensor::primary_memory_properties(memory_class),
            vk::ImageLayout::UNDEFINED,
        )?;
        let primary = ImageHandle {
            image: primary_image,
            memory: Some(primary_memory),
            ownership: Ownership::Owned,
        };

        let staging = if memory_class.has_staging() {
            match create_staging_image(&ctx, extent, format) {
                Ok(staging) => Some(staging),
                Err(e) => {
                    unsafe {
                        ctx.device().destroy_image(primary_image, None);
                        ctx.device().free_memory(primary_memory, None);
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

        let id = Uuid::new_v4();
        log::debug!(
            "Image {id} created: {width}x{height}x{channels} {}, class {}, tiling {tiling:?}",
            element_type.name(),
            memory_class.name()
        );

        let core = Self {
            ctx,
            id,
            element_type,
            memory_class,
            width,
            height,
            channels,
            tiling,
            format,
            ready_layout,
            primary,
            primary_layout: Mutex::new(vk::ImageLayout::UNDEFINED),
            staging,
            staging_layout: Mutex::new(vk::ImageLayout::PREINITIALIZED),
            view: Mutex::new(None),
            host_data: RwLock::new(host_data),
            destroyed: AtomicBool::new(false),
        };
        if data.is_some() {
            // Seed mapped staging so the first SyncDevice works even if the
            // caller never writes through the host container again.
            core.flush_host_bytes();
        }
        Ok(core)
    }

    /// Wraps an externally owned image as a `Storage`-class resource.
    pub(crate) fn import(
        ctx: Arc<DeviceContext>,
        image: vk::Image,
        current_layout: vk::ImageLayout,
        width: u32,
        height: u32,
        channels: u32,
        element_type: ElementType,
        ready_layout: vk::ImageLayout,
    ) -> Result<Self> {
        if element_type == ElementType::Custom {
            return Err(BasaltError::CustomElementType);
        }
        let format = format_for(channels, element_type)?;
        let id = Uuid::new_v4();
        log::debug!("Image {id} imported (borrowed): {width}x{height}x{channels}");
        Ok(Self {
            ctx,
            id,
            element_type,
            memory_class: MemoryClass::Storage,
            width,
            height,
            channels,
            tiling: infer_tiling(MemoryClass::Storage),
            format,
            ready_layout,
            primary: ImageHandle {
                image,
                memory: None,
                ownership: Ownership::Borrowed,
            },
            primary_layout: Mutex::new(current_layout),
            staging: None,
            staging_layout: Mutex::new(vk::ImageLayout::UNDEFINED),
            view: Mutex::new(None),
            host_data: RwLock::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn ctx(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn tiling(&self) -> vk::ImageTiling {
        self.tiling
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn memory_class(&self) -> MemoryClass {
        self.memory_class
    }

    pub fn memory_size(&self) -> vk::DeviceSize {
        let texel = self.element_type.size_in_bytes().unwrap_or(1) as vk::DeviceSize;
        vk::DeviceSize::from(self.width)
            * vk::DeviceSize::from(self.height)
            * vk::DeviceSize::from(self.channels)
            * texel
    }

    pub fn primary_layout(&self) -> vk::ImageLayout {
        *self.primary_layout.lock()
    }

    pub(crate) fn vk_primary_image(&self) -> vk::Image {
        self.primary.image
    }

    pub(crate) fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }

    pub(crate) fn color_layer(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn check_alive(&self, action: &str) -> Result<()> {
        if !self.is_alive() {
            return Err(BasaltError::ResourceState(format!(
                "{action} on destroyed image {}",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn check_scalar<T: Scalar>(&self) -> Result<()> {
        if T::ELEMENT_TYPE != self.element_type {
            return Err(BasaltError::ElementTypeMismatch {
                requested: T::ELEMENT_TYPE.name(),
                actual: self.element_type.name(),
            });
        }
        Ok(())
    }

    pub(crate) fn vector<T: Scalar>(&self) -> Result<Vec<T>> {
        self.check_alive("vector")?;
        self.check_scalar::<T>()?;
        Ok(bytemuck::cast_slice(&self.host_data.read()).to_vec())
    }

    pub(crate) fn at<T: Scalar>(&self, index: usize) -> Result<T> {
        self.check_alive("at")?;
        self.check_scalar::<T>()?;
        let guard = self.host_data.read();
        let slice: &[T] = bytemuck::cast_slice(&guard);
        slice.get(index).copied().ok_or_else(|| {
            BasaltError::ResourceState(format!(
                "index {index} out of bounds for image of {} elements",
                slice.len()
            ))
        })
    }

    pub(crate) fn set_data<T: Scalar>(&self, data: &[T]) -> Result<()> {
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

    // ------------------------------------------------------------------
    // View / descriptor
    // ------------------------------------------------------------------

    /// The cached 2-D color view over the primary image, created on first
    /// use and reused for the object's lifetime.
    pub(crate) fn view(&self) -> Result<vk::ImageView> {
        self.check_alive("view")?;
        let mut guard = self.view.lock();
        if let Some(view) = *guard {
            return Ok(view);
        }
        let info = vk::ImageViewCreateInfo::default()
            .image(self.primary.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.ctx.device().create_image_view(&info, None) }?;
        *guard = Some(view);
        Ok(view)
    }

    pub(crate) fn descriptor_image_info(
        &self,
        layout: vk::ImageLayout,
        sampler: Option<vk::Sampler>,
    ) -> Result<vk::DescriptorImageInfo> {
        let mut info = vk::DescriptorImageInfo::default()
            .image_view(self.view()?)
            .image_layout(layout);
        if let Some(sampler) = sampler {
            info = info.sampler(sampler);
        }
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Barriers
    // ------------------------------------------------------------------

    /// The raw layout-transition barrier every copy and public barrier
    /// variant funnels through.
    fn record_image_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .image(image)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(src_layout)
            .new_layout(dst_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe {
            self.ctx.device().cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Transitions the primary image with explicit access and stage masks,
    /// updating the tracked layout.
    pub(crate) fn record_primary_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_layout: vk::ImageLayout,
    ) {
        let mut layout = self.primary_layout.lock();
        self.record_image_memory_barrier(
            cmd,
            self.primary.image,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            *layout,
            dst_layout,
        );
        *layout = dst_layout;
    }

    /// Staging equivalent of [`ImageCore::record_primary_image_barrier`].
    pub(crate) fn record_staging_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_layout: vk::ImageLayout,
    ) {
        let Some(staging) = &self.staging else {
            return;
        };
        let mut layout = self.staging_layout.lock();
        self.record_image_memory_barrier(
            cmd,
            staging.image,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            *layout,
            dst_layout,
        );
        *layout = dst_layout;
    }

    /// Transition helper used by the copy routines: moves the primary into
    /// `dst_layout` unless it is already there.
    pub(crate) fn record_primary_layout_transition(
        &self,
        cmd: vk::CommandBuffer,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_layout: vk::ImageLayout,
    ) {
        let mut layout = self.primary_layout.lock();
        if *layout == dst_layout {
            return;
        }
        self.record_image_memory_barrier(
            cmd,
            self.primary.image,
            vk::AccessFlags::MEMORY_WRITE,
            dst_access,
            src_stage,
            dst_stage,
            *layout,
            dst_layout,
        );
        *layout = dst_layout;
    }

    fn record_staging_layout_transition(
        &self,
        cmd: vk::CommandBuffer,
        dst_access: vk::AccessFlags,
        dst_layout: vk::ImageLayout,
    ) {
        let Some(staging) = &self.staging else {
            return;
        };
        let mut layout = self.staging_layout.lock();
        if *layout == dst_layout {
            return;
        }
        self.record_image_memory_barrier(
            cmd,
            staging.image,
            vk::AccessFlags::MEMORY_WRITE,
            dst_access,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::TRANSFER,
            *layout,
            dst_layout,
        );
        *layout = dst_layout;
    }

    // ------------------------------------------------------------------
    // Copies
    // ------------------------------------------------------------------

    /// Image-from-image copy: both primaries end up in transfer layouts.
    pub(crate) fn record_copy_from_image(
        &self,
        cmd: vk::CommandBuffer,
        src: &ImageCore,
    ) -> Result<()> {
        if src.format != self.format {
            return Err(BasaltError::IncompatibleCopy(format!(
                "source format {:?} does not match destination format {:?}",
                src.format, self.format
            )));
        }
        src.record_primary_layout_transition(
            cmd,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        self.record_primary_layout_transition(
            cmd,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::ImageCopy {
            src_subresource: src.color_layer(),
            src_offset: vk::Offset3D::default(),
            dst_subresource: self.color_layer(),
            dst_offset: vk::Offset3D::default(),
            extent: self.extent(),
        };
        unsafe {
            self.ctx.device().cmd_copy_image(
                cmd,
                src.primary.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.primary.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

    /// Buffer-to-image copy into the primary, which ends in the transfer
    /// destination layout.
    pub(crate) fn record_copy_from_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer) {
        self.record_primary_layout_transition(
            cmd,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(self.color_layer())
            .image_extent(self.extent());
        unsafe {
            self.ctx.device().cmd_copy_buffer_to_image(
                cmd,
                src,
                self.primary.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// staging→primary copy followed by the transition that makes the
    /// primary valid for kernel use.
    pub(crate) fn record_sync_staging_to_device(&self, cmd: vk::CommandBuffer) {
        let Some(staging) = &self.staging else {
            return;
        };
        self.record_staging_layout_transition(
            cmd,
            vk::AccessFlags::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        self.record_primary_layout_transition(
            cmd,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::ImageCopy {
            src_subresource: self.color_layer(),
            src_offset: vk::Offset3D::default(),
            dst_subresource: self.color_layer(),
            dst_offset: vk::Offset3D::default(),
            extent: self.extent(),
        };
        unsafe {
            self.ctx.device().cmd_copy_image(
                cmd,
                staging.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.primary.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.record_primary_layout_transition(
            cmd,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            self.ready_layout,
        );
    }

    /// primary→staging copy; the primary is restored to its ready layout
    /// so descriptors stay valid for later dispatches.
    pub(crate) fn record_sync_device_to_staging(&self, cmd: vk::CommandBuffer) {
        let Some(staging) = &self.staging else {
            return;
        };
        self.record_primary_layout_transition(
            cmd,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        self.record_staging_layout_transition(
            cmd,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::ImageCopy {
            src_subresource: self.color_layer(),
            src_offset: vk::Offset3D::default(),
            dst_subresource: self.color_layer(),
            dst_offset: vk::Offset3D::default(),
            extent: self.extent(),
        };
        unsafe {
            self.ctx.device().cmd_copy_image(
                cmd,
                self.primary.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.record_primary_layout_transition(
            cmd,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            self.ready_layout,
        );
    }

    pub(crate) fn ready_layout(&self) -> vk::ImageLayout {
        self.ready_layout
    }

    // ------------------------------------------------------------------
    // Host <-> staging movement (CPU side, honors the linear row pitch)
    // ------------------------------------------------------------------

    fn flush_host_bytes(&self) {
        if let Some(staging) = &self.staging {
            let guard = self.host_data.read();
            let row_bytes = (self.memory_size() / vk::DeviceSize::from(self.height)) as usize;
            for row in 0..self.height as usize {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        guard.as_ptr().add(row * row_bytes),
                        staging.mapped.ptr.add(
                            staging.base_offset as usize + row * staging.row_pitch as usize,
                        ),
                        row_bytes,
                    );
                }
            }
        }
    }

    pub(crate) fn flush_host_to_staging(&self) -> Result<()> {
        self.check_alive("flush_host_to_staging")?;
        self.flush_host_bytes();
        Ok(())
    }

    pub(crate) fn read_back_from_staging(&self) -> Result<()> {
        self.check_alive("read_back_from_staging")?;
        if let Some(staging) = &self.staging {
            let mut guard = self.host_data.write();
            let row_bytes = (self.memory_size() / vk::DeviceSize::from(self.height)) as usize;
            for row in 0..self.height as usize {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        staging.mapped.ptr.add(
                            staging.base_offset as usize + row * staging.row_pitch as usize,
                        ),
                        guard.as_mut_ptr().add(row * row_bytes),
                        row_bytes,
                    );
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Destruction
    // ------------------------------------------------------------------

    /// Idempotent. Frees owned handles, drops the borrowed primary of
    /// `Storage`-class resources.
    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Image {} destroy", self.id);
        let device = self.ctx.device();
        unsafe {
            if let Some(view) = self.view.lock().take() {
                device.destroy_image_view(view, None);
            }
            if let Some(staging) = &self.staging {
                device.unmap_memory(staging.memory);
                device.destroy_image(staging.image, None);
                device.free_memory(staging.memory, None);
            }
            if self.primary.ownership == Ownership::Owned {
                device.destroy_image(self.primary.image, None);
                if let Some(memory) = self.primary.memory {
                    device.free_memory(memory, None);
                }
            }
        }
    }
}

impl Drop for ImageCore {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// Image — concrete storage-image resource
// ============================================================================

/// Storage image: kernels read and write arbitrary texels, no filtering.
#[derive(Debug)]
pub struct Image {
    core: ImageCore,
}

impl Image {
    /// Usage the primary image is created with. Transfer both ways so the
    /// image can be copied to and from in addition to storage access.
    pub(crate) fn primary_usage() -> vk::ImageUsageFlags {
        vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
    }

    pub(crate) fn new(
        ctx: Arc<DeviceContext>,
        width: u32,
        height: u32,
        channels: u32,
        element_type: ElementType,
        memory_class: MemoryClass,
        tiling: Option<vk::ImageTiling>,
        data: Option<&[u8]>,
    ) -> Result<Arc<Self>> {
        let core = ImageCore::new(
            ctx,
            width,
            height,
            channels,
            element_type,
            memory_class,
            tiling,
            data,
            Self::primary_usage(),
            vk::ImageLayout::GENERAL,
        )?;
        Ok(Arc::new(Self { core }))
    }

    /// Wraps an externally owned image; `destroy()` will only drop the
    /// local reference.
    pub(crate) fn import(
        ctx: Arc<DeviceContext>,
        image: vk::Image,
        current_layout: vk::ImageLayout,
        width: u32,
        height: u32,
        channels: u32,
        element_type: ElementType,
    ) -> Result<Arc<Self>> {
        let core = ImageCore::import(
            ctx,
            image,
            current_layout,
            width,
            height,
            channels,
            element_type,
            vk::ImageLayout::GENERAL,
        )?;
        Ok(Arc::new(Self { core }))
    }

    pub fn width(&self) -> u32 {
        self.core.width()
    }

    pub fn height(&self) -> u32 {
        self.core.height()
    }

    pub fn channels(&self) -> u32 {
        self.core.channels()
    }

    pub fn format(&self) -> vk::Format {
        self.core.format()
    }

    pub fn tiling(&self) -> vk::ImageTiling {
        self.core.tiling()
    }

    pub fn primary_layout(&self) -> vk::ImageLayout {
        self.core.primary_layout()
    }

    /// Host-visible contents reinterpreted as `T`.
    pub fn vector<T: Scalar>(&self) -> Result<Vec<T>> {
        self.core.vector::<T>()
    }

    /// Single-element read from the host-visible container.
    pub fn at<T: Scalar>(&self, index: usize) -> Result<T> {
        self.core.at::<T>(index)
    }

    /// Replaces the host container. Takes effect on the device after the
    /// next SyncDevice evaluation.
    pub fn set_data<T: Scalar>(&self, data: &[T]) -> Result<()> {
        self.core.set_data(data)
    }

    /// Public barrier variant that also transitions the primary layout.
    pub fn record_primary_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_layout: vk::ImageLayout,
    ) -> Result<()> {
        self.core.check_alive("record_primary_image_barrier")?;
        self.core
            .record_primary_image_barrier(cmd, src_access, dst_access, src_stage, dst_stage, dst_layout);
        Ok(())
    }

    /// Staging counterpart of [`Image::record_primary_image_barrier`].
    pub fn record_staging_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_layout: vk::ImageLayout,
    ) -> Result<()> {
        self.core.check_alive("record_staging_image_barrier")?;
        self.core
            .record_staging_image_barrier(cmd, src_access, dst_access, src_stage, dst_stage, dst_layout);
        Ok(())
    }
}

impl Memory for Image {
    fn id(&self) -> Uuid {
        self.core.id()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::StorageImage
    }

    fn element_type(&self) -> ElementType {
        self.core.element_type()
    }

    fn memory_class(&self) -> MemoryClass {
        self.core.memory_class()
    }

    fn memory_size(&self) -> vk::DeviceSize {
        self.core.memory_size()
    }

    fn is_initialized(&self) -> bool {
        self.core.is_alive()
    }

    fn destroy(&self) {
        self.core.destroy();
    }

    fn descriptor_type(&self) -> vk::DescriptorType {
        vk::DescriptorType::STORAGE_IMAGE
    }

    fn descriptor_write(&self) -> Result<DescriptorWrite> {
        self.core.check_alive("descriptor_write")?;
        Ok(DescriptorWrite::Image(
            self.core
                .descriptor_image_info(vk::ImageLayout::GENERAL, None)?,
        ))
    }

    fn copy_source(&self) -> Result<CopySource<'_>> {
        self.core.check_alive("copy_source")?;
        Ok(CopySource::Image { core: &self.core })
    }

    fn record_copy_from(&self, cmd: vk::CommandBuffer, source: &dyn Memory) -> Result<()> {
        self.core.check_alive("record_copy_from")?;
        if source.memory_size() != self.memory_size() {
            return Err(BasaltError::IncompatibleCopy(format!(
                "source is {} bytes, destination image is {} bytes",
                source.memory_size(),
                self.memory_size()
            )));
        }
        match source.copy_source()? {
            CopySource::Image { core } => self.core.record_copy_from_image(cmd, core),
            CopySource::Buffer { buffer, .. } => {
                self.core.record_copy_from_buffer(cmd, buffer);
                Ok(())
            }
        }
    }

    fn record_copy_from_staging_to_device(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.core.check_alive("record_copy_from_staging_to_device")?;
        self.core.record_sync_staging_to_device(cmd);
        Ok(())
    }

    fn record_copy_from_device_to_staging(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.core.check_alive("record_copy_from_device_to_staging")?;
        self.core.record_sync_device_to_staging(cmd);
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
        self.core.check_alive("record_primary_memory_barrier")?;
        // An image-shaped memory barrier doubles as the transition into the
        // kernel-ready layout, so dispatch barriers leave descriptors valid.
        self.core.record_primary_image_barrier(
            cmd,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            self.core.ready_layout(),
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
        self.core.check_alive("record_staging_memory_barrier")?;
        self.core.record_staging_image_barrier(
            cmd,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            vk::ImageLayout::GENERAL,
        );
        Ok(())
    }

    fn flush_host_to_staging(&self) -> Result<()> {
        self.core.flush_host_to_staging()
    }

    fn read_back_from_staging(&self) -> Result<()> {
        self.core.read_back_from_staging()
    }
}

// ============================================================================
// Allocation helpers
// ============================================================================

pub(crate) fn create_image(
    ctx: &DeviceContext,
    extent: vk::Extent3D,
    format: vk::Format,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    properties: vk::MemoryPropertyFlags,
    initial_layout: vk::ImageLayout,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let device = ctx.device();
    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(extent)
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(tiling)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(initial_layout);
    let image = unsafe { device.create_image(&info, None) }?;

    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type = match ctx.find_memory_type(requirements.memory_type_bits, properties) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e.into());
        }
    };

    if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
        unsafe {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
        }
        return Err(e.into());
    }

    Ok((image, memory))
}

fn create_staging_image(
    ctx: &DeviceContext,
    extent: vk::Extent3D,
    format: vk::Format,
) -> Result<StagingImage> {
    let (image, memory) = create_image(
        ctx,
        extent,
        format,
        vk::ImageTiling::LINEAR,
        vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        vk::ImageLayout::PREINITIALIZED,
    )?;

    let device = ctx.device();
    let subresource = vk::ImageSubresource {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        array_layer: 0,
    };
    let layout = unsafe { device.get_image_subresource_layout(image, subresource) };

    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let ptr = match unsafe {
        device.map_memory(memory, 0, requirements.size, vk::MemoryMapFlags::empty())
    } {
        Ok(ptr) => ptr.cast::<u8>(),
        Err(e) => {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(e.into());
        }
    };

    Ok(StagingImage {
        image,
        memory,
        mapped: Mapped {
            ptr,
            len: requirements.size as usize,
        },
        base_offset: layout.offset,
        row_pitch: layout.row_pitch,
    })
}
