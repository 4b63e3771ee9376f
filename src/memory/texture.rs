//! Sampled Textures
//!
//! A [`Texture`] is an image plus a sampler: it binds as a combined
//! image/sampler descriptor and sits in the read-only shader layout while
//! kernels use it, so filtered `texture()` reads work but storage writes do
//! not. Everything image-shaped is delegated to [`ImageCore`]; this module
//! only adds sampler construction and the stricter ready layout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;

use crate::device::DeviceContext;
use crate::errors::Result;
use crate::memory::image::ImageCore;
use crate::memory::{
    CopySource, DescriptorWrite, ElementType, Memory, MemoryClass, ResourceKind, Scalar,
};

/// Sampler magnification/minification filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

impl Filter {
    fn to_vk(self) -> vk::Filter {
        match self {
            Self::Nearest => vk::Filter::NEAREST,
            Self::Linear => vk::Filter::LINEAR,
        }
    }
}

/// Sampler behavior for coordinates outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl AddressMode {
    fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            Self::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            Self::Repeat => vk::SamplerAddressMode::REPEAT,
            Self::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        }
    }
}

/// Sampled image: bound as a combined image/sampler, read-only to kernels.
#[derive(Debug)]
pub struct Texture {
    core: ImageCore,
    sampler: vk::Sampler,
    sampler_destroyed: AtomicBool,
}

impl Texture {
    /// No storage bit: the primary only needs sampling and transfer access.
    fn primary_usage() -> vk::ImageUsageFlags {
        vk::ImageUsageFlags::SAMPLED
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
        filter: Filter,
        address_mode: AddressMode,
    ) -> Result<Arc<Self>> {
        let core = ImageCore::new(
            ctx.clone(),
            width,
            height,
            channels,
            element_type,
            memory_class,
            tiling,
            data,
            Self::primary_usage(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        let sampler = match create_sampler(&ctx, filter, address_mode) {
            Ok(sampler) => sampler,
            Err(e) => {
                core.destroy();
                return Err(e);
            }
        };
        Ok(Arc::new(Self {
            core,
            sampler,
            sampler_destroyed: AtomicBool::new(false),
        }))
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

    pub fn vector<T: Scalar>(&self) -> Result<Vec<T>> {
        self.core.vector::<T>()
    }

    pub fn at<T: Scalar>(&self, index: usize) -> Result<T> {
        self.core.at::<T>(index)
    }

    /// Replaces the host container. Reaches the device on the next
    /// SyncDevice evaluation.
    pub fn set_data<T: Scalar>(&self, data: &[T]) -> Result<()> {
        self.core.set_data(data)
    }
}

impl Memory for Texture {
    fn id(&self) -> uuid::Uuid {
        self.core.id()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::SampledImage
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

    /// The sampler goes first, while the device context behind the core is
    /// still guaranteed alive. Idempotent like the core's destroy.
    fn destroy(&self) {
        if !self.sampler_destroyed.swap(true, Ordering::AcqRel) {
            // Safe relative to in-flight work only after the queue drained;
            // same contract as every other destroy in the crate.
            unsafe {
                self.core.ctx().device().destroy_sampler(self.sampler, None);
            }
        }
        self.core.destroy();
    }

    fn descriptor_type(&self) -> vk::DescriptorType {
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    }

    fn descriptor_write(&self) -> Result<DescriptorWrite> {
        self.core.check_alive("descriptor_write")?;
        Ok(DescriptorWrite::Image(self.core.descriptor_image_info(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Some(self.sampler),
        )?))
    }

    fn copy_source(&self) -> Result<CopySource<'_>> {
        self.core.check_alive("copy_source")?;
        Ok(CopySource::Image { core: &self.core })
    }

    fn record_copy_from(&self, cmd: vk::CommandBuffer, source: &dyn Memory) -> Result<()> {
        self.core.check_alive("record_copy_from")?;
        if source.memory_size() != self.memory_size() {
            return Err(crate::errors::BasaltError::IncompatibleCopy(format!(
                "source is {} bytes, destination texture is {} bytes",
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
        // Doubles as the transition back into the shader-read-only layout.
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

impl Drop for Texture {
    fn drop(&mut self) {
        Memory::destroy(self);
    }
}

fn create_sampler(
    ctx: &DeviceContext,
    filter: Filter,
    address_mode: AddressMode,
) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter.to_vk())
        .min_filter(filter.to_vk())
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(address_mode.to_vk())
        .address_mode_v(address_mode.to_vk())
        .address_mode_w(address_mode.to_vk())
        .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
        .unnormalized_coordinates(false);
    Ok(unsafe { ctx.device().create_sampler(&info, None) }?)
}
