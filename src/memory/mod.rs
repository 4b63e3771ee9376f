//! GPU Memory Resources
//!
//! Shared vocabulary for every memory object the crate manages: element
//! types, memory classes, handle ownership, the object-safe [`Memory`]
//! trait, and the closed [`CopySource`] variant that copy recording
//! dispatches over.
//!
//! Instead of a deep type hierarchy, the concrete resources are three
//! independent structs — [`Tensor`](tensor::Tensor),
//! [`Image`](image::Image) and [`Texture`](texture::Texture) — that share
//! helper routines through composition. [`Memory`] is the only polymorphic
//! seam; operations hold resources as `Arc<dyn Memory>`.

pub mod format;
pub mod image;
pub mod tensor;
pub mod texture;

use ash::vk;
use uuid::Uuid;

use crate::errors::Result;

pub use image::Image;
pub use tensor::Tensor;
pub use texture::{AddressMode, Filter, Texture};

// ============================================================================
// Tags
// ============================================================================

/// Element type of a resource's contents.
///
/// `Custom` is only legal for tensors; image formats cannot be derived from
/// an opaque element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    UInt8,
    Int32,
    UInt32,
    Float32,
    Float64,
    /// Opaque element with a caller-supplied stride. Tensors only.
    Custom,
}

impl ElementType {
    /// Byte size of one element, or `None` for `Custom` (the stride is
    /// supplied by the caller at construction).
    pub fn size_in_bytes(self) -> Option<usize> {
        match self {
            Self::UInt8 => Some(1),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Float64 => Some(8),
            Self::Custom => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::UInt8 => "UInt8",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::Custom => "Custom",
        }
    }
}

/// Where a resource lives and how the host reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Device-local only; never synced through staging.
    Device,
    /// Device-local primary with a host-visible staging allocation.
    Host,
    /// Primary allocation visible from both sides, staging kept for
    /// transfer symmetry with `Host`.
    DeviceAndHost,
    /// Imported primary handle owned by another subsystem.
    Storage,
}

impl MemoryClass {
    /// Classes that carry a host-visible staging allocation.
    pub fn has_staging(self) -> bool {
        matches!(self, Self::Host | Self::DeviceAndHost)
    }

    /// `Storage`-class primaries are borrowed, never freed by this crate.
    pub fn is_borrowed(self) -> bool {
        matches!(self, Self::Storage)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Device => "Device",
            Self::Host => "Host",
            Self::DeviceAndHost => "DeviceAndHost",
            Self::Storage => "Storage",
        }
    }
}

/// Whether `destroy()` frees a native handle or merely drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Borrowed,
}

/// Closed set of resource kinds exposed through [`Memory::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    StorageImage,
    SampledImage,
}

// ============================================================================
// Typed access
// ============================================================================

/// Scalar types a tensor or image can be viewed as.
///
/// The constant ties the Rust type to the resource's [`ElementType`] so a
/// typed view can be validated before any bytes are reinterpreted.
pub trait Scalar: bytemuck::Pod {
    const ELEMENT_TYPE: ElementType;
}

impl Scalar for u8 {
    const ELEMENT_TYPE: ElementType = ElementType::UInt8;
}
impl Scalar for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Int32;
}
impl Scalar for u32 {
    const ELEMENT_TYPE: ElementType = ElementType::UInt32;
}
impl Scalar for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::Float32;
}
impl Scalar for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::Float64;
}

// ============================================================================
// Descriptor construction
// ============================================================================

/// Payload for one `vk::WriteDescriptorSet`, produced by a resource and
/// assembled by [`Algorithm`](crate::algorithm::Algorithm). The info
/// structs are plain data, so the write can be built after all resources
/// have reported theirs.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorWrite {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

// ============================================================================
// Copy dispatch
// ============================================================================

/// What a resource looks like when used as the source of a copy.
///
/// `record_copy_from` matches on the (source, destination) pair of this
/// closed variant — the copy-routine table the crate supports — rather
/// than dispatching virtually through both operands.
pub enum CopySource<'a> {
    Buffer {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    },
    Image {
        core: &'a image::ImageCore,
    },
}

// ============================================================================
// The Memory contract
// ============================================================================

/// Common contract of every GPU memory object.
///
/// All `record_*` methods are pure command recording: they append commands
/// to the given command buffer and have no effect until the buffer is
/// submitted by a [`Sequence`](crate::sequence::Sequence). None of them
/// block the issuing thread.
pub trait Memory: Send + Sync {
    /// Stable identity, used in log lines and for caller-side bookkeeping.
    fn id(&self) -> Uuid;

    fn kind(&self) -> ResourceKind;

    fn element_type(&self) -> ElementType;

    fn memory_class(&self) -> MemoryClass;

    /// Total byte size of the resource.
    fn memory_size(&self) -> vk::DeviceSize;

    /// Whether the GPU resources behind this object are currently alive.
    fn is_initialized(&self) -> bool;

    /// Releases owned GPU handles and drops borrowed ones. Idempotent:
    /// calling it twice is a no-op the second time, and it is safe to call
    /// even if allocation never completed.
    fn destroy(&self);

    /// Descriptor type this resource binds as.
    fn descriptor_type(&self) -> vk::DescriptorType;

    /// Builds the descriptor payload for this resource, creating the cached
    /// image view on first use where applicable.
    fn descriptor_write(&self) -> Result<DescriptorWrite>;

    /// This resource viewed as a copy source.
    fn copy_source(&self) -> Result<CopySource<'_>>;

    /// Records a copy of `source`'s primary memory into this resource's
    /// primary memory. Fails with an incompatible-copy error when byte
    /// sizes or pixel formats disagree; nothing is truncated.
    fn record_copy_from(&self, cmd: vk::CommandBuffer, source: &dyn Memory) -> Result<()>;

    /// Records a staging→primary copy, including any layout transitions
    /// needed to make the primary valid for subsequent kernel use. No-op
    /// for classes without staging.
    fn record_copy_from_staging_to_device(&self, cmd: vk::CommandBuffer) -> Result<()>;

    /// Records the inverse primary→staging copy.
    fn record_copy_from_device_to_staging(&self, cmd: vk::CommandBuffer) -> Result<()>;

    /// Records a synchronization point on the primary memory: all work up
    /// to `src_stage` with access `src_access` becomes visible to work at
    /// `dst_stage` with access `dst_access`. For images this may also
    /// transition the tracked layout to the kernel-ready layout.
    fn record_primary_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) -> Result<()>;

    /// Staging-side equivalent of [`Memory::record_primary_memory_barrier`].
    fn record_staging_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) -> Result<()>;

    /// CPU-side hook run before submission: flush the host container into
    /// mapped staging memory. No-op without staging.
    fn flush_host_to_staging(&self) -> Result<()>;

    /// CPU-side hook run after completion: copy mapped staging bytes back
    /// into the host container. No-op without staging.
    fn read_back_from_staging(&self) -> Result<()>;
}
