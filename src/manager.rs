//! Resource Factory
//!
//! [`Manager`] is the crate's entry point: it bootstraps (or adopts) a
//! [`DeviceContext`] and hands out tensors, images, textures, algorithms
//! and sequences that share it. Resources hold their own `Arc` to the
//! context, so they stay valid even if the manager is dropped first.

use std::sync::Arc;

use ash::vk;

use crate::algorithm::Algorithm;
use crate::device::DeviceContext;
use crate::errors::Result;
use crate::memory::{
    AddressMode, ElementType, Filter, Image, Memory, MemoryClass, Scalar, Tensor, Texture,
};
use crate::sequence::Sequence;

pub struct Manager {
    ctx: Arc<DeviceContext>,
}

impl Manager {
    /// Initializes Vulkan and selects a compute-capable device.
    pub fn new() -> Result<Self> {
        Ok(Self {
            ctx: DeviceContext::new()?,
        })
    }

    /// Builds a manager over an existing device context.
    pub fn with_context(ctx: Arc<DeviceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    // ------------------------------------------------------------------
    // Tensors
    // ------------------------------------------------------------------

    /// Tensor seeded from `data`. Classes without staging cannot take
    /// initial data and fail at construction.
    pub fn tensor<T: Scalar>(&self, data: &[T], class: MemoryClass) -> Result<Arc<Tensor>> {
        let stride = std::mem::size_of::<T>() as vk::DeviceSize;
        Tensor::new(
            self.ctx.clone(),
            Some(bytemuck::cast_slice(data)),
            data.len(),
            T::ELEMENT_TYPE,
            stride,
            class,
        )
    }

    /// Zero-initialized tensor of `len` elements.
    pub fn tensor_uninit(
        &self,
        len: usize,
        element_type: ElementType,
        class: MemoryClass,
    ) -> Result<Arc<Tensor>> {
        let stride = element_type.size_in_bytes().unwrap_or(0) as vk::DeviceSize;
        Tensor::new(self.ctx.clone(), None, len, element_type, stride, class)
    }

    /// Tensor of opaque elements with a caller-supplied stride.
    pub fn tensor_raw(
        &self,
        data: &[u8],
        len: usize,
        stride: vk::DeviceSize,
        class: MemoryClass,
    ) -> Result<Arc<Tensor>> {
        Tensor::new(
            self.ctx.clone(),
            Some(data),
            len,
            ElementType::Custom,
            stride,
            class,
        )
    }

    /// Wraps a buffer owned elsewhere as a `Storage`-class tensor; its
    /// handle is never freed by this crate.
    pub fn import_tensor(
        &self,
        buffer: vk::Buffer,
        len: usize,
        element_type: ElementType,
        stride: vk::DeviceSize,
    ) -> Arc<Tensor> {
        Tensor::import(self.ctx.clone(), buffer, len, element_type, stride)
    }

    // ------------------------------------------------------------------
    // Images & textures
    // ------------------------------------------------------------------

    /// Storage image seeded from `data`, laid out `width * height` texels
    /// of `channels` components. `tiling = None` infers from the class.
    pub fn image<T: Scalar>(
        &self,
        data: &[T],
        width: u32,
        height: u32,
        channels: u32,
        class: MemoryClass,
        tiling: Option<vk::ImageTiling>,
    ) -> Result<Arc<Image>> {
        Image::new(
            self.ctx.clone(),
            width,
            height,
            channels,
            T::ELEMENT_TYPE,
            class,
            tiling,
            Some(bytemuck::cast_slice(data)),
        )
    }

    /// Zero-initialized storage image.
    pub fn image_uninit(
        &self,
        width: u32,
        height: u32,
        channels: u32,
        element_type: ElementType,
        class: MemoryClass,
        tiling: Option<vk::ImageTiling>,
    ) -> Result<Arc<Image>> {
        Image::new(
            self.ctx.clone(),
            width,
            height,
            channels,
            element_type,
            class,
            tiling,
            None,
        )
    }

    /// Wraps an image owned elsewhere as a `Storage`-class resource.
    pub fn import_image(
        &self,
        image: vk::Image,
        current_layout: vk::ImageLayout,
        width: u32,
        height: u32,
        channels: u32,
        element_type: ElementType,
    ) -> Result<Arc<Image>> {
        Image::import(
            self.ctx.clone(),
            image,
            current_layout,
            width,
            height,
            channels,
            element_type,
        )
    }

    /// Sampled texture seeded from `data`, with the sampler fixed at
    /// construction.
    pub fn texture<T: Scalar>(
        &self,
        data: &[T],
        width: u32,
        height: u32,
        channels: u32,
        class: MemoryClass,
        tiling: Option<vk::ImageTiling>,
        filter: Filter,
        address_mode: AddressMode,
    ) -> Result<Arc<Texture>> {
        Texture::new(
            self.ctx.clone(),
            width,
            height,
            channels,
            T::ELEMENT_TYPE,
            class,
            tiling,
            Some(bytemuck::cast_slice(data)),
            filter,
            address_mode,
        )
    }

    /// Zero-initialized sampled texture.
    pub fn texture_uninit(
        &self,
        width: u32,
        height: u32,
        channels: u32,
        element_type: ElementType,
        class: MemoryClass,
        tiling: Option<vk::ImageTiling>,
        filter: Filter,
        address_mode: AddressMode,
    ) -> Result<Arc<Texture>> {
        Texture::new(
            self.ctx.clone(),
            width,
            height,
            channels,
            element_type,
            class,
            tiling,
            None,
            filter,
            address_mode,
        )
    }

    // ------------------------------------------------------------------
    // Algorithms & sequences
    // ------------------------------------------------------------------

    /// Binds a SPIR-V compute kernel to `resources` (positionally, binding
    /// `n` = resource `n`). `push_constants` fixes the block size and its
    /// default contents.
    pub fn algorithm(
        &self,
        resources: Vec<Arc<dyn Memory>>,
        spirv: &[u32],
        workgroup: [u32; 3],
        push_constants: Option<&[u8]>,
    ) -> Result<Arc<Algorithm>> {
        Algorithm::new(self.ctx.clone(), resources, spirv, workgroup, push_constants)
    }

    /// A fresh sequence with its own command pool, buffer and fence.
    pub fn sequence(&self) -> Result<Sequence> {
        Sequence::new(self.ctx.clone())
    }
}
