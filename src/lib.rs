#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

//! basalt — a Vulkan compute resource and sequencing layer.
//!
//! Typed GPU memory objects (tensors, storage images, sampled textures),
//! deferred command recording through operations and sequences, and the
//! barrier/layout bookkeeping that keeps them coherent. Built directly on
//! `ash`; no render pipeline, no shader compilation.

pub mod algorithm;
pub mod device;
pub mod errors;
pub mod manager;
pub mod memory;
pub mod sequence;

pub use algorithm::Algorithm;
pub use device::DeviceContext;
pub use errors::{BasaltError, Result};
pub use manager::Manager;
pub use memory::{
    AddressMode, DescriptorWrite, ElementType, Filter, Image, Memory, MemoryClass, Ownership,
    ResourceKind, Scalar, Tensor, Texture,
};
pub use sequence::{
    OpAlgoDispatch, OpCopy, OpSyncDevice, OpSyncLocal, Operation, Sequence, SequenceState,
};
