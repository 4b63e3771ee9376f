//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`BasaltError`] covers all failure modes including:
//! - Unsupported resource configurations (rejected before any GPU allocation)
//! - Unsupported operations on otherwise valid resources
//! - Resource and sequence lifecycle violations
//! - Device-reported failures during submission or waits
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, BasaltError>`.
//!
//! Configuration and state errors are raised synchronously at the call that
//! violates the contract; device-fatal errors surface at `eval()`/await
//! time. Nothing in this crate retries automatically.

use ash::vk;
use thiserror::Error;

/// The main error type for the basalt compute layer.
#[derive(Error, Debug)]
pub enum BasaltError {
    // ========================================================================
    // Configuration Errors (raised at construction, before GPU allocation)
    // ========================================================================
    /// The requested memory class is not valid for this resource.
    #[error("Unsupported memory class {class} for {context}")]
    UnsupportedMemoryClass {
        /// Display name of the rejected class
        class: &'static str,
        /// Description of what was being constructed
        context: &'static str,
    },

    /// No pixel format exists for this (channel count, element type) pair.
    #[error("No image format for {channels} channel(s) of {element_type}")]
    UnsupportedFormat {
        /// Requested channel count
        channels: u32,
        /// Display name of the element type
        element_type: &'static str,
    },

    /// A dimension or element stride that must be positive was zero.
    #[error("Zero-sized {context}")]
    ZeroSized {
        /// What was zero
        context: &'static str,
    },

    /// Initial data does not match the resource's byte size.
    #[error("Initial data is {provided} bytes but the resource needs {expected}")]
    DataSizeMismatch {
        /// Bytes supplied by the caller
        provided: usize,
        /// Bytes the resource occupies
        expected: usize,
    },

    // ========================================================================
    // Unsupported Operations
    // ========================================================================
    /// Copy between resources with incompatible sizes or formats.
    #[error("Incompatible copy: {0}")]
    IncompatibleCopy(String),

    /// Custom element types are only legal for tensors.
    #[error("Custom element types are not supported for images or textures")]
    CustomElementType,

    /// A typed view was requested with a scalar type that disagrees with the
    /// resource's element type.
    #[error("Typed view of {requested} data requested on a {actual} resource")]
    ElementTypeMismatch {
        /// Scalar type the caller asked for
        requested: &'static str,
        /// Element type the resource holds
        actual: &'static str,
    },

    /// Push constant data does not match the algorithm's configured block.
    #[error("Push constants are {provided} bytes, algorithm expects {expected}")]
    PushConstantSizeMismatch {
        /// Bytes supplied at dispatch
        provided: usize,
        /// Bytes configured on the algorithm
        expected: usize,
    },

    // ========================================================================
    // Lifecycle / State Errors
    // ========================================================================
    /// Operating on an uninitialized or already-destroyed resource.
    /// (`destroy()` itself stays idempotent and never raises.)
    #[error("Invalid resource state: {0}")]
    ResourceState(String),

    /// A sequence method was called from a state it is not valid in.
    #[error("Invalid sequence state: {found} (while trying to {action})")]
    SequenceState {
        /// State the sequence was found in
        found: &'static str,
        /// What the caller attempted
        action: &'static str,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// The Vulkan loader could not be found or initialized.
    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),

    /// No physical device exposes a compute-capable queue family.
    #[error("No Vulkan device with a compute queue was found")]
    NoComputeDevice,

    /// No memory type satisfies the requested property flags.
    #[error("No suitable memory type for flags {0:?}")]
    NoSuitableMemoryType(vk::MemoryPropertyFlags),

    /// GPU-reported failure. Aborts the owning sequence's evaluation and
    /// leaves touched resources destroyable.
    #[error("Device error: {0}")]
    DeviceFatal(#[from] vk::Result),
}

/// Alias for `Result<T, BasaltError>`.
pub type Result<T> = std::result::Result<T, BasaltError>;
