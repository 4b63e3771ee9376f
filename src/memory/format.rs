//! Format and Tiling Derivation
//!
//! Deterministic mapping from `(channel count, element type)` to a concrete
//! pixel format, and the memory-class → tiling inference rule. Both fail
//! closed: unlisted combinations are rejected at construction instead of
//! silently picking a fallback.

use ash::vk;

use crate::errors::{BasaltError, Result};
use crate::memory::{ElementType, MemoryClass};

/// Derives the pixel format for an image with `channels` components of
/// `element_type` each.
///
/// Channel counts of 1, 2 and 4 map to single/dual/quad-component formats;
/// 8-bit data is normalized, 32/64-bit data keeps its representation.
/// Three-channel formats are deliberately absent — their device support is
/// too patchy to fail at dispatch time instead of here.
pub fn format_for(channels: u32, element_type: ElementType) -> Result<vk::Format> {
    let format = match (channels, element_type) {
        (1, ElementType::UInt8) => vk::Format::R8_UNORM,
        (2, ElementType::UInt8) => vk::Format::R8G8_UNORM,
        (4, ElementType::UInt8) => vk::Format::R8G8B8A8_UNORM,

        (1, ElementType::Int32) => vk::Format::R32_SINT,
        (2, ElementType::Int32) => vk::Format::R32G32_SINT,
        (4, ElementType::Int32) => vk::Format::R32G32B32A32_SINT,

        (1, ElementType::UInt32) => vk::Format::R32_UINT,
        (2, ElementType::UInt32) => vk::Format::R32G32_UINT,
        (4, ElementType::UInt32) => vk::Format::R32G32B32A32_UINT,

        (1, ElementType::Float32) => vk::Format::R32_SFLOAT,
        (2, ElementType::Float32) => vk::Format::R32G32_SFLOAT,
        (4, ElementType::Float32) => vk::Format::R32G32B32A32_SFLOAT,

        (1, ElementType::Float64) => vk::Format::R64_SFLOAT,
        (2, ElementType::Float64) => vk::Format::R64G64_SFLOAT,
        (4, ElementType::Float64) => vk::Format::R64G64B64A64_SFLOAT,

        (_, ElementType::Custom) => return Err(BasaltError::CustomElementType),
        _ => {
            return Err(BasaltError::UnsupportedFormat {
                channels,
                element_type: element_type.name(),
            });
        }
    };
    Ok(format)
}

/// Infers image tiling from the memory class.
///
/// Host-reachable classes must be linear so mapped reads see a predictable
/// byte order; purely device-side classes take the optimal layout.
pub fn infer_tiling(class: MemoryClass) -> vk::ImageTiling {
    match class {
        MemoryClass::Host | MemoryClass::DeviceAndHost => vk::ImageTiling::LINEAR,
        MemoryClass::Device | MemoryClass::Storage => vk::ImageTiling::OPTIMAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_channel_u8_is_rgba8_unorm() {
        assert_eq!(
            format_for(4, ElementType::UInt8).unwrap(),
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn three_channel_formats_are_rejected() {
        for et in [
            ElementType::UInt8,
            ElementType::Int32,
            ElementType::UInt32,
            ElementType::Float32,
            ElementType::Float64,
        ] {
            assert!(
                format_for(3, et).is_err(),
                "3-channel {} should fail closed",
                et.name()
            );
        }
    }

    #[test]
    fn custom_element_type_is_rejected_for_any_channel_count() {
        for channels in [1, 2, 3, 4] {
            assert!(matches!(
                format_for(channels, ElementType::Custom),
                Err(BasaltError::CustomElementType)
            ));
        }
    }

    #[test]
    fn tiling_follows_memory_class() {
        assert_eq!(infer_tiling(MemoryClass::Host), vk::ImageTiling::LINEAR);
        assert_eq!(
            infer_tiling(MemoryClass::DeviceAndHost),
            vk::ImageTiling::LINEAR
        );
        assert_eq!(infer_tiling(MemoryClass::Device), vk::ImageTiling::OPTIMAL);
        assert_eq!(infer_tiling(MemoryClass::Storage), vk::ImageTiling::OPTIMAL);
    }
}
