//! Memory Vocabulary Tests
//!
//! Tests for:
//! - ElementType: byte sizes, Custom has no intrinsic size
//! - MemoryClass: staging presence, borrowed-handle classes
//! - Format derivation: (channels, element type) table, fail-closed rejects
//! - Tiling inference from memory class
//! - Scalar trait: Rust type ↔ ElementType mapping
//! - Texture sampler parameter defaults
//! - SequenceState display names
//!
//! Everything here is pure logic; no Vulkan device is touched.

use ash::vk;

use basalt::memory::format::{format_for, infer_tiling};
use basalt::{
    AddressMode, BasaltError, ElementType, Filter, MemoryClass, Scalar, SequenceState,
};

// ============================================================================
// ElementType Tests
// ============================================================================

#[test]
fn element_sizes_match_their_scalar_types() {
    assert_eq!(ElementType::UInt8.size_in_bytes(), Some(1));
    assert_eq!(ElementType::Int32.size_in_bytes(), Some(4));
    assert_eq!(ElementType::UInt32.size_in_bytes(), Some(4));
    assert_eq!(ElementType::Float32.size_in_bytes(), Some(4));
    assert_eq!(ElementType::Float64.size_in_bytes(), Some(8));
}

#[test]
fn custom_elements_have_no_intrinsic_size() {
    assert_eq!(
        ElementType::Custom.size_in_bytes(),
        None,
        "Custom stride comes from the caller, not the type"
    );
}

#[test]
fn scalar_impls_map_to_the_matching_element_type() {
    assert_eq!(<u8 as Scalar>::ELEMENT_TYPE, ElementType::UInt8);
    assert_eq!(<i32 as Scalar>::ELEMENT_TYPE, ElementType::Int32);
    assert_eq!(<u32 as Scalar>::ELEMENT_TYPE, ElementType::UInt32);
    assert_eq!(<f32 as Scalar>::ELEMENT_TYPE, ElementType::Float32);
    assert_eq!(<f64 as Scalar>::ELEMENT_TYPE, ElementType::Float64);
}

// ============================================================================
// MemoryClass Tests
// ============================================================================

#[test]
fn only_host_reachable_classes_carry_staging() {
    assert!(!MemoryClass::Device.has_staging());
    assert!(MemoryClass::Host.has_staging());
    assert!(MemoryClass::DeviceAndHost.has_staging());
    assert!(!MemoryClass::Storage.has_staging());
}

#[test]
fn only_storage_class_is_borrowed() {
    assert!(MemoryClass::Storage.is_borrowed());
    assert!(!MemoryClass::Device.is_borrowed());
    assert!(!MemoryClass::Host.is_borrowed());
    assert!(!MemoryClass::DeviceAndHost.is_borrowed());
}

// ============================================================================
// Format Derivation Tests
// ============================================================================

#[test]
fn format_table_covers_one_two_and_four_channels() {
    assert_eq!(
        format_for(1, ElementType::Float32).unwrap(),
        vk::Format::R32_SFLOAT
    );
    assert_eq!(
        format_for(2, ElementType::Int32).unwrap(),
        vk::Format::R32G32_SINT
    );
    assert_eq!(
        format_for(4, ElementType::UInt8).unwrap(),
        vk::Format::R8G8B8A8_UNORM
    );
    assert_eq!(
        format_for(4, ElementType::Float64).unwrap(),
        vk::Format::R64G64B64A64_SFLOAT
    );
}

#[test]
fn unlisted_channel_counts_fail_closed() {
    for channels in [0, 3, 5, 16] {
        let err = format_for(channels, ElementType::Float32).unwrap_err();
        assert!(
            matches!(err, BasaltError::UnsupportedFormat { .. }),
            "expected UnsupportedFormat for {channels} channels, got {err}"
        );
    }
}

#[test]
fn custom_element_type_never_derives_a_format() {
    assert!(matches!(
        format_for(4, ElementType::Custom),
        Err(BasaltError::CustomElementType)
    ));
}

#[test]
fn tiling_is_linear_only_for_host_reachable_classes() {
    assert_eq!(infer_tiling(MemoryClass::Host), vk::ImageTiling::LINEAR);
    assert_eq!(
        infer_tiling(MemoryClass::DeviceAndHost),
        vk::ImageTiling::LINEAR
    );
    assert_eq!(infer_tiling(MemoryClass::Device), vk::ImageTiling::OPTIMAL);
    assert_eq!(infer_tiling(MemoryClass::Storage), vk::ImageTiling::OPTIMAL);
}

// ============================================================================
// Sampler Parameter Tests
// ============================================================================

#[test]
fn sampler_parameters_default_to_nearest_clamp() {
    assert_eq!(Filter::default(), Filter::Nearest);
    assert_eq!(AddressMode::default(), AddressMode::ClampToEdge);
}

// ============================================================================
// SequenceState Tests
// ============================================================================

#[test]
fn sequence_state_names_are_distinct() {
    let names = [
        SequenceState::Idle.name(),
        SequenceState::Recording.name(),
        SequenceState::Recorded.name(),
        SequenceState::Evaluating.name(),
        SequenceState::Evaluated.name(),
    ];
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

// ============================================================================
// Error Display Tests
// ============================================================================

#[test]
fn errors_render_their_key_facts() {
    let err = BasaltError::DataSizeMismatch {
        provided: 12,
        expected: 16,
    };
    let text = err.to_string();
    assert!(text.contains("12") && text.contains("16"), "got: {text}");

    let err = BasaltError::SequenceState {
        found: "Evaluating",
        action: "record",
    };
    let text = err.to_string();
    assert!(
        text.contains("Evaluating") && text.contains("record"),
        "got: {text}"
    );
}
