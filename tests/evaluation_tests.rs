//! Evaluation Tests
//!
//! Tests for:
//! - Tensor / Image / Texture round trips through staging (SyncDevice →
//!   SyncLocal)
//! - Descriptor payloads (buffer vs image, sampler presence)
//! - OpCopy dispatch over the (source, destination) copy table
//! - Algorithm construction, no-op dispatch and an identity-copy dispatch
//! - Sequence state machine guards (empty eval, record after eval, reset)
//! - Resource lifecycle (idempotent destroy, typed-view and size checks)
//!
//! Every test needs a Vulkan device with a compute queue. When none is
//! available the test prints a notice and passes vacuously, so the suite
//! stays green on headless CI.

use std::sync::Arc;

use basalt::{
    AddressMode, BasaltError, DescriptorWrite, ElementType, Filter, Manager, Memory, MemoryClass,
    OpAlgoDispatch, OpCopy, OpSyncDevice, OpSyncLocal, SequenceState,
};

/// Minimal valid compute kernel: `void main() {}` with local size 1x1x1,
/// assembled by hand so the crate needs no shader toolchain to test with.
#[rustfmt::skip]
const NOOP_SPIRV: [u32; 35] = [
    0x0723_0203, 0x0001_0000, 0, 5, 0,             // header, bound = 5
    0x0002_0011, 1,                                 // OpCapability Shader
    0x0003_000E, 0, 1,                              // OpMemoryModel Logical GLSL450
    0x0005_000F, 5, 1, 0x6E69_616D, 0,              // OpEntryPoint GLCompute %1 "main"
    0x0006_0010, 1, 17, 1, 1, 1,                    // OpExecutionMode %1 LocalSize 1 1 1
    0x0002_0013, 2,                                 // %2 = OpTypeVoid
    0x0003_0021, 3, 2,                              // %3 = OpTypeFunction %2
    0x0005_0036, 2, 1, 0, 3,                        // %1 = OpFunction %2 None %3
    0x0002_00F8, 4,                                 // %4 = OpLabel
    0x0001_00FD,                                    // OpReturn
    0x0001_0038,                                    // OpFunctionEnd
];

/// One-to-one copy kernel, also assembled by hand:
///
/// ```glsl
/// layout(local_size_x = 1) in;
/// layout(set = 0, binding = 0) buffer In  { float a[]; };
/// layout(set = 0, binding = 1) buffer Out { float b[]; };
/// void main() { b[gl_GlobalInvocationID.x] = a[gl_GlobalInvocationID.x]; }
/// ```
#[rustfmt::skip]
const COPY_F32_SPIRV: [u32; 145] = [
    0x0723_0203, 0x0001_0000, 0, 23, 0,             // header, bound = 23
    0x0002_0011, 1,                                 // OpCapability Shader
    0x0003_000E, 0, 1,                              // OpMemoryModel Logical GLSL450
    0x0006_000F, 5, 1, 0x6E69_616D, 0, 8,           // OpEntryPoint GLCompute %1 "main" %8
    0x0006_0010, 1, 17, 1, 1, 1,                    // OpExecutionMode %1 LocalSize 1 1 1
    0x0004_0047, 9, 6, 4,                           // OpDecorate %9 ArrayStride 4
    0x0005_0048, 10, 0, 35, 0,                      // OpMemberDecorate %10 0 Offset 0
    0x0003_0047, 10, 3,                             // OpDecorate %10 BufferBlock
    0x0004_0047, 12, 34, 0,                         // OpDecorate %12 DescriptorSet 0
    0x0004_0047, 12, 33, 0,                         // OpDecorate %12 Binding 0
    0x0004_0047, 13, 34, 0,                         // OpDecorate %13 DescriptorSet 0
    0x0004_0047, 13, 33, 1,                         // OpDecorate %13 Binding 1
    0x0004_0047, 8, 11, 28,                         // OpDecorate %8 BuiltIn GlobalInvocationId
    0x0002_0013, 2,                                 // %2  = OpTypeVoid
    0x0003_0021, 3, 2,                              // %3  = OpTypeFunction %2
    0x0003_0016, 4, 32,                             // %4  = OpTypeFloat 32
    0x0004_0015, 5, 32, 0,                          // %5  = OpTypeInt 32 0
    0x0004_0017, 6, 5, 3,                           // %6  = OpTypeVector %5 3
    0x0004_0020, 7, 1, 6,                           // %7  = OpTypePointer Input %6
    0x0004_003B, 7, 8, 1,                           // %8  = OpVariable %7 Input
    0x0003_001D, 9, 4,                              // %9  = OpTypeRuntimeArray %4
    0x0003_001E, 10, 9,                             // %10 = OpTypeStruct %9
    0x0004_0020, 11, 2, 10,                         // %11 = OpTypePointer Uniform %10
    0x0004_003B, 11, 12, 2,                         // %12 = OpVariable %11 Uniform
    0x0004_003B, 11, 13, 2,                         // %13 = OpVariable %11 Uniform
    0x0004_002B, 5, 14, 0,                          // %14 = OpConstant %5 0
    0x0004_0020, 15, 1, 5,                          // %15 = OpTypePointer Input %5
    0x0004_0020, 16, 2, 4,                          // %16 = OpTypePointer Uniform %4
    0x0005_0036, 2, 1, 0, 3,                        // %1  = OpFunction %2 None %3
    0x0002_00F8, 17,                                // %17 = OpLabel
    0x0005_0041, 15, 18, 8, 14,                     // %18 = OpAccessChain %15 %8 %14
    0x0004_003D, 5, 19, 18,                         // %19 = OpLoad %5 %18
    0x0006_0041, 16, 20, 12, 14, 19,                // %20 = OpAccessChain %16 %12 %14 %19
    0x0004_003D, 4, 21, 20,                         // %21 = OpLoad %4 %20
    0x0006_0041, 16, 22, 13, 14, 19,                // %22 = OpAccessChain %16 %13 %14 %19
    0x0003_003E, 22, 21,                            // OpStore %22 %21
    0x0001_00FD,                                    // OpReturn
    0x0001_0038,                                    // OpFunctionEnd
];

fn manager() -> Option<Manager> {
    match Manager::new() {
        Ok(m) => Some(m),
        Err(e) => {
            eprintln!("No compute device available, skipping: {e}");
            None
        }
    }
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn tensor_round_trip_preserves_data() {
    let Some(mgr) = manager() else { return };
    let data = vec![1.0f32, 2.0, 3.0, 4.0];
    let tensor = mgr.tensor(&data, MemoryClass::Host).unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![tensor.clone()])))
        .unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![tensor.clone()])))
        .unwrap();
    seq.eval().unwrap();

    assert_eq!(tensor.vector::<f32>().unwrap(), data);
}

#[test]
fn set_data_reaches_the_device_on_the_next_sync() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[0u32; 8], MemoryClass::Host).unwrap();

    let updated: Vec<u32> = (0..8).collect();
    tensor.set_data(&updated).unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![tensor.clone()])))
        .unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![tensor.clone()])))
        .unwrap();
    seq.eval().unwrap();

    assert_eq!(tensor.vector::<u32>().unwrap(), updated);
}

#[test]
fn image_round_trip_preserves_data() {
    let Some(mgr) = manager() else { return };
    let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let image = mgr
        .image(&data, 2, 2, 4, MemoryClass::Host, None)
        .unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![image.clone()])))
        .unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![image.clone()])))
        .unwrap();
    seq.eval().unwrap();

    assert_eq!(image.vector::<f32>().unwrap(), data);
}

#[test]
fn texture_round_trip_ends_shader_read_only() {
    let Some(mgr) = manager() else { return };
    let data = vec![255u8; 16];
    let texture = mgr
        .texture(
            &data,
            2,
            2,
            4,
            MemoryClass::Host,
            None,
            Filter::Nearest,
            AddressMode::ClampToEdge,
        )
        .unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![texture.clone()])))
        .unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![texture.clone()])))
        .unwrap();
    seq.eval().unwrap();

    assert_eq!(texture.vector::<u8>().unwrap(), data);
    assert_eq!(
        texture.primary_layout(),
        ash::vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        "texture primary should be restored to its descriptor layout"
    );
}

// ============================================================================
// Descriptors
// ============================================================================

#[test]
fn only_texture_descriptors_carry_a_sampler() {
    let Some(mgr) = manager() else { return };
    let image = mgr
        .image_uninit(2, 2, 4, ElementType::Float32, MemoryClass::Host, None)
        .unwrap();
    let texture = mgr
        .texture(
            &[0u8; 16],
            2,
            2,
            4,
            MemoryClass::Host,
            None,
            Filter::Linear,
            AddressMode::Repeat,
        )
        .unwrap();

    let DescriptorWrite::Image(info) = image.descriptor_write().unwrap() else {
        panic!("storage image should produce an image descriptor");
    };
    assert_eq!(
        info.sampler,
        ash::vk::Sampler::null(),
        "storage images are bound without a sampler"
    );
    assert_eq!(info.image_layout, ash::vk::ImageLayout::GENERAL);

    let DescriptorWrite::Image(info) = texture.descriptor_write().unwrap() else {
        panic!("texture should produce an image descriptor");
    };
    assert_ne!(
        info.sampler,
        ash::vk::Sampler::null(),
        "textures are always bound through their sampler"
    );
    assert_eq!(
        info.image_layout,
        ash::vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
}

#[test]
fn tensor_descriptors_are_buffer_writes() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[1.0f32; 4], MemoryClass::Host).unwrap();
    assert!(
        matches!(
            tensor.descriptor_write().unwrap(),
            DescriptorWrite::Buffer(_)
        ),
        "tensors bind as storage buffers"
    );
}

// ============================================================================
// OpCopy
// ============================================================================

#[test]
fn copy_routes_tensor_through_image_and_back() {
    let Some(mgr) = manager() else { return };
    let data: Vec<f32> = (1..=16).map(|i| i as f32).collect();
    let source = mgr.tensor(&data, MemoryClass::Host).unwrap();
    let image = mgr
        .image_uninit(2, 2, 4, ElementType::Float32, MemoryClass::Host, None)
        .unwrap();
    let sink = mgr.tensor(&[0.0f32; 16], MemoryClass::Host).unwrap();

    let all: Vec<Arc<dyn Memory>> = vec![source.clone(), image.clone(), sink.clone()];
    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(all.clone()))).unwrap();
    seq.record(Arc::new(OpCopy::new(source.clone(), vec![image.clone()])))
        .unwrap();
    seq.record(Arc::new(OpCopy::new(image.clone(), vec![sink.clone()])))
        .unwrap();
    seq.record(Arc::new(OpSyncLocal::new(all))).unwrap();
    seq.eval().unwrap();

    assert_eq!(sink.vector::<f32>().unwrap(), data);
}

#[test]
fn copy_between_mismatched_sizes_is_rejected_at_record() {
    let Some(mgr) = manager() else { return };
    let small = mgr.tensor(&[1.0f32; 4], MemoryClass::Host).unwrap();
    let large = mgr.tensor(&[0.0f32; 8], MemoryClass::Host).unwrap();

    let mut seq = mgr.sequence().unwrap();
    let err = seq
        .record(Arc::new(OpCopy::new(small, vec![large])))
        .unwrap_err();
    assert!(
        matches!(err, BasaltError::IncompatibleCopy(_)),
        "got: {err}"
    );
}

// ============================================================================
// Algorithm / Dispatch
// ============================================================================

#[test]
fn noop_dispatch_leaves_synced_data_intact() {
    let Some(mgr) = manager() else { return };
    let data = vec![7.0f32; 4];
    let tensor = mgr.tensor(&data, MemoryClass::Host).unwrap();

    let algorithm = mgr
        .algorithm(vec![tensor.clone()], &NOOP_SPIRV, [1, 1, 1], None)
        .unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![tensor.clone()])))
        .unwrap();
    seq.record(Arc::new(OpAlgoDispatch::new(algorithm))).unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![tensor.clone()])))
        .unwrap();
    seq.eval().unwrap();

    assert_eq!(tensor.vector::<f32>().unwrap(), data);
}

#[test]
fn identity_dispatch_copies_input_to_output() {
    let Some(mgr) = manager() else { return };
    let data = vec![1.5f32, -2.0, 3.25, 4.0];
    let input = mgr.tensor(&data, MemoryClass::Host).unwrap();
    let output = mgr.tensor(&[0.0f32; 4], MemoryClass::Host).unwrap();

    let algorithm = mgr
        .algorithm(
            vec![input.clone(), output.clone()],
            &COPY_F32_SPIRV,
            [data.len() as u32, 1, 1],
            None,
        )
        .unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![
        input.clone(),
        output.clone(),
    ])))
    .unwrap();
    seq.record(Arc::new(OpAlgoDispatch::new(algorithm))).unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![output.clone()])))
        .unwrap();
    seq.eval().unwrap();

    assert_eq!(output.vector::<f32>().unwrap(), data);
}

#[test]
fn push_constant_size_is_enforced() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[0.0f32; 4], MemoryClass::Host).unwrap();
    let algorithm = mgr
        .algorithm(vec![tensor], &NOOP_SPIRV, [1, 1, 1], None)
        .unwrap();

    let err = OpAlgoDispatch::with_push_constants(algorithm, &[0u8; 4]).unwrap_err();
    assert!(
        matches!(
            err,
            BasaltError::PushConstantSizeMismatch {
                provided: 4,
                expected: 0
            }
        ),
        "got: {err}"
    );
}

// ============================================================================
// Sequence State Machine
// ============================================================================

#[test]
fn evaluating_an_empty_sequence_fails() {
    let Some(mgr) = manager() else { return };
    let mut seq = mgr.sequence().unwrap();
    assert_eq!(seq.state(), SequenceState::Idle);

    let err = seq.eval().unwrap_err();
    assert!(matches!(err, BasaltError::SequenceState { .. }), "got: {err}");
}

#[test]
fn recording_after_evaluation_requires_reset() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[1.0f32; 4], MemoryClass::Host).unwrap();
    let op = Arc::new(OpSyncDevice::new(vec![tensor.clone()]));

    let mut seq = mgr.sequence().unwrap();
    seq.record(op.clone()).unwrap();
    seq.eval().unwrap();
    assert_eq!(seq.state(), SequenceState::Evaluated);

    let err = seq.record(op.clone()).unwrap_err();
    assert!(matches!(err, BasaltError::SequenceState { .. }), "got: {err}");

    seq.reset().unwrap();
    assert_eq!(seq.state(), SequenceState::Idle);
    assert!(seq.is_empty());
    seq.record(op).unwrap();
}

#[test]
fn recorded_sequences_can_be_reevaluated() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[3.0f32; 4], MemoryClass::Host).unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![tensor.clone()])))
        .unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![tensor.clone()])))
        .unwrap();
    seq.eval().unwrap();

    tensor.set_data(&[9.0f32; 4]).unwrap();
    seq.eval().unwrap();
    assert_eq!(tensor.vector::<f32>().unwrap(), vec![9.0f32; 4]);
}

#[test]
fn async_evaluation_requires_an_await() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[5u32; 4], MemoryClass::Host).unwrap();

    let mut seq = mgr.sequence().unwrap();
    seq.record(Arc::new(OpSyncDevice::new(vec![tensor.clone()])))
        .unwrap();
    seq.record(Arc::new(OpSyncLocal::new(vec![tensor.clone()])))
        .unwrap();

    seq.eval_async().unwrap();
    assert_eq!(seq.state(), SequenceState::Evaluating);

    // Recording mid-flight is a state violation.
    let err = seq
        .record(Arc::new(OpSyncDevice::new(vec![tensor.clone()])))
        .unwrap_err();
    assert!(matches!(err, BasaltError::SequenceState { .. }), "got: {err}");

    seq.eval_await().unwrap();
    assert_eq!(seq.state(), SequenceState::Evaluated);
    assert_eq!(tensor.vector::<u32>().unwrap(), vec![5u32; 4]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn destroy_is_idempotent_and_blocks_further_use() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[1.0f32; 4], MemoryClass::Host).unwrap();
    assert!(tensor.is_initialized());

    tensor.destroy();
    tensor.destroy(); // second call must be a no-op
    assert!(!tensor.is_initialized());

    let err = tensor.vector::<f32>().unwrap_err();
    assert!(matches!(err, BasaltError::ResourceState(_)), "got: {err}");
}

#[test]
fn typed_views_check_the_element_type() {
    let Some(mgr) = manager() else { return };
    let tensor = mgr.tensor(&[1.0f32; 4], MemoryClass::Host).unwrap();

    let err = tensor.vector::<u32>().unwrap_err();
    assert!(
        matches!(err, BasaltError::ElementTypeMismatch { .. }),
        "got: {err}"
    );
}

#[test]
fn device_class_cannot_take_initial_data() {
    let Some(mgr) = manager() else { return };
    let err = mgr.tensor(&[1.0f32; 4], MemoryClass::Device).unwrap_err();
    assert!(
        matches!(err, BasaltError::UnsupportedMemoryClass { .. }),
        "got: {err}"
    );
}

#[test]
fn zero_length_tensors_are_rejected() {
    let Some(mgr) = manager() else { return };

    let err = mgr
        .tensor_uninit(0, ElementType::Float32, MemoryClass::Host)
        .unwrap_err();
    assert!(matches!(err, BasaltError::ZeroSized { .. }), "got: {err}");

    let empty: [f32; 0] = [];
    let err = mgr.tensor(&empty, MemoryClass::Host).unwrap_err();
    assert!(matches!(err, BasaltError::ZeroSized { .. }), "got: {err}");
}

#[test]
fn textures_reject_custom_element_types() {
    let Some(mgr) = manager() else { return };

    let err = mgr
        .texture_uninit(
            2,
            2,
            4,
            ElementType::Custom,
            MemoryClass::Host,
            None,
            Filter::Nearest,
            AddressMode::ClampToEdge,
        )
        .unwrap_err();
    assert!(matches!(err, BasaltError::CustomElementType), "got: {err}");
}

#[test]
fn images_reject_custom_and_three_channel_layouts() {
    let Some(mgr) = manager() else { return };

    let err = mgr
        .image_uninit(2, 2, 4, ElementType::Custom, MemoryClass::Host, None)
        .unwrap_err();
    assert!(matches!(err, BasaltError::CustomElementType), "got: {err}");

    let err = mgr
        .image_uninit(2, 2, 3, ElementType::Float32, MemoryClass::Host, None)
        .unwrap_err();
    assert!(
        matches!(err, BasaltError::UnsupportedFormat { .. }),
        "got: {err}"
    );
}
