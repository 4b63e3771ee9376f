//! Round-trip demo: tensor → image → tensor, entirely on the GPU.
//!
//! Uploads a tensor, copies it into a storage image, copies the image into
//! a second tensor, downloads the result and checks it against the input.
//!
//! Run with `RUST_LOG=debug cargo run --example roundtrip` to watch the
//! resource lifecycle and recording steps.

use std::sync::Arc;

use basalt::{
    ElementType, Manager, Memory, MemoryClass, OpCopy, OpSyncDevice, OpSyncLocal, Result,
};

fn main() -> Result<()> {
    env_logger::init();

    let mgr = Manager::new()?;

    // 2x2 RGBA float image worth of data.
    let input: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let source = mgr.tensor(&input, MemoryClass::Host)?;
    let image = mgr.image_uninit(2, 2, 4, ElementType::Float32, MemoryClass::Host, None)?;
    let sink = mgr.tensor(&[0.0f32; 16], MemoryClass::Host)?;

    let all: Vec<Arc<dyn Memory>> = vec![source.clone(), image.clone(), sink.clone()];

    let mut seq = mgr.sequence()?;
    seq.record(Arc::new(OpSyncDevice::new(all.clone())))?;
    seq.record(Arc::new(OpCopy::new(source.clone(), vec![image.clone()])))?;
    seq.record(Arc::new(OpCopy::new(image, vec![sink.clone()])))?;
    seq.record(Arc::new(OpSyncLocal::new(all)))?;
    seq.eval()?;

    let output = sink.vector::<f32>()?;
    println!("input:  {input:?}");
    println!("output: {output:?}");
    assert_eq!(input, output, "round trip should be lossless");
    println!("round trip OK");
    Ok(())
}
