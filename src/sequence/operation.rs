//! Recordable Operations
//!
//! An [`Operation`] contributes commands to a sequence's command buffer and
//! optionally hooks the two CPU-side edges of an evaluation: `pre_eval`
//! runs before submission, `post_eval` after the fence signals. The three
//! concrete ops cover the whole data path — host→device sync, kernel
//! dispatch, device→host sync.

use std::sync::Arc;

use ash::vk;

use crate::algorithm::Algorithm;
use crate::errors::{BasaltError, Result};
use crate::memory::Memory;

/// Unit of work a [`Sequence`](crate::sequence::Sequence) records.
///
/// `record` must only append commands; it runs while the sequence's command
/// buffer is in the recording state. The hooks run on the evaluating thread.
pub trait Operation: Send + Sync {
    /// Appends this operation's commands to `cmd`.
    fn record(&self, cmd: vk::CommandBuffer) -> Result<()>;

    /// CPU-side work before submission (e.g. flushing host data into
    /// mapped staging memory).
    fn pre_eval(&self) -> Result<()> {
        Ok(())
    }

    /// CPU-side work after the fence signals (e.g. reading staging memory
    /// back into host containers).
    fn post_eval(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// OpSyncDevice — host → device
// ============================================================================

/// Copies every resource's staging contents into its primary memory and
/// leaves each primary in its kernel-ready state. Resources without a
/// staging handle are skipped.
pub struct OpSyncDevice {
    resources: Vec<Arc<dyn Memory>>,
}

impl OpSyncDevice {
    pub fn new(resources: Vec<Arc<dyn Memory>>) -> Self {
        Self { resources }
    }
}

impl Operation for OpSyncDevice {
    fn record(&self, cmd: vk::CommandBuffer) -> Result<()> {
        for r in &self.resources {
            log::trace!("OpSyncDevice: staging→device for {}", r.id());
            r.record_copy_from_staging_to_device(cmd)?;
        }
        Ok(())
    }

    fn pre_eval(&self) -> Result<()> {
        for r in &self.resources {
            r.flush_host_to_staging()?;
        }
        Ok(())
    }
}

// ============================================================================
// OpSyncLocal — device → host
// ============================================================================

/// Copies every resource's primary memory back into staging and, after the
/// evaluation completes, into the host container. This is the only path by
/// which device results become visible to the caller.
pub struct OpSyncLocal {
    resources: Vec<Arc<dyn Memory>>,
}

impl OpSyncLocal {
    pub fn new(resources: Vec<Arc<dyn Memory>>) -> Self {
        Self { resources }
    }
}

impl Operation for OpSyncLocal {
    fn record(&self, cmd: vk::CommandBuffer) -> Result<()> {
        for r in &self.resources {
            log::trace!("OpSyncLocal: device→staging for {}", r.id());
            r.record_copy_from_device_to_staging(cmd)?;
        }
        Ok(())
    }

    fn post_eval(&self) -> Result<()> {
        for r in &self.resources {
            r.read_back_from_staging()?;
        }
        Ok(())
    }
}

// ============================================================================
// OpCopy — resource → resource(s)
// ============================================================================

/// Copies one resource's primary memory into one or more destinations,
/// dispatching over the (source kind, destination kind) copy table. After
/// the copies, every touched resource is moved back to its kernel-ready
/// state so later dispatches see valid descriptors.
///
/// Device memory only; pair with [`OpSyncLocal`] to observe the result on
/// the host.
pub struct OpCopy {
    source: Arc<dyn Memory>,
    destinations: Vec<Arc<dyn Memory>>,
}

impl OpCopy {
    pub fn new(source: Arc<dyn Memory>, destinations: Vec<Arc<dyn Memory>>) -> Self {
        Self {
            source,
            destinations,
        }
    }
}

impl Operation for OpCopy {
    fn record(&self, cmd: vk::CommandBuffer) -> Result<()> {
        for dst in &self.destinations {
            log::trace!("OpCopy: {} → {}", self.source.id(), dst.id());
            dst.record_copy_from(cmd, self.source.as_ref())?;
        }
        // The next consumer may be a dispatch or another transfer (e.g. a
        // following SyncLocal), so publish the writes to both.
        self.source.record_primary_memory_barrier(
            cmd,
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
        )?;
        for dst in &self.destinations {
            dst.record_primary_memory_barrier(
                cmd,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
            )?;
        }
        Ok(())
    }
}

// ============================================================================
// OpAlgoDispatch — kernel execution
// ============================================================================

/// Records a compute dispatch of a bound [`Algorithm`]: a compute-stage
/// barrier per bound resource (which also moves images into their
/// descriptor layout), then bind + push constants + dispatch.
#[derive(Debug)]
pub struct OpAlgoDispatch {
    algorithm: Arc<Algorithm>,
    push_constants: Option<Vec<u8>>,
}

impl OpAlgoDispatch {
    pub fn new(algorithm: Arc<Algorithm>) -> Self {
        Self {
            algorithm,
            push_constants: None,
        }
    }

    /// Overrides the algorithm's stored push-constant block for this
    /// dispatch. The byte size must match the size fixed when the
    /// algorithm was built.
    pub fn with_push_constants(algorithm: Arc<Algorithm>, data: &[u8]) -> Result<Self> {
        if data.len() != algorithm.push_constant_size() {
            return Err(BasaltError::PushConstantSizeMismatch {
                provided: data.len(),
                expected: algorithm.push_constant_size(),
            });
        }
        Ok(Self {
            algorithm,
            push_constants: Some(data.to_vec()),
        })
    }
}

impl Operation for OpAlgoDispatch {
    fn record(&self, cmd: vk::CommandBuffer) -> Result<()> {
        for r in self.algorithm.resources() {
            r.record_primary_memory_barrier(
                cmd,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
            )?;
        }
        self.algorithm
            .record_dispatch(cmd, self.push_constants.as_deref())
    }
}
