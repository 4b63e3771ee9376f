//! Command Sequences
//!
//! A [`Sequence`] owns one command pool, one primary command buffer and one
//! fence, and moves through an explicit state machine:
//!
//! ```text
//! Idle → Recording → Recorded → Evaluating → Evaluated
//!          ↑ record()             ↑ eval_async()   | eval_await()
//!          (also from Idle)       (also re-submit  ↓
//!                                  from Evaluated) post_eval hooks
//! ```
//!
//! Recording appends operations in order; evaluation submits them exactly
//! in that order, never reordered. A recorded sequence can be re-evaluated
//! without re-recording. Every illegal transition fails with a
//! sequence-state error naming the state it found.

pub mod operation;

use std::sync::Arc;

use ash::vk;
use uuid::Uuid;

use crate::device::DeviceContext;
use crate::errors::{BasaltError, Result};

pub use operation::{OpAlgoDispatch, OpCopy, OpSyncDevice, OpSyncLocal, Operation};

/// Lifecycle state of a [`Sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// No operations recorded yet.
    Idle,
    /// Command buffer open, operations being appended.
    Recording,
    /// Command buffer closed, ready to submit.
    Recorded,
    /// Submitted, fence not yet awaited.
    Evaluating,
    /// Fence signalled and post-eval hooks run; may be re-submitted.
    Evaluated,
}

impl SequenceState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Recording => "Recording",
            Self::Recorded => "Recorded",
            Self::Evaluating => "Evaluating",
            Self::Evaluated => "Evaluated",
        }
    }
}

/// An ordered batch of operations recorded into one command buffer.
pub struct Sequence {
    ctx: Arc<DeviceContext>,
    id: Uuid,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    state: SequenceState,
    operations: Vec<Arc<dyn Operation>>,
    destroyed: bool,
}

impl Sequence {
    pub(crate) fn new(ctx: Arc<DeviceContext>) -> Result<Self> {
        let device = ctx.device();
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.queue_family_index());
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(e.into());
            }
        };

        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        log::debug!("Sequence {id} created");
        Ok(Self {
            ctx,
            id,
            command_pool,
            command_buffer,
            fence,
            state: SequenceState::Idle,
            operations: Vec::new(),
            destroyed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        !self.destroyed
    }

    fn check_alive(&self, action: &'static str) -> Result<()> {
        if self.destroyed {
            return Err(BasaltError::ResourceState(format!(
                "{action} on destroyed sequence {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Appends an operation. Opens the command buffer on the first record.
    ///
    /// Valid from `Idle` and `Recording` only; a recorded or in-flight
    /// sequence must be [`reset`](Sequence::reset) before new operations
    /// can be added.
    pub fn record(&mut self, op: Arc<dyn Operation>) -> Result<()> {
        self.check_alive("record")?;
        match self.state {
            SequenceState::Idle => {
                let begin_info = vk::CommandBufferBeginInfo::default();
                unsafe {
                    self.ctx
                        .device()
                        .begin_command_buffer(self.command_buffer, &begin_info)
                }?;
                self.state = SequenceState::Recording;
            }
            SequenceState::Recording => {}
            found => {
                return Err(BasaltError::SequenceState {
                    found: found.name(),
                    action: "record",
                });
            }
        }
        op.record(self.command_buffer)?;
        self.operations.push(op);
        log::trace!(
            "Sequence {}: operation {} recorded",
            self.id,
            self.operations.len()
        );
        Ok(())
    }

    /// Submits the recorded operations and blocks until they complete.
    ///
    /// Equivalent to [`eval_async`](Sequence::eval_async) immediately
    /// followed by [`eval_await`](Sequence::eval_await).
    pub fn eval(&mut self) -> Result<()> {
        self.eval_async()?;
        self.eval_await()
    }

    /// Runs pre-eval hooks and submits the command buffer without waiting.
    ///
    /// The caller must invoke [`eval_await`](Sequence::eval_await) before
    /// touching any resource the sequence reads or writes. Valid from
    /// `Recording` (the buffer is closed first), `Recorded` and
    /// `Evaluated` (re-submission of the same recording).
    pub fn eval_async(&mut self) -> Result<()> {
        self.check_alive("eval_async")?;
        match self.state {
            SequenceState::Recording => {
                unsafe { self.ctx.device().end_command_buffer(self.command_buffer) }?;
                self.state = SequenceState::Recorded;
            }
            SequenceState::Recorded | SequenceState::Evaluated => {}
            found => {
                return Err(BasaltError::SequenceState {
                    found: found.name(),
                    action: "eval",
                });
            }
        }
        if self.operations.is_empty() {
            return Err(BasaltError::SequenceState {
                found: self.state.name(),
                action: "eval with no recorded operations",
            });
        }

        for op in &self.operations {
            op.pre_eval()?;
        }

        let device = self.ctx.device();
        unsafe { device.reset_fences(&[self.fence]) }?;
        let command_buffers = [self.command_buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe { device.queue_submit(self.ctx.queue(), &[submit], self.fence) }?;
        self.state = SequenceState::Evaluating;
        log::debug!(
            "Sequence {} submitted ({} operations)",
            self.id,
            self.operations.len()
        );
        Ok(())
    }

    /// Blocks on the fence, then runs post-eval hooks.
    ///
    /// A device loss surfaces here as a device-fatal error; the sequence
    /// still moves to `Evaluated` so it can be destroyed.
    pub fn eval_await(&mut self) -> Result<()> {
        self.check_alive("eval_await")?;
        if self.state != SequenceState::Evaluating {
            return Err(BasaltError::SequenceState {
                found: self.state.name(),
                action: "await",
            });
        }
        let wait =
            unsafe { self.ctx.device().wait_for_fences(&[self.fence], true, u64::MAX) };
        self.state = SequenceState::Evaluated;
        wait?;

        for op in &self.operations {
            op.post_eval()?;
        }
        log::debug!("Sequence {} evaluated", self.id);
        Ok(())
    }

    /// Drops the recorded operations and reopens the sequence for
    /// recording. Invalid while an evaluation is in flight.
    pub fn reset(&mut self) -> Result<()> {
        self.check_alive("reset")?;
        if self.state == SequenceState::Evaluating {
            return Err(BasaltError::SequenceState {
                found: self.state.name(),
                action: "reset",
            });
        }
        unsafe {
            self.ctx.device().reset_command_buffer(
                self.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )
        }?;
        self.operations.clear();
        self.state = SequenceState::Idle;
        Ok(())
    }

    /// Releases the pool, buffer and fence. Idempotent. Waits out an
    /// in-flight evaluation first so nothing is freed under the GPU.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        log::debug!("Sequence {} destroy", self.id);
        let device = self.ctx.device();
        unsafe {
            if self.state == SequenceState::Evaluating {
                let _ = device.wait_for_fences(&[self.fence], true, u64::MAX);
            }
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

impl Drop for Sequence {
    fn drop(&mut self) {
        self.destroy();
    }
}
