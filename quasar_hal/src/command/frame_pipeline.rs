//! Per-recorder frame pipeline
//!
//! A recorder owns N command allocator slots and one ring buffer. Frame `f`
//! records into slot `f % N`; the slot (and the ring span of frame `f`)
//! only becomes reusable once the GPU has completed the fence value frame
//! `f` was submitted or discarded with.
//!
//! Frames reach the queue in the order they finished recording. Together
//! with the increasing fence values this keeps ring reclamation FIFO. A
//! frame discarded while older frames are still unsubmitted waits here
//! until it reaches the front, then the device retires it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::backend::{GraphicsBackend, NativeCommandAllocator, NativeCommandList};
use crate::command::CommandListId;
use crate::error::{Error, Result};
use crate::memory::RingBuffer;
use crate::types::QueueType;
use crate::{hal_debug, hal_error};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FrameSlot {
    /// Frame currently using the slot
    frame_index: Option<u64>,
    /// Fence value the frame was submitted or discarded with
    fence_value: Option<u64>,
}

/// Ring buffer, command allocators and slot bookkeeping of one recorder
pub struct FramePipeline {
    ring: RingBuffer,
    allocators: Vec<Box<dyn NativeCommandAllocator>>,
    slots: Vec<FrameSlot>,
    /// Finished frames not yet handed to the queue, oldest first
    unsubmitted: VecDeque<u64>,
    /// Discarded frames waiting for older frames to be submitted
    deferred_discards: Vec<(u64, CommandListId)>,
}

/// Link from a command list back to the frame pipeline that produced it
#[derive(Clone)]
pub struct FrameTicket {
    pub pipeline: Arc<Mutex<FramePipeline>>,
    pub frame_index: u64,
}

impl std::fmt::Debug for FrameTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTicket")
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

impl FramePipeline {
    pub fn new(
        backend: &dyn GraphicsBackend,
        queue: QueueType,
        frames_in_flight: u32,
        ring_size: u64,
    ) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(Error::InitializationFailed(
                "frame pipeline needs at least one slot".to_string(),
            ));
        }

        let ring = RingBuffer::init(backend.create_upload_heap(ring_size)?)?;
        let allocators = (0..frames_in_flight)
            .map(|_| backend.create_command_allocator(queue))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ring,
            allocators,
            slots: vec![FrameSlot::default(); frames_in_flight as usize],
            unsubmitted: VecDeque::new(),
            deferred_discards: Vec::new(),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_for(&self, frame_index: u64) -> usize {
        (frame_index % self.slots.len() as u64) as usize
    }

    /// Frame still holding `slot` and the fence value it retires with
    pub fn pending(&self, slot: usize) -> Option<(u64, Option<u64>)> {
        let slot = self.slots.get(slot)?;
        slot.frame_index.map(|frame| (frame, slot.fence_value))
    }

    /// Claim the slot of `frame_index`, reset its allocator and open a list
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` if the slot still belongs to an unfinished frame.
    pub fn begin_frame(&mut self, frame_index: u64) -> Result<Box<dyn NativeCommandList>> {
        let slot = self.slot_for(frame_index);
        if let Some((frame, _)) = self.pending(slot) {
            let message = format!(
                "Slot {} still in use by frame {} (beginning frame {})",
                slot, frame, frame_index
            );
            hal_error!("quasar::FramePipeline", "{}", message);
            return Err(Error::InvalidState(message));
        }

        let allocator = &mut self.allocators[slot];
        allocator.reset()?;
        let list = allocator.begin_command_list()?;

        self.slots[slot] = FrameSlot {
            frame_index: Some(frame_index),
            fence_value: None,
        };
        Ok(list)
    }

    /// Release the slot of a frame that failed to start recording
    pub fn cancel_frame(&mut self, frame_index: u64) {
        let slot = self.slot_for(frame_index);
        if self.slots[slot].frame_index == Some(frame_index) {
            self.slots[slot] = FrameSlot::default();
        }
    }

    /// Frame finished recording: snapshot the ring and queue it for submission
    pub fn finish_frame(&mut self, frame_index: u64) {
        self.ring.finish_frame(frame_index);
        self.unsubmitted.push_back(frame_index);
    }

    /// Position of a finished frame in the submission queue
    pub fn unsubmitted_position(&self, frame_index: u64) -> Option<usize> {
        self.unsubmitted.iter().position(|f| *f == frame_index)
    }

    /// Retire `frame_index` as soon as every older frame is submitted
    pub fn defer_discard(&mut self, frame_index: u64, id: CommandListId) {
        if !self.is_discard_deferred(frame_index) {
            self.deferred_discards.push((frame_index, id));
        }
    }

    pub fn is_discard_deferred(&self, frame_index: u64) -> bool {
        self.deferred_discards.iter().any(|(frame, _)| *frame == frame_index)
    }

    /// Deferred discard that has reached the front of the submission queue
    pub fn take_ready_discard(&mut self) -> Option<(u64, CommandListId)> {
        let front = *self.unsubmitted.front()?;
        let position = self
            .deferred_discards
            .iter()
            .position(|(frame, _)| *frame == front)?;
        Some(self.deferred_discards.swap_remove(position))
    }

    /// Frame was handed to the queue (or discarded) with `fence_value`
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` unless `frame_index` is the oldest finished
    /// frame not yet submitted.
    pub fn on_frame_submitted(&mut self, frame_index: u64, fence_value: u64) -> Result<()> {
        if self.unsubmitted.front() != Some(&frame_index) {
            let message = format!(
                "Frame {} submitted out of order (next expected {:?})",
                frame_index,
                self.unsubmitted.front()
            );
            hal_error!("quasar::FramePipeline", "{}", message);
            return Err(Error::InvalidState(message));
        }
        self.unsubmitted.pop_front();

        let slot = self.slot_for(frame_index);
        self.slots[slot].fence_value = Some(fence_value);
        Ok(())
    }

    /// GPU completed the frame: reclaim its ring span and free its slot
    pub fn on_frame_completed(&mut self, frame_index: u64) -> Result<()> {
        self.ring.on_frame_completed(frame_index)?;

        let slot = self.slot_for(frame_index);
        if self.slots[slot].frame_index == Some(frame_index) {
            self.slots[slot] = FrameSlot::default();
        }
        hal_debug!(
            "quasar::FramePipeline",
            "Frame {} completed, slot {} free",
            frame_index, slot
        );
        Ok(())
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }
}

#[cfg(test)]
#[path = "frame_pipeline_tests.rs"]
mod tests;
