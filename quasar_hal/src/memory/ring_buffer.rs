//! Frame-pipelined ring buffer for transient upload memory
//!
//! Dynamic and volatile buffer writes are served from a fixed-capacity
//! circular region of CPU-writable, GPU-readable memory. A span is only
//! reclaimed once the frame that produced it has been completed by the GPU:
//! `finish_frame` snapshots the tail at the end of recording and
//! `on_frame_completed` moves the head up to that snapshot.
//!
//! Wrap policy: an allocation that does not fit before the end of the
//! buffer restarts at offset 0 only when `[0, size)` lies entirely below
//! the head (oldest unreclaimed byte). Otherwise the allocation fails; the
//! buffer never grows and never overwrites data the GPU may still read.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::{NativeBuffer, UploadHeap};
use crate::error::{Error, Result};
use crate::types::RING_BUFFER_ALIGNMENT;
use crate::{hal_error, hal_trace};

/// Sentinel offset for a failed allocation
pub const INVALID_OFFSET: u64 = u64::MAX;

/// Tail snapshot taken when a frame finished recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingFrame {
    frame_index: u64,
    tail: u64,
    /// Value of `total_allocated` at the snapshot
    allocated_mark: u64,
}

/// Circular span allocator over an upload heap
pub struct RingBuffer {
    heap: Box<dyn UploadHeap>,
    capacity: u64,
    /// Oldest byte still in use by an unfinished frame
    head: u64,
    /// Next free byte
    tail: u64,
    /// Bytes between head and tail, including skipped bytes at wrap
    used: u64,
    /// Running count of consumed bytes (allocations + skipped bytes)
    total_allocated: u64,
    pending_frames: VecDeque<PendingFrame>,
}

/// `value` rounded up to `alignment` (`None` on overflow)
fn align_up(value: u64, alignment: u64) -> Option<u64> {
    Some(value.checked_add(alignment - 1)? / alignment * alignment)
}

impl RingBuffer {
    /// Create a ring buffer over `heap`, whose size becomes the capacity
    ///
    /// # Errors
    ///
    /// `Error::InitializationFailed` if the heap size is zero or not a
    /// multiple of the ring buffer alignment.
    pub fn init(heap: Box<dyn UploadHeap>) -> Result<Self> {
        let capacity = heap.size();
        if capacity == 0 || capacity % RING_BUFFER_ALIGNMENT != 0 {
            return Err(Error::InitializationFailed(format!(
                "ring buffer capacity must be a positive multiple of {} (got {})",
                RING_BUFFER_ALIGNMENT, capacity
            )));
        }

        Ok(Self {
            heap,
            capacity,
            head: 0,
            tail: 0,
            used: 0,
            total_allocated: 0,
            pending_frames: VecDeque::new(),
        })
    }

    /// Allocate `size` bytes (rounded up to 256)
    ///
    /// Returns the offset of the span, or `None` when the request cannot be
    /// served without touching unreclaimed memory.
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            hal_error!("quasar::RingBuffer", "Zero-sized ring buffer allocation");
            return None;
        }

        let Some(size) = align_up(size, RING_BUFFER_ALIGNMENT) else {
            hal_error!("quasar::RingBuffer", "Ring buffer allocation of {} bytes overflows", size);
            return None;
        };
        if size > self.capacity - self.used {
            return None;
        }

        let offset = if self.tail >= self.head {
            // Free space is [tail, capacity) followed by [0, head)
            if size <= self.capacity - self.tail {
                self.tail
            } else if size <= self.head {
                let skipped = self.capacity - self.tail;
                self.used += skipped;
                self.total_allocated += skipped;
                0
            } else {
                return None;
            }
        } else {
            // Wrapped: free space is [tail, head)
            if self.tail + size <= self.head {
                self.tail
            } else {
                return None;
            }
        };

        self.tail = offset + size;
        self.used += size;
        self.total_allocated += size;

        hal_trace!(
            "quasar::RingBuffer",
            "Allocated {} bytes at {} (used {}/{})",
            size, offset, self.used, self.capacity
        );

        Some(offset)
    }

    /// Snapshot the tail for `frame_index`
    ///
    /// Everything allocated so far belongs to this frame or an earlier one.
    pub fn finish_frame(&mut self, frame_index: u64) {
        if let Some(last) = self.pending_frames.back() {
            debug_assert!(
                frame_index > last.frame_index,
                "frame indices must increase ({} after {})",
                frame_index, last.frame_index
            );
        }

        self.pending_frames.push_back(PendingFrame {
            frame_index,
            tail: self.tail,
            allocated_mark: self.total_allocated,
        });
    }

    /// Reclaim the memory of the oldest pending frame
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` if `frame_index` is not the oldest pending
    /// frame (completion must follow `finish_frame` order). Nothing is
    /// reclaimed in that case.
    pub fn on_frame_completed(&mut self, frame_index: u64) -> Result<()> {
        let oldest = match self.pending_frames.front() {
            Some(frame) => *frame,
            None => {
                let message = format!("Frame {} completed but no frame is pending", frame_index);
                hal_error!("quasar::RingBuffer", "{}", message);
                return Err(Error::InvalidState(message));
            }
        };

        if oldest.frame_index != frame_index {
            let message = format!(
                "Frame {} completed out of order (oldest pending frame is {})",
                frame_index, oldest.frame_index
            );
            hal_error!("quasar::RingBuffer", "{}", message);
            return Err(Error::InvalidState(message));
        }

        self.pending_frames.pop_front();
        self.head = oldest.tail;
        self.used = self.total_allocated - oldest.allocated_mark;

        hal_trace!(
            "quasar::RingBuffer",
            "Frame {} reclaimed, head={} tail={} used={}",
            frame_index, self.head, self.tail, self.used
        );

        Ok(())
    }

    /// Copy `data` into the backing storage at `offset`
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.capacity {
            return Err(Error::InvalidResource(format!(
                "ring buffer write of {} bytes at {} exceeds capacity {}",
                data.len(), offset, self.capacity
            )));
        }
        self.heap.write(offset, data)
    }

    /// Native buffer backing the ring (binding / copy source)
    pub fn native_buffer(&self) -> &Arc<dyn NativeBuffer> {
        self.heap.buffer()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Number of frames finished but not yet completed
    pub fn pending_frames(&self) -> usize {
        self.pending_frames.len()
    }
}

#[cfg(test)]
#[path = "ring_buffer_tests.rs"]
mod tests;
