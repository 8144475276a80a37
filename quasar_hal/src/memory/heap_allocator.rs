//! Bitmap allocator for descriptor heap slots

use std::sync::Arc;

use crate::backend::{DescriptorHandle, DescriptorHeapType, NativeDescriptorHeap};
use crate::error::{Error, Result};
use crate::{hal_error, hal_warn};

const WORD_BITS: u32 = 64;

/// Contiguous range of heap slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub offset: u32,
    pub count: u32,
}

/// Allocates contiguous slot ranges from a fixed-size descriptor heap.
///
/// Slots are tracked in a bitmap (one bit per slot). Allocation is
/// first-fit: the lowest run of `count` free slots wins. Fully used 64-slot
/// words are skipped during the scan. There is no compaction, so mixed
/// allocation sizes can fragment the heap.
///
/// # Example
///
/// ```ignore
/// let mut heap = HeapAllocator::new(DescriptorHeapType::CbvSrvUav, 128);
/// let a = heap.allocate(4).unwrap();   // 0
/// let b = heap.allocate(2).unwrap();   // 4
/// heap.free(a, 4)?;                     // 0..4 free again
/// let c = heap.allocate(3).unwrap();   // 0 (first fit)
/// ```
pub struct HeapAllocator {
    heap_type: DescriptorHeapType,
    capacity: u32,
    bitmap: Vec<u64>,
    allocated: u32,
    native: Option<Arc<dyn NativeDescriptorHeap>>,
}

impl HeapAllocator {
    /// Create an allocator with every slot free
    pub fn new(heap_type: DescriptorHeapType, capacity: u32) -> Self {
        let words = capacity.div_ceil(WORD_BITS) as usize;
        Self {
            heap_type,
            capacity,
            bitmap: vec![0; words],
            allocated: 0,
            native: None,
        }
    }

    /// Create an allocator managing the slots of a native heap
    pub fn with_native(native: Arc<dyn NativeDescriptorHeap>) -> Self {
        let mut allocator = Self::new(native.heap_type(), native.capacity());
        allocator.native = Some(native);
        allocator
    }

    fn is_used(&self, index: u32) -> bool {
        self.bitmap[(index / WORD_BITS) as usize] & (1u64 << (index % WORD_BITS)) != 0
    }

    fn set_range(&mut self, offset: u32, count: u32, used: bool) {
        for index in offset..offset + count {
            let word = &mut self.bitmap[(index / WORD_BITS) as usize];
            let mask = 1u64 << (index % WORD_BITS);
            if used {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        }
    }

    /// Allocate `count` contiguous slots
    ///
    /// Returns the first slot of the range, or `None` if no free run of
    /// `count` slots exists.
    pub fn allocate(&mut self, count: u32) -> Option<u32> {
        if count == 0 || count > self.capacity - self.allocated {
            return None;
        }

        let mut run_start = 0u32;
        let mut run_length = 0u32;
        let mut index = 0u32;

        while index < self.capacity {
            // Skip fully used words
            if index % WORD_BITS == 0 && self.bitmap[(index / WORD_BITS) as usize] == u64::MAX {
                run_length = 0;
                index += WORD_BITS;
                continue;
            }

            if self.is_used(index) {
                run_length = 0;
            } else {
                if run_length == 0 {
                    run_start = index;
                }
                run_length += 1;
                if run_length == count {
                    self.set_range(run_start, count, true);
                    self.allocated += count;
                    return Some(run_start);
                }
            }
            index += 1;
        }

        None
    }

    /// Return `count` slots starting at `offset` to the heap
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` if the range leaves the heap or any slot in it
    /// is not currently allocated. The bitmap is left untouched.
    pub fn free(&mut self, offset: u32, count: u32) -> Result<()> {
        let end = offset as u64 + count as u64;
        if count == 0 || end > self.capacity as u64 {
            let message = format!(
                "{:?} heap: free of range {}+{} outside capacity {}",
                self.heap_type, offset, count, self.capacity
            );
            hal_error!("quasar::HeapAllocator", "{}", message);
            return Err(Error::InvalidState(message));
        }

        if let Some(index) = (offset..offset + count).find(|&i| !self.is_used(i)) {
            let message = format!(
                "{:?} heap: slot {} freed but not allocated (range {}+{})",
                self.heap_type, index, offset, count
            );
            hal_error!("quasar::HeapAllocator", "{}", message);
            return Err(Error::InvalidState(message));
        }

        self.set_range(offset, count, false);
        self.allocated -= count;
        Ok(())
    }

    /// Handle to a slot of the native heap
    pub fn handle(&self, index: u32) -> Option<DescriptorHandle> {
        self.native.as_ref().map(|heap| DescriptorHandle {
            heap: heap.clone(),
            index,
        })
    }

    pub fn native(&self) -> Option<&Arc<dyn NativeDescriptorHeap>> {
        self.native.as_ref()
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots currently allocated
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Raw occupancy bitmap, one bit per slot
    pub fn bitmap(&self) -> &[u64] {
        &self.bitmap
    }
}

impl Drop for HeapAllocator {
    fn drop(&mut self) {
        if self.allocated > 0 {
            hal_warn!(
                "quasar::HeapAllocator",
                "{:?} heap destroyed with {} slot(s) still allocated (leak)",
                self.heap_type, self.allocated
            );
        }
    }
}

#[cfg(test)]
#[path = "heap_allocator_tests.rs"]
mod tests;
