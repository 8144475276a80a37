//! Fixed-capacity allocators: transient upload memory and descriptor heap slots

pub mod heap_allocator;
pub mod ring_buffer;

pub use heap_allocator::{DescriptorRange, HeapAllocator};
pub use ring_buffer::{RingBuffer, INVALID_OFFSET};
