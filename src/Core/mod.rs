pub mod SharedMemory;
pub mod alloc;
pub mod clock;
pub mod futex;

pub use alloc::DataportAllocator;
pub use SharedMemory::{
    attach_shared_memory, create_shared_memory, page_align, RawHandle, RegionBacking,
    SharedMemoryBackend, PAGE_SIZE,
};
