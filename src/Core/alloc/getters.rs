use super::*;

/// Accessors on DataportAllocator
///
/// These methods provide access to the private fields of DataportAllocator
/// for debugging and monitoring purposes.
impl DataportAllocator {
    /// Get the underlying shared memory backend
    pub fn shm(&self) -> &Arc<dyn SharedMemoryBackend> {
        &self.shm
    }

    /// Get the raw pointer to the GlobalHeader
    pub fn header_ptr(&self) -> *const GlobalHeader {
        self.header
    }

    /// Total size of the mapped region in bytes
    pub fn region_size(&self) -> usize {
        self.shm.size()
    }

    /// Check if the allocator has been properly initialized
    ///
    /// Returns true if the magic number in the header matches the expected value.
    /// This can be used to verify the allocator is attached to a valid region.
    pub fn is_initialized(&self) -> bool {
        // Safety: We assume the header pointer is valid if the allocator exists
        unsafe { !self.header.is_null() && (*self.header).magic == super::MAGIC_NUMBER }
    }
}
