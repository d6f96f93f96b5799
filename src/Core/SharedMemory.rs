// Shared memory backend for dataport regions
// Anonymous mappings serve threads and forked children; named mappings live in
// /dev/shm so a separate process (e.g. a guest agent) can attach.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io;
use std::sync::Arc;

/// Dataport granularity. Regions and channel bands are sized in whole pages.
pub const PAGE_SIZE: usize = 4096;

/// Round `size` up to the next page boundary.
#[inline]
pub const fn page_align(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Shared memory backend trait for mapped dataport regions
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying handle
    fn raw_handle(&self) -> RawHandle;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// Unix file descriptor backing a named region
    Fd(i32),
    /// Anonymous mapping with no file behind it
    Anonymous,
}

/// Where a region's pages come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionBacking {
    /// MAP_SHARED | MAP_ANONYMOUS; visible to threads and forked children
    #[default]
    Anonymous,
    /// `/dev/shm/<name>`; attachable by name from another process
    Named { name: String },
}

/// Create a new zero-filled shared memory region of at least `size` bytes.
#[cfg(target_os = "linux")]
pub fn create_shared_memory(
    size: usize,
    backing: &RegionBacking,
) -> io::Result<Arc<dyn SharedMemoryBackend>> {
    let region = match backing {
        RegionBacking::Anonymous => LinuxSharedMemory::anonymous(size)?,
        RegionBacking::Named { name } => LinuxSharedMemory::create(size, name)?,
    };
    Ok(Arc::new(region))
}

/// Attach to an existing named region created by another process.
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str, size: usize) -> io::Result<Arc<dyn SharedMemoryBackend>> {
    Ok(Arc::new(LinuxSharedMemory::attach(name, size)?))
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(
    _size: usize,
    _backing: &RegionBacking,
) -> io::Result<Arc<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str, _size: usize) -> io::Result<Arc<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
pub use linux::LinuxSharedMemory;

#[cfg(target_os = "linux")]
mod linux {
    use super::{page_align, RawHandle, SharedMemoryBackend};
    use std::fs::OpenOptions;
    use std::io;
    use std::os::fd::{AsRawFd, IntoRawFd};
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::PathBuf;
    use std::ptr::{self, NonNull};

    #[derive(Debug)]
    pub struct LinuxSharedMemory {
        ptr: NonNull<u8>,
        size: usize,
        fd: Option<i32>,
        /// Set on the creator of a named region; the file is unlinked on drop.
        owned_path: Option<PathBuf>,
    }

    unsafe impl Send for LinuxSharedMemory {}
    unsafe impl Sync for LinuxSharedMemory {}

    fn shm_path(name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains('/') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid shared memory name {:?}", name),
            ));
        }
        Ok(PathBuf::from(format!("/dev/shm/{}", name)))
    }

    unsafe fn map(size: usize, fd: i32, flags: i32) -> io::Result<NonNull<u8>> {
        let ptr = libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            fd,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }

    impl LinuxSharedMemory {
        /// Anonymous shared mapping. mmap returns page-aligned, zeroed memory.
        pub fn anonymous(size: usize) -> io::Result<Self> {
            if size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Shared memory size must be non-zero",
                ));
            }
            let size = page_align(size);
            let ptr = unsafe { map(size, -1, libc::MAP_SHARED | libc::MAP_ANONYMOUS)? };
            Ok(Self {
                ptr,
                size,
                fd: None,
                owned_path: None,
            })
        }

        /// Create (or truncate) a named region in /dev/shm.
        pub fn create(size: usize, name: &str) -> io::Result<Self> {
            if size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Shared memory size must be non-zero",
                ));
            }
            let size = page_align(size);
            let path = shm_path(name)?;

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)
                .map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!("Failed to create shared memory file at {}: {}", path.display(), e),
                    )
                })?;

            // A fresh truncate zero-fills the region
            if unsafe { libc::ftruncate(file.as_raw_fd(), size as libc::off_t) } != 0 {
                return Err(io::Error::last_os_error());
            }

            let fd = file.into_raw_fd();
            let ptr = match unsafe { map(size, fd, libc::MAP_SHARED) } {
                Ok(ptr) => ptr,
                Err(e) => {
                    unsafe { libc::close(fd) };
                    return Err(e);
                }
            };

            Ok(Self {
                ptr,
                size,
                fd: Some(fd),
                owned_path: Some(path),
            })
        }

        /// Map an existing named region. The file must be at least `expected_size` bytes.
        pub fn attach(name: &str, expected_size: usize) -> io::Result<Self> {
            let path = shm_path(name)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("Failed to open shared memory at {}: {}", path.display(), e),
                    )
                })?;

            let actual_size = file.metadata()?.len() as usize;
            if actual_size < expected_size || actual_size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Shared memory too small: expected at least {}, got {}",
                        expected_size, actual_size
                    ),
                ));
            }

            let fd = file.into_raw_fd();
            let ptr = match unsafe { map(actual_size, fd, libc::MAP_SHARED) } {
                Ok(ptr) => ptr,
                Err(e) => {
                    unsafe { libc::close(fd) };
                    return Err(e);
                }
            };

            Ok(Self {
                ptr,
                size: actual_size,
                fd: Some(fd),
                owned_path: None,
            })
        }
    }

    impl Drop for LinuxSharedMemory {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
                if let Some(fd) = self.fd {
                    libc::close(fd);
                }
            }
            if let Some(path) = self.owned_path.take() {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    impl SharedMemoryBackend for LinuxSharedMemory {
        fn as_ptr(&self) -> *mut u8 {
            self.ptr.as_ptr()
        }

        fn size(&self) -> usize {
            self.size
        }

        fn raw_handle(&self) -> RawHandle {
            match self.fd {
                Some(fd) => RawHandle::Fd(fd),
                None => RawHandle::Anonymous,
            }
        }
    }
}
