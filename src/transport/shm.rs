//! POSIX shared memory segment.
//!
//! Thin wrapper around `shm_open`, `ftruncate`, and `mmap`. The creator
//! owns the name: its segment unlinks the name when dropped, so a process
//! link never leaves a stale region behind on orderly teardown.
//!
//! Segment names must start with `/` and contain no other `/`.

use std::ffi::CString;
use std::io;
use std::ptr;

use super::region::RegionMemory;
use crate::error::{GroupwireError, Result};

/// Mapped POSIX shared memory segment.
pub struct ShmSegment {
    ptr: *mut u8,
    size: usize,
    name: String,
    owner: bool,
}

// SAFETY: the mapping is shared memory accessed from several threads and
// processes; control words are atomics and buffers follow the slot handshake.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a zeroed segment of `size` bytes.
    ///
    /// A stale segment with the same name is unlinked first.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name)
            .map_err(|_| GroupwireError::InvalidRegionName(name.to_string()))?;

        // SAFETY:
        // - c_name is a valid null-terminated string
        // - shm_unlink on a missing name only returns an error, which is ignored
        // - shm_open returns a valid fd or -1 (checked below)
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let len = match libc::off_t::try_from(size) {
            Ok(len) => len,
            Err(_) => {
                Self::abandon(fd, &c_name);
                return Err(GroupwireError::InvalidLayout(format!(
                    "segment of {} bytes too large",
                    size
                )));
            }
        };
        // SAFETY: fd is valid from the successful shm_open above.
        if unsafe { libc::ftruncate(fd, len) } < 0 {
            let err = io::Error::last_os_error();
            Self::abandon(fd, &c_name);
            return Err(err.into());
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                // SAFETY: the name was just created by us.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        // SAFETY: ptr maps `size` writable bytes nobody else has seen yet.
        unsafe { ptr::write_bytes(ptr, 0, size) };

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
            owner: true,
        })
    }

    /// Map the first `size` bytes of an existing segment.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name)
            .map_err(|_| GroupwireError::InvalidRegionName(name.to_string()))?;

        // SAFETY: c_name is a valid null-terminated string; mode is ignored
        // without O_CREAT.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        // Touching pages past the end of the object raises SIGBUS, so a
        // truncated segment must be refused before mapping.
        let actual = match Self::object_size(fd) {
            Ok(actual) => actual,
            Err(e) => {
                // SAFETY: fd is valid and closed exactly once.
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };
        if actual < size as u64 {
            // SAFETY: fd is valid and closed exactly once.
            unsafe { libc::close(fd) };
            return Err(GroupwireError::InvalidLayout(format!(
                "segment {} holds {} bytes, {} required",
                name, actual, size
            )));
        }

        let ptr = Self::map(fd, size)?;
        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
            owner: false,
        })
    }

    /// Size of the object behind `fd`.
    fn object_size(fd: libc::c_int) -> Result<u64> {
        let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
        // SAFETY: fd is valid; fstat fills `stat` on success.
        if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: fstat succeeded, so `stat` is initialized.
        let st_size = unsafe { stat.assume_init() }.st_size;
        Ok(u64::try_from(st_size).unwrap_or(0))
    }

    /// Close `fd` and remove a name this process just created.
    fn abandon(fd: libc::c_int, c_name: &CString) {
        // SAFETY: fd is valid and closed exactly once; the name was just
        // created by us.
        unsafe {
            libc::close(fd);
            libc::shm_unlink(c_name.as_ptr());
        }
    }

    /// mmap `size` bytes of `fd` read/write, then close `fd`.
    fn map(fd: libc::c_int, size: usize) -> Result<*mut u8> {
        // SAFETY:
        // - null address lets the kernel choose
        // - fd is valid and the object holds at least `size` bytes
        // - MAP_FAILED is checked below
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        let err = io::Error::last_os_error();

        // SAFETY: fd is valid; the mapping, if any, keeps its own reference.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(err.into());
        }
        Ok(ptr as *mut u8)
    }

    /// Validate segment name follows POSIX rules.
    pub fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') || name.len() < 2 {
            return Err(GroupwireError::InvalidRegionName(format!(
                "name must be '/' followed by at least one character: {}",
                name
            )));
        }
        if name[1..].contains('/') {
            return Err(GroupwireError::InvalidRegionName(format!(
                "name cannot contain '/' after the prefix: {}",
                name
            )));
        }
        if name.len() > 255 {
            return Err(GroupwireError::InvalidRegionName(format!(
                "name too long (max 255): {}",
                name
            )));
        }
        Ok(())
    }

    /// Remove a name. A missing name is not an error.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name)
            .map_err(|_| GroupwireError::InvalidRegionName(name.to_string()))?;

        // SAFETY: c_name is a valid null-terminated string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Segment name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this mapping created the segment.
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

// SAFETY: the mapping stays valid and fixed until drop.
unsafe impl RegionMemory for ShmSegment {
    fn base(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.size
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from a successful mmap and are unmapped once.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
        if self.owner {
            if let Err(e) = Self::unlink(&self.name) {
                tracing::warn!(name = %self.name, error = %e, "Failed to unlink region");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/gw-{}-{}-{}",
            tag,
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn exists(name: &str) -> bool {
        ShmSegment::open(name, 1).is_ok()
    }

    #[test]
    fn test_validate_name() {
        assert!(ShmSegment::validate_name("/foo").is_ok());
        assert!(ShmSegment::validate_name("foo").is_err());
        assert!(ShmSegment::validate_name("/").is_err());
        assert!(matches!(
            ShmSegment::validate_name("/foo/bar"),
            Err(GroupwireError::InvalidRegionName(_))
        ));
    }

    #[test]
    fn test_create_and_open_share_bytes() {
        let name = unique_name("seg");
        let seg1 = ShmSegment::create(&name, 4096).unwrap();
        assert!(seg1.is_owner());

        // SAFETY: both mappings are 4096 bytes; offset 0 is in bounds.
        unsafe { *seg1.base() = 0x42 };
        let seg2 = ShmSegment::open(&name, 4096).unwrap();
        assert!(!seg2.is_owner());
        // SAFETY: see above.
        assert_eq!(unsafe { *seg2.base() }, 0x42);
    }

    #[test]
    fn test_owner_drop_unlinks() {
        let name = unique_name("unlink");
        let seg = ShmSegment::create(&name, 128).unwrap();
        assert!(exists(&name));
        drop(seg);
        assert!(!exists(&name));
    }

    #[test]
    fn test_create_replaces_stale_segment() {
        let name = unique_name("stale");
        let stale = ShmSegment::create(&name, 128).unwrap();
        // SAFETY: 128-byte mapping, offset 0 in bounds.
        unsafe { *stale.base() = 7 };
        std::mem::forget(stale);

        let fresh = ShmSegment::create(&name, 128).unwrap();
        // SAFETY: see above.
        assert_eq!(unsafe { *fresh.base() }, 0);
    }

    #[test]
    fn test_open_nonexistent() {
        let result = ShmSegment::open(&unique_name("missing"), 128);
        assert!(matches!(result, Err(GroupwireError::Io(_))));
    }

    #[test]
    fn test_open_refuses_mapping_past_object_end() {
        let name = unique_name("short");
        let _seg = ShmSegment::create(&name, 128).unwrap();

        assert!(ShmSegment::open(&name, 128).is_ok());
        assert!(matches!(
            ShmSegment::open(&name, 129),
            Err(GroupwireError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_oversized_create_leaves_no_name() {
        let name = unique_name("huge");
        assert!(matches!(
            ShmSegment::create(&name, usize::MAX),
            Err(GroupwireError::InvalidLayout(_))
        ));
        assert!(!exists(&name));
    }

    #[test]
    fn test_unlink_idempotent() {
        let name = unique_name("idem");
        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(ShmSegment::unlink(&name).is_ok());
    }
}
