use std::ptr::NonNull;

#[cfg(unix)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap and munmap
    /// # Safety
    /// see valid mmap and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// Zero-filled private anonymous mapping.
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_mmap(len: usize) -> *mut u8 {
        // SAFETY: safe if contract holds
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// # Safety
    /// must be allocated by mmap with the same length
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// Map `size` bytes of zeroed, page-aligned memory.
#[cfg(unix)]
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: null is checked below
    let ptr = unsafe { unix::anonymous_mmap(size) };
    NonNull::new(ptr)
}

#[cfg(unix)]
pub fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: ptr must come from map_memory with the same size
    unsafe { unix::anonymous_munmap(ptr.as_ptr(), size) };
}

#[cfg(not(unix))]
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    let layout =
        std::alloc::Layout::from_size_align(size, OS_PAGE_SIZE).ok()?;
    // SAFETY: layout has non-zero size for every caller in this crate
    NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
}

#[cfg(not(unix))]
pub fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    if let Ok(layout) = std::alloc::Layout::from_size_align(size, OS_PAGE_SIZE)
    {
        // SAFETY: ptr must come from map_memory with the same size
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}
