//! Instruction cache maintenance after rewriting code

#[cfg(target_os = "macos")]
extern "C" {
    fn sys_icache_invalidate(start: *mut core::ffi::c_void, len: usize);
}

#[cfg(all(not(target_os = "macos"), target_arch = "aarch64"))]
extern "C" {
    fn __clear_cache(start: *mut core::ffi::c_void, end: *mut core::ffi::c_void);
}

/// Makes freshly written code at `address` visible to instruction fetch.
///
/// AArch64 keeps separate instruction and data caches, so bytes written through the data side
/// must be flushed before they are executed. x86-64 keeps them coherent and this is a no-op.
///
/// # Safety
///
/// `address` must be valid for `len` bytes
pub unsafe fn flush_instruction_cache(address: *mut u8, len: usize) {
    #[cfg(target_os = "macos")]
    {
        sys_icache_invalidate(address as _, len);
    }

    #[cfg(all(not(target_os = "macos"), target_arch = "aarch64"))]
    {
        __clear_cache(address as _, address.add(len) as _);
    }

    #[cfg(not(any(target_os = "macos", target_arch = "aarch64")))]
    {
        let _ = (address, len);
    }
}
