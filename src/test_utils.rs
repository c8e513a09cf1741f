//! Helpers shared by the unit tests

use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use region::Protection;

use crate::error::ProtectionError;
use crate::handle::{FnHandle, Signature};
use crate::patcher::{PageProtector, RegionProtector};

/// Page of read-execute memory standing in for a compiled function.
///
/// Patching one of these never touches code the test harness runs.
pub struct CodeBuffer {
    /// Backing allocation
    alloc: region::Allocation,
    /// Number of meaningful bytes at the start of the allocation
    len: usize,
}
impl CodeBuffer {
    /// Creates a buffer holding `bytes`
    pub fn new(bytes: &[u8]) -> Self {
        let mut alloc = region::alloc(bytes.len(), Protection::READ_WRITE).unwrap();
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), alloc.as_mut_ptr::<u8>(), bytes.len());
            region::protect(alloc.as_ptr::<u8>(), alloc.len(), Protection::READ_EXECUTE).unwrap();
        }
        Self {
            alloc,
            len: bytes.len(),
        }
    }

    /// Creates a buffer of `len` copies of `byte`
    pub fn filled(byte: u8, len: usize) -> Self {
        Self::new(&vec![byte; len])
    }

    /// Start of the buffer
    pub fn address(&self) -> usize {
        self.alloc.as_ptr::<u8>() as usize
    }

    /// Start of the buffer as a mutable pointer, for handing to the rewriter
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.alloc.as_ptr::<u8>() as _
    }

    /// Handle to the buffer as if it were a function of type `F`
    pub fn handle<F: 'static>(&self) -> FnHandle {
        unsafe { FnHandle::from_raw(self.address(), Signature::of::<F>()) }
    }

    /// Copy of the meaningful bytes
    pub fn bytes(&self) -> Vec<u8> {
        unsafe { slice::from_raw_parts(self.alloc.as_ptr::<u8>(), self.len) }.to_vec()
    }

    /// Current protection of the buffer's page
    pub fn protection(&self) -> Protection {
        region::query(self.alloc.as_ptr::<u8>())
            .unwrap()
            .protection()
    }
}

/// Protector which counts how many times it was asked to make memory writable
#[derive(Default)]
pub struct CountingProtector {
    /// Protector doing the actual work
    inner: RegionProtector,
    /// Number of calls to `make_writable`
    calls: AtomicUsize,
}
impl CountingProtector {
    /// Number of protection changes requested so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
unsafe impl PageProtector for CountingProtector {
    type Handle = region::ProtectGuard;

    unsafe fn make_writable(
        &self,
        address: *const u8,
        len: usize,
    ) -> Result<Self::Handle, ProtectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.make_writable(address, len)
    }
}

/// Protector which always refuses
#[derive(Default)]
pub struct DenyingProtector;
unsafe impl PageProtector for DenyingProtector {
    type Handle = ();

    unsafe fn make_writable(
        &self,
        address: *const u8,
        len: usize,
    ) -> Result<Self::Handle, ProtectionError> {
        Err(ProtectionError::MemoryProtectionDenied {
            address: address as usize,
            len,
        })
    }
}
