//! This module contains the code rewriter, which swaps raw bytes in and out of code pages

use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{DefaultProtector, PageProtector};
use crate::code::cache::flush_instruction_cache;
use crate::error::ProtectionError;

/// Serializes protection changes across every rewriter in the process. Two registries may patch
/// functions sharing a page, and restoring one range's protection would otherwise revoke write
/// access the other is relying on.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Acquires [`WRITE_LOCK`]
fn write_lock() -> MutexGuard<'static, ()> {
    WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rewriter for overwriting code with raw bytes and putting the original bytes back.
///
/// The rewriter does not track what it has written; the saved bytes are handed back to the caller.
#[derive(Debug, Default)]
pub struct CodeRewriter<P = DefaultProtector> {
    /// Protector used to make code writable before every write
    protector: P,
}
impl<P: PageProtector> CodeRewriter<P> {
    /// Creates a new [`CodeRewriter`] which writes through `protector`
    pub fn new(protector: P) -> Self {
        Self { protector }
    }

    /// Underlying page protector
    pub fn protector(&self) -> &P {
        &self.protector
    }

    /// Makes `[address, address + len)` writable.
    ///
    /// # Safety
    ///
    /// See [`PageProtector::make_writable`]
    pub unsafe fn make_writable(
        &self,
        address: *const u8,
        len: usize,
    ) -> Result<P::Handle, ProtectionError> {
        self.protector.make_writable(address, len)
    }

    /// Copies `len` bytes from `source` over `target`, returning the bytes that were overwritten.
    ///
    /// Nothing is written if the target cannot be made writable. An empty window touches neither
    /// memory nor page protections.
    ///
    /// # Safety
    ///
    /// - `target` and `source` must be valid for `len` bytes
    /// - no thread may be executing the code at `target` during the write
    pub unsafe fn overwrite_bytes(
        &self,
        target: *mut u8,
        source: *const u8,
        len: usize,
    ) -> Result<Vec<u8>, ProtectionError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let _lock = write_lock();
        let _handle = self.make_writable(target, len)?;

        let mut original = Vec::with_capacity(len);

        // Safety: caller must pass in a `target` pointer valid for the full length of the patch
        ptr::copy(target, original.as_mut_ptr(), len);

        // Safety: We initialized the vec to len, so fix the length
        original.set_len(len);

        // Source and target windows may overlap when copying between neighbouring functions
        ptr::copy(source, target, len);
        flush_instruction_cache(target, len);

        log::trace!("overwrote {len} bytes at {:#x}", target as usize);
        Ok(original)
    }

    /// Writes `saved` back over `target`.
    ///
    /// # Safety
    ///
    /// - `target` must be valid for `saved.len()` bytes
    /// - no thread may be executing the code at `target` during the write
    pub unsafe fn restore_bytes(
        &self,
        target: *mut u8,
        saved: &[u8],
    ) -> Result<(), ProtectionError> {
        if saved.is_empty() {
            return Ok(());
        }
        let _lock = write_lock();
        let _handle = self.make_writable(target, saved.len())?;

        ptr::copy(saved.as_ptr(), target, saved.len());
        flush_instruction_cache(target, saved.len());

        log::trace!("restored {} bytes at {:#x}", saved.len(), target as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::slice;

    use crate::patcher::byte::CodeRewriter;
    use crate::patcher::RegionProtector;
    use crate::test_utils::{CodeBuffer, CountingProtector};

    #[test]
    /// Test patch and revert functionality
    fn test_patch() {
        let mut data = vec![1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();
        let size = data.len();

        // sanity check
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, [1, 2, 3, 4]);

        // get our rewriter to test
        let rewriter = CodeRewriter::new(RegionProtector::new());

        // patch the vec's data
        let patch = [4u8, 3, 2, 1];
        let original = unsafe { rewriter.overwrite_bytes(ptr, patch.as_ptr(), size).unwrap() };
        assert_eq!(original, [1, 2, 3, 4]);

        // make sure the data was actually changed
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, [4, 3, 2, 1]);

        // restore the patch
        unsafe { rewriter.restore_bytes(ptr, &original).unwrap() };

        // make sure the patch was restored
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Tests a partial patch of a block to ensure we're not overwriting outside the patch area
    fn test_partial_patch() {
        let mut data = vec![1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();
        let size = data.len();

        let rewriter = CodeRewriter::new(RegionProtector::new());

        // patch the vec's data
        let original = unsafe {
            rewriter
                .overwrite_bytes(ptr.add(1), [5u8, 5].as_ptr(), 2)
                .unwrap()
        };
        assert_eq!(original, [2, 3]);

        // make sure the data was actually changed
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, [1, 5, 5, 4]);

        // restore the patch
        unsafe { rewriter.restore_bytes(ptr.add(1), &original).unwrap() };

        // make sure the patch was restored
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Code pages are read-execute before and after a rewrite
    fn test_patch_code() {
        let code = CodeBuffer::filled(0x90, 32);
        let rewriter = CodeRewriter::new(RegionProtector::new());

        let original = unsafe {
            rewriter
                .overwrite_bytes(code.as_mut_ptr(), [0xcc; 8].as_ptr(), 8)
                .unwrap()
        };
        assert_eq!(original, [0x90; 8]);
        assert_eq!(code.bytes()[..8], [0xcc; 8]);
        assert_eq!(code.bytes()[8..], [0x90; 24]);
        assert_eq!(code.protection(), region::Protection::READ_EXECUTE);

        unsafe { rewriter.restore_bytes(code.as_mut_ptr(), &original).unwrap() };
        assert_eq!(code.bytes(), [0x90; 32]);
        assert_eq!(code.protection(), region::Protection::READ_EXECUTE);
    }

    #[test]
    /// Empty windows are written and restored without changing protections
    fn test_empty_window() {
        let code = CodeBuffer::filled(0x90, 32);
        let rewriter = CodeRewriter::new(CountingProtector::default());

        let original = unsafe {
            rewriter
                .overwrite_bytes(code.as_mut_ptr(), [0xcc; 8].as_ptr(), 0)
                .unwrap()
        };
        assert!(original.is_empty());
        unsafe { rewriter.restore_bytes(code.as_mut_ptr(), &original).unwrap() };

        assert_eq!(rewriter.protector().calls(), 0);
        assert_eq!(code.bytes(), [0x90; 32]);
    }
}
