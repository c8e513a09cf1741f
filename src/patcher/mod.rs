//! # Patcher
//!
//! This module covers the code rewriter, which overwrites and restores the entry points of compiled
//! functions, and the page protectors it uses to make code writable.

pub mod byte;
#[cfg(target_os = "macos")]
pub mod mach;
pub mod mem;

use std::ops::Range;

use crate::error::ProtectionError;

pub use byte::CodeRewriter;
#[cfg(target_os = "macos")]
pub use mach::MachProtector;
pub use mem::RegionProtector;

/// Page protector used when none is specified
#[cfg(target_os = "macos")]
pub type DefaultProtector = MachProtector;
/// Page protector used when none is specified
#[cfg(not(target_os = "macos"))]
pub type DefaultProtector = RegionProtector;

/// Capability to make code pages writable.
///
/// # Safety
///
/// Implementors must ensure that after a successful call to `make_writable`, the whole range is
/// readable, writable and executable for as long as the returned handle is alive.
pub unsafe trait PageProtector: Send + Sync {
    /// Handle which keeps the range writable. Dropping it may restore the previous protection.
    type Handle;

    /// Raises the protection of every page overlapping `[address, address + len)` so that it can
    /// be written and still executed.
    ///
    /// # Safety
    ///
    /// Changing page protections affects every object living on those pages
    unsafe fn make_writable(
        &self,
        address: *const u8,
        len: usize,
    ) -> Result<Self::Handle, ProtectionError>;
}

/// Computes the page-aligned range containing `[address, address + len)`
pub fn page_range(address: usize, len: usize) -> Range<usize> {
    let page_size = region::page::size();
    let start = address & !(page_size - 1);
    let end = address
        .saturating_add(len.max(1))
        .saturating_add(page_size - 1)
        & !(page_size - 1);
    start..end
}
