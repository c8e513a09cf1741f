//! This module contains a page protector built on `region`, which adjusts memory permissions
//! through the platform's standard call (`mprotect` or `VirtualProtect`)

use region::Protection;

use super::PageProtector;
use crate::error::ProtectionError;

/// Protector that makes code writable by changing its memory permissions to read-write-execute.
///
/// The previous permissions are restored when the returned [`region::ProtectGuard`] is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegionProtector;
impl RegionProtector {
    /// Creates a new [`RegionProtector`]
    pub fn new() -> Self {
        Self
    }
}

unsafe impl PageProtector for RegionProtector {
    type Handle = region::ProtectGuard;

    unsafe fn make_writable(
        &self,
        address: *const u8,
        len: usize,
    ) -> Result<Self::Handle, ProtectionError> {
        region::protect_with_handle(address, len, Protection::READ_WRITE_EXECUTE)
            .map_err(|e| ProtectionError::from_region(address, len, e))
    }
}
