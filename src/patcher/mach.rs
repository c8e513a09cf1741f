//! This module contains a page protector speaking to the Mach kernel directly.
//!
//! On macOS, `mprotect` refuses to add write access to pages mapped from a code-signed binary.
//! `mach_vm_protect` with `VM_PROT_COPY` instead asks the kernel for a private copy-on-write
//! mapping of the page, which may then be written.

use mach2::kern_return::{KERN_PROTECTION_FAILURE, KERN_SUCCESS};
use mach2::traps::mach_task_self;
use mach2::vm::mach_vm_protect;
use mach2::vm_prot::{VM_PROT_COPY, VM_PROT_EXECUTE, VM_PROT_READ, VM_PROT_WRITE};
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

use super::{page_range, PageProtector};
use crate::error::ProtectionError;

/// Protector that marks pages read-write-execute through `mach_vm_protect`.
///
/// Pages are left writable afterwards: the kernel gives no way to undo `VM_PROT_COPY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachProtector;
impl MachProtector {
    /// Creates a new [`MachProtector`]
    pub fn new() -> Self {
        Self
    }
}

unsafe impl PageProtector for MachProtector {
    type Handle = ();

    unsafe fn make_writable(
        &self,
        address: *const u8,
        len: usize,
    ) -> Result<Self::Handle, ProtectionError> {
        let pages = page_range(address as usize, len);
        let task = mach_task_self();
        let protect = |protection| {
            mach_vm_protect(
                task,
                pages.start as mach_vm_address_t,
                pages.len() as mach_vm_size_t,
                0,
                protection,
            )
        };

        let mut kr = protect(VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE);
        if kr != KERN_SUCCESS {
            log::trace!("mach_vm_protect returned {kr}, retrying with VM_PROT_COPY");
            kr = protect(VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE | VM_PROT_COPY);
        }

        let address = address as usize;
        match kr {
            KERN_SUCCESS => Ok(()),
            KERN_PROTECTION_FAILURE => {
                Err(ProtectionError::MemoryProtectionDenied { address, len })
            }
            kr => Err(ProtectionError::PermissionDenied {
                address,
                len,
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("mach_vm_protect failed with kern_return_t {kr}"),
                ),
            }),
        }
    }
}
