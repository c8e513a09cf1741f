//! # Error
//!
//! Errors returned while validating or applying a patch

use std::fmt;
use std::io;

use thiserror::Error;

use crate::handle::Signature;

/// Which side of a patch a value was passed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The function being overwritten
    Target,
    /// The function calls are sent to
    Replacement,
}
impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => write!(f, "target"),
            Self::Replacement => write!(f, "replacement"),
        }
    }
}

/// Errors when relaxing page protections
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// The operating system refused to make the pages writable, typically because a security
    /// feature forbids writable code
    #[error("memory protection change denied for {len} bytes at {address:#x}")]
    MemoryProtectionDenied {
        /// Start of the range that was requested
        address: usize,
        /// Length of the range that was requested
        len: usize,
    },
    /// Any other failure while changing page protections
    #[error("unable to make {len} bytes at {address:#x} writable: {source}")]
    PermissionDenied {
        /// Start of the range that was requested
        address: usize,
        /// Length of the range that was requested
        len: usize,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}
impl ProtectionError {
    /// Classifies an error reported by `region`
    pub(crate) fn from_region(address: *const u8, len: usize, error: region::Error) -> Self {
        let address = address as usize;
        match error {
            region::Error::SystemCall(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Self::MemoryProtectionDenied { address, len }
            }
            region::Error::SystemCall(source) => Self::PermissionDenied {
                address,
                len,
                source,
            },
            e => Self::PermissionDenied {
                address,
                len,
                source: io::Error::new(io::ErrorKind::Other, e),
            },
        }
    }
}

/// Errors when patching a function
#[derive(Debug, Error)]
pub enum PatchError {
    /// The value is not a function pointer, or does not point into executable memory
    #[error("{role} must be a function, got `{type_name}`")]
    NotCallable {
        /// Whether the target or the replacement was rejected
        role: Role,
        /// Type of the rejected value
        type_name: &'static str,
    },
    /// Target and replacement have different call signatures
    #[error("target and replacement must have the same type: {target} != {replacement}")]
    SignatureMismatch {
        /// Signature of the target
        target: Signature,
        /// Signature of the replacement
        replacement: Signature,
    },
    /// The type does not expose a method with this name
    #[error("unknown method {method} on {type_name}")]
    UnknownMethod {
        /// Type the method was looked up on
        type_name: &'static str,
        /// Requested method name
        method: String,
    },
    /// No redirect sequence exists for the CPU this crate was built for
    #[error("redirect patching is not supported on this architecture")]
    UnsupportedArchitecture,
    /// Page protections could not be relaxed, nothing was written
    #[error("{0}")]
    Protection(#[from] ProtectionError),
}
