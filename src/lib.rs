//! # fnpatch
//!
//! Patches compiled functions at runtime: the entry point of a target function is overwritten so
//! that every call to it runs a replacement function instead, and the original bytes are kept so
//! the target can be restored later.
//!
//! ```no_run
//! #[inline(never)]
//! fn hello() -> &'static str {
//!     "Hello, World!"
//! }
//!
//! #[inline(never)]
//! fn goodbye() -> &'static str {
//!     "Goodbye, World!"
//! }
//!
//! let guard = unsafe {
//!     fnpatch::patch(hello as fn() -> &'static str, goodbye as fn() -> &'static str)
//! }
//! .unwrap();
//! assert_eq!(std::hint::black_box(hello as fn() -> &'static str)(), "Goodbye, World!");
//!
//! unsafe { guard.unpatch() };
//! assert_eq!(std::hint::black_box(hello as fn() -> &'static str)(), "Hello, World!");
//! ```
//!
//! ## Layers
//!
//! - [`registry`]: the table of active patches and the operations on it
//! - [`patcher`]: the code rewriter and the page protectors making code writable
//! - [`code`]: branch sequences written over patched entry points
//! - [`handle`]: function handles, signatures and method lookup
//!
//! ## Caveats
//!
//! Patching is inherently unsafe. Callers must ensure that nothing executes a function while it is
//! being patched or unpatched, that calls to the target are not inlined or folded by the compiler,
//! and that the target's compiled body is at least as long as the rewrite window.

#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod code;
pub mod error;
pub mod handle;
pub mod patcher;
pub mod registry;

#[cfg(test)]
mod test_utils;

use lazy_static::lazy_static;

pub use error::{PatchError, ProtectionError, Role};
pub use handle::{FnHandle, Reflect, Signature};
pub use registry::{PatchGuard, Registry, RewriteMode, DEFAULT_WINDOW};

lazy_static! {
    /// Registry behind the crate-level functions
    static ref REGISTRY: Registry = Registry::new();
}

/// Process-wide registry
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Redirects calls to `target` to `replacement` in the process-wide registry.
///
/// # Safety
///
/// See [`Registry::patch`]
pub unsafe fn patch<T, R>(target: T, replacement: R) -> Result<PatchGuard<'static>, PatchError>
where
    T: Copy + 'static,
    R: Copy + 'static,
{
    registry().patch(target, replacement)
}

/// Redirects calls to the method `method` of `T` to `replacement` in the process-wide registry.
///
/// # Safety
///
/// See [`Registry::patch`]
pub unsafe fn patch_instance_method<T, R>(
    method: &str,
    replacement: R,
) -> Result<PatchGuard<'static>, PatchError>
where
    T: Reflect,
    R: Copy + 'static,
{
    registry().patch_instance_method::<T, R>(method, replacement)
}

/// Removes the patch on `target` from the process-wide registry. Returns `false` if it was not
/// patched.
///
/// # Safety
///
/// See [`Registry::unpatch`]
pub unsafe fn unpatch<T: Copy + 'static>(target: T) -> bool {
    registry().unpatch(target)
}

/// Removes the patch on the method `method` of `T` from the process-wide registry.
///
/// # Panics
///
/// Panics if `T` has no method named `method`
///
/// # Safety
///
/// See [`Registry::unpatch`]
pub unsafe fn unpatch_instance_method<T: Reflect>(method: &str) -> bool {
    registry().unpatch_instance_method::<T>(method)
}

/// Removes every patch in the process-wide registry.
///
/// # Safety
///
/// See [`Registry::unpatch_all`]
pub unsafe fn unpatch_all() {
    registry().unpatch_all()
}
