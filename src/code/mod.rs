//! # Code
//!
//! Machine code generation for the redirect sequences written over a patched function's entry point

pub mod arm64;
pub mod cache;
pub mod x64;

/// Generates the shortest branch which, placed at `from`, transfers execution to `to` on the
/// architecture this crate was built for.
///
/// Returns `None` when there is no encoder for the current architecture.
pub fn redirect(from: usize, to: usize) -> Option<Vec<u8>> {
    #[cfg(target_arch = "x86_64")]
    {
        Some(x64::jmp(from, to))
    }
    #[cfg(target_arch = "aarch64")]
    {
        Some(arm64::branch(from, to))
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = (from, to);
        None
    }
}
