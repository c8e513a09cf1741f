//! # Registry
//!
//! The registry is the bookkeeping side of patching: it maps every patched function's entry address
//! to the bytes it displaced and the replacement now installed, and serializes patch and unpatch
//! operations so no operation ever observes a half-updated record.
//!
//! # Safety
//!
//! The registry lock orders writes against each other, not against execution. A thread running the
//! target while it is rewritten may fetch a torn mix of old and new instructions. Callers must make
//! sure nothing executes a function while it is patched or unpatched.

use std::any;
use std::collections::hash_map::{Entry, HashMap};
use std::fmt;
use std::process;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::code;
use crate::error::{PatchError, Role};
use crate::handle::{is_executable, FnHandle, Reflect};
use crate::patcher::{CodeRewriter, DefaultProtector, PageProtector};

/// Window copied by [`RewriteMode::CopyWindow`] unless specified otherwise
pub const DEFAULT_WINDOW: usize = 100;

/// How a target's entry point is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewriteMode {
    /// Write a branch to the replacement. The window is the length of the branch: 4 to 16 bytes
    /// depending on the architecture and the distance between the two functions.
    #[default]
    Redirect,
    /// Copy this many bytes from the replacement's entry point.
    ///
    /// The copied code is not relocated, so this only works for position-independent bodies, and
    /// the target must be at least this long or its neighbours get overwritten. A window of zero
    /// bytes records the patch without writing anything.
    CopyWindow(usize),
}

/// Saved state of one patched function
struct PatchRecord {
    /// Bytes which were at the target before it was first patched
    original: Vec<u8>,
    /// Function the target currently redirects to
    replacement: FnHandle,
}

/// Table of active patches.
///
/// Most programs use the process-wide registry behind the crate-level functions; separate instances
/// are useful to isolate tests or to use a custom [`PageProtector`].
pub struct Registry<P = DefaultProtector> {
    /// Rewriter used for every write
    rewriter: CodeRewriter<P>,
    /// How targets are rewritten
    mode: RewriteMode,
    /// Active patches keyed by target entry address
    records: Mutex<HashMap<usize, PatchRecord>>,
}

impl Registry {
    /// Creates an empty registry using the platform's default protector
    pub fn new() -> Self {
        Self::with_protector(DefaultProtector::default())
    }
}
impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PageProtector> Registry<P> {
    /// Creates an empty registry which makes code writable through `protector`
    pub fn with_protector(protector: P) -> Self {
        Self {
            rewriter: CodeRewriter::new(protector),
            mode: RewriteMode::default(),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how targets are rewritten
    pub fn with_mode(mut self, mode: RewriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// How targets are rewritten
    pub fn mode(&self) -> RewriteMode {
        self.mode
    }

    /// Page protector used by this registry
    pub fn protector(&self) -> &P {
        self.rewriter.protector()
    }

    /// Locks the record table. A panic while the lock was held never leaves a record half-written,
    /// so poisoning is ignored.
    fn records(&self) -> MutexGuard<'_, HashMap<usize, PatchRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Redirects calls to `target` to `replacement`.
    ///
    /// Both must be function pointers of the same type, e.g.
    /// `registry.patch(foo as fn(u32) -> u32, bar as fn(u32) -> u32)`.
    ///
    /// # Safety
    ///
    /// - nothing may execute `target` while it is rewritten
    /// - `target`'s compiled body must be at least as long as the rewrite window
    /// - patches must not form a cycle: redirecting `a` to `b` and `b` to `a` makes both loop
    pub unsafe fn patch<T, R>(
        &self,
        target: T,
        replacement: R,
    ) -> Result<PatchGuard<'_, P>, PatchError>
    where
        T: Copy + 'static,
        R: Copy + 'static,
    {
        let target = FnHandle::new(target).ok_or(PatchError::NotCallable {
            role: Role::Target,
            type_name: any::type_name::<T>(),
        })?;
        let replacement = FnHandle::new(replacement).ok_or(PatchError::NotCallable {
            role: Role::Replacement,
            type_name: any::type_name::<R>(),
        })?;
        self.patch_handles(target, replacement)
    }

    /// Redirects calls to the method `method` of `T` to `replacement`, whose type must match the
    /// signature `T` registered for the method.
    ///
    /// # Safety
    ///
    /// See [`Registry::patch`]
    pub unsafe fn patch_instance_method<T, R>(
        &self,
        method: &str,
        replacement: R,
    ) -> Result<PatchGuard<'_, P>, PatchError>
    where
        T: Reflect,
        R: Copy + 'static,
    {
        let target = T::method_by_name(method).ok_or_else(|| PatchError::UnknownMethod {
            type_name: any::type_name::<T>(),
            method: method.to_owned(),
        })?;
        let replacement = FnHandle::new(replacement).ok_or(PatchError::NotCallable {
            role: Role::Replacement,
            type_name: any::type_name::<R>(),
        })?;
        self.patch_handles(target, replacement)
    }

    /// Redirects calls to `target` to `replacement`.
    ///
    /// Patching a target again with an equal replacement does nothing. Patching it with a different
    /// replacement puts the original code back before installing the new one. Patching a target
    /// with itself only removes an existing patch, since its original code already is the
    /// replacement.
    ///
    /// # Safety
    ///
    /// See [`Registry::patch`]
    pub unsafe fn patch_handles(
        &self,
        target: FnHandle,
        replacement: FnHandle,
    ) -> Result<PatchGuard<'_, P>, PatchError> {
        validate(&target, &replacement)?;
        self.apply(target, replacement)?;
        Ok(PatchGuard {
            registry: self,
            target,
            replacement,
        })
    }

    /// Installs `replacement` over `target` and records the displaced bytes
    unsafe fn apply(&self, target: FnHandle, replacement: FnHandle) -> Result<(), PatchError> {
        let address = target.address();
        let mut records = self.records();

        match records.entry(address) {
            Entry::Occupied(entry) if entry.get().replacement == replacement => {
                log::debug!(
                    "{address:#x} is already patched with {:#x}",
                    replacement.address()
                );
                return Ok(());
            }
            Entry::Occupied(entry) => {
                let previous = entry.remove();
                self.restore_committed(address, &previous.original);
            }
            Entry::Vacant(_) => {}
        }

        if target.address() == replacement.address() {
            log::debug!("{address:#x} redirects to itself, leaving it unpatched");
            return Ok(());
        }

        let original = self.write(&target, &replacement)?;
        records.insert(
            address,
            PatchRecord {
                original,
                replacement,
            },
        );
        log::debug!(
            "patched {address:#x} with {:#x} ({})",
            replacement.address(),
            target.signature()
        );
        Ok(())
    }

    /// Writes the rewrite window for `replacement` over `target`, returning the displaced bytes
    unsafe fn write(
        &self,
        target: &FnHandle,
        replacement: &FnHandle,
    ) -> Result<Vec<u8>, PatchError> {
        let location = target.address() as *mut u8;
        let original = match self.mode {
            RewriteMode::Redirect => {
                let branch = code::redirect(target.address(), replacement.address())
                    .ok_or(PatchError::UnsupportedArchitecture)?;
                self.rewriter
                    .overwrite_bytes(location, branch.as_ptr(), branch.len())?
            }
            RewriteMode::CopyWindow(len) => {
                self.rewriter
                    .overwrite_bytes(location, replacement.as_ptr(), len)?
            }
        };
        Ok(original)
    }

    /// Puts back the original bytes of a patch that was already committed.
    ///
    /// There is no consistent state to return to if this fails, so the process is aborted.
    unsafe fn restore_committed(&self, address: usize, original: &[u8]) {
        if let Err(e) = self.rewriter.restore_bytes(address as *mut u8, original) {
            log::error!("unable to restore original code at {address:#x}: {e}");
            process::abort();
        }
    }

    /// Removes the patch on `target`. Returns `false` if it was not patched.
    ///
    /// # Safety
    ///
    /// Nothing may execute `target` while it is rewritten
    pub unsafe fn unpatch<T: Copy + 'static>(&self, target: T) -> bool {
        match FnHandle::new(target) {
            Some(target) => self.unpatch_handle(&target),
            None => false,
        }
    }

    /// Removes the patch on the method `method` of `T`. Returns `false` if it was not patched.
    ///
    /// # Panics
    ///
    /// Panics if `T` has no method named `method`
    ///
    /// # Safety
    ///
    /// See [`Registry::unpatch`]
    pub unsafe fn unpatch_instance_method<T: Reflect>(&self, method: &str) -> bool {
        let Some(target) = T::method_by_name(method) else {
            panic!("unknown method {method} on {}", any::type_name::<T>());
        };
        self.unpatch_handle(&target)
    }

    /// Removes the patch on `target`. Returns `false` if it was not patched.
    ///
    /// # Safety
    ///
    /// See [`Registry::unpatch`]
    pub unsafe fn unpatch_handle(&self, target: &FnHandle) -> bool {
        let address = target.address();
        let mut records = self.records();
        let Some(record) = records.remove(&address) else {
            return false;
        };
        self.restore_committed(address, &record.original);
        log::debug!("unpatched {address:#x}");
        true
    }

    /// Removes every patch in the registry, as one operation
    ///
    /// # Safety
    ///
    /// Nothing may execute any patched function during the call
    pub unsafe fn unpatch_all(&self) {
        let mut records = self.records();
        let count = records.len();
        for (address, record) in records.drain() {
            self.restore_committed(address, &record.original);
        }
        log::debug!("unpatched {count} functions");
    }

    /// Checks whether `target` is currently patched
    pub fn is_patched(&self, target: &FnHandle) -> bool {
        self.records().contains_key(&target.address())
    }

    /// Number of patched functions
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Checks whether no function is patched
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

/// Checks that a patch from `target` to `replacement` is well-formed
fn validate(target: &FnHandle, replacement: &FnHandle) -> Result<(), PatchError> {
    for (role, handle) in [(Role::Target, target), (Role::Replacement, replacement)] {
        if !is_executable(handle.address()) {
            return Err(PatchError::NotCallable {
                role,
                type_name: handle.signature().name(),
            });
        }
    }
    if target.signature() != replacement.signature() {
        return Err(PatchError::SignatureMismatch {
            target: target.signature(),
            replacement: replacement.signature(),
        });
    }
    Ok(())
}

/// Handle to a patch applied through a [`Registry`].
///
/// Dropping the guard leaves the patch in place.
pub struct PatchGuard<'a, P = DefaultProtector> {
    /// Registry holding the patch record
    registry: &'a Registry<P>,
    /// Patched function
    target: FnHandle,
    /// Function calls are redirected to
    replacement: FnHandle,
}
impl<P: PageProtector> PatchGuard<'_, P> {
    /// Removes the patch. Returns `false` if it was already removed.
    ///
    /// # Safety
    ///
    /// See [`Registry::unpatch`]
    pub unsafe fn unpatch(&self) -> bool {
        self.registry.unpatch_handle(&self.target)
    }

    /// Re-applies the patch, e.g. after it was removed with [`Registry::unpatch_all`]
    ///
    /// # Safety
    ///
    /// See [`Registry::patch`]
    pub unsafe fn restore(&self) -> Result<(), PatchError> {
        self.registry.apply(self.target, self.replacement)
    }

    /// Patched function
    pub fn target(&self) -> FnHandle {
        self.target
    }

    /// Function calls are redirected to
    pub fn replacement(&self) -> FnHandle {
        self.replacement
    }
}
impl<P> fmt::Debug for PatchGuard<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchGuard")
            .field("target", &self.target)
            .field("replacement", &self.replacement)
            .finish_non_exhaustive()
    }
}
