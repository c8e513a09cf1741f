//! # Handle
//!
//! Function handles pair the entry address of a compiled function with its call signature.
//!
//! Rust has no runtime reflection, so a handle is built from a function pointer value: the pointer
//! itself is the entry address and the pointer's type is the signature. Methods are looked up by
//! name through [`Reflect`], which types opt into with the [`reflect!`](crate::reflect) macro.

use std::any::{self, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;

use region::Protection;

/// Call signature of a function, identified by the type of its function pointer
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    /// Identity of the function pointer type
    id: TypeId,
    /// Readable form of the function pointer type
    name: &'static str,
}
impl Signature {
    /// Signature of the function pointer type `F`
    pub fn of<F: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<F>(),
            name: any::type_name::<F>(),
        }
    }

    /// Readable name of the signature, e.g. `fn() -> &str`
    pub fn name(&self) -> &'static str {
        self.name
    }
}
impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Signature {}
impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Extracts the entry address backing a function pointer value.
///
/// Returns `None` when `F` is not pointer-sized (zero-sized fn items, closures with captures, fat
/// pointers) or when the value is null.
///
/// # Safety
///
/// Any pointer-sized `F` is reinterpreted as an address. The caller must ensure `F` is a function
/// pointer type; on targets with pointer authentication the raw bits are not a usable address.
pub unsafe fn resolve_entry_address<F: Copy + 'static>(function: &F) -> Option<usize> {
    if mem::size_of::<F>() != mem::size_of::<usize>() {
        return None;
    }
    // Safety: sizes were checked above
    let address = mem::transmute_copy::<F, usize>(function);
    (address != 0).then_some(address)
}

/// Checks whether `address` lies in a mapped, executable region
pub fn is_executable(address: usize) -> bool {
    region::query(address as *const u8)
        .map(|region| region.protection().contains(Protection::EXECUTE))
        .unwrap_or(false)
}

/// Handle to a compiled function: its entry address and call signature.
///
/// Two handles are equal when they refer to the same entry point with the same signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnHandle {
    /// Entry point of the function
    address: usize,
    /// Call signature of the function
    signature: Signature,
}
impl FnHandle {
    /// Creates a handle from a function pointer, e.g. `my_fn as fn(u32) -> u32`.
    ///
    /// Passing a fn item without the `as` cast gives a zero-sized value and returns `None`.
    ///
    /// # Safety
    ///
    /// See [`resolve_entry_address`].
    pub unsafe fn new<F: Copy + 'static>(function: F) -> Option<Self> {
        resolve_entry_address(&function).map(|address| Self {
            address,
            signature: Signature::of::<F>(),
        })
    }

    /// Creates a handle from a raw entry address.
    ///
    /// # Safety
    ///
    /// `address` must be the entry point of code which follows `signature`
    pub unsafe fn from_raw(address: usize, signature: Signature) -> Self {
        Self { address, signature }
    }

    /// Entry address of the function
    pub fn address(&self) -> usize {
        self.address
    }

    /// Entry point as a pointer
    pub fn as_ptr(&self) -> *const u8 {
        self.address as _
    }

    /// Call signature of the function
    pub fn signature(&self) -> Signature {
        self.signature
    }
}

/// Method lookup by name, the stand-in for runtime reflection.
///
/// Implement with [`reflect!`](crate::reflect).
pub trait Reflect: 'static {
    /// Returns a handle to the named method, or `None` if the type has no such method
    fn method_by_name(name: &str) -> Option<FnHandle>;
}

/// Implements [`Reflect`] for a type by listing its patchable methods with their signatures.
///
/// Methods taking a receiver are written with the receiver as first parameter.
///
/// ```
/// struct Greeter;
/// impl Greeter {
///     fn greet(&self) -> &'static str {
///         "Hello"
///     }
/// }
///
/// fnpatch::reflect!(Greeter {
///     greet: fn(&Greeter) -> &'static str,
/// });
///
/// use fnpatch::Reflect;
/// assert!(Greeter::method_by_name("greet").is_some());
/// assert!(Greeter::method_by_name("wave").is_none());
/// ```
#[macro_export]
macro_rules! reflect {
    ($ty:ty { $($method:ident : $sig:ty),* $(,)? }) => {
        impl $crate::Reflect for $ty {
            fn method_by_name(name: &str) -> ::core::option::Option<$crate::FnHandle> {
                $(
                    if name == ::core::stringify!($method) {
                        let method: $sig = <$ty>::$method;
                        // Safety: `method` was coerced to a function pointer type above
                        return unsafe { $crate::FnHandle::new(method) };
                    }
                )*
                ::core::option::Option::None
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::{is_executable, resolve_entry_address, FnHandle, Reflect, Signature};

    fn double(x: u32) -> u32 {
        x * 2
    }

    fn triple(x: u32) -> u32 {
        x * 3
    }

    struct Counter(u32);
    impl Counter {
        fn get(&self) -> u32 {
            self.0
        }
        fn reset(&mut self) {
            self.0 = 0;
        }
    }

    crate::reflect!(Counter {
        get: fn(&Counter) -> u32,
        reset: fn(&mut Counter),
    });

    #[test]
    /// Function pointers resolve to their entry address
    fn test_resolve() {
        let f = double as fn(u32) -> u32;
        let address = unsafe { resolve_entry_address(&f) }.unwrap();
        assert_eq!(address, f as usize);
        assert!(is_executable(address));
    }

    #[test]
    /// Values which are not pointer-sized are rejected
    fn test_resolve_not_pointer() {
        assert_eq!(mem::size_of_val(&double), 0);
        assert!(unsafe { resolve_entry_address(&double) }.is_none());
        assert!(unsafe { resolve_entry_address(&(1u8, 2u8)) }.is_none());
        assert!(unsafe { resolve_entry_address(&0usize) }.is_none());
    }

    #[test]
    /// Heap memory is not executable
    fn test_heap_not_executable() {
        let data = vec![0u8; 16];
        assert!(!is_executable(data.as_ptr() as usize));
    }

    #[test]
    /// Signatures compare by type
    fn test_signatures() {
        let a = unsafe { FnHandle::new(double as fn(u32) -> u32) }.unwrap();
        let b = unsafe { FnHandle::new(triple as fn(u32) -> u32) }.unwrap();
        let c = unsafe { FnHandle::new(Counter::get as fn(&Counter) -> u32) }.unwrap();

        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
        assert_ne!(a, b);
        assert_eq!(a, unsafe { FnHandle::new(double as fn(u32) -> u32) }.unwrap());
        assert_eq!(a.signature(), Signature::of::<fn(u32) -> u32>());
        assert_eq!(
            a.signature().to_string(),
            std::any::type_name::<fn(u32) -> u32>()
        );
    }

    #[test]
    /// Methods registered with `reflect!` can be found by name
    fn test_reflect() {
        let get = Counter::method_by_name("get").unwrap();
        assert_eq!(
            get.address(),
            (Counter::get as fn(&Counter) -> u32) as usize
        );
        assert_eq!(get.signature(), Signature::of::<fn(&Counter) -> u32>());

        let reset = Counter::method_by_name("reset").unwrap();
        assert_eq!(reset.signature(), Signature::of::<fn(&mut Counter)>());

        assert!(Counter::method_by_name("increment").is_none());

        // keep the methods referenced outside of the lookup table
        let mut counter = Counter(3);
        assert_eq!(counter.get(), 3);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }
}
