//! Traits describing the functions this library can redirect.
//!
//! Every hook family meets raw addresses at some point: a detour patches
//! one, a table swap reads one back out of a slot, and a marshalling stub
//! is handed out as one. [Function] is the bridge between those addresses
//! and concrete function pointer types; it is implemented here for every
//! supported calling convention and arity, and should never be implemented
//! by hand.

/// An untyped view over a concrete function pointer type.
///
/// Besides describing detour targets, this is the signature tag consumed by
/// [VTableSwap::original](crate::VTableSwap::original) and
/// [JitCallback::cast](crate::JitCallback::cast) when a slot snapshot or a
/// freshly emitted stub is turned back into a callable.
pub unsafe trait Function: Sized + Copy + Sync + 'static {
  /// The argument types as a tuple.
  type Arguments;

  /// The return type.
  type Output;

  /// Constructs a `Function` from an untyped pointer.
  unsafe fn from_ptr(ptr: *const ()) -> Self;

  /// Returns an untyped pointer for this function.
  fn to_ptr(&self) -> *const ();
}

/// Marks `D` as an admissible detour for the target `Self`.
///
/// A safe function may always stand in for an unsafe one with the same
/// prototype, but never the other way around.
pub unsafe trait HookableWith<D: Function>: Function {}

unsafe impl<T: Function> HookableWith<T> for T {}

impl_hookable! {
  __x0: A, __x1: B, __x2: C, __x3: D, __x4: E, __x5: F, __x6: G,
  __x7: H, __x8: I, __x9: J, __x10: K, __x11: L, __x12: M, __x13: N
}
