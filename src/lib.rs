#![recursion_limit = "1024"]

//! A function hooking library for x86/x64 written in Rust.
//!
//! ## Intro
//!
//! This library provides thread-safe function interception by disassembling
//! and patching functions during runtime, using assembly opcodes allocated
//! within executable memory. It modifies the target functions and replaces
//! their prolog with an unconditional jump.
//!
//! Beyond the basic functionality this library handles several different edge
//! cases:
//!
//! - Relative branches.
//! - Branches within the patched prolog.
//! - RIP relative operands.
//! - Detects NOP-padding.
//! - Relay for large offsets (>2GB).
//! - Supports hot patching.
//!
//! ## Hooks
//!
//! Three families of hooks are provided:
//!
//! - [Inline detours](./struct.RawDetour.html): the prolog of the target is
//!   replaced with a jump to the detour, and a trampoline preserves the
//!   original behavior. [GenericDetour](./struct.GenericDetour.html) is the
//!   type-safe variant — the same prototype is enforced for the target, the
//!   detour, and invocations of the original.
//!
//! - [Table swaps](./struct.VTableSwap.html): an object's virtual-table
//!   pointer is replaced with a cloned table whose selected slots have been
//!   redirected. Non-redirected slots dispatch to the exact original
//!   functions. [SharedVTableSwap](./struct.SharedVTableSwap.html) and
//!   [RefCountedVTableSwap](./struct.RefCountedVTableSwap.html) additionally
//!   retain the hooked instance.
//!
//! - [JIT callbacks](./struct.JitCallback.html): run-time emitted stubs that
//!   package native-ABI arguments into a uniform cell array and forward them
//!   to a single handler, so one callback can observe any signature.
//!
//! Installed hooks are tracked in a process-wide [registry](./registry/),
//! which rejects duplicate targets and enumerates active hooks in teardown
//! order.
//!
//! ## Platforms
//!
//! - Both `x86` & `x86-64` are supported.
//!
//! ## Procedure
//!
//! To illustrate a detour on an x86 platform:
//!
//! ```c
//! 0 int return_five() {
//! 1     return 5;
//! 00400020 [b8 05 00 00 00] mov eax, 5
//! 00400025 [c3]             ret
//! 2 }
//! 3
//! 4 int detour_function() {
//! 5     return 10;
//! 00400040 [b8 0A 00 00 00] mov eax, 10
//! 00400045 [c3]             ret
//! 6 }
//! ```
//!
//! To detour `return_five` the library by default tries to replace five bytes
//! with a relative jump (the optimal scenario), which works in this case.
//! Executable memory will be allocated for the instruction and the function's
//! prolog will be replaced.
//!
//! ```c
//! 0 int return_five() {
//! 1     return detour_function();
//! 00400020 [e9 16 00 00 00] jmp 1b <detour_function>
//! 00400025 [c3]             ret
//! 2 }
//! 3
//! 4 int detour_function() {
//! 5     return 10;
//! 00400040 [b8 0A 00 00 00] mov eax, 10
//! 00400045 [c3]             ret
//! 6 }
//! ```
//!
//! Beyond what is shown here, a trampoline is also generated so the original
//! function can be called regardless whether the function is hooked or not.

#[cfg(test)]
#[cfg_attr(test, macro_use)]
extern crate matches;

// Re-exports
pub use callback::{
  CallbackHandler, CallingConvention, FuncSignature, JitCallback, Parameters, ValueType,
};
pub use detours::*;
pub use error::{Error, Result};
pub use traits::*;
pub use vtable::{
  RefCounted, RefCountedVTableSwap, SharedVTableSwap, VFunc, VFuncMap, VTableSwap,
  VTableSwapBuilder,
};

#[macro_use]
mod macros;

// Modules
mod alloc;
mod arch;
mod callback;
mod detours;
mod error;
mod os;
mod pic;
pub mod registry;
mod traits;
mod util;
mod vtable;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_detour_and_target() {
    #[inline(never)]
    extern "C" fn add(x: i32, y: i32) -> i32 {
      unsafe { std::ptr::read_volatile(&x as *const i32) + y }
    }

    let err = unsafe { RawDetour::new(add as *const (), add as *const ()).unwrap_err() };
    assert_matches!(err, Error::SameAddress);
  }

  #[test]
  fn detours_reject_shared_target() {
    #[inline(never)]
    extern "C" fn add(x: i32, y: i32) -> i32 {
      unsafe { std::ptr::read_volatile(&x as *const i32) + y }
    }

    let hook1 = unsafe {
      extern "C" fn sub(x: i32, y: i32) -> i32 {
        x - y
      }
      GenericDetour::<extern "C" fn(i32, i32) -> i32>::new(add, sub).unwrap()
    };

    let hook2 = unsafe {
      extern "C" fn div(x: i32, y: i32) -> i32 {
        x / y
      }
      GenericDetour::<extern "C" fn(i32, i32) -> i32>::new(add, div).unwrap()
    };

    unsafe { hook1.enable().unwrap() };
    assert_eq!(add(5, 5), 0);

    // The target is claimed until the first hook is disabled
    assert_matches!(unsafe { hook2.enable() }, Err(Error::AlreadyHooked));

    unsafe { hook1.disable().unwrap() };
    unsafe { hook2.enable().unwrap() };
    assert_eq!(add(10, 5), 2);
    unsafe { hook2.disable().unwrap() };
  }
}
