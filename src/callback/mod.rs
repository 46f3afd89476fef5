//! JIT-emitted marshalling stubs.
//!
//! A stub is a run-time generated native function conforming to a caller
//! supplied signature. When invoked, it packages every argument into a
//! uniform array of 64-bit cells and forwards the array to a single host
//! callback, which makes it possible to intercept arbitrary signatures with
//! one handler. Combined with an inline detour, the stub observes the
//! arguments of any hooked function without per-signature glue code.

use crate::arch::memory;
use crate::error::Result;
use crate::{alloc, os, Function};
use cfg_if::cfg_if;
use std::fmt;

cfg_if! {
  if #[cfg(target_arch = "x86_64")] {
    mod x64;
    use self::x64 as stub;
  } else if #[cfg(target_arch = "x86")] {
    mod x86;
    use self::x86 as stub;
  }
}

/// Calling conventions a stub can be emitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
  /// The default convention of the host.
  Host,
  /// System V AMD64 (x64 unix).
  SystemV,
  /// Microsoft x64.
  Win64,
  /// cdecl (x86).
  Cdecl,
}

impl CallingConvention {
  /// Resolves `Host` to the concrete host convention.
  fn resolve(self) -> CallingConvention {
    match self {
      CallingConvention::Host => {
        if cfg!(target_arch = "x86") {
          CallingConvention::Cdecl
        } else if cfg!(windows) {
          CallingConvention::Win64
        } else {
          CallingConvention::SystemV
        }
      },
      other => other,
    }
  }
}

/// Argument and return value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
  Void,
  I32,
  I64,
  F32,
  F64,
  Ptr,
}

impl ValueType {
  fn is_float(self) -> bool {
    match self {
      ValueType::F32 | ValueType::F64 => true,
      _ => false,
    }
  }
}

/// The native signature a stub is emitted for.
#[derive(Debug, Clone)]
pub struct FuncSignature {
  pub convention: CallingConvention,
  pub ret: ValueType,
  pub args: Vec<ValueType>,
}

impl FuncSignature {
  pub fn new(convention: CallingConvention, ret: ValueType, args: Vec<ValueType>) -> Self {
    FuncSignature {
      convention,
      ret,
      args,
    }
  }
}

/// The argument cells passed to a callback handler.
///
/// One cell per argument, in call order. Integers are zero-extended,
/// floating point values are bit-cast, and arguments wider than a cell are
/// passed by the caller as pointers, so the cell holds the pointer.
#[repr(C)]
pub struct Parameters {
  cells: [u64; 0],
}

impl Parameters {
  /// Reads the cell of argument `index`.
  pub unsafe fn arg(&self, index: usize) -> u64 {
    (self as *const Parameters as *const u64)
      .add(index)
      .read_volatile()
  }
}

/// The uniform handler invoked by every stub.
pub type CallbackHandler = unsafe extern "C" fn(*const Parameters);

/// A run-time emitted native function marshalling its arguments to a handler.
///
/// # Example
///
/// ```rust
/// use divert::{CallingConvention, FuncSignature, JitCallback, Parameters, ValueType};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// static SEEN: AtomicU64 = AtomicU64::new(0);
///
/// unsafe extern "C" fn handler(params: *const Parameters) {
///   SEEN.store((*params).arg(0), Ordering::SeqCst);
/// }
///
/// let signature = FuncSignature::new(
///   CallingConvention::Host,
///   ValueType::Void,
///   vec![ValueType::I32],
/// );
///
/// let callback = JitCallback::new(&signature, handler).unwrap();
/// let stub: unsafe extern "C" fn(i32) = unsafe { callback.cast() };
///
/// unsafe { stub(1337) };
/// assert_eq!(SEEN.load(Ordering::SeqCst), 1337);
/// ```
pub struct JitCallback {
  stub: alloc::ExecutableMemory,
}

impl JitCallback {
  /// Emits a stub for the given signature.
  ///
  /// The stub captures all arguments, invokes `handler` with the cell array,
  /// and returns zero of the declared return type.
  pub fn new(signature: &FuncSignature, handler: CallbackHandler) -> Result<JitCallback> {
    let emitter = stub::emitter(signature, handler as usize)?;

    // Lock this so OS operations are not performed in parallell
    let pool = memory::POOL.lock().unwrap();
    let mut memory = pool.allocate_any(emitter.len())?;

    let code = emitter.emit(memory.as_ptr() as *const _)?;
    memory[..code.len()].copy_from_slice(code.as_slice());
    os::flush_instruction_cache(memory.as_ptr() as *const _, memory.len());

    // The stub has its own pages, so the write permission can be dropped
    unsafe { region::protect(memory.as_ptr(), memory.len(), region::Protection::READ_EXECUTE)? };

    Ok(JitCallback { stub: memory })
  }

  /// Returns the address of the emitted stub.
  pub fn as_ptr(&self) -> *const () {
    self.stub.as_ptr() as *const ()
  }

  /// Returns the stub typed as the supplied function signature.
  pub unsafe fn cast<T: Function>(&self) -> T {
    T::from_ptr(self.as_ptr())
  }
}

impl fmt::Debug for JitCallback {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "JitCallback {{ stub: {:p} }}", self.as_ptr())
  }
}

unsafe impl Send for JitCallback {}
unsafe impl Sync for JitCallback {}
