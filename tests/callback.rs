//! Marshalling stubs exercised under both x64 conventions. The handlers
//! record the cell array so the tests can assert the exact values each
//! argument was captured as.

#![cfg(target_arch = "x86_64")]

use divert::{CallingConvention, FuncSignature, JitCallback, Parameters, RawDetour, ValueType};
use std::sync::atomic::{AtomicU64, Ordering};

#[test]
fn captures_register_argument() {
  static SEEN: AtomicU64 = AtomicU64::new(0);

  unsafe extern "C" fn handler(params: *const Parameters) {
    SEEN.store((*params).arg(0), Ordering::SeqCst);
  }

  let signature = FuncSignature::new(
    CallingConvention::SystemV,
    ValueType::Void,
    vec![ValueType::I32],
  );
  let callback = JitCallback::new(&signature, handler).unwrap();

  let stub: unsafe extern "sysv64" fn(i32) = unsafe { callback.cast() };
  unsafe { stub(1337) };

  assert_eq!(SEEN.load(Ordering::SeqCst), 1337);
}

#[test]
fn captures_mixed_arguments() {
  static CELL_0: AtomicU64 = AtomicU64::new(0);
  static CELL_1: AtomicU64 = AtomicU64::new(0);
  static CELL_2: AtomicU64 = AtomicU64::new(0);

  unsafe extern "C" fn handler(params: *const Parameters) {
    CELL_0.store((*params).arg(0), Ordering::SeqCst);
    CELL_1.store((*params).arg(1), Ordering::SeqCst);
    CELL_2.store((*params).arg(2), Ordering::SeqCst);
  }

  let signature = FuncSignature::new(
    CallingConvention::SystemV,
    ValueType::Void,
    vec![ValueType::I64, ValueType::F64, ValueType::I32],
  );
  let callback = JitCallback::new(&signature, handler).unwrap();

  let stub: unsafe extern "sysv64" fn(i64, f64, i32) = unsafe { callback.cast() };
  unsafe { stub(7, 2.5, 9) };

  assert_eq!(CELL_0.load(Ordering::SeqCst), 7);
  assert_eq!(CELL_1.load(Ordering::SeqCst), 2.5f64.to_bits());
  assert_eq!(CELL_2.load(Ordering::SeqCst), 9);
}

#[test]
fn captures_stack_arguments() {
  static CELL_6: AtomicU64 = AtomicU64::new(0);
  static CELL_7: AtomicU64 = AtomicU64::new(0);

  unsafe extern "C" fn handler(params: *const Parameters) {
    CELL_6.store((*params).arg(6), Ordering::SeqCst);
    CELL_7.store((*params).arg(7), Ordering::SeqCst);
  }

  let signature = FuncSignature::new(
    CallingConvention::SystemV,
    ValueType::Void,
    vec![ValueType::I64; 8],
  );
  let callback = JitCallback::new(&signature, handler).unwrap();

  let stub: unsafe extern "sysv64" fn(i64, i64, i64, i64, i64, i64, i64, i64) =
    unsafe { callback.cast() };
  unsafe { stub(1, 2, 3, 4, 5, 6, 77, 88) };

  assert_eq!(CELL_6.load(Ordering::SeqCst), 77);
  assert_eq!(CELL_7.load(Ordering::SeqCst), 88);
}

#[test]
fn captures_win64_arguments() {
  static CELL_1: AtomicU64 = AtomicU64::new(0);
  static CELL_3: AtomicU64 = AtomicU64::new(0);
  static CELL_4: AtomicU64 = AtomicU64::new(0);

  unsafe extern "C" fn handler(params: *const Parameters) {
    CELL_1.store((*params).arg(1), Ordering::SeqCst);
    CELL_3.store((*params).arg(3), Ordering::SeqCst);
    CELL_4.store((*params).arg(4), Ordering::SeqCst);
  }

  let signature = FuncSignature::new(
    CallingConvention::Win64,
    ValueType::Void,
    vec![
      ValueType::I32,
      ValueType::F64,
      ValueType::I64,
      ValueType::F32,
      ValueType::I64,
    ],
  );
  let callback = JitCallback::new(&signature, handler).unwrap();

  let stub: unsafe extern "win64" fn(i32, f64, i64, f32, i64) = unsafe { callback.cast() };
  unsafe { stub(1, 2.5, 3, 1.5, 55) };

  assert_eq!(CELL_1.load(Ordering::SeqCst), 2.5f64.to_bits());
  assert_eq!(CELL_3.load(Ordering::SeqCst), 1.5f32.to_bits() as u64);
  assert_eq!(CELL_4.load(Ordering::SeqCst), 55);
}

#[test]
fn returns_zero_of_declared_type() {
  unsafe extern "C" fn handler(_params: *const Parameters) {}

  let signature = FuncSignature::new(CallingConvention::SystemV, ValueType::I32, vec![]);
  let callback = JitCallback::new(&signature, handler).unwrap();

  let stub: unsafe extern "sysv64" fn() -> i32 = unsafe { callback.cast() };
  assert_eq!(unsafe { stub() }, 0);
}

#[test]
fn observes_detoured_call() {
  static SEEN: AtomicU64 = AtomicU64::new(0);

  #[inline(never)]
  unsafe extern "sysv64" fn target(value: i32) {
    std::ptr::read_volatile(&value);
  }

  unsafe extern "C" fn handler(params: *const Parameters) {
    SEEN.store((*params).arg(0), Ordering::SeqCst);
  }

  let signature = FuncSignature::new(
    CallingConvention::SystemV,
    ValueType::Void,
    vec![ValueType::I32],
  );
  let callback = JitCallback::new(&signature, handler).unwrap();

  unsafe {
    let hook = RawDetour::new(target as *const (), callback.as_ptr()).unwrap();
    hook.enable().unwrap();

    target(1337);
    assert_eq!(SEEN.load(Ordering::SeqCst), 1337);

    hook.disable().unwrap();
  }
}
