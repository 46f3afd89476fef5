pub use self::patcher::Patcher;
pub use self::trampoline::Trampoline;

use crate::{error::Result, pic};

mod patcher;
mod thunk;
mod trampoline;

/// The furthest distance between a target and its detour (2 GiB).
pub const DETOUR_RANGE: usize = 0x8000_0000;

/// Returns the amount of prolog bytes a redirection jump displaces.
pub fn prolog_margin(_target: *const ()) -> usize {
  thunk::x86::JMP_REL32_SIZE
}

/// Builds a relay for detours beyond rel32 reach (x64 only).
///
/// The relay is allocated next to the target, so the five byte prolog jump
/// bounces through its absolute jump to reach the far detour.
pub fn relay_builder(target: *const (), detour: *const ()) -> Result<Option<pic::CodeEmitter>> {
  let displacement = (target as isize).wrapping_sub(detour as isize);

  if cfg!(target_arch = "x86_64") && !crate::arch::is_within_range(displacement) {
    let mut emitter = pic::CodeEmitter::new();
    emitter.add_thunk(thunk::jmp(detour as usize));
    return Ok(Some(emitter));
  }

  Ok(None)
}

#[cfg(test)]
mod tests {
  use crate::arch::memory;
  use crate::error::Error;
  use crate::{alloc, os, RawDetour};
  use std::mem;

  type CRet = unsafe extern "C" fn() -> i32;

  /// Default detour target.
  unsafe extern "C" fn ret10() -> i32 {
    10
  }

  /// Places a raw code sequence in executable memory.
  fn emit_code(code: &[u8]) -> alloc::ExecutableMemory {
    let pool = memory::POOL.lock().unwrap();
    let mut memory = pool
      .allocate(ret10 as *const (), code.len())
      .expect("allocating synthetic code");
    memory.copy_from_slice(code);
    os::flush_instruction_cache(memory.as_ptr() as *const (), memory.len());
    memory
  }

  /// Detours a synthetic function, and asserts the return values of the
  /// hooked function and its trampoline.
  unsafe fn detour_test(target: CRet, result: i32) {
    let hook = RawDetour::new(target as *const (), ret10 as *const ()).unwrap();

    assert_eq!(target(), result);
    hook.enable().unwrap();
    {
      assert_eq!(target(), 10);

      let original: CRet = mem::transmute(hook.trampoline());
      assert_eq!(original(), result);
    }
    hook.disable().unwrap();
    assert_eq!(target(), result);
  }

  #[test]
  fn detour_conditional_branch() {
    let code = emit_code(&[
      0x31, 0xC0, // xor eax, eax
      0x74, 0x07, // je +7
      0xB8, 0x02, 0x00, 0x00, 0x00, // mov eax, 2
      0xEB, 0x05, // jmp +5
      0xB8, 0x05, 0x00, 0x00, 0x00, // mov eax, 5
      0xC3, // ret
    ]);
    unsafe { detour_test(mem::transmute(code.as_ptr()), 5) }
  }

  #[test]
  fn detour_internal_branch() {
    let code = emit_code(&[
      0xEB, 0x01, // jmp +1
      0x90, // nop
      0xB8, 0x2A, 0x00, 0x00, 0x00, // mov eax, 42
      0xC3, // ret
    ]);
    unsafe { detour_test(mem::transmute(code.as_ptr()), 42) }
  }

  #[test]
  fn detour_jump_preserves_label() {
    let code = emit_code(&[
      0xE9, 0x03, 0x00, 0x00, 0x00, // jmp +3
      0xCC, 0xCC, 0xCC,
      0xB8, 0x07, 0x00, 0x00, 0x00, // mov eax, 7
      0xC3, // ret
    ]);
    unsafe { detour_test(mem::transmute(code.as_ptr()), 7) }
  }

  #[test]
  #[cfg(target_arch = "x86_64")]
  fn detour_rip_relative() {
    let code = emit_code(&[
      0x31, 0xC0, // xor eax, eax
      0x8A, 0x05, 0x02, 0x00, 0x00, 0x00, // mov al, [rip+2]
      0xC3, // ret
      0x90, // nop
      0x2A, // data
    ]);
    unsafe { detour_test(mem::transmute(code.as_ptr()), 42) }
  }

  #[test]
  fn detour_hot_patch() {
    let code = emit_code(&[
      0x90, 0x90, 0x90, 0x90, 0x90, // hot patch area
      0x31, 0xC0, // xor eax, eax
      0xC3, // ret
      0xB8, 0x05, 0x00, 0x00, 0x00, // mov eax, 5
    ]);
    unsafe { detour_test(mem::transmute(code.as_ptr().add(5)), 0) }
  }

  #[test]
  fn detour_padding_after() {
    let code = emit_code(&[
      0x31, 0xC0, // xor eax, eax
      0xC3, // ret
      0x90, 0x90, // padding
    ]);
    unsafe { detour_test(mem::transmute(code.as_ptr()), 0) }
  }

  #[test]
  fn detour_privileged_instruction() {
    let code = emit_code(&[0xF4, 0x90, 0x90, 0x90, 0x90, 0xC3]); // hlt
    let error =
      unsafe { RawDetour::new(code.as_ptr() as *const (), ret10 as *const ()) }.unwrap_err();
    assert_matches!(error, Error::UnrelocatableInstruction);
  }

  #[test]
  fn detour_indirect_branch() {
    let code = emit_code(&[0xFF, 0xE0, 0x90, 0x90, 0x90, 0xC3]); // jmp eax
    let error =
      unsafe { RawDetour::new(code.as_ptr() as *const (), ret10 as *const ()) }.unwrap_err();
    assert_matches!(error, Error::UnrelocatableInstruction);
  }

  #[test]
  fn detour_external_loop() {
    let code = emit_code(&[0xE2, 0x03, 0x90, 0x90, 0x90, 0xC3]); // loop +3
    let error =
      unsafe { RawDetour::new(code.as_ptr() as *const (), ret10 as *const ()) }.unwrap_err();
    assert_matches!(error, Error::UnrelocatableInstruction);
  }

  #[test]
  fn detour_restores_bytes() {
    let code = emit_code(&[
      0xB8, 0x05, 0x00, 0x00, 0x00, // mov eax, 5
      0xC3, // ret
    ]);
    let before = code.to_vec();

    unsafe {
      let hook = RawDetour::new(code.as_ptr() as *const (), ret10 as *const ()).unwrap();
      hook.enable().unwrap();
      assert_ne!(&code[..], &before[..]);

      hook.disable().unwrap();
      assert_eq!(&code[..], &before[..]);

      // Repeated teardown leaves the target untouched
      hook.disable().unwrap();
      assert_eq!(&code[..], &before[..]);
    }
  }

  #[test]
  fn detour_rejects_shared_target() {
    let code = emit_code(&[
      0xB8, 0x05, 0x00, 0x00, 0x00, // mov eax, 5
      0xC3, // ret
    ]);

    unsafe {
      let first = RawDetour::new(code.as_ptr() as *const (), ret10 as *const ()).unwrap();
      let second = RawDetour::new(code.as_ptr() as *const (), ret10 as *const ()).unwrap();

      first.enable().unwrap();
      assert_matches!(second.enable(), Err(Error::AlreadyHooked));
      first.disable().unwrap();

      // The claim is released on disable, so the target can be re-hooked
      second.enable().unwrap();
      let target: CRet = mem::transmute(code.as_ptr());
      assert_eq!(target(), 10);
      second.disable().unwrap();
    }
  }
}
