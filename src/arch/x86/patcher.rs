use super::thunk;
use crate::error::{Error, Result};
use crate::{pic, util};
use std::slice;

pub struct Patcher {
  patched: bool,
  patch_area: &'static mut [u8],
  detour_bounce: Vec<u8>,
  target_backup: Vec<u8>,
}

impl Patcher {
  /// Creates a new detour patcher for an address.
  ///
  /// # Arguments
  ///
  /// * `target` - An address that should be hooked.
  /// * `detour` - An address that the target should be redirected to.
  /// * `prolog_size` - The amount of bytes displaced by the trampoline.
  pub unsafe fn new(target: *const (), detour: *const (), prolog_size: usize) -> Result<Patcher> {
    // Calculate the patch area (i.e if a long or short jump should be used)
    let patch_area = Self::patch_area(target, prolog_size)?;
    let emitter = Self::hook_template(target, detour, patch_area);

    let patch_address = patch_area.as_ptr() as *const ();
    let backup = patch_area.to_vec();

    Ok(Patcher {
      patched: false,
      detour_bounce: emitter.emit(patch_address)?,
      target_backup: backup,
      patch_area,
    })
  }

  /// Either patches or unpatches the function.
  ///
  /// The patch area must be writable when called.
  pub unsafe fn toggle(&mut self, enable: bool) {
    if self.patched == enable {
      return;
    }

    // Copy either the detour or the original bytes of the function
    self.patch_area.copy_from_slice(if enable {
      &self.detour_bounce
    } else {
      &self.target_backup
    });

    self.patched = enable;
  }

  /// Returns whether the function is patched or not.
  pub fn is_patched(&self) -> bool {
    self.patched
  }

  /// Returns the area containing the patch.
  pub fn area(&self) -> &[u8] {
    self.patch_area
  }

  /// Returns the patch area for a function.
  ///
  /// The area starts at the function entry and covers the redirection jump
  /// plus all bytes displaced into the trampoline. When the prolog is too
  /// short for a long jump, a hot patch area above the function is used
  /// instead, entered through a short jump at the function entry.
  unsafe fn patch_area(target: *const (), prolog_size: usize) -> Result<&'static mut [u8]> {
    if Self::is_patchable(target, prolog_size, thunk::x86::JMP_REL32_SIZE) {
      // The range is from the start of the function to the end of the jump
      // or the end of the displaced prolog, whichever lies further.
      let patch_size = thunk::x86::JMP_REL32_SIZE.max(prolog_size);
      Ok(slice::from_raw_parts_mut(target as *mut u8, patch_size))
    } else if Self::is_patchable(target, prolog_size, thunk::x86::JMP_REL8_SIZE) {
      // A small jump relies on there being a hot patch area above the
      // function, that consists of at least 5 bytes (a rel32 jump).
      let hot_patch = target as usize - thunk::x86::JMP_REL32_SIZE;
      let hot_patch_area =
        slice::from_raw_parts(hot_patch as *const u8, thunk::x86::JMP_REL32_SIZE);

      // Ensure that the hot patch area only contains padding and is executable
      if !Self::is_code_padding(hot_patch_area)
        || !util::is_executable_address(hot_patch_area.as_ptr() as *const _)?
      {
        Err(Error::PrologTooShort)?;
      }

      // The range is from the start of the hot patch to the end of the
      // short jump or the displaced prolog.
      let patch_size =
        thunk::x86::JMP_REL32_SIZE + thunk::x86::JMP_REL8_SIZE.max(prolog_size);
      Ok(slice::from_raw_parts_mut(hot_patch as *mut u8, patch_size))
    } else {
      Err(Error::PrologTooShort)
    }
  }

  /// Creates a redirect code template for the targetted patch area.
  ///
  /// A detour beyond rel32 reach surfaces as `Unreachable` when the
  /// template is emitted; a relay normally sits in between long before
  /// that, so emission only fails for callers bypassing the detour engine.
  fn hook_template(target: *const (), detour: *const (), patch_area: &[u8]) -> pic::CodeEmitter {
    let mut emitter = pic::CodeEmitter::new();

    // Both hot patch and normal detours use a relative long jump
    emitter.add_thunk(thunk::x86::jmp_rel32(detour as usize));
    let mut emitted = thunk::x86::JMP_REL32_SIZE;

    // The hot patch relies on a small jump to get to the long jump
    let uses_hot_patch = patch_area.as_ptr() as usize != target as usize;

    if uses_hot_patch {
      let displacement = -(thunk::x86::JMP_REL32_SIZE as i8);
      emitter.add_thunk(thunk::x86::jmp_rel8(displacement));
      emitted += thunk::x86::JMP_REL8_SIZE;
    }

    // Displaced prolog bytes beyond the jump are filled with no-ops, so a
    // disassembler walking the patched function never sees half an
    // instruction.
    if patch_area.len() > emitted {
      emitter.add_thunk(Box::new(vec![0x90; patch_area.len() - emitted]));
    }

    emitter
  }

  /// Returns whether an address can be inline patched or not.
  unsafe fn is_patchable(target: *const (), prolog_size: usize, patch_size: usize) -> bool {
    if prolog_size >= patch_size {
      // If the whole patch fits it's good to go!
      return true;
    }

    // Otherwise the inline patch relies on padding after the prolog
    let slice = slice::from_raw_parts(
      (target as usize + prolog_size) as *const u8,
      patch_size - prolog_size,
    );
    Self::is_code_padding(slice)
  }

  /// Returns true if the slice only contains code padding.
  fn is_code_padding(buffer: &[u8]) -> bool {
    const PADDING: [u8; 3] = [0x00, 0x90, 0xCC];
    buffer.iter().all(|code| PADDING.contains(code))
  }
}
