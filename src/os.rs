//! Thin wrappers around the OS facilities the patch paths depend on.

use crate::error::Result;

/// Runs `body` with `protection` added to the pages covering the range.
///
/// The current protection is queried first and the union of both is applied,
/// so read-execute code pages become read-write-execute rather than losing
/// their execute bit mid-patch. The prior protection is restored when the
/// guard drops, on every exit path.
pub unsafe fn with_protection<T, F: FnOnce() -> T>(
  address: *const (),
  size: usize,
  protection: region::Protection,
  body: F,
) -> Result<T> {
  let current = region::query(address as *const u8)?.protection();
  let _guard = region::protect_with_handle(address as *const u8, size, current | protection)?;
  Ok(body())
}

/// Flushes the instruction cache for a range of freshly written code.
#[allow(unused_variables)]
pub fn flush_instruction_cache(address: *const (), size: usize) {
  #[cfg(windows)]
  unsafe {
    use winapi::um::processthreadsapi::{FlushInstructionCache, GetCurrentProcess};
    FlushInstructionCache(GetCurrentProcess(), address as *const _, size);
  }
  // x86 keeps the instruction cache coherent with same-core stores.
}
