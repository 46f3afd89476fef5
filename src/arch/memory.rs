use crate::{alloc, arch, error::Result, os, pic};
use lazy_static::lazy_static;
use std::sync::Mutex;

lazy_static! {
  /// Shared allocator for all hooks.
  pub static ref POOL: Mutex<alloc::ThreadAllocator> = {
    // Use a range of +/- 2 GB for seeking a memory block
    Mutex::new(alloc::ThreadAllocator::new(arch::DETOUR_RANGE))
  };
}

/// Allocates PIC code at the specified address.
pub fn allocate_pic(
  pool: &mut alloc::ThreadAllocator,
  emitter: &pic::CodeEmitter,
  origin: *const (),
) -> Result<alloc::ExecutableMemory> {
  // Allocate memory close to the origin
  let mut memory = pool.allocate(origin, emitter.len())?;

  // Generate code for the obtained address
  let code = emitter.emit(memory.as_ptr() as *const _)?;
  memory.copy_from_slice(code.as_slice());
  os::flush_instruction_cache(memory.as_ptr() as *const _, memory.len());
  Ok(memory)
}
