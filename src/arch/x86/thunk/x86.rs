//! Relative branch encodings, shared by x86 and x64.
//!
//! All bytes are generated against the address they end up at. On x64 a
//! rel32 operand only spans +/- 2 GiB, so generation fails with
//! `Unreachable` when the destination lies further out; x86 displacements
//! wrap around the address space and always reach.

use crate::error::{Error, Result};
use crate::pic::{FixedThunk, Thunkable};
use generic_array::{typenum, GenericArray};

/// Encoded size of a rel8 jump.
pub const JMP_REL8_SIZE: usize = 2;
/// Encoded size of a rel32 jump or call.
pub const JMP_REL32_SIZE: usize = 5;
/// Encoded size of a rel32 conditional jump.
pub const JCC_REL32_SIZE: usize = 6;

/// Constructs either a relative jump or call.
fn relative32(destination: usize, opcode: u8) -> Box<dyn Thunkable> {
  Box::new(FixedThunk::<typenum::U5>::new(move |source| {
    let mut code = GenericArray::default();
    code[0] = opcode;
    code[1..].copy_from_slice(&displacement32(destination, source, JMP_REL32_SIZE)?.to_le_bytes());
    Ok(code)
  }))
}

/// Constructs a relative call operation.
pub fn call_rel32(destination: usize) -> Box<dyn Thunkable> {
  relative32(destination, 0xE8)
}

/// Constructs a relative jump operation.
pub fn jmp_rel32(destination: usize) -> Box<dyn Thunkable> {
  relative32(destination, 0xE9)
}

/// Constructs a conditional relative jump operation.
pub fn jcc_rel32(destination: usize, condition: u8) -> Box<dyn Thunkable> {
  Box::new(FixedThunk::<typenum::U6>::new(move |source| {
    let mut code = GenericArray::default();
    code[0] = 0x0F;
    code[1] = 0x80 | condition;
    code[2..].copy_from_slice(&displacement32(destination, source, JCC_REL32_SIZE)?.to_le_bytes());
    Ok(code)
  }))
}

/// Constructs a short jump with a fixed displacement.
///
/// Used for the hot patch entry, where the displacement to the area above
/// the function is known before emission.
pub fn jmp_rel8(displacement: i8) -> Box<dyn Thunkable> {
  Box::new(vec![0xEB, (displacement - JMP_REL8_SIZE as i8) as u8])
}

/// Re-encodes a branch confined to the relocated run.
///
/// The displacement is a delta between offsets of the same buffer, so the
/// bytes are position independent. `size` carries the layout decision: the
/// original rel8 form when the remapped destination still fits, or the
/// widened rel32 form chosen by the expansion pass.
pub fn branch_within(
  opcode: u8,
  condition: Option<u8>,
  displacement: isize,
  size: usize,
) -> Box<dyn Thunkable> {
  let mut code = Vec::with_capacity(size);

  match size {
    // The original primary opcode with a new rel8 operand
    JMP_REL8_SIZE => {
      code.push(opcode);
      code.push(displacement as i8 as u8);
    },
    JMP_REL32_SIZE => {
      code.push(0xE9);
      code.extend_from_slice(&(displacement as i32).to_le_bytes());
    },
    JCC_REL32_SIZE => {
      code.push(0x0F);
      code.push(0x80 | condition.expect("re-encoding a conditional branch"));
      code.extend_from_slice(&(displacement as i32).to_le_bytes());
    },
    _ => unreachable!("branch size: {}", size),
  }

  Box::new(code)
}

/// Calculates a rel32 operand reaching `destination` from `source`.
fn displacement32(destination: usize, source: usize, size: usize) -> Result<i32> {
  let displacement = (destination as isize).wrapping_sub(source as isize + size as isize);

  if cfg!(target_arch = "x86_64") && !crate::arch::is_within_range(displacement) {
    return Err(Error::Unreachable);
  }

  Ok(displacement as i32)
}
