//! Absolute branch encodings for x64.
//!
//! A trampoline sits within 2 GiB of its target, but the addresses it
//! branches back out to are arbitrary, so the wide forms embed the
//! destination as a 64 bit literal directly after the instruction and
//! branch through it. None of the encodings depend on their own address.

use crate::pic::Thunkable;

/// An absolute call through a literal trailing the instruction.
pub fn call_abs(destination: usize) -> Box<dyn Thunkable> {
  let mut code = Vec::with_capacity(16);
  code.extend_from_slice(&[0xFF, 0x15, 0x02, 0x00, 0x00, 0x00]); // call [rip+2]
  code.extend_from_slice(&[0xEB, 0x08]); // jmp over the literal
  code.extend_from_slice(&destination.to_le_bytes());
  Box::new(code)
}

/// An absolute jump through a literal trailing the instruction.
pub fn jmp_abs(destination: usize) -> Box<dyn Thunkable> {
  let mut code = Vec::with_capacity(14);
  code.extend_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]); // jmp [rip]
  code.extend_from_slice(&destination.to_le_bytes());
  Box::new(code)
}

/// A conditional absolute jump.
///
/// The condition is inverted so the taken case falls through into the
/// absolute jump, and the untaken case skips the jump and its literal.
pub fn jcc_abs(destination: usize, condition: u8) -> Box<dyn Thunkable> {
  let mut code = Vec::with_capacity(16);
  code.push(0x71 ^ condition); // jcc, inverted
  code.push(0x0E); // over the jump and its literal
  code.extend_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]); // jmp [rip]
  code.extend_from_slice(&destination.to_le_bytes());
  Box::new(code)
}
