//! Stub emission for x86 (cdecl).
//!
//! Every argument arrives on the caller stack. 64-bit values span two
//! caller slots and are copied into their cell dword by dword; 32-bit
//! values have the upper half of their cell zeroed. The cell array starts
//! four bytes into the frame so its cells stay eight byte aligned when the
//! caller aligns the stack to sixteen.

use super::{CallingConvention, FuncSignature, ValueType};
use crate::error::{Error, Result};
use crate::pic;

pub(super) fn emitter(signature: &FuncSignature, handler: usize) -> Result<pic::CodeEmitter> {
  if signature.convention.resolve() != CallingConvention::Cdecl {
    return Err(Error::UnsupportedSignature);
  }

  let cells = signature.args.len() as i32 * 8;
  let frame = ((cells + 15) & !15) + 4;

  let mut code = Vec::new();

  // push ebp; mov ebp, esp
  code.extend_from_slice(&[0x55, 0x89, 0xE5]);

  // sub esp, frame
  if frame < 0x80 {
    code.extend_from_slice(&[0x83, 0xEC, frame as u8]);
  } else {
    code.extend_from_slice(&[0x81, 0xEC]);
    code.extend_from_slice(&(frame as u32).to_le_bytes());
  }

  // The first caller slot lives above the return address
  let mut slot = 8;

  for (index, argument) in signature.args.iter().enumerate() {
    let cell = 4 + index as i32 * 8;
    let wide = *argument == ValueType::I64 || *argument == ValueType::F64;

    // mov eax, [ebp + slot]; mov [esp + cell], eax
    code.push(0x8B);
    ebp_operand(&mut code, 0, slot);
    code.push(0x89);
    esp_operand(&mut code, 0, cell);

    if wide {
      // mov eax, [ebp + slot + 4]; mov [esp + cell + 4], eax
      code.push(0x8B);
      ebp_operand(&mut code, 0, slot + 4);
      code.push(0x89);
      esp_operand(&mut code, 0, cell + 4);
      slot += 8;
    } else {
      // mov dword [esp + cell + 4], 0
      code.push(0xC7);
      esp_operand(&mut code, 0, cell + 4);
      code.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
      slot += 4;
    }
  }

  // lea eax, [esp + 4]; push eax
  code.extend_from_slice(&[0x8D, 0x44, 0x24, 0x04, 0x50]);

  // mov ecx, handler; call ecx; add esp, 4
  code.push(0xB9);
  code.extend_from_slice(&(handler as u32).to_le_bytes());
  code.extend_from_slice(&[0xFF, 0xD1, 0x83, 0xC4, 0x04]);

  // Return zero of the declared type
  match signature.ret {
    ValueType::Void => (),
    ValueType::F32 | ValueType::F64 => {
      // fldz
      code.extend_from_slice(&[0xD9, 0xEE]);
    },
    ValueType::I64 => {
      // xor eax, eax; xor edx, edx
      code.extend_from_slice(&[0x31, 0xC0, 0x31, 0xD2]);
    },
    _ => {
      // xor eax, eax
      code.extend_from_slice(&[0x31, 0xC0]);
    },
  }

  // leave; ret
  code.extend_from_slice(&[0xC9, 0xC3]);

  let mut emitter = pic::CodeEmitter::new();
  emitter.add_thunk(Box::new(code));
  Ok(emitter)
}

/// Emits an `[esp + offset]` operand (ModRM + SIB + displacement).
fn esp_operand(code: &mut Vec<u8>, reg: u8, offset: i32) {
  if (-0x80..0x80).contains(&offset) {
    code.extend_from_slice(&[0x40 | reg << 3 | 0x04, 0x24, offset as u8]);
  } else {
    code.extend_from_slice(&[0x80 | reg << 3 | 0x04, 0x24]);
    code.extend_from_slice(&offset.to_le_bytes());
  }
}

/// Emits an `[ebp + offset]` operand (ModRM + displacement).
fn ebp_operand(code: &mut Vec<u8>, reg: u8, offset: i32) {
  if (-0x80..0x80).contains(&offset) {
    code.extend_from_slice(&[0x45 | reg << 3, offset as u8]);
  } else {
    code.push(0x85 | reg << 3);
    code.extend_from_slice(&offset.to_le_bytes());
  }
}
