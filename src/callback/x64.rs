//! Stub emission for the x64 conventions.
//!
//! The emitted code only clobbers `rax` before the arguments are captured,
//! so every argument register reaches its cell untouched. The cell array
//! lives in the stub's own frame, above the shadow space on Win64.

use super::{CallingConvention, FuncSignature, ValueType};
use crate::error::{Error, Result};
use crate::pic;

/// Where an argument arrives, per the source convention.
enum Source {
  /// A general purpose register; REX prefix plus ModRM register code.
  Gp(u8, u8),
  /// An SSE register.
  Sse(u8),
  /// A caller stack slot at `[rbp + offset]`.
  Stack(i32),
}

/// `mov [rsp + offset], reg` register codes, in argument order.
const SYSTEM_V_GP: [(u8, u8); 6] = [
  (0x48, 7), // rdi
  (0x48, 6), // rsi
  (0x48, 2), // rdx
  (0x48, 1), // rcx
  (0x4C, 0), // r8
  (0x4C, 1), // r9
];

const WIN64_GP: [(u8, u8); 4] = [
  (0x48, 1), // rcx
  (0x48, 2), // rdx
  (0x4C, 0), // r8
  (0x4C, 1), // r9
];

pub(super) fn emitter(signature: &FuncSignature, handler: usize) -> Result<pic::CodeEmitter> {
  let convention = signature.convention.resolve();
  let sources = classify(convention, &signature.args)?;

  // Cells are placed above the shadow space, which the handler call needs
  // whenever either side uses the Microsoft convention
  let cell_base: i32 = if cfg!(windows) || convention == CallingConvention::Win64 {
    32
  } else {
    0
  };
  let cells = signature.args.len() as i32 * 8;
  let frame = ((cells + 15) & !15) + cell_base;

  let mut code = Vec::new();

  // push rbp; mov rbp, rsp
  code.extend_from_slice(&[0x55, 0x48, 0x89, 0xE5]);

  // sub rsp, frame
  if frame < 0x80 {
    code.extend_from_slice(&[0x48, 0x83, 0xEC, frame as u8]);
  } else {
    code.extend_from_slice(&[0x48, 0x81, 0xEC]);
    code.extend_from_slice(&(frame as u32).to_le_bytes());
  }

  for (index, (source, argument)) in sources.iter().zip(&signature.args).enumerate() {
    let cell = cell_base + index as i32 * 8;

    match source {
      Source::Gp(rex, reg) => {
        if *argument == ValueType::I32 {
          // mov eax, reg32 (zero-extends into rax)
          if *rex == 0x4C {
            code.push(0x44);
          }
          code.extend_from_slice(&[0x89, 0xC0 | reg << 3]);

          // mov [rsp + cell], rax
          code.extend_from_slice(&[0x48, 0x89]);
          rsp_operand(&mut code, 0, cell);
        } else {
          // mov [rsp + cell], reg
          code.extend_from_slice(&[*rex, 0x89]);
          rsp_operand(&mut code, *reg, cell);
        }
      },
      Source::Sse(xmm) => {
        if *argument == ValueType::F32 {
          // movd [rsp + cell], xmm (bit-cast of the single)
          code.extend_from_slice(&[0x66, 0x0F, 0x7E]);
          rsp_operand(&mut code, *xmm, cell);

          // mov dword [rsp + cell + 4], 0
          code.push(0xC7);
          rsp_operand(&mut code, 0, cell + 4);
          code.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        } else {
          // movq [rsp + cell], xmm
          code.extend_from_slice(&[0x66, 0x0F, 0xD6]);
          rsp_operand(&mut code, *xmm, cell);
        }
      },
      Source::Stack(offset) => {
        // Spilled singles and doubles are loaded as raw bits
        if *argument == ValueType::I32 || *argument == ValueType::F32 {
          // mov eax, [rbp + offset] (zero-extends)
          code.push(0x8B);
          rbp_operand(&mut code, 0, *offset);
        } else {
          // mov rax, [rbp + offset]
          code.extend_from_slice(&[0x48, 0x8B]);
          rbp_operand(&mut code, 0, *offset);
        }

        // mov [rsp + cell], rax
        code.extend_from_slice(&[0x48, 0x89]);
        rsp_operand(&mut code, 0, cell);
      },
    }
  }

  // The handler itself is always invoked with the host convention
  let first_argument = if cfg!(windows) { 1 } else { 7 };

  // lea reg, [rsp + cell_base]
  code.extend_from_slice(&[0x48, 0x8D]);
  rsp_operand(&mut code, first_argument, cell_base);

  // mov rax, handler; call rax
  code.extend_from_slice(&[0x48, 0xB8]);
  code.extend_from_slice(&(handler as u64).to_le_bytes());
  code.extend_from_slice(&[0xFF, 0xD0]);

  // Return zero of the declared type
  match signature.ret {
    ValueType::Void => (),
    ValueType::F32 | ValueType::F64 => {
      // pxor xmm0, xmm0
      code.extend_from_slice(&[0x66, 0x0F, 0xEF, 0xC0]);
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

/// Classifies every argument to the location it arrives in.
fn classify(convention: CallingConvention, args: &[ValueType]) -> Result<Vec<Source>> {
  match convention {
    CallingConvention::SystemV => Ok(classify_system_v(args)),
    CallingConvention::Win64 => Ok(classify_win64(args)),
    _ => Err(Error::UnsupportedSignature),
  }
}

/// System V classifies integer and floating point registers independently.
fn classify_system_v(args: &[ValueType]) -> Vec<Source> {
  let mut gp = 0;
  let mut sse = 0;
  let mut stack = 0;

  args
    .iter()
    .map(|argument| {
      if argument.is_float() && sse < 8 {
        sse += 1;
        Source::Sse(sse - 1)
      } else if !argument.is_float() && gp < SYSTEM_V_GP.len() {
        gp += 1;
        let (rex, reg) = SYSTEM_V_GP[gp - 1];
        Source::Gp(rex, reg)
      } else {
        stack += 1;
        Source::Stack(16 + (stack - 1) * 8)
      }
    })
    .collect()
}

/// Win64 assigns registers by argument position.
fn classify_win64(args: &[ValueType]) -> Vec<Source> {
  args
    .iter()
    .enumerate()
    .map(|(position, argument)| {
      if position < WIN64_GP.len() {
        if argument.is_float() {
          Source::Sse(position as u8)
        } else {
          let (rex, reg) = WIN64_GP[position];
          Source::Gp(rex, reg)
        }
      } else {
        // The caller stack slots start above the 32 byte shadow space
        Source::Stack(16 + 32 + (position as i32 - 4) * 8)
      }
    })
    .collect()
}

/// Emits a `[rsp + offset]` operand (ModRM + SIB + displacement).
fn rsp_operand(code: &mut Vec<u8>, reg: u8, offset: i32) {
  if (-0x80..0x80).contains(&offset) {
    code.extend_from_slice(&[0x40 | reg << 3 | 0x04, 0x24, offset as u8]);
  } else {
    code.extend_from_slice(&[0x80 | reg << 3 | 0x04, 0x24]);
    code.extend_from_slice(&offset.to_le_bytes());
  }
}

/// Emits a `[rbp + offset]` operand (ModRM + displacement).
fn rbp_operand(code: &mut Vec<u8>, reg: u8, offset: i32) {
  if (-0x80..0x80).contains(&offset) {
    code.extend_from_slice(&[0x45 | reg << 3, offset as u8]);
  } else {
    code.push(0x85 | reg << 3);
    code.extend_from_slice(&offset.to_le_bytes());
  }
}
