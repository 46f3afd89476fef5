use self::disasm::*;
use crate::arch::x86::thunk;
use crate::arch::x86::thunk::x86::{JCC_REL32_SIZE, JMP_REL32_SIZE, JMP_REL8_SIZE};
use crate::error::{Error, Result};
use crate::pic;
use std::collections::HashMap;
use std::mem;

mod disasm;

/// A trampoline generator (x86/x64).
pub struct Trampoline {
  emitter: pic::CodeEmitter,
  prolog_size: usize,
}

impl Trampoline {
  /// Constructs a new trampoline for an address.
  pub unsafe fn new(target: *const (), margin: usize) -> Result<Trampoline> {
    Builder::new(target, margin).build()
  }

  /// Returns a reference to the trampoline's code emitter.
  pub fn emitter(&self) -> &pic::CodeEmitter {
    &self.emitter
  }

  /// Returns the size of the prolog (i.e the amount of disassembled bytes).
  pub fn prolog_size(&self) -> usize {
    self.prolog_size
  }
}

/// How an instruction is carried over into the trampoline.
enum Relocation {
  /// Copied verbatim; no position-dependent operands.
  Copy,
  /// RIP-relative memory operand, re-displaced towards its absolute target.
  RipRelative { displacement: isize },
  /// Relative call, re-targeted at its absolute destination.
  Call { destination: usize },
  /// Relative branch leaving the prolog, re-targeted at its absolute destination.
  Branch {
    destination: usize,
    condition: Option<u8>,
  },
  /// Relative branch within the prolog, re-encoded against the remapped layout.
  Internal { destination: usize, kind: Internal },
}

enum Internal {
  Jump,
  Conditional(u8),
  /// The `loop`/`jecxz` family has no rel32 encoding.
  Loop,
}

/// A disassembled prolog instruction awaiting relocation.
struct Entry {
  address: usize,
  bytes: Vec<u8>,
  relocation: Relocation,
}

/// A trampoline builder.
struct Builder {
  /// Disassembler for x86/x64.
  disassembler: Disassembler,
  /// Target destination for a potential internal branch.
  branch_address: Option<usize>,
  /// Total amount of bytes disassembled.
  total_bytes_disassembled: usize,
  /// The preferred minimum amount of bytes disassembled.
  margin: usize,
  /// Whether disassembling has finished or not.
  finished: bool,
  /// The target the trampoline is adapted for.
  target: *const (),
}

impl Builder {
  /// Returns a trampoline builder.
  pub fn new(target: *const (), margin: usize) -> Self {
    Builder {
      disassembler: Disassembler::new(target),
      branch_address: None,
      total_bytes_disassembled: 0,
      finished: false,
      target,
      margin,
    }
  }

  /// Creates a trampoline with the supplied settings.
  pub unsafe fn build(mut self) -> Result<Trampoline> {
    let mut entries = Vec::new();
    let mut tail = None;

    while !self.finished {
      let instruction = self.next_instruction()?;
      let entry = self.process_instruction(&instruction)?;
      entries.push(entry);

      // Determine whether enough bytes for the margin has been disassembled
      if self.total_bytes_disassembled >= self.margin && !self.finished {
        // The trampoline continues at the first instruction after the prolog
        tail = Some(instruction.next_instruction_address());
        self.finished = true;
      }
    }

    Ok(Trampoline {
      prolog_size: self.total_bytes_disassembled,
      emitter: relocate(entries, tail)?,
    })
  }

  /// Disassembles the next instruction and returns its properties.
  unsafe fn next_instruction(&mut self) -> Result<Instruction> {
    let instruction_address = self.target as usize + self.total_bytes_disassembled;

    // Disassemble the next instruction
    match Instruction::new(&mut self.disassembler, instruction_address as *const _) {
      None => Err(Error::InvalidCode)?,
      Some(instruction) => {
        // Keep track of the total amount of bytes
        self.total_bytes_disassembled += instruction.len();
        Ok(instruction)
      },
    }
  }

  /// Turns an instruction into a relocation entry based on its category.
  unsafe fn process_instruction(&mut self, instruction: &Instruction) -> Result<Entry> {
    let relocation = match instruction.category() {
      Category::Privileged | Category::IndirectBranch => {
        Err(Error::UnrelocatableInstruction)?
      },
      Category::RipRelative(displacement) => self.process_rip_operand(displacement),
      Category::RelativeBranch(displacement) => {
        self.process_relative_branch(instruction, displacement)?
      },
      Category::Return => {
        // In case the return is not placed in a branch, the function
        // returns unconditionally (i.e it terminates here).
        self.finished = !self.is_instruction_in_branch(instruction);
        Relocation::Copy
      },
      Category::Ordinary => Relocation::Copy,
    };

    Ok(Entry {
      address: instruction.address(),
      bytes: instruction.as_slice().to_vec(),
      relocation,
    })
  }

  /// Classifies RIP relative operands. They are only available in x64
  /// processes. The operands offsets needs to be adjusted for their new
  /// position. An example would be:
  ///
  /// ```asm
  /// mov eax, [rip+0x10]   ; the displacement before relocation
  /// mov eax, [rip+0x4892] ; theoretical adjustment after relocation
  /// ```
  fn process_rip_operand(&mut self, displacement: isize) -> Relocation {
    // Nothing should be done if `displacement` is within the prolog.
    if (-(self.total_bytes_disassembled as isize)..0).contains(&displacement) {
      Relocation::Copy
    } else {
      Relocation::RipRelative { displacement }
    }
  }

  /// Classifies relative branches (e.g `call`, `loop`, `jne`).
  unsafe fn process_relative_branch(
    &mut self,
    instruction: &Instruction,
    displacement: isize,
  ) -> Result<Relocation> {
    // Calculate the absolute address of the target destination
    let destination = instruction
      .next_instruction_address()
      .wrapping_add(displacement as usize);

    if instruction.is_call() {
      // Calls are not an issue since they return to the original address
      return Ok(Relocation::Call { destination });
    }

    let prolog_range = (self.target as usize)..(self.target as usize + self.margin);

    // If the relative jump is internal, and short enough to fit within the
    // copied function prolog (i.e `margin`), the branch is re-encoded
    // against the remapped layout once all instructions are placed.
    if prolog_range.contains(&destination) {
      // Keep track of the jump's destination address
      self.branch_address = Some(destination);

      let kind = if instruction.is_loop() {
        Internal::Loop
      } else if instruction.is_unconditional_jump() {
        Internal::Jump
      } else {
        Internal::Conditional(condition_code(instruction))
      };

      Ok(Relocation::Internal { destination, kind })
    } else if instruction.is_loop() {
      // Loops (e.g 'loopnz', 'jecxz') to the outside are not supported
      Err(Error::UnrelocatableInstruction)
    } else if instruction.is_unconditional_jump() {
      // If the function is not in a branch, and it unconditionally jumps
      // a distance larger than the prolog, it's the same as if it terminates.
      self.finished = !self.is_instruction_in_branch(instruction);

      Ok(Relocation::Branch {
        destination,
        condition: None,
      })
    } else {
      Ok(Relocation::Branch {
        destination,
        condition: Some(condition_code(instruction)),
      })
    }
  }

  /// Returns whether the current instruction is inside a branch or not.
  fn is_instruction_in_branch(&self, instruction: &Instruction) -> bool {
    self
      .branch_address
      .map_or(false, |offset| instruction.address() < offset)
  }
}

/// Extracts the condition of a conditional jump.
unsafe fn condition_code(instruction: &Instruction) -> u8 {
  // To extract the condition, the primary opcode is required. Short
  // jumps are only one byte, but long jccs are prefixed with 0x0F.
  let primary_opcode = instruction
    .as_slice()
    .iter()
    .find(|op| **op != 0x0F)
    .expect("retrieving conditional jump primary op code");

  // Extract the condition (i.e 0x74 is [jz rel8] ⟶ 0x74 & 0x0F == 4)
  primary_opcode & 0x0F
}

/// Lays the entries out at their new offsets and assembles the emitter.
///
/// All thunk sizes are known up front except internal branches, which start
/// at their original size and are expanded (rel8 ⟶ rel32) whenever their
/// remapped displacement no longer fits. Expansion only ever grows the
/// layout, so the pass reaches a fixed point after at most one expansion per
/// entry.
fn relocate(entries: Vec<Entry>, tail: Option<usize>) -> Result<pic::CodeEmitter> {
  let addresses: Vec<usize> = entries.iter().map(|entry| entry.address).collect();

  // Resolve every fixed-size entry to its thunk immediately
  let mut pending = Vec::with_capacity(entries.len());
  for entry in entries {
    pending.push(match entry.relocation {
      Relocation::Copy => Pending::Fixed(Box::new(entry.bytes)),
      Relocation::RipRelative { displacement } => {
        Pending::Fixed(rip_relative_thunk(entry.address, entry.bytes, displacement))
      },
      Relocation::Call { destination } => Pending::Fixed(thunk::call(destination)),
      Relocation::Branch {
        destination,
        condition: Some(condition),
      } => Pending::Fixed(thunk::jcc(destination, condition)),
      Relocation::Branch {
        destination,
        condition: None,
      } => Pending::Fixed(thunk::jmp(destination)),
      Relocation::Internal { destination, kind } => Pending::Internal {
        destination,
        kind,
        original: entry.bytes,
      },
    });
  }

  let mut sizes: Vec<usize> = pending.iter().map(Pending::len).collect();

  let (offsets, remap) = loop {
    // Calculate the offset of every entry for the current sizes
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut total = 0;
    for size in &sizes {
      offsets.push(total);
      total += size;
    }

    let remap: HashMap<usize, usize> = addresses
      .iter()
      .copied()
      .zip(offsets.iter().copied())
      .collect();

    let mut expanded = false;
    for (index, entry) in pending.iter().enumerate() {
      if let Pending::Internal {
        destination,
        kind,
        original,
      } = entry
      {
        // Branches into the middle of an instruction cannot be remapped
        let target_offset = *remap.get(destination).ok_or(Error::UnrelocatableInstruction)?;
        let displacement = target_offset as isize - (offsets[index] + sizes[index]) as isize;

        if sizes[index] == JMP_REL8_SIZE
          && original.len() == JMP_REL8_SIZE
          && !fits_rel8(displacement)
        {
          sizes[index] = match kind {
            Internal::Loop => Err(Error::UnrelocatableInstruction)?,
            Internal::Jump => JMP_REL32_SIZE,
            Internal::Conditional(_) => JCC_REL32_SIZE,
          };
          expanded = true;
        }
      }
    }

    if !expanded {
      break (offsets, remap);
    }
  };

  // Assemble the final code with the settled layout
  let mut emitter = pic::CodeEmitter::new();
  for (index, entry) in pending.into_iter().enumerate() {
    match entry {
      Pending::Fixed(thunk) => emitter.add_thunk(thunk),
      Pending::Internal {
        destination,
        kind,
        original,
      } => {
        let displacement = remap[&destination] as isize - (offsets[index] + sizes[index]) as isize;
        let condition = match kind {
          Internal::Conditional(condition) => Some(condition),
          _ => None,
        };

        emitter.add_thunk(thunk::x86::branch_within(
          original[0],
          condition,
          displacement,
          sizes[index],
        ));
      },
    }
  }

  if let Some(address) = tail {
    // Add a jump to the first instruction after the prolog
    emitter.add_thunk(thunk::jmp(address));
  }

  Ok(emitter)
}

enum Pending {
  Fixed(Box<dyn pic::Thunkable>),
  Internal {
    destination: usize,
    kind: Internal,
    original: Vec<u8>,
  },
}

impl Pending {
  fn len(&self) -> usize {
    match self {
      Pending::Fixed(thunk) => thunk.len(),
      Pending::Internal { original, .. } => original.len(),
    }
  }
}

fn fits_rel8(displacement: isize) -> bool {
  (-0x80..0x80).contains(&displacement)
}

/// Adjusts the offset of a RIP relative operand for the trampoline.
fn rip_relative_thunk(
  address: usize,
  bytes: Vec<u8>,
  displacement: isize,
) -> Box<dyn pic::Thunkable> {
  let size = bytes.len();

  unsafe {
    Box::new(pic::UnsafeThunk::new(
      move |offset| {
        let mut copy = bytes.clone();

        // The operand is evaluated against the new instruction pointer, so
        // the trampoline must lie within +/- 2 GiB of the original target.
        let adjusted_displacement = (address as isize)
          .wrapping_sub(offset as isize)
          .wrapping_add(displacement);
        if !crate::arch::is_within_range(adjusted_displacement) {
          return Err(Error::Unreachable);
        }

        // The displacement value is placed at (instruction - disp32)
        let index = copy.len() - mem::size_of::<u32>();
        copy[index..].copy_from_slice(&(adjusted_displacement as u32).to_le_bytes());
        Ok(copy)
      },
      size,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn emit_at_zero(entries: Vec<Entry>, tail: Option<usize>) -> Vec<u8> {
    relocate(entries, tail)
      .unwrap()
      .emit(0 as *const ())
      .unwrap()
  }

  fn internal(address: usize, bytes: Vec<u8>, destination: usize, kind: Internal) -> Entry {
    Entry {
      address,
      bytes,
      relocation: Relocation::Internal { destination, kind },
    }
  }

  fn copy(address: usize, bytes: Vec<u8>) -> Entry {
    Entry {
      address,
      bytes,
      relocation: Relocation::Copy,
    }
  }

  #[test]
  fn internal_branch_keeps_short_encoding() {
    let entries = vec![
      internal(0, vec![0xEB, 0x01], 3, Internal::Jump),
      copy(2, vec![0x90]),
      copy(3, vec![0xC3]),
    ];

    assert_eq!(emit_at_zero(entries, None), vec![0xEB, 0x01, 0x90, 0xC3]);
  }

  #[test]
  fn internal_branch_expands_to_fixed_point() {
    // 128 bytes between the branch and its destination force the rel8
    // encoding out of range once laid out.
    let entries = vec![
      internal(0, vec![0xEB, 0x7E], 130, Internal::Jump),
      copy(2, vec![0x90; 128]),
      copy(130, vec![0xC3]),
    ];

    let code = emit_at_zero(entries, None);
    assert_eq!(&code[..5], &[0xE9, 0x80, 0x00, 0x00, 0x00]);
    assert_eq!(code.len(), 5 + 128 + 1);
    assert_eq!(code[133], 0xC3);
  }

  #[test]
  fn internal_conditional_expands_with_condition() {
    let entries = vec![
      internal(0, vec![0x74, 0x7E], 130, Internal::Conditional(0x4)),
      copy(2, vec![0x90; 128]),
      copy(130, vec![0xC3]),
    ];

    let code = emit_at_zero(entries, None);
    assert_eq!(&code[..6], &[0x0F, 0x84, 0x80, 0x00, 0x00, 0x00]);
    assert_eq!(code[134], 0xC3);
  }

  #[test]
  fn internal_loop_cannot_expand() {
    let entries = vec![
      internal(0, vec![0xE2, 0x7E], 130, Internal::Loop),
      copy(2, vec![0x90; 128]),
      copy(130, vec![0xC3]),
    ];

    assert!(matches!(
      relocate(entries, None),
      Err(Error::UnrelocatableInstruction)
    ));
  }

  #[test]
  fn branch_into_instruction_fails() {
    let entries = vec![
      internal(0, vec![0xEB, 0xFF], 1, Internal::Jump),
      copy(2, vec![0x90]),
    ];

    assert!(matches!(
      relocate(entries, None),
      Err(Error::UnrelocatableInstruction)
    ));
  }
}
