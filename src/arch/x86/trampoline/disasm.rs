//! A thin decoding layer over udis86.
//!
//! The relocation pass does not need full operand decoding; per instruction
//! it consumes the length, a [Category] describing how (or whether) the
//! bytes depend on their own address, and the branch family needed to pick
//! a replacement encoding. The bindings never leak past this module.

use std::slice;

/// How an instruction relates to its own address.
pub enum Category {
  /// No position dependent operands; the bytes relocate as they are.
  Ordinary,
  /// A branch with a source relative immediate, carrying its displacement.
  RelativeBranch(isize),
  /// A memory operand addressed relative to the instruction pointer.
  RipRelative(isize),
  /// A branch through a register or memory operand.
  IndirectBranch,
  /// An instruction that faults outside ring zero.
  Privileged,
  /// A return.
  Return,
}

/// A x86/x64 disassembler.
pub struct Disassembler(udis::ud);

impl Disassembler {
  /// Creates a default x86 disassembler for the host word size.
  pub fn new(target: *const ()) -> Disassembler {
    unsafe {
      let mut ud = ::std::mem::zeroed();
      udis::ud_init(&mut ud);
      udis::ud_set_user_opaque_data(&mut ud, target as *mut _);
      udis::ud_set_input_hook(&mut ud, Some(Self::udis_read_address));
      udis::ud_set_mode(&mut ud, (::std::mem::size_of::<usize>() * 8) as u8);
      Disassembler(ud)
    }
  }

  /// Reads one byte from a pointer and advances it.
  unsafe extern "C" fn udis_read_address(ud: *mut udis::ud) -> libc::c_int {
    let pointer = udis::ud_get_user_opaque_data(ud) as *mut u8;
    let result = *pointer;
    udis::ud_set_user_opaque_data(ud, pointer.offset(1) as *mut _);
    libc::c_int::from(result)
  }
}

/// One decoded instruction and the facts the relocator asks of it.
pub struct Instruction {
  address: usize,
  mnemonic: udis::ud_mnemonic_code,
  operands: Vec<udis::ud_operand>,
  bytes: &'static [u8],
}

impl Instruction {
  /// Disassembles a new instruction at the specified address.
  pub unsafe fn new(disasm: &mut Disassembler, address: *const ()) -> Option<Self> {
    let instruction_bytes = udis::ud_disassemble(&mut disasm.0) as usize;
    if instruction_bytes > 0 {
      Some(Instruction {
        address: address as usize,
        mnemonic: udis::ud_insn_mnemonic(&disasm.0),
        operands: disasm.0.operand.to_vec(),
        bytes: slice::from_raw_parts(address as *const _, instruction_bytes),
      })
    } else {
      None
    }
  }

  /// Classifies the instruction for relocation.
  ///
  /// Branches through registers or memory are reported as indirect even
  /// when a verbatim copy would happen to behave (e.g `jmp rax`); vetting
  /// them uniformly beats special-casing the benign forms.
  pub fn category(&self) -> Category {
    if self.is_privileged() {
      Category::Privileged
    } else if self.is_indirect_branch() {
      Category::IndirectBranch
    } else if let Some(displacement) = self.relative_branch_displacement() {
      Category::RelativeBranch(displacement)
    } else if let Some(displacement) = self.rip_operand_displacement() {
      Category::RipRelative(displacement)
    } else if self.mnemonic == udis::ud_mnemonic_code::UD_Iret {
      Category::Return
    } else {
      Category::Ordinary
    }
  }

  /// Returns the instruction's address.
  pub fn address(&self) -> usize {
    self.address
  }

  /// Returns the next instruction's address.
  pub fn next_instruction_address(&self) -> usize {
    self.address() + self.len()
  }

  /// Returns true if this instruction is any type of a loop.
  pub fn is_loop(&self) -> bool {
    match self.mnemonic {
      udis::ud_mnemonic_code::UD_Iloop
      | udis::ud_mnemonic_code::UD_Iloope
      | udis::ud_mnemonic_code::UD_Iloopne
      | udis::ud_mnemonic_code::UD_Ijecxz
      | udis::ud_mnemonic_code::UD_Ijcxz => true,
      _ => false,
    }
  }

  /// Returns true if this instruction is an unconditional jump.
  pub fn is_unconditional_jump(&self) -> bool {
    self.mnemonic == udis::ud_mnemonic_code::UD_Ijmp
  }

  /// Returns true if this instruction is a function call.
  pub fn is_call(&self) -> bool {
    self.mnemonic == udis::ud_mnemonic_code::UD_Icall
  }

  /// Returns the instruction's bytes.
  pub unsafe fn as_slice(&self) -> &[u8] {
    self.bytes
  }

  /// Returns the size of the instruction in bytes.
  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  /// The displacement of a branch with an immediate operand.
  fn relative_branch_displacement(&self) -> Option<isize> {
    unsafe {
      self
        .operands
        .iter()
        .find(|op| op.otype == udis::ud_type::UD_OP_JIMM)
        .map(|op| match op.size {
          8 => op.lval.sbyte as isize,
          32 => op.lval.sdword as isize,
          _ => unreachable!("Operand size: {}", op.size),
        })
    }
  }

  /// The displacement of an instruction pointer relative memory operand
  /// (e.g `mov eax, [rip+0x10]` ⟶ 0x10).
  fn rip_operand_displacement(&self) -> Option<isize> {
    unsafe {
      self
        .operands
        .iter()
        .find(|op| op.otype == udis::ud_type::UD_OP_MEM && op.base == udis::ud_type::UD_R_RIP)
        .map(|op| op.lval.sdword as isize)
    }
  }

  /// A call or jump without an immediate operand branches through a
  /// register or memory cell.
  fn is_indirect_branch(&self) -> bool {
    (self.is_call() || self.is_unconditional_jump())
      && self.relative_branch_displacement().is_none()
  }

  /// The handful of instructions that cannot execute in user mode; finding
  /// one in a prolog means the address is not a hookable function.
  fn is_privileged(&self) -> bool {
    use udis::ud_mnemonic_code::*;
    match self.mnemonic {
      UD_Ihlt | UD_Icli | UD_Isti | UD_Iin | UD_Iout | UD_Irdmsr | UD_Iwrmsr | UD_Iinvd
      | UD_Iwbinvd | UD_Iinvlpg | UD_Ilgdt | UD_Ilidt | UD_Illdt | UD_Iltr | UD_Iiretw
      | UD_Iiretd | UD_Iiretq => true,
      _ => false,
    }
  }
}
