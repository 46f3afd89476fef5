//! Error types and utilities.

use std::error::Error as StdError;
use std::fmt;

/// The result of a hooking operation.
pub type Result<T> = ::std::result::Result<T, Error>;

/// A representation of all possible errors.
#[derive(Debug)]
pub enum Error {
  /// The address for the target and detour are identical
  SameAddress,
  /// The address does not contain valid instructions.
  InvalidCode,
  /// The function prolog is too short for any patch area.
  PrologTooShort,
  /// The prolog contains an instruction that cannot be relocated.
  UnrelocatableInstruction,
  /// The address is not executable memory.
  NotExecutable,
  /// The system is out of executable memory.
  OutOfMemory,
  /// The detour cannot be reached by the redirection jump.
  Unreachable,
  /// The target is already claimed by an installed hook.
  AlreadyHooked,
  /// The slot index lies outside the dispatch table.
  InvalidSlot,
  /// The callback signature cannot be marshalled on this architecture.
  UnsupportedSignature,
  /// A memory operation failed.
  RegionFailure(region::Error),
}

impl StdError for Error {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    if let Error::RegionFailure(error) = self {
      Some(error)
    } else {
      None
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Error::SameAddress => write!(f, "Target and detour address is the same"),
      Error::InvalidCode => write!(f, "Address contains invalid assembly"),
      Error::PrologTooShort => write!(f, "Cannot find an inline patch area"),
      Error::UnrelocatableInstruction => {
        write!(f, "Prolog contains an unrelocatable instruction")
      },
      Error::NotExecutable => write!(f, "Address is not executable"),
      Error::OutOfMemory => write!(f, "Cannot allocate memory"),
      Error::Unreachable => write!(f, "Detour is out of range for a redirection jump"),
      Error::AlreadyHooked => write!(f, "Target is already hooked"),
      Error::InvalidSlot => write!(f, "Slot index is outside the dispatch table"),
      Error::UnsupportedSignature => write!(f, "Signature cannot be marshalled"),
      Error::RegionFailure(ref error) => write!(f, "{}", error),
    }
  }
}

impl From<region::Error> for Error {
  fn from(error: region::Error) -> Self {
    Error::RegionFailure(error)
  }
}
