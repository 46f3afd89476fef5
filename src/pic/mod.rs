//! Position independent code assembly.
//!
//! Every run-time generated artifact (trampolines, relays, marshalling
//! stubs) is described as a sequence of [Thunkable] segments. A segment is
//! either a fixed byte string, or is generated against the address it ends
//! up at, which is how source relative operands get resolved. Generation is
//! fallible: a segment whose operand cannot span the distance to its
//! destination reports [Unreachable](crate::Error::Unreachable) instead of
//! emitting a jump that lands short.

pub use self::emitter::CodeEmitter;
pub use self::thunk::{FixedThunk, UnsafeThunk};

use crate::error::Result;

mod emitter;
mod thunk;

/// A code segment generated against its final address.
pub trait Thunkable {
  /// Generates the code for the specified address.
  fn generate(&self, address: usize) -> Result<Vec<u8>>;

  /// Returns the size of a generated segment.
  fn len(&self) -> usize;
}

/// Fixed bytes are position independent by definition.
impl Thunkable for Vec<u8> {
  fn generate(&self, _address: usize) -> Result<Vec<u8>> {
    Ok(self.clone())
  }

  fn len(&self) -> usize {
    self.len()
  }
}
