use super::Thunkable;
use crate::error::Result;
use generic_array::{ArrayLength, GenericArray};

/// A generator for a segment whose size is known at compile time.
///
/// The type-level size is what lets the layout passes reserve space before
/// an address exists; the closure itself may still fail once the address is
/// known, when an operand turns out not to reach its destination.
pub struct FixedThunk<N: ArrayLength<u8>>(Box<dyn Fn(usize) -> Result<GenericArray<u8, N>>>);

impl<N: ArrayLength<u8>> FixedThunk<N> {
  /// Constructs a new thunk from a generation closure.
  pub fn new<T: Fn(usize) -> Result<GenericArray<u8, N>> + 'static>(callback: T) -> Self {
    FixedThunk(Box::new(callback))
  }
}

impl<N: ArrayLength<u8>> Thunkable for FixedThunk<N> {
  fn generate(&self, address: usize) -> Result<Vec<u8>> {
    self.0(address).map(|code| code.to_vec())
  }

  fn len(&self) -> usize {
    N::to_usize()
  }
}

/// A generator for a segment sized at runtime.
pub struct UnsafeThunk {
  callback: Box<dyn Fn(usize) -> Result<Vec<u8>>>,
  size: usize,
}

/// Unsafe since the closure must produce exactly the declared size; the
/// emitter only checks the match in debug builds.
impl UnsafeThunk {
  /// Constructs a new dynamic thunk from a closure.
  pub unsafe fn new<T: Fn(usize) -> Result<Vec<u8>> + 'static>(callback: T, size: usize) -> Self {
    UnsafeThunk {
      callback: Box::new(callback),
      size,
    }
  }
}

impl Thunkable for UnsafeThunk {
  fn generate(&self, address: usize) -> Result<Vec<u8>> {
    (self.callback)(address)
  }

  fn len(&self) -> usize {
    self.size
  }
}
