use super::Thunkable;
use crate::error::Result;

/// An assembler for sequences of position independent segments.
///
/// Segments are appended while planning; nothing is generated until the
/// final address is known, at which point [emit](Self::emit) resolves every
/// segment against the cursor it will occupy.
pub struct CodeEmitter {
  thunks: Vec<Box<dyn Thunkable>>,
}

impl CodeEmitter {
  /// Constructs a new code emitter.
  pub fn new() -> Self {
    CodeEmitter { thunks: Vec::new() }
  }

  /// Generates code for use at the specified address.
  ///
  /// Fails when a segment cannot reach its destination from the cursor it
  /// was assigned; the caller is expected to abandon the emission without
  /// having touched any target memory.
  pub fn emit(&self, base: *const ()) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(self.len());
    let mut cursor = base as usize;

    for thunk in &self.thunks {
      let code = thunk.generate(cursor)?;
      debug_assert_eq!(code.len(), thunk.len());

      // Advance the cursor past the segment
      cursor += thunk.len();
      result.extend(code);
    }

    Ok(result)
  }

  /// Adds a code segment.
  pub fn add_thunk(&mut self, thunk: Box<dyn Thunkable>) {
    self.thunks.push(thunk);
  }

  /// Returns the total size of all code segments.
  pub fn len(&self) -> usize {
    self.thunks.iter().map(|thunk| thunk.len()).sum()
  }
}
