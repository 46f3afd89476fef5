use crate::error::{Error, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

mod proximity;
mod search;

/// A thread-safe memory pool for allocating chunks close to addresses.
pub struct ThreadAllocator(Arc<Mutex<proximity::ProximityAllocator>>);

impl ThreadAllocator {
  /// Creates a new proximity memory allocator.
  pub fn new(max_distance: usize) -> Self {
    ThreadAllocator(Arc::new(Mutex::new(proximity::ProximityAllocator {
      max_distance,
      pools: Vec::new(),
    })))
  }

  /// Allocates read-, write- & executable memory close to `origin`.
  pub fn allocate(&self, origin: *const (), size: usize) -> Result<ExecutableMemory> {
    let mut allocator = self.0.lock().unwrap();
    allocator.allocate(origin, size).map(|data| ExecutableMemory {
      inner: ExecutableMemoryInner::Pooled {
        allocator: self.0.clone(),
        data,
      },
    })
  }

  /// Allocates read-, write- & executable memory with no locality constraint.
  ///
  /// The block is backed by a dedicated mapping, so its pages can be
  /// re-protected without affecting neighbouring allocations.
  pub fn allocate_any(&self, size: usize) -> Result<ExecutableMemory> {
    let map = mmap::MemoryMap::new(
      size,
      &[
        mmap::MapOption::MapReadable,
        mmap::MapOption::MapWritable,
        mmap::MapOption::MapExecutable,
      ],
    )
    .map_err(|_| Error::OutOfMemory)?;

    Ok(ExecutableMemory {
      inner: ExecutableMemoryInner::Mapped(proximity::SliceableMemoryMap(map)),
    })
  }
}

/// A handle for allocated executable memory.
pub struct ExecutableMemory {
  inner: ExecutableMemoryInner,
}

enum ExecutableMemoryInner {
  /// A slice inside a shared proximity pool.
  Pooled {
    allocator: Arc<Mutex<proximity::ProximityAllocator>>,
    data: proximity::Allocation,
  },
  /// A dedicated anonymous mapping.
  Mapped(proximity::SliceableMemoryMap),
}

impl Drop for ExecutableMemory {
  fn drop(&mut self) {
    // Release the associated memory map (if unique)
    if let ExecutableMemoryInner::Pooled { allocator, data } = &self.inner {
      allocator.lock().unwrap().release(data);
    }
  }
}

impl Deref for ExecutableMemory {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    match &self.inner {
      ExecutableMemoryInner::Pooled { data, .. } => data.deref(),
      ExecutableMemoryInner::Mapped(map) => map.as_slice(),
    }
  }
}

impl DerefMut for ExecutableMemory {
  fn deref_mut(&mut self) -> &mut [u8] {
    match &mut self.inner {
      ExecutableMemoryInner::Pooled { data, .. } => data.deref_mut(),
      ExecutableMemoryInner::Mapped(map) => map.as_mut_slice(),
    }
  }
}
