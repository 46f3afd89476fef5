//! Dispatch-table (vtable) swap hooks.
//!
//! Instead of patching function prologs, these hooks replace an object's
//! virtual-table pointer with a clone whose selected slots have been
//! redirected. Methods invoked through the object dispatch to the
//! replacements, while every other slot keeps pointing at the original
//! implementation. The swap is a single aligned pointer store, so callers in
//! flight observe either the old or the new table, never a mixture.

pub use self::wrappers::{RefCounted, RefCountedVTableSwap, SharedVTableSwap};

use crate::error::{Error, Result};
use crate::{os, registry, util, Function};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{fmt, mem};

mod wrappers;

/// Map from slot index to function address.
pub type VFuncMap = BTreeMap<u16, usize>;

/// The ceiling for table length discovery.
const MAX_SLOTS: u16 = 512;

/// A typed slot descriptor; the slot index paired with its replacement.
///
/// The function type doubles as the signature tag used when invoking the
/// original slot through [VTableSwap::original].
pub struct VFunc<T: Function> {
  pub index: u16,
  pub replacement: T,
}

impl<T: Function> VFunc<T> {
  pub fn new(index: u16, replacement: T) -> Self {
    VFunc { index, replacement }
  }
}

/// Implementation of a dispatch-table swap hook.
pub struct VTableSwap {
  object: *mut (),
  original: *const usize,
  table: Box<[usize]>,
  originals: VFuncMap,
  slot_count: u16,
  enabled: AtomicBool,
}

impl VTableSwap {
  /// Constructs a new swap hook for an object, discovering the table length.
  ///
  /// Discovery walks the original table until a cell no longer points into
  /// executable memory, bounded to 512 slots. Objects with unusual table
  /// layouts should use [with_slot_count](Self::with_slot_count) instead.
  pub unsafe fn new(object: *mut (), redirects: &VFuncMap) -> Result<Self> {
    Self::with_table(object, redirects, None)
  }

  /// Constructs a new swap hook with an explicit slot count.
  pub unsafe fn with_slot_count(
    object: *mut (),
    redirects: &VFuncMap,
    slot_count: u16,
  ) -> Result<Self> {
    Self::with_table(object, redirects, Some(slot_count))
  }

  /// Returns a builder collecting typed slot redirections.
  pub fn builder(object: *mut ()) -> VTableSwapBuilder {
    VTableSwapBuilder {
      object,
      redirects: VFuncMap::new(),
      slot_count: None,
    }
  }

  unsafe fn with_table(
    object: *mut (),
    redirects: &VFuncMap,
    slot_count: Option<u16>,
  ) -> Result<Self> {
    let original = *(object as *const *const usize);

    let slot_count = match slot_count {
      Some(count) => count,
      None => Self::count_slots(original),
    };

    // The map is ordered, so the last key is the largest
    if let Some(&index) = redirects.keys().next_back() {
      if index >= slot_count {
        Err(Error::InvalidSlot)?;
      }
    }

    // Clone the table with one leading cell mirroring the word before the
    // original table (the RTTI pointer on ABIs that place it at offset -1).
    let mut table = vec![0usize; slot_count as usize + 1].into_boxed_slice();
    table[0] = original.offset(-1).read();
    for slot in 0..slot_count as usize {
      table[slot + 1] = original.add(slot).read();
    }

    // Snapshot the redirected slots before overwriting them
    let mut originals = VFuncMap::new();
    for (&index, &replacement) in redirects {
      originals.insert(index, table[index as usize + 1]);
      table[index as usize + 1] = replacement;
    }

    Ok(VTableSwap {
      object,
      original,
      table,
      originals,
      slot_count,
      enabled: AtomicBool::default(),
    })
  }

  /// Enables the hook by swapping in the cloned table.
  pub unsafe fn enable(&self) -> Result<()> {
    self.toggle(true)
  }

  /// Disables the hook by restoring the original table.
  pub unsafe fn disable(&self) -> Result<()> {
    self.toggle(false)
  }

  /// Returns whether the hook is enabled or not.
  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::SeqCst)
  }

  /// Returns the number of slots in the table.
  pub fn slot_count(&self) -> u16 {
    self.slot_count
  }

  /// Returns the snapshotted addresses of all redirected slots.
  pub fn originals(&self) -> &VFuncMap {
    &self.originals
  }

  /// Returns the original function of a redirected slot.
  ///
  /// The returned callable takes the instance pointer as its explicit first
  /// argument.
  pub unsafe fn original<T: Function>(&self, index: u16) -> Result<T> {
    self
      .originals
      .get(&index)
      .map(|&address| T::from_ptr(address as *const ()))
      .ok_or(Error::InvalidSlot)
  }

  /// Walks the table until a cell no longer points at executable memory.
  unsafe fn count_slots(table: *const usize) -> u16 {
    let mut count = 0;
    while count < MAX_SLOTS {
      let entry = table.add(count as usize).read();
      if !util::is_executable_address(entry as *const ()).unwrap_or(false) {
        break;
      }
      count += 1;
    }
    count
  }

  /// Enables or disables the hook.
  unsafe fn toggle(&self, enabled: bool) -> Result<()> {
    if self.enabled.load(Ordering::SeqCst) == enabled {
      return Ok(());
    }

    if enabled {
      registry::claim(self.object as *const ())?;
    }

    let pointer = if enabled {
      self.table.as_ptr().add(1)
    } else {
      self.original
    };

    // The table pointer is normally in read-only memory
    let result = os::with_protection(
      self.object as *const (),
      mem::size_of::<usize>(),
      region::Protection::READ_WRITE,
      || {
        // An aligned word store; concurrent callers observe either table
        (*(self.object as *const AtomicUsize)).store(pointer as usize, Ordering::SeqCst);
      },
    );

    if let Err(error) = result {
      if enabled {
        registry::release(self.object as *const ());
      }
      return Err(error);
    }

    if !enabled {
      registry::release(self.object as *const ());
    }

    self.enabled.store(enabled, Ordering::SeqCst);
    log::debug!(
      "{} table swap at {:p}",
      if enabled { "enabled" } else { "disabled" },
      self.object
    );
    Ok(())
  }
}

impl Drop for VTableSwap {
  /// Disables the hook, if enabled.
  fn drop(&mut self) {
    if let Err(error) = unsafe { self.disable() } {
      log::warn!("failed to restore {:p} during drop: {}", self.object, error);
    }
  }
}

impl fmt::Debug for VTableSwap {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(
      f,
      "VTableSwap {{ enabled: {}, slots: {} }}",
      self.is_enabled(),
      self.slot_count
    )
  }
}

unsafe impl Send for VTableSwap {}
unsafe impl Sync for VTableSwap {}

/// A builder collecting typed slot redirections for a swap hook.
pub struct VTableSwapBuilder {
  object: *mut (),
  redirects: VFuncMap,
  slot_count: Option<u16>,
}

impl VTableSwapBuilder {
  /// Adds a slot redirection. Construction order is irrelevant since the
  /// redirections are keyed by index.
  pub fn redirect<T: Function>(mut self, slot: VFunc<T>) -> Self {
    self
      .redirects
      .insert(slot.index, slot.replacement.to_ptr() as usize);
    self
  }

  /// Overrides the discovered slot count.
  pub fn slot_count(mut self, count: u16) -> Self {
    self.slot_count = Some(count);
    self
  }

  /// Builds the swap hook. The hook is disabled by default.
  pub unsafe fn build(self) -> Result<VTableSwap> {
    VTableSwap::with_table(self.object, &self.redirects, self.slot_count)
  }
}
