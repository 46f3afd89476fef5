//! Instance-owning façades over the swap engine.
//!
//! Both wrappers install in their constructor and uninstall on drop; they
//! differ only in how the hooked instance is retained.

use super::{VFuncMap, VTableSwap};
use crate::error::Result;
use crate::Function;
use std::sync::Arc;

/// A swap hook sharing ownership of its instance.
///
/// The instance cannot be destroyed before the hook, since the hook keeps a
/// reference of its own for as long as it is installed.
pub struct SharedVTableSwap<T> {
  hook: VTableSwap,
  #[allow(dead_code)]
  instance: Arc<T>,
}

impl<T> SharedVTableSwap<T> {
  /// Installs a swap hook on a shared instance.
  pub unsafe fn new(instance: Arc<T>, redirects: &VFuncMap) -> Result<Self> {
    let hook = VTableSwap::new(Arc::as_ptr(&instance) as *mut (), redirects)?;
    hook.enable()?;
    Ok(SharedVTableSwap { hook, instance })
  }

  /// Returns the original function of a redirected slot.
  pub unsafe fn original<F: Function>(&self, index: u16) -> Result<F> {
    self.hook.original(index)
  }
}

/// Reference counting as exposed by COM-like objects.
pub unsafe trait RefCounted {
  unsafe fn add_ref(&self);
  unsafe fn release(&self);
}

/// A swap hook retaining its instance through reference counting.
///
/// One reference is acquired on install and released after uninstall.
pub struct RefCountedVTableSwap<T: RefCounted> {
  hook: VTableSwap,
  instance: *const T,
}

impl<T: RefCounted> RefCountedVTableSwap<T> {
  /// Acquires a reference to the instance and installs the swap hook.
  pub unsafe fn new(instance: *const T, redirects: &VFuncMap) -> Result<Self> {
    let hook = VTableSwap::new(instance as *mut (), redirects)?;

    (*instance).add_ref();
    if let Err(error) = hook.enable() {
      (*instance).release();
      return Err(error);
    }

    Ok(RefCountedVTableSwap { hook, instance })
  }

  /// Returns the original function of a redirected slot.
  pub unsafe fn original<F: Function>(&self, index: u16) -> Result<F> {
    self.hook.original(index)
  }
}

impl<T: RefCounted> Drop for RefCountedVTableSwap<T> {
  /// Uninstalls the hook before the reference is released.
  fn drop(&mut self) {
    unsafe {
      if let Err(error) = self.hook.disable() {
        log::warn!("failed to restore {:p} during drop: {}", self.instance, error);
      }
      (*self.instance).release();
    }
  }
}
