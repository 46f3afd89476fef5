//! Table swap hooks exercised on a hand-built object with a C++-style
//! layout: the first word of the instance points at a table of function
//! pointers, preceded by an RTTI word and followed by a null cell so length
//! discovery has a boundary.

use divert::{
  Error, RefCounted, RefCountedVTableSwap, SharedVTableSwap, VFunc, VFuncMap, VTableSwap,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[repr(C)]
struct Widget {
  vtable: *const usize,
}

unsafe impl Send for Widget {}
unsafe impl Sync for Widget {}

type Destroy = unsafe extern "C" fn(*mut Widget);
type Method1 = unsafe extern "C" fn(*mut Widget, i32) -> i32;
type Method2 = unsafe extern "C" fn(*mut Widget, i32, i32) -> i32;
type Method3 = unsafe extern "C" fn(*mut Widget, i32, i32, i32) -> i32;

unsafe extern "C" fn destroy(_this: *mut Widget) {}

unsafe extern "C" fn method1(_this: *mut Widget, x: i32) -> i32 {
  2 * x
}

unsafe extern "C" fn method2(_this: *mut Widget, x: i32, y: i32) -> i32 {
  x + y
}

unsafe extern "C" fn method3(_this: *mut Widget, x: i32, y: i32, z: i32) -> i32 {
  (x + y) * z
}

/// Builds `[rtti, destroy, method1, method2, method3, null]`; instances
/// point at the `destroy` cell.
fn build_table() -> Box<[usize]> {
  vec![
    0,
    destroy as usize,
    method1 as usize,
    method2 as usize,
    method3 as usize,
    0,
  ]
  .into_boxed_slice()
}

unsafe fn invoke1(object: *mut Widget, slot: usize, x: i32) -> i32 {
  let table = *(object as *const *const usize);
  let func: Method1 = std::mem::transmute(*table.add(slot));
  func(object, x)
}

unsafe fn invoke2(object: *mut Widget, slot: usize, x: i32, y: i32) -> i32 {
  let table = *(object as *const *const usize);
  let func: Method2 = std::mem::transmute(*table.add(slot));
  func(object, x, y)
}

unsafe fn invoke3(object: *mut Widget, slot: usize, x: i32, y: i32, z: i32) -> i32 {
  let table = *(object as *const *const usize);
  let func: Method3 = std::mem::transmute(*table.add(slot));
  func(object, x, y, z)
}

static HOOK: Mutex<Option<SharedVTableSwap<Widget>>> = Mutex::new(None);

unsafe extern "C" fn method1_hook(this: *mut Widget, x: i32) -> i32 {
  let original: Method1 = {
    let guard = HOOK.lock().unwrap();
    guard.as_ref().unwrap().original(1).unwrap()
  };
  original(this, x) + 1
}

unsafe extern "C" fn method2_hook(this: *mut Widget, x: i32, y: i32) -> i32 {
  let original: Method2 = {
    let guard = HOOK.lock().unwrap();
    guard.as_ref().unwrap().original(2).unwrap()
  };
  original(this, x, y) + 2
}

unsafe extern "C" fn method1_fixed(_this: *mut Widget, x: i32) -> i32 {
  x
}

#[test]
fn swap_redirects_and_restores() {
  let table = build_table();
  let widget = Arc::new(Widget {
    vtable: unsafe { table.as_ptr().add(1) },
  });
  let object = Arc::as_ptr(&widget) as *mut Widget;

  unsafe {
    assert_eq!(invoke1(object, 1, 3), 6);
    assert_eq!(invoke2(object, 2, 13, 9), 22);
    assert_eq!(invoke3(object, 3, 5, 11, 7), 112);

    let mut redirects = VFuncMap::new();
    redirects.insert(1, method1_hook as usize);
    redirects.insert(2, method2_hook as usize);

    let hook = SharedVTableSwap::new(widget.clone(), &redirects).unwrap();
    assert_eq!(Arc::strong_count(&widget), 2);
    *HOOK.lock().unwrap() = Some(hook);

    // Redirected slots observe the hooks, which forward to the originals
    assert_eq!(invoke1(object, 1, 3), 7);
    assert_eq!(invoke2(object, 2, 13, 9), 24);

    // Non-redirected slots dispatch to the exact original function
    assert_eq!(invoke3(object, 3, 5, 11, 7), 112);

    *HOOK.lock().unwrap() = None;
    assert_eq!(Arc::strong_count(&widget), 1);

    // Teardown restores the original table
    assert_eq!(invoke1(object, 1, 3), 6);
    assert_eq!(invoke2(object, 2, 13, 9), 22);
    assert_eq!(invoke3(object, 3, 5, 11, 7), 112);
  }
}

#[test]
fn swap_discovers_slot_count() {
  let table = build_table();
  let mut widget = Widget {
    vtable: unsafe { table.as_ptr().add(1) },
  };

  let hook =
    unsafe { VTableSwap::new(&mut widget as *mut Widget as *mut (), &VFuncMap::new()) }.unwrap();
  assert_eq!(hook.slot_count(), 4);
}

#[test]
fn swap_rejects_out_of_range_slot() {
  let table = build_table();
  let mut widget = Widget {
    vtable: unsafe { table.as_ptr().add(1) },
  };

  let mut redirects = VFuncMap::new();
  redirects.insert(9, method1_fixed as usize);

  let error = unsafe { VTableSwap::new(&mut widget as *mut Widget as *mut (), &redirects) }
    .unwrap_err();
  assert!(matches!(error, Error::InvalidSlot));
}

#[test]
fn swap_builder_with_typed_slots() {
  let table = build_table();
  let mut widget = Widget {
    vtable: unsafe { table.as_ptr().add(1) },
  };
  let object = &mut widget as *mut Widget;

  unsafe {
    let hook = VTableSwap::builder(object as *mut ())
      .redirect(VFunc::<Method1>::new(1, method1_fixed))
      .slot_count(4)
      .build()
      .unwrap();

    hook.enable().unwrap();
    assert_eq!(invoke1(object, 1, 3), 3);

    // The snapshotted slot still reaches the unhooked method
    let original: Method1 = hook.original(1).unwrap();
    assert_eq!(original(object, 3), 6);

    // Repeated teardown is a no-op
    hook.disable().unwrap();
    hook.disable().unwrap();
    assert_eq!(invoke1(object, 1, 3), 6);

    assert!(matches!(
      hook.original::<Destroy>(0),
      Err(Error::InvalidSlot)
    ));
  }
}

#[repr(C)]
struct ComWidget {
  vtable: *const usize,
  references: AtomicUsize,
}

unsafe impl RefCounted for ComWidget {
  unsafe fn add_ref(&self) {
    self.references.fetch_add(1, Ordering::SeqCst);
  }

  unsafe fn release(&self) {
    self.references.fetch_sub(1, Ordering::SeqCst);
  }
}

#[test]
fn swap_balances_reference_count() {
  let table = build_table();
  let mut com = ComWidget {
    vtable: unsafe { table.as_ptr().add(1) },
    references: AtomicUsize::new(1),
  };
  let instance = &mut com as *mut ComWidget as *const ComWidget;

  let mut redirects = VFuncMap::new();
  redirects.insert(1, method1_fixed as usize);

  unsafe {
    let hook = RefCountedVTableSwap::new(instance, &redirects).unwrap();
    assert_eq!(com.references.load(Ordering::SeqCst), 2);

    drop(hook);
    assert_eq!(com.references.load(Ordering::SeqCst), 1);

    // Behavior is restored along with the reference
    assert_eq!(invoke1(instance as *mut Widget, 1, 3), 6);
  }
}
