//! Inline detours installed on real compiled functions. Each target reads
//! one argument volatilely so the compiler cannot fold the calls away.

use std::mem;

type FnGeometry = extern "C" fn(i32, i32) -> i32;

#[inline(never)]
extern "C" fn perimeter_detour(width: i32, height: i32) -> i32 {
  unsafe { (std::ptr::read_volatile(&width as *const i32) + height) * 2 }
}

mod raw {
  use super::*;
  use divert::RawDetour;

  #[test]
  fn redirects_and_forwards() {
    #[inline(never)]
    extern "C" fn area(width: i32, height: i32) -> i32 {
      unsafe { std::ptr::read_volatile(&width as *const i32) * height }
    }

    unsafe {
      let hook = RawDetour::new(area as *const (), perimeter_detour as *const ())
        .expect("target or detour is not usable for hooking");

      assert_eq!(area(6, 4), 24);
      assert_eq!(hook.is_enabled(), false);

      hook.enable().unwrap();
      {
        assert!(hook.is_enabled());

        // The displaced prolog is still callable through the trampoline
        let original: FnGeometry = mem::transmute(hook.trampoline());
        assert_eq!(original(6, 4), 24);

        // ... while direct calls land in the detour
        assert_eq!(area(6, 4), 20);
      }
      hook.disable().unwrap();

      // With the hook disabled, the function is restored
      assert_eq!(hook.is_enabled(), false);
      assert_eq!(area(6, 4), 24);
    }
  }
}

mod generic {
  use super::*;
  use divert::GenericDetour;

  #[test]
  fn call_reaches_the_original() {
    #[inline(never)]
    extern "C" fn scaled(value: i32, factor: i32) -> i32 {
      unsafe { std::ptr::read_volatile(&value as *const i32) * factor + 1 }
    }

    #[inline(never)]
    extern "C" fn shifted(value: i32, factor: i32) -> i32 {
      unsafe { std::ptr::read_volatile(&value as *const i32) + factor }
    }

    unsafe {
      let hook = GenericDetour::<FnGeometry>::new(scaled, shifted)
        .expect("target or detour is not usable for hooking");

      assert_eq!(scaled(5, 3), 16);
      assert_eq!(hook.call(5, 3), 16);

      hook.enable().unwrap();
      {
        assert_eq!(hook.call(5, 3), 16);
        assert_eq!(scaled(5, 3), 8);
      }
      hook.disable().unwrap();

      assert_eq!(hook.call(5, 3), 16);
      assert_eq!(scaled(5, 3), 16);
    }
  }
}

mod registry {
  use super::*;
  use divert::RawDetour;

  #[test]
  fn claims_follow_the_hook() {
    #[inline(never)]
    extern "C" fn stride(index: i32, pitch: i32) -> i32 {
      unsafe { std::ptr::read_volatile(&index as *const i32) * pitch + pitch }
    }

    unsafe {
      let hook = RawDetour::new(stride as *const (), perimeter_detour as *const ()).unwrap();
      assert!(!divert::registry::is_claimed(hook.target()));

      hook.enable().unwrap();
      assert!(divert::registry::is_claimed(hook.target()));
      assert!(divert::registry::targets().contains(&(hook.target() as usize)));

      hook.disable().unwrap();
      assert!(!divert::registry::is_claimed(hook.target()));
    }
  }
}
