//! Process-wide registry of claimed hook targets.
//!
//! Every installed hook claims its target address (or instance address, for
//! table swaps) here before touching memory, so two hooks can never fight
//! over the same prolog. Claims are released on uninstall, which makes
//! re-hooking a previously restored target legal.

use crate::error::{Error, Result};
use lazy_static::lazy_static;
use std::sync::Mutex;

lazy_static! {
  /// Claimed target addresses in installation order.
  static ref CLAIMS: Mutex<Vec<usize>> = Mutex::new(Vec::new());
}

/// Claims an address on behalf of a hook being installed.
pub(crate) fn claim(address: *const ()) -> Result<()> {
  let mut claims = CLAIMS.lock().unwrap();
  if claims.contains(&(address as usize)) {
    return Err(Error::AlreadyHooked);
  }

  claims.push(address as usize);
  Ok(())
}

/// Releases a previously claimed address.
pub(crate) fn release(address: *const ()) {
  let mut claims = CLAIMS.lock().unwrap();
  if let Some(index) = claims.iter().position(|&claim| claim == address as usize) {
    claims.remove(index);
  }
}

/// Returns whether an address is currently claimed by an installed hook.
pub fn is_claimed(address: *const ()) -> bool {
  CLAIMS.lock().unwrap().contains(&(address as usize))
}

/// Returns all claimed addresses, most recently installed first.
///
/// This is the order a teardown pass should uninstall in.
pub fn targets() -> Vec<usize> {
  let claims = CLAIMS.lock().unwrap();
  claims.iter().rev().copied().collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn claims_are_unique_and_ordered() {
    let first = 0x1000 as *const ();
    let second = 0x2000 as *const ();

    claim(first).unwrap();
    claim(second).unwrap();
    assert_matches!(claim(first), Err(Error::AlreadyHooked));

    assert!(is_claimed(first));
    let targets = targets();
    let first_pos = targets.iter().position(|&t| t == first as usize).unwrap();
    let second_pos = targets.iter().position(|&t| t == second as usize).unwrap();
    assert!(second_pos < first_pos);

    release(first);
    release(second);
    release(second);
    assert!(!is_claimed(first));
    assert!(!is_claimed(second));
  }
}
