use crate::arch::Detour;
use crate::error::Result;

/// A detour without any type safety.
///
/// The target and the detour are plain pointers and the trampoline must be
/// cast by hand, which makes this the building block for prototypes that
/// are only known at runtime. Whenever the signature is known at compile
/// time, [GenericDetour](crate::GenericDetour) enforces it on the target,
/// the detour, and invocations of the original instead.
///
/// # Example
///
/// ```rust
/// # use divert::Result;
/// use divert::RawDetour;
/// use std::mem;
///
/// fn sum(a: i32, b: i32) -> i32 {
///   a + b
/// }
///
/// fn product(a: i32, b: i32) -> i32 {
///   a * b
/// }
///
/// # fn main() -> Result<()> {
/// let hook = unsafe { RawDetour::new(sum as *const (), product as *const ())? };
/// assert_eq!(hook.is_enabled(), false);
///
/// unsafe { hook.enable()? };
/// assert_eq!(sum(3, 4), 12);
///
/// // The displaced prolog remains reachable through the trampoline
/// let original: fn(i32, i32) -> i32 = unsafe { mem::transmute(hook.trampoline()) };
/// assert_eq!(original(3, 4), 7);
///
/// unsafe { hook.disable()? };
/// assert_eq!(sum(3, 4), 7);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RawDetour(Detour);

impl RawDetour {
  /// Constructs a new detour for an untyped target.
  ///
  /// The hook starts out disabled, with all fallible work (prolog
  /// analysis, relocation, allocation) done up front, so enabling it only
  /// writes the redirection jump. The caller must ensure both pointers
  /// designate real function entries, and that no other thread executes
  /// within the target's prolog while the hook is toggled. A target the
  /// compiler inlined cannot be redirected at runtime.
  pub unsafe fn new(target: *const (), detour: *const ()) -> Result<Self> {
    Detour::new(target, detour).map(RawDetour)
  }

  /// Enables the detour.
  pub unsafe fn enable(&self) -> Result<()> {
    self.0.enable()
  }

  /// Disables the detour.
  pub unsafe fn disable(&self) -> Result<()> {
    self.0.disable()
  }

  /// Returns whether the detour is enabled or not.
  pub fn is_enabled(&self) -> bool {
    self.0.is_enabled()
  }

  /// Returns the address of the hooked target.
  pub fn target(&self) -> *const () {
    self.0.target()
  }

  /// Returns a reference to the trampoline holding the displaced prolog.
  pub fn trampoline(&self) -> &() {
    self.0.trampoline()
  }
}
