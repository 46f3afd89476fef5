mod generic;
mod raw;

pub use self::generic::*;
pub use self::raw::*;
