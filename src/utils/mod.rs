mod seq;
mod slots;

pub use seq::*;
pub use slots::*;
