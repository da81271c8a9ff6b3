//! Trip State Machine - validates and applies moves on the unit and cargo tracks

mod machine;
mod transitions;

pub use machine::*;
pub use transitions::*;
