//! Domain models for dispatches and trips

mod actor;
mod dispatch;
mod state;
mod trip;
mod trip_log;

pub use actor::*;
pub use dispatch::*;
pub use state::*;
pub use trip::*;
pub use trip_log::*;
