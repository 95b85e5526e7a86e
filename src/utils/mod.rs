pub(crate) mod async_task;
pub mod bimap;
pub mod coalescing_timer;
pub(crate) mod time;

pub use bimap::*;
pub use coalescing_timer::*;
