mod constants;
mod event_bus;
mod executor;
pub(crate) mod util;

pub use constants::*;
pub use event_bus::*;
pub use executor::*;
pub use util::*;
