mod clock;
mod sync;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use sync::{ClockSample, ClockSync, ClockUpdate};
