//! Sliding-window rate limiting logic.

mod clock;
mod limiter;
mod policy;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::Limiter;
pub use policy::{Admission, RatePolicy};
pub use window::RateWindow;
