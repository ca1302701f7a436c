//! Change triggers for continuous mode
//!
//! - PollingTrigger: revision sampling on a timer (the daemon's default)
//! - StreamTrigger: wakes on items of a notification stream

mod poll;
mod stream;

pub use poll::PollingTrigger;
pub use stream::StreamTrigger;
