#![forbid(unsafe_code)]

pub mod cutoff;
pub mod error;
pub mod model;
pub mod ranker;
pub mod scoring;
pub mod sequencer;
pub mod time;

pub use error::Error;
pub use time::{Clock, ClockOffset, elapsed_seconds};
