#![forbid(unsafe_code)]

pub mod access;
pub mod model;
pub mod progression;
pub mod scoring;
pub mod stats;
pub mod time;

pub use time::Clock;
