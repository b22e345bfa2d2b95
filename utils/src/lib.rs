//! Concurrency building blocks shared by the latch crates.

pub mod collections;
pub mod concurrent;
pub mod timing;
