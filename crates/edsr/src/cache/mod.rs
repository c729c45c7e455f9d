//! # Checkpoint Cache
//!
//! * [`disk`] - where cached checkpoints live.
//! * [`weights`] - published checkpoint tables.

pub mod disk;
pub mod weights;
