//! # Misc Utilities

pub mod summary;
