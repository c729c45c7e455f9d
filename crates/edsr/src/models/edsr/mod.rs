//! # EDSR - Enhanced Deep Super-Resolution
//!
//! ```text
//! x -> [sub_mean] -> head -> body (+ long skip) -> [tail] -> [add_mean]
//! ```
//!
//! * [`res_block`] - the body's residual blocks.
//! * [`upsampler`] - sub-pixel convolution upsampling.
//! * [`edsr_model`] - the complete network, and checkpoint import.
//! * [`prefabs`] - the named ``baseline`` and ``large`` builders.

pub mod edsr_model;
pub mod error;
pub mod prefabs;
pub mod res_block;
pub mod upsampler;
