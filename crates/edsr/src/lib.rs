#![warn(missing_docs)]
//!# edsr - Burn EDSR Super-Resolution Encoder
//!
//! ## Notable Components
//!
//! * [`cache`] - weight loading cache.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::activation::Activation`] - activation layer abstraction wrapper.
//!   * [`layers::conv::default_conv`] - same-padding convolution factory.
//!   * [`layers::pixel_shuffle::PixelShuffle`] - sub-pixel channel to space rearrangement.
//!   * [`layers::mean_shift::MeanShift`] - frozen color mean normalization.
//! * [`models`] - complete model families.
//!   * [`models::edsr`] - `EDSR`
//!     * [`models::edsr::edsr_model::Edsr`] - the network.
//!     * [`models::edsr::prefabs`] - ``edsr-baseline`` and ``edsr-large``.
//! * [`weights`] - checkpoint loading, and partial-match weight import.
//! * [`utility`] - parameter summaries.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod testing;

pub mod layers;

pub mod cache;
pub mod models;
pub mod utility;
pub mod weights;
