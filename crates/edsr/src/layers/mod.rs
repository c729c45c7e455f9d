//! Common low-level modules for building EDSR networks in Burn.
pub mod activation;
pub mod conv;
pub mod mean_shift;
pub mod pixel_shuffle;
