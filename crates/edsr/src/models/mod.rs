//! # Complete Model Families

pub mod edsr;
