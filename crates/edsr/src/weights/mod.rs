//! # Named Weights
//!
//! * [`checkpoint`] - name-addressed parameter mappings, and their on-disk forms.
//! * [`importer`] - partial-match weight import.
//! * [`named`] - name-addressed parameter access for modules.

pub mod checkpoint;
pub mod importer;
pub mod named;
