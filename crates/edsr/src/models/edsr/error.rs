//! # EDSR Construction Errors

use crate::weights::checkpoint::CheckpointError;
use crate::weights::importer::WeightImportError;
use thiserror::Error;

/// Errors raised while building an [`super::edsr_model::Edsr`].
#[derive(Debug, Error)]
pub enum EdsrError {
    /// The upsampling scale is neither a power of two, nor 3.
    #[error("Unsupported upsampling scale: {0}; expected a power of 2, or 3")]
    UnsupportedScale(usize),

    /// The checkpoint could not be read.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The checkpoint does not fit the network.
    #[error("Failed to import checkpoint: {0}")]
    Import(#[from] WeightImportError),
}
