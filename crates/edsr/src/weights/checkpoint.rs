//! # Checkpoints
//!
//! A [`Checkpoint`] is an opaque mapping from hierarchical parameter name
//! (``stage.sub_stage.index.kind``) to tensor data.
//!
//! Checkpoints are read from disk through ``candle-core``:
//! * ``.safetensors`` files,
//! * ``torch`` zip pickles (``.pt``, ``.pth``, ``.bin``).
//!
//! All tensors are converted to ``f32`` on load.

use burn::tensor::TensorData;
use candle_core::{DType, Device};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Mapping from parameter name to tensor data.
pub type ParameterMap = BTreeMap<String, TensorData>;

/// Checkpoint loading and saving errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint path does not exist.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The checkpoint extension is not a known format.
    #[error("Unsupported checkpoint format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// The checkpoint exists, but could not be read.
    #[error("Error reading checkpoint {}: {source}", .path.display())]
    Read {
        /// The checkpoint path.
        path: PathBuf,
        /// The reader error.
        #[source]
        source: candle_core::Error,
    },

    /// The checkpoint could not be written.
    #[error("Error writing checkpoint {}: {source}", .path.display())]
    Write {
        /// The checkpoint path.
        path: PathBuf,
        /// The writer error.
        #[source]
        source: candle_core::Error,
    },

    /// A tensor could not be converted.
    #[error("Invalid tensor data for \"{key}\": {message}")]
    Data {
        /// The parameter name.
        key: String,
        /// Description of the conversion failure.
        message: String,
    },
}

/// Known on-disk checkpoint formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// ``.safetensors``
    SafeTensors,

    /// ``torch.save`` zip pickle.
    PyTorch,
}

impl CheckpointFormat {
    /// Select a format from a path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("safetensors") => Some(Self::SafeTensors),
            Some("pt") | Some("pth") | Some("bin") => Some(Self::PyTorch),
            _ => None,
        }
    }
}

/// A name-addressed set of weights.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    params: ParameterMap,
}

impl From<ParameterMap> for Checkpoint {
    fn from(params: ParameterMap) -> Self {
        Self { params }
    }
}

impl Checkpoint {
    /// Build a checkpoint from a parameter mapping.
    pub fn new(params: ParameterMap) -> Self {
        params.into()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Is the checkpoint empty?
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Lookup an entry.
    pub fn get(
        &self,
        key: &str,
    ) -> Option<&TensorData> {
        self.params.get(key)
    }

    /// Does the checkpoint contain `key`?
    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.params.contains_key(key)
    }

    /// Iterate over entry names, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Insert (or replace) an entry.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        data: TensorData,
    ) -> Option<TensorData> {
        self.params.insert(key.into(), data)
    }

    /// Remove an entry.
    pub fn remove(
        &mut self,
        key: &str,
    ) -> Option<TensorData> {
        self.params.remove(key)
    }

    /// Load a checkpoint from disk.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::NotFound`] if the path does not exist.
    /// - [`CheckpointError::UnsupportedFormat`] for unknown extensions.
    /// - [`CheckpointError::Read`] / [`CheckpointError::Data`] for unreadable content.
    #[tracing::instrument]
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let format = CheckpointFormat::from_path(path)
            .ok_or_else(|| CheckpointError::UnsupportedFormat(path.to_path_buf()))?;

        let read_error = |source| CheckpointError::Read {
            path: path.to_path_buf(),
            source,
        };

        let tensors: Vec<(String, candle_core::Tensor)> = match format {
            CheckpointFormat::SafeTensors => candle_core::safetensors::load(path, &Device::Cpu)
                .map_err(read_error)?
                .into_iter()
                .collect(),
            CheckpointFormat::PyTorch => candle_core::pickle::read_all(path).map_err(read_error)?,
        };

        let params = tensors
            .into_iter()
            .map(|(key, tensor)| {
                let data = candle_to_tensor_data(&tensor).map_err(read_error)?;
                Ok((key, data))
            })
            .collect::<Result<ParameterMap, CheckpointError>>()?;

        tracing::debug!(entries = params.len(), "read checkpoint");

        Ok(params.into())
    }

    /// Write the checkpoint as a ``.safetensors`` file.
    pub fn save_safetensors(
        &self,
        path: &Path,
    ) -> Result<(), CheckpointError> {
        let write_error = |source| CheckpointError::Write {
            path: path.to_path_buf(),
            source,
        };

        let tensors = self
            .params
            .iter()
            .map(|(key, data)| {
                let values = data
                    .clone()
                    .convert::<f32>()
                    .into_vec::<f32>()
                    .map_err(|err| CheckpointError::Data {
                        key: key.clone(),
                        message: format!("{err:?}"),
                    })?;
                let tensor = candle_core::Tensor::from_vec(values, data.shape.clone(), &Device::Cpu)
                    .map_err(write_error)?;
                Ok((key.clone(), tensor))
            })
            .collect::<Result<HashMap<String, candle_core::Tensor>, CheckpointError>>()?;

        candle_core::safetensors::save(&tensors, path).map_err(write_error)
    }
}

/// Convert a ``candle`` tensor to ``f32`` [`TensorData`], keeping its shape.
fn candle_to_tensor_data(tensor: &candle_core::Tensor) -> candle_core::Result<TensorData> {
    let shape = tensor.dims().to_vec();
    let values = tensor
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(TensorData::new(values, shape))
}
