//! # Name-Addressed Parameters
//!
//! [`NamedParameters`] exposes a module's parameters under hierarchical
//! ``stage.sub_stage.index.kind`` names; following the ``torch`` ``state_dict``
//! naming of the reference layers:
//!
//! * [`Conv2d`]: ``weight``, ``bias``.
//! * [`BatchNorm`]: ``weight``, ``bias``, ``running_mean``, ``running_var``;
//!   ``num_batches_tracked`` is claimed but has no burn counterpart.
//! * [`PRelu`]: ``weight``.

use crate::weights::checkpoint::ParameterMap;
use crate::weights::importer::WeightImporter;
use burn::module::RunningState;
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, PRelu};
use burn::prelude::Backend;

/// Join a name prefix and a child name.
///
/// An empty prefix yields the bare child name.
pub fn join_key(
    prefix: &str,
    name: &str,
) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Allocates the indices of a ``torch`` ``nn.Sequential``.
///
/// Every slot consumes an index, including stateless slots (activations,
/// pixel shuffles), so that parameter names line up with reference checkpoints.
#[derive(Debug, Clone)]
pub struct SequentialKeys {
    prefix: String,
    next: usize,
}

impl SequentialKeys {
    /// Start a sequence at index 0.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: 0,
        }
    }

    /// Allocate the next slot name.
    pub fn next_key(&mut self) -> String {
        let key = join_key(&self.prefix, &self.next.to_string());
        self.next += 1;
        key
    }

    /// Skip a (stateless) slot.
    pub fn skip(&mut self) {
        self.next += 1;
    }
}

/// Name-addressed parameter access.
pub trait NamedParameters: Sized {
    /// Export every parameter under `prefix` into `params`.
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    );

    /// Import every parameter under `prefix` through `importer`.
    ///
    /// Import problems are recorded by the importer, and reported by
    /// [`WeightImporter::finish`]; parameters without problems are still updated.
    fn import_parameters(
        self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self;

    /// Export all parameters, with no prefix.
    fn parameter_map(&self) -> ParameterMap {
        let mut params = ParameterMap::new();
        self.export_parameters("", &mut params);
        params
    }
}

impl<M: NamedParameters> NamedParameters for Option<M> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        if let Some(module) = self {
            module.export_parameters(prefix, params);
        }
    }

    fn import_parameters(
        self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        self.map(|module| module.import_parameters(prefix, importer))
    }
}

impl<B: Backend> NamedParameters for Conv2d<B> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        params.insert(join_key(prefix, "weight"), self.weight.val().to_data());
        if let Some(bias) = &self.bias {
            params.insert(join_key(prefix, "bias"), bias.val().to_data());
        }
    }

    fn import_parameters(
        mut self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        self.weight = importer.import_param(&join_key(prefix, "weight"), self.weight);
        self.bias = self
            .bias
            .map(|bias| importer.import_param(&join_key(prefix, "bias"), bias));
        self
    }
}

impl<B: Backend> NamedParameters for BatchNorm<B, 2> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        params.insert(join_key(prefix, "weight"), self.gamma.val().to_data());
        params.insert(join_key(prefix, "bias"), self.beta.val().to_data());
        params.insert(
            join_key(prefix, "running_mean"),
            self.running_mean.value().to_data(),
        );
        params.insert(
            join_key(prefix, "running_var"),
            self.running_var.value().to_data(),
        );
    }

    fn import_parameters(
        mut self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        self.gamma = importer.import_param(&join_key(prefix, "weight"), self.gamma);
        self.beta = importer.import_param(&join_key(prefix, "bias"), self.beta);

        let running_mean =
            importer.import_tensor(&join_key(prefix, "running_mean"), self.running_mean.value());
        self.running_mean = RunningState::new(running_mean);

        let running_var =
            importer.import_tensor(&join_key(prefix, "running_var"), self.running_var.value());
        self.running_var = RunningState::new(running_var);

        importer.retain(&join_key(prefix, "num_batches_tracked"));

        self
    }
}

impl<B: Backend> NamedParameters for PRelu<B> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        params.insert(join_key(prefix, "weight"), self.alpha.val().to_data());
    }

    fn import_parameters(
        mut self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        self.alpha = importer.import_param(&join_key(prefix, "weight"), self.alpha);
        self
    }
}
