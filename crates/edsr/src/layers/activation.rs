//! # Activation Layer Wrapper
//!
//! Stateless activations ([`Relu`], [`LeakyRelu`], [`Gelu`]) carry no weights
//! and may be freely duplicated across blocks; [`PRelu`] owns its slope parameters.
use crate::weights::checkpoint::ParameterMap;
use crate::weights::importer::WeightImporter;
use crate::weights::named::NamedParameters;
use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Activation`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// [`Relu`] activation layer.
    Relu,

    /// [`PRelu`] activation layer.
    PRelu(PReluConfig),

    /// [`LeakyRelu`] activation layer.
    LeakyRelu(LeakyReluConfig),

    /// [`Gelu`] activation layer.
    Gelu,
}

impl From<PReluConfig> for ActivationConfig {
    fn from(config: PReluConfig) -> Self {
        Self::PRelu(config)
    }
}

impl From<LeakyReluConfig> for ActivationConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu
    }
}

impl ActivationConfig {
    /// Initialize a wrapped activation layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            ActivationConfig::Relu => Activation::Relu(Relu),
            ActivationConfig::PRelu(conf) => Activation::PRelu(conf.init(device)),
            ActivationConfig::LeakyRelu(conf) => Activation::LeakyRelu(conf.init()),
            ActivationConfig::Gelu => Activation::Gelu(Gelu),
        }
    }
}

/// Activation Layer Wrapper.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Activation<B: Backend> {
    /// [`Relu`] activation layer.
    Relu(Relu),

    /// [`PRelu`] activation layer.
    PRelu(PRelu<B>),

    /// [`LeakyRelu`] activation layer.
    LeakyRelu(LeakyRelu),

    /// [`Gelu`] activation layer.
    Gelu(Gelu),
}

impl<B: Backend> Activation<B> {
    /// Forward pass.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Activation::Relu(layer) => layer.forward(input),
            Activation::PRelu(layer) => layer.forward(input),
            Activation::LeakyRelu(layer) => layer.forward(input),
            Activation::Gelu(layer) => layer.forward(input),
        }
    }
}

impl<B: Backend> NamedParameters for Activation<B> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        if let Activation::PRelu(layer) = self {
            layer.export_parameters(prefix, params);
        }
    }

    fn import_parameters(
        self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        match self {
            Activation::PRelu(layer) => {
                Activation::PRelu(layer.import_parameters(prefix, importer))
            }
            act => act,
        }
    }
}
