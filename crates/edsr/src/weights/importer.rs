//! # Partial-Match Weight Import
//!
//! [`WeightImporter`] reconciles a [`Checkpoint`] against a module's own
//! parameters, under an [`ImportPolicy`]:
//!
//! * names in both, with matching shapes, are copied;
//! * names in both, with mismatched shapes, are an error;
//!   unless tolerated by the policy; in both cases the module value is kept;
//! * names only in the checkpoint are an error under strict import;
//!   unless tolerated by the policy, in which case they are ignored;
//! * names only in the module are never an error.
//!
//! Errors do not stop the walk: every matching name is copied, and
//! [`WeightImporter::finish`] reports the first unexpected key, or else the
//! first shape mismatch.
//!
//! [`import_weights`] runs the whole protocol over a [`NamedParameters`] module;
//! [`import_weights_partial`] also hands back the partially imported module
//! when the import fails.

use crate::weights::checkpoint::Checkpoint;
use crate::weights::named::NamedParameters;
use burn::module::Param;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Weight reconciliation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeightImportError {
    /// A shared name has different shapes in the module and the checkpoint.
    #[error(
        "While copying the parameter named {key}, whose dimensions in the model are {expected:?} and whose dimensions in the checkpoint are {found:?}."
    )]
    ShapeMismatch {
        /// The parameter name.
        key: String,
        /// Module shape.
        expected: Vec<usize>,
        /// Checkpoint shape.
        found: Vec<usize>,
    },

    /// A checkpoint name has no counterpart in the module.
    #[error("unexpected key \"{0}\" in state_dict")]
    UnexpectedKey(String),
}

/// Predicate selecting the parameter names whose mismatches are tolerated.
pub type TolerancePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Does `key` equal `prefix`, or start with ``{prefix}.``?
pub fn has_key_prefix(
    key: &str,
    prefix: &str,
) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Import policy.
#[derive(Clone)]
pub struct ImportPolicy {
    /// Reject checkpoint names with no module counterpart.
    pub strict: bool,

    /// Names for which shape mismatches and unexpected keys are tolerated.
    pub tolerate: TolerancePredicate,
}

impl Debug for ImportPolicy {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ImportPolicy")
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl Default for ImportPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ImportPolicy {
    /// Create a policy which tolerates nothing.
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            tolerate: Arc::new(|_| false),
        }
    }

    /// Set strictness.
    pub fn with_strict(
        self,
        strict: bool,
    ) -> Self {
        Self { strict, ..self }
    }

    /// Replace the tolerance predicate.
    pub fn with_tolerance<F>(
        self,
        tolerate: F,
    ) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            tolerate: Arc::new(tolerate),
            ..self
        }
    }

    /// Tolerate every name under `prefix`.
    ///
    /// See [`has_key_prefix`].
    pub fn tolerate_prefix(
        self,
        prefix: &str,
    ) -> Self {
        let prefix = prefix.to_string();
        self.with_tolerance(move |key| has_key_prefix(key, &prefix))
    }

    /// Is `key` tolerated?
    pub fn tolerates(
        &self,
        key: &str,
    ) -> bool {
        (self.tolerate)(key)
    }
}

/// What happened to each name during an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Module parameters overwritten from the checkpoint.
    pub copied: Vec<String>,

    /// Shared names with tolerated shape mismatches; the module value was kept.
    pub tolerated: Vec<String>,

    /// Module parameters absent from the checkpoint.
    pub missing: Vec<String>,

    /// Frozen module parameters; never overwritten.
    pub retained: Vec<String>,

    /// Checkpoint names with no module counterpart, which were skipped.
    pub ignored: Vec<String>,
}

/// Single-use checkpoint reconciliation state.
///
/// Modules feed their parameters through [`WeightImporter::import_param`];
/// [`WeightImporter::finish`] then checks for unclaimed checkpoint names.
pub struct WeightImporter<'a> {
    checkpoint: &'a Checkpoint,
    policy: &'a ImportPolicy,
    claimed: BTreeSet<String>,
    mismatches: Vec<WeightImportError>,
    report: ImportReport,
}

impl<'a> WeightImporter<'a> {
    /// Create an importer.
    pub fn new(
        checkpoint: &'a Checkpoint,
        policy: &'a ImportPolicy,
    ) -> Self {
        Self {
            checkpoint,
            policy,
            claimed: BTreeSet::new(),
            mismatches: Vec::new(),
            report: ImportReport::default(),
        }
    }

    /// The active policy.
    pub fn policy(&self) -> &ImportPolicy {
        self.policy
    }

    /// Resolve the checkpoint data for a module parameter of shape `dims`.
    ///
    /// Returns `None` when the module value should be kept.
    fn resolve(
        &mut self,
        key: &str,
        dims: &[usize],
    ) -> Option<TensorData> {
        self.claimed.insert(key.to_string());

        let Some(data) = self.checkpoint.get(key) else {
            self.report.missing.push(key.to_string());
            return None;
        };

        if data.shape.as_slice() == dims {
            self.report.copied.push(key.to_string());
            return Some(data.clone());
        }

        if self.policy.tolerates(key) {
            tracing::debug!(
                key,
                expected = ?dims,
                found = ?data.shape,
                "tolerated shape mismatch"
            );
            self.report.tolerated.push(key.to_string());
        } else {
            self.mismatches.push(WeightImportError::ShapeMismatch {
                key: key.to_string(),
                expected: dims.to_vec(),
                found: data.shape.clone(),
            });
        }
        None
    }

    /// Import a tensor value.
    pub fn import_tensor<B: Backend, const D: usize>(
        &mut self,
        key: &str,
        tensor: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let dims = tensor.dims();
        match self.resolve(key, &dims) {
            Some(data) => Tensor::from_data(data.convert::<B::FloatElem>(), &tensor.device()),
            None => tensor,
        }
    }

    /// Import a parameter; preserving its id and grad settings.
    pub fn import_param<B: Backend, const D: usize>(
        &mut self,
        key: &str,
        param: Param<Tensor<B, D>>,
    ) -> Param<Tensor<B, D>> {
        let dims = param.shape().dims;
        match self.resolve(key, &dims) {
            Some(data) => param.map(|tensor| {
                Tensor::from_data(data.convert::<B::FloatElem>(), &tensor.device())
            }),
            None => param,
        }
    }

    /// Claim a frozen module name, without reading the checkpoint.
    ///
    /// The matching checkpoint entry (if any) is consumed, but never copied.
    pub fn retain(
        &mut self,
        key: &str,
    ) {
        self.claimed.insert(key.to_string());
        self.report.retained.push(key.to_string());
    }

    /// Check unclaimed checkpoint names, and produce the [`ImportReport`].
    ///
    /// # Errors
    ///
    /// The first [`WeightImportError::UnexpectedKey`]; or else the first
    /// [`WeightImportError::ShapeMismatch`].
    pub fn finish(mut self) -> Result<ImportReport, WeightImportError> {
        for key in self.checkpoint.keys() {
            if self.claimed.contains(key) {
                continue;
            }
            if self.policy.strict && !self.policy.tolerates(key) {
                return Err(WeightImportError::UnexpectedKey(key.to_string()));
            }
            tracing::debug!(key, "ignored checkpoint key");
            self.report.ignored.push(key.to_string());
        }
        match self.mismatches.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

/// Import `checkpoint` into `module` under `policy`.
///
/// Unlike [`import_weights`], the module is returned even when the import
/// fails; with every non-conflicting parameter already copied.
pub fn import_weights_partial<M: NamedParameters>(
    module: M,
    checkpoint: &Checkpoint,
    policy: &ImportPolicy,
) -> (M, Result<ImportReport, WeightImportError>) {
    let mut importer = WeightImporter::new(checkpoint, policy);
    let module = module.import_parameters("", &mut importer);
    (module, importer.finish())
}

/// Import `checkpoint` into `module` under `policy`.
///
/// # Returns
///
/// The updated module, and the [`ImportReport`].
pub fn import_weights<M: NamedParameters>(
    module: M,
    checkpoint: &Checkpoint,
    policy: &ImportPolicy,
) -> Result<(M, ImportReport), WeightImportError> {
    let (module, result) = import_weights_partial(module, checkpoint, policy);
    result.map(|report| (module, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::conv::{Conv2d, Conv2dConfig};
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    fn conv_checkpoint(
        weight_shape: [usize; 4],
        bias_len: usize,
    ) -> Checkpoint {
        let mut checkpoint = Checkpoint::default();
        let n = weight_shape.iter().product::<usize>();
        checkpoint.insert("weight", TensorData::new(vec![0.25f32; n], weight_shape));
        checkpoint.insert("bias", TensorData::new(vec![-1.0f32; bias_len], [bias_len]));
        checkpoint
    }

    #[test]
    fn test_has_key_prefix() {
        assert!(has_key_prefix("tail", "tail"));
        assert!(has_key_prefix("tail.0.0.weight", "tail"));
        assert!(!has_key_prefix("tailor.weight", "tail"));
        assert!(!has_key_prefix("body.0.tail", "tail"));
        assert!(!has_key_prefix("head.0.weight", "tail"));
    }

    #[test]
    fn test_policy() {
        let policy = ImportPolicy::default();
        assert!(policy.strict);
        assert!(!policy.tolerates("tail.1.weight"));

        let policy = policy.with_strict(false).tolerate_prefix("tail");
        assert!(!policy.strict);
        assert!(policy.tolerates("tail.1.weight"));
        assert!(!policy.tolerates("body.1.weight"));

        let policy = policy.with_tolerance(|k| k.ends_with("bias"));
        assert!(policy.tolerates("head.0.bias"));
        assert!(!policy.tolerates("tail.1.weight"));
    }

    #[test]
    fn test_import_matching_shapes() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);

        let checkpoint = conv_checkpoint([3, 2, 1, 1], 3);
        let (conv, report) = import_weights(conv, &checkpoint, &ImportPolicy::default()).unwrap();

        conv.weight
            .val()
            .to_data()
            .assert_eq(checkpoint.get("weight").unwrap(), true);
        conv.bias
            .as_ref()
            .unwrap()
            .val()
            .to_data()
            .assert_eq(checkpoint.get("bias").unwrap(), true);

        assert_that!(report.copied.len(), is(equal_to(2)));
        assert!(report.missing.is_empty());
        assert!(report.ignored.is_empty());
    }

    #[test]
    fn test_import_missing_entries() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);
        let original = conv.weight.val().to_data();

        let mut checkpoint = conv_checkpoint([3, 2, 1, 1], 3);
        checkpoint.remove("weight");

        let (conv, report) = import_weights(conv, &checkpoint, &ImportPolicy::default()).unwrap();
        conv.weight.val().to_data().assert_eq(&original, true);
        assert_eq!(report.missing, vec!["weight".to_string()]);
        assert_eq!(report.copied, vec!["bias".to_string()]);
    }

    #[test]
    fn test_import_shape_mismatch() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);

        let checkpoint = conv_checkpoint([4, 2, 1, 1], 3);
        let result = import_weights(conv, &checkpoint, &ImportPolicy::default());
        assert_eq!(
            result.err(),
            Some(WeightImportError::ShapeMismatch {
                key: "weight".to_string(),
                expected: vec![3, 2, 1, 1],
                found: vec![4, 2, 1, 1],
            })
        );
    }

    #[test]
    fn test_import_tolerated_shape_mismatch() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);
        let original = conv.weight.val().to_data();

        let checkpoint = conv_checkpoint([4, 2, 1, 1], 3);
        let policy = ImportPolicy::default().with_tolerance(|k| k == "weight");
        let (conv, report) = import_weights(conv, &checkpoint, &policy).unwrap();

        conv.weight.val().to_data().assert_eq(&original, true);
        assert_eq!(report.tolerated, vec!["weight".to_string()]);
        assert_eq!(report.copied, vec!["bias".to_string()]);
    }

    #[test]
    fn test_import_unexpected_keys() {
        let device = Default::default();

        let mut checkpoint = conv_checkpoint([3, 2, 1, 1], 3);
        checkpoint.insert("extra.weight", TensorData::new(vec![1.0f32], [1]));

        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);
        let result = import_weights(conv, &checkpoint, &ImportPolicy::new(true));
        assert_eq!(
            result.err(),
            Some(WeightImportError::UnexpectedKey("extra.weight".to_string()))
        );

        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);
        let policy = ImportPolicy::new(true).tolerate_prefix("extra");
        let (_, report) = import_weights(conv, &checkpoint, &policy).unwrap();
        assert_eq!(report.ignored, vec!["extra.weight".to_string()]);

        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);
        let (_, report) = import_weights(conv, &checkpoint, &ImportPolicy::new(false)).unwrap();
        assert_eq!(report.ignored, vec!["extra.weight".to_string()]);
        assert_that!(report.copied.len(), is(equal_to(2)));
    }

    #[test]
    fn test_retain() {
        let checkpoint = conv_checkpoint([3, 2, 1, 1], 3);
        let policy = ImportPolicy::default();
        let mut importer = WeightImporter::new(&checkpoint, &policy);
        importer.retain("weight");
        importer.retain("bias");
        let report = importer.finish().unwrap();
        assert!(report.copied.is_empty());
        assert!(report.ignored.is_empty());
        assert_eq!(report.retained.len(), 2);
    }

    #[test]
    fn test_partial_import_keeps_matching_parameters() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);
        let original = conv.weight.val().to_data();

        let checkpoint = conv_checkpoint([4, 2, 1, 1], 3);
        let (conv, result) = import_weights_partial(conv, &checkpoint, &ImportPolicy::default());

        assert!(matches!(
            result,
            Err(WeightImportError::ShapeMismatch { ref key, .. }) if key == "weight"
        ));
        conv.weight.val().to_data().assert_eq(&original, true);
        conv.bias
            .unwrap()
            .val()
            .to_data()
            .assert_eq(checkpoint.get("bias").unwrap(), true);
    }

    #[test]
    fn test_unexpected_key_reported_before_shape_mismatch() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([2, 3], [1, 1]).init(&device);

        let mut checkpoint = conv_checkpoint([4, 2, 1, 1], 3);
        checkpoint.insert("extra.weight", TensorData::new(vec![1.0f32], [1]));

        let result = import_weights(conv, &checkpoint, &ImportPolicy::new(true));
        assert_eq!(
            result.err(),
            Some(WeightImportError::UnexpectedKey("extra.weight".to_string()))
        );
    }
}
