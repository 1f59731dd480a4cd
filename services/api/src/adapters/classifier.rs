//! services/api/src/adapters/classifier.rs
//!
//! The ONNX implementation of the `Classifier` port, backed by `tract`.
//!
//! The model is parsed, optimized and planned once at startup. The plan is shared
//! behind an `Arc`; every `run` allocates its own execution state, so concurrent
//! forward passes never share intermediate buffers.

use async_trait::async_trait;
use image::DynamicImage;
use mri_core::classification::{self, InputSpec, Normalization, TensorLayout};
use mri_core::ports::Classifier;
use mri_core::{InferenceError, Prediction};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::internal::DimLike;

type Plan = TypedRunnableModel<TypedModel>;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `Classifier` port with a local ONNX model.
#[derive(Clone)]
pub struct OnnxClassifier {
    plan: Arc<Plan>,
    input: InputSpec,
}

impl OnnxClassifier {
    /// Loads and plans the model at `path`.
    ///
    /// The input shape is read per dimension so a symbolic batch size does not
    /// hide the layout, then pinned to batch 1 before optimizing.
    ///
    /// Failure is reported as `InferenceError::ModelUnavailable`; callers should
    /// treat it as fatal, since retrying a deterministic load cannot succeed.
    pub fn load(
        path: &Path,
        layout: Option<TensorLayout>,
        fallback_input_size: u32,
        normalization: Normalization,
    ) -> Result<Self, InferenceError> {
        if !path.is_file() {
            return Err(InferenceError::ModelUnavailable(format!(
                "model file {} does not exist",
                path.display()
            )));
        }
        let unavailable = |e: TractError| {
            InferenceError::ModelUnavailable(format!("failed to load {}: {}", path.display(), e))
        };

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.into_typed())
            .map_err(unavailable)?;

        let dims: Option<Vec<Option<usize>>> = model
            .input_fact(0)
            .ok()
            .map(|fact| fact.shape.iter().map(|dim| dim.to_usize().ok()).collect());
        let input =
            InputSpec::from_model_shape(dims.as_deref(), layout, fallback_input_size, normalization);

        let plan = model
            .with_input_fact(0, f32::fact(input.tensor_shape()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(unavailable)?;

        info!(
            model = %path.display(),
            width = input.width,
            height = input.height,
            layout = ?input.layout,
            "Classifier model loaded"
        );
        Ok(Self {
            plan: Arc::new(plan),
            input,
        })
    }
}

//=========================================================================================
// `Classifier` Trait Implementation
//=========================================================================================

#[async_trait]
impl Classifier for OnnxClassifier {
    async fn classify(&self, image: &DynamicImage) -> Result<Prediction, InferenceError> {
        let plan = Arc::clone(&self.plan);
        let input = self.input.clone();
        let image = image.clone();

        // The forward pass is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || run_forward(&plan, &input, &image))
            .await
            .map_err(|e| InferenceError::Execution(format!("inference task failed: {}", e)))?
    }
}

fn run_forward(
    plan: &Plan,
    spec: &InputSpec,
    image: &DynamicImage,
) -> Result<Prediction, InferenceError> {
    let data = classification::preprocess(image, spec)?;
    let tensor = Tensor::from_shape(&spec.tensor_shape(), &data)
        .map_err(|e| InferenceError::Input(e.to_string()))?;

    let outputs = plan
        .run(tvec!(tensor.into()))
        .map_err(|e| InferenceError::Execution(e.to_string()))?;
    let first = outputs
        .first()
        .ok_or_else(|| InferenceError::Execution("model produced no outputs".to_string()))?;
    let scores: Vec<f32> = first
        .to_array_view::<f32>()
        .map_err(|e| InferenceError::Execution(e.to_string()))?
        .iter()
        .copied()
        .collect();

    debug!(?scores, "Raw model output");
    classification::select_prediction(&scores)
}
