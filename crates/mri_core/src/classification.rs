//! crates/mri_core/src/classification.rs
//!
//! The runtime-independent half of the inference engine: turning an image into
//! the model's input tensor, and turning the model's output vector into a
//! `Prediction`. The runtime adapter only has to run the forward pass.

use image::{imageops::FilterType, DynamicImage};

use crate::domain::{ClassLabel, Prediction};
use crate::error::InferenceError;

/// Per-channel normalization applied after scaling pixels into `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet statistics, used by most transfer-learned CNN backbones.
    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    /// Plain `x / 255`.
    pub const UNIT: Normalization = Normalization {
        mean: [0.0; 3],
        std: [1.0; 3],
    };

    /// Maps pixels into `[-1, 1]`.
    pub const SYMMETRIC: Normalization = Normalization {
        mean: [0.5; 3],
        std: [0.5; 3],
    };

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "imagenet" => Some(Self::IMAGENET),
            "unit" => Some(Self::UNIT),
            "symmetric" => Some(Self::SYMMETRIC),
            _ => None,
        }
    }
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, 3, H, W]`
    Nchw,
    /// `[1, H, W, 3]`
    Nhwc,
}

impl TensorLayout {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "nchw" => Some(Self::Nchw),
            "nhwc" => Some(Self::Nhwc),
            _ => None,
        }
    }
}

/// Everything needed to build the model's input from an arbitrary image.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub layout: TensorLayout,
    pub normalization: Normalization,
}

impl InputSpec {
    pub fn square(size: u32, layout: TensorLayout, normalization: Normalization) -> Self {
        Self {
            width: size,
            height: size,
            layout,
            normalization,
        }
    }

    /// Infers layout and resolution from a rank-4 model input shape, one entry
    /// per dimension with `None` for a symbolic dimension. The batch dimension
    /// is ignored. `layout` forces the channel position; otherwise a dimension
    /// of exactly 3 decides it, NCHW first. Unknown sizes fall back to
    /// `fallback_size`.
    pub fn from_model_shape(
        dims: Option<&[Option<usize>]>,
        layout: Option<TensorLayout>,
        fallback_size: u32,
        normalization: Normalization,
    ) -> Self {
        let size = |dim: &Option<usize>| dim.map_or(fallback_size, |d| d as u32);

        let (layout, height, width) = match (dims, layout) {
            (Some([_, _, h, w]), Some(TensorLayout::Nchw)) => (TensorLayout::Nchw, h, w),
            (Some([_, h, w, _]), Some(TensorLayout::Nhwc)) => (TensorLayout::Nhwc, h, w),
            (Some([_, Some(3), h, w]), None) => (TensorLayout::Nchw, h, w),
            (Some([_, h, w, Some(3)]), None) => (TensorLayout::Nhwc, h, w),
            (_, layout) => {
                return Self::square(
                    fallback_size,
                    layout.unwrap_or(TensorLayout::Nchw),
                    normalization,
                )
            }
        };
        Self {
            width: size(width),
            height: size(height),
            layout,
            normalization,
        }
    }

    /// The tensor shape `preprocess` produces, batch size 1.
    pub fn tensor_shape(&self) -> [usize; 4] {
        let (h, w) = (self.height as usize, self.width as usize);
        match self.layout {
            TensorLayout::Nchw => [1, 3, h, w],
            TensorLayout::Nhwc => [1, h, w, 3],
        }
    }
}

/// Converts to RGB, resizes to the model resolution and normalizes.
///
/// Returns a flat buffer laid out according to `spec.layout`.
pub fn preprocess(image: &DynamicImage, spec: &InputSpec) -> Result<Vec<f32>, InferenceError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(InferenceError::Input("image has no pixels".to_string()));
    }
    if spec.width == 0 || spec.height == 0 {
        return Err(InferenceError::Input(format!(
            "model input resolution {}x{} is empty",
            spec.width, spec.height
        )));
    }

    let rgb = image
        .resize_exact(spec.width, spec.height, FilterType::Triangle)
        .to_rgb8();
    let (w, h) = (spec.width as usize, spec.height as usize);
    let Normalization { mean, std } = spec.normalization;
    let mut data = vec![0.0f32; 3 * w * h];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
            let offset = match spec.layout {
                TensorLayout::Nchw => c * h * w + y * w + x,
                TensorLayout::Nhwc => (y * w + x) * 3 + c,
            };
            data[offset] = value;
        }
    }
    Ok(data)
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Whether `values` already look like a probability distribution.
pub fn is_distribution(values: &[f32]) -> bool {
    let sum: f32 = values.iter().sum();
    values.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() <= 1e-3
}

/// Turns raw model output into a `Prediction`.
///
/// Outputs that already sum to one are treated as probabilities; anything else
/// is passed through softmax first. Ties go to the lowest class index.
pub fn select_prediction(output: &[f32]) -> Result<Prediction, InferenceError> {
    if output.len() != ClassLabel::ALL.len() {
        return Err(InferenceError::Execution(format!(
            "model produced {} scores, expected {}",
            output.len(),
            ClassLabel::ALL.len()
        )));
    }
    if output.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::Execution(
            "model produced a non-finite score".to_string(),
        ));
    }

    let probabilities = if is_distribution(output) {
        output.to_vec()
    } else {
        softmax(output)
    };

    // Renormalize in f64 so the percentages sum to 100 regardless of f32 drift.
    let total: f64 = probabilities.iter().map(|p| *p as f64).sum();
    let mut distribution = [0.0f64; 5];
    for (slot, p) in distribution.iter_mut().zip(&probabilities) {
        *slot = *p as f64 / total * 100.0;
    }

    let mut best = 0;
    for (i, value) in distribution.iter().enumerate().skip(1) {
        if *value > distribution[best] {
            best = i;
        }
    }

    let label = ClassLabel::from_index(best)
        .ok_or_else(|| InferenceError::Execution(format!("class index {} out of range", best)))?;

    Ok(Prediction {
        label,
        confidence: distribution[best].clamp(0.0, 100.0),
        distribution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn softmax_output_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(p[4] > p[3]);
    }

    #[test]
    fn logits_are_softmaxed_and_percentages_sum_to_100() {
        let prediction = select_prediction(&[0.5, 3.0, -1.0, 0.0, 1.0]).unwrap();
        assert_eq!(prediction.label, ClassLabel::EarlyMci);
        let sum: f64 = prediction.distribution.iter().sum();
        assert!((sum - 100.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&prediction.confidence));
    }

    #[test]
    fn probabilities_are_used_as_is() {
        let prediction = select_prediction(&[0.1, 0.1, 0.1, 0.6, 0.1]).unwrap();
        assert_eq!(prediction.label, ClassLabel::LateMci);
        assert!((prediction.confidence - 60.0).abs() < 1e-4);
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        let prediction = select_prediction(&[0.1, 0.4, 0.1, 0.4, 0.0]).unwrap();
        assert_eq!(prediction.label, ClassLabel::EarlyMci);

        let uniform = select_prediction(&[2.0; 5]).unwrap();
        assert_eq!(uniform.label, ClassLabel::CognitivelyNormal);
        assert!((uniform.confidence - 20.0).abs() < 1e-4);
    }

    #[test]
    fn wrong_output_length_is_an_execution_error() {
        assert!(matches!(
            select_prediction(&[0.5, 0.5]),
            Err(InferenceError::Execution(_))
        ));
        assert!(matches!(
            select_prediction(&[f32::NAN, 0.0, 0.0, 0.0, 0.0]),
            Err(InferenceError::Execution(_))
        ));
    }

    #[test]
    fn layout_is_read_from_model_shape() {
        let nchw = InputSpec::from_model_shape(
            Some(&[Some(1), Some(3), Some(128), Some(96)]),
            None,
            224,
            Normalization::UNIT,
        );
        assert_eq!(nchw.layout, TensorLayout::Nchw);
        assert_eq!((nchw.width, nchw.height), (96, 128));

        let nhwc = InputSpec::from_model_shape(
            Some(&[Some(1), Some(176), Some(176), Some(3)]),
            None,
            224,
            Normalization::UNIT,
        );
        assert_eq!(nhwc.layout, TensorLayout::Nhwc);
        assert_eq!(nhwc.tensor_shape(), [1, 176, 176, 3]);

        let fallback = InputSpec::from_model_shape(None, None, 224, Normalization::UNIT);
        assert_eq!(fallback.tensor_shape(), [1, 3, 224, 224]);
    }

    #[test]
    fn symbolic_batch_does_not_hide_the_layout() {
        let keras = InputSpec::from_model_shape(
            Some(&[None, Some(176), Some(176), Some(3)]),
            None,
            224,
            Normalization::UNIT,
        );
        assert_eq!(keras.tensor_shape(), [1, 176, 176, 3]);

        let torch = InputSpec::from_model_shape(
            Some(&[None, Some(3), None, None]),
            None,
            224,
            Normalization::UNIT,
        );
        assert_eq!(torch.tensor_shape(), [1, 3, 224, 224]);
    }

    #[test]
    fn configured_layout_overrides_detection() {
        let forced = InputSpec::from_model_shape(
            Some(&[None, Some(3), Some(3), Some(3)]),
            Some(TensorLayout::Nhwc),
            224,
            Normalization::UNIT,
        );
        assert_eq!(forced.layout, TensorLayout::Nhwc);
        assert_eq!(forced.tensor_shape(), [1, 3, 3, 3]);

        let unknown = InputSpec::from_model_shape(None, Some(TensorLayout::Nhwc), 64, Normalization::UNIT);
        assert_eq!(unknown.tensor_shape(), [1, 64, 64, 3]);

        assert_eq!(TensorLayout::from_name(" NHWC "), Some(TensorLayout::Nhwc));
        assert_eq!(TensorLayout::from_name("chw"), None);
    }

    #[test]
    fn preprocess_places_channels_by_layout() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 51])));

        let nchw = preprocess(
            &image,
            &InputSpec::square(2, TensorLayout::Nchw, Normalization::UNIT),
        )
        .unwrap();
        assert_eq!(nchw.len(), 12);
        assert!((nchw[0] - 1.0).abs() < 1e-6);
        assert!(nchw[4].abs() < 1e-6);
        assert!((nchw[8] - 0.2).abs() < 1e-6);

        let nhwc = preprocess(
            &image,
            &InputSpec::square(2, TensorLayout::Nhwc, Normalization::UNIT),
        )
        .unwrap();
        assert!((nhwc[0] - 1.0).abs() < 1e-6);
        assert!(nhwc[1].abs() < 1e-6);
        assert!((nhwc[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn grayscale_input_is_expanded_to_three_channels() {
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(8, 8, image::Luma([255])));
        let data = preprocess(
            &gray,
            &InputSpec::square(4, TensorLayout::Nchw, Normalization::IMAGENET),
        )
        .unwrap();
        assert_eq!(data.len(), 3 * 4 * 4);
        let expected_red = (1.0 - 0.485) / 0.229;
        assert!((data[0] - expected_red).abs() < 1e-4);
    }
}
