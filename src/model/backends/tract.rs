#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array4, ArrayD, IxDyn};
use tract_onnx::prelude::*;

use crate::keypoints::Keypoints;
use crate::model::backend::{
    headpose_bins_to_degrees, AppearanceExtractor, Decoder, ModelBundle, MotionOutput,
    PoseExtractor, RetargetKind, Retargeter, HEADPOSE_BINS,
};
use crate::model::wrapper::WrapperSettings;

pub const APPEARANCE_MODEL: &str = "appearance_feature_extractor.onnx";
pub const MOTION_MODEL: &str = "motion_extractor.onnx";
pub const WARPING_MODEL: &str = "warping_module.onnx";
pub const GENERATOR_MODEL: &str = "spade_generator.onnx";
pub const STITCHING_MODEL: &str = "stitching.onnx";
pub const RETARGET_EYE_MODEL: &str = "retarget_eye.onnx";
pub const RETARGET_LIP_MODEL: &str = "retarget_lip.onnx";

/// Appearance feature volume: 32 channels × 16 depth × 64 × 64.
const FEATURE_SHAPE: [usize; 5] = [1, 32, 16, 64, 64];
const WARPED_SHAPE: [usize; 4] = [1, 256, 64, 64];

type Plan = TypedRunnableModel<TypedModel>;

/// Load every ONNX module from `model_dir`.
///
/// Inference is local; nothing is fetched or written.
pub fn load_bundle(model_dir: &Path, settings: &WrapperSettings) -> Result<ModelBundle> {
    let n = settings.input_size as usize;
    let kp = settings.num_keypoints;
    let image_shape = [1, 3, n, n];
    let kp_shape = [1, kp, 3];

    log::info!("loading ONNX models from {}", model_dir.display());
    Ok(ModelBundle {
        appearance: Box::new(TractAppearanceExtractor {
            plan: load_plan(&model_dir.join(APPEARANCE_MODEL), &[&image_shape])?,
        }),
        motion: Box::new(TractPoseExtractor {
            plan: load_plan(&model_dir.join(MOTION_MODEL), &[&image_shape])?,
        }),
        decoder: Box::new(TractDecoder {
            warping: load_plan(
                &model_dir.join(WARPING_MODEL),
                &[&FEATURE_SHAPE, &kp_shape, &kp_shape],
            )?,
            generator: load_plan(&model_dir.join(GENERATOR_MODEL), &[&WARPED_SHAPE])?,
        }),
        retargeter: Box::new(TractRetargeter {
            stitching: load_plan(&model_dir.join(STITCHING_MODEL), &[&[1, 6 * kp]])?,
            eye: load_plan(&model_dir.join(RETARGET_EYE_MODEL), &[&[1, 3 * kp + 3]])?,
            lip: load_plan(&model_dir.join(RETARGET_LIP_MODEL), &[&[1, 3 * kp + 2]])?,
        }),
    })
}

fn load_plan(path: &Path, inputs: &[&[usize]]) -> Result<Plan> {
    let mut model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to load ONNX model from {}", path.display()))?;
    for (ix, shape) in inputs.iter().enumerate() {
        let dims: TVec<usize> = shape.iter().copied().collect();
        model = model
            .with_input_fact(ix, InferenceFact::dt_shape(f32::datum_type(), dims))
            .with_context(|| format!("failed to set input fact {ix} for {}", path.display()))?;
    }
    model
        .into_optimized()
        .with_context(|| format!("failed to optimize {}", path.display()))?
        .into_runnable()
        .with_context(|| format!("failed to build runnable model {}", path.display()))
}

fn to_tensor(shape: &[usize], data: &[f32]) -> Result<TValue> {
    let tensor = Tensor::from_shape(shape, data).context("failed to build input tensor")?;
    Ok(tensor.into())
}

fn run(plan: &Plan, inputs: TVec<TValue>) -> Result<TVec<TValue>> {
    plan.run(inputs).context("ONNX inference failed")
}

fn output(outputs: &TVec<TValue>, ix: usize) -> Result<(Vec<usize>, Vec<f32>)> {
    let value = outputs
        .get(ix)
        .ok_or_else(|| anyhow!("model produced {} outputs, wanted index {}", outputs.len(), ix))?;
    let view = value
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    Ok((view.shape().to_vec(), view.iter().copied().collect()))
}

fn image_input(input: &Array4<f32>) -> Result<TValue> {
    let data: Vec<f32> = input.iter().copied().collect();
    to_tensor(input.shape(), &data)
}

pub struct TractAppearanceExtractor {
    plan: Plan,
}

impl AppearanceExtractor for TractAppearanceExtractor {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn extract(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let outputs = run(&self.plan, tvec!(image_input(input)?))?;
        let (shape, data) = output(&outputs, 0)?;
        ArrayD::from_shape_vec(IxDyn(&shape), data).context("bad appearance feature shape")
    }
}

/// Motion extractor with outputs ordered pitch, yaw, roll, t, exp, scale, kp.
pub struct TractPoseExtractor {
    plan: Plan,
}

impl PoseExtractor for TractPoseExtractor {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn extract(&self, input: &Array4<f32>) -> Result<MotionOutput> {
        let outputs = run(&self.plan, tvec!(image_input(input)?))?;
        let angle = |ix: usize| -> Result<f32> {
            let (_, logits) = output(&outputs, ix)?;
            if logits.len() != HEADPOSE_BINS {
                return Err(anyhow!(
                    "head-pose output {} has {} bins, expected {}",
                    ix,
                    logits.len(),
                    HEADPOSE_BINS
                ));
            }
            Ok(headpose_bins_to_degrees(&logits))
        };
        let pitch = angle(0)?;
        let yaw = angle(1)?;
        let roll = angle(2)?;

        let (_, t) = output(&outputs, 3)?;
        let translation: [f32; 3] = t
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("translation output has {} values, expected 3", t.len()))?;
        let (_, exp) = output(&outputs, 4)?;
        let (_, scale) = output(&outputs, 5)?;
        let scale = *scale
            .first()
            .ok_or_else(|| anyhow!("scale output is empty"))?;
        let (_, kp) = output(&outputs, 6)?;

        Ok(MotionOutput {
            kp,
            exp,
            pitch,
            yaw,
            roll,
            scale,
            translation,
        })
    }
}

/// Warping module followed by the SPADE generator.
pub struct TractDecoder {
    warping: Plan,
    generator: Plan,
}

impl Decoder for TractDecoder {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn warp_decode(
        &self,
        features: &ArrayD<f32>,
        kp_source: &Keypoints,
        kp_driving: &Keypoints,
    ) -> Result<Array4<f32>> {
        let feature_data: Vec<f32> = features.iter().copied().collect();
        let kp_shape = [1, kp_source.len(), 3];
        let warped = run(
            &self.warping,
            tvec!(
                to_tensor(features.shape(), &feature_data)?,
                to_tensor(&kp_shape, &kp_source.to_flat())?,
                to_tensor(&kp_shape, &kp_driving.to_flat())?
            ),
        )?;
        let (shape, data) = output(&warped, 0)?;
        let decoded = run(&self.generator, tvec!(to_tensor(&shape, &data)?))?;
        let (shape, data) = output(&decoded, 0)?;
        if shape.len() != 4 {
            return Err(anyhow!("generator output has rank {}, expected 4", shape.len()));
        }
        Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), data)
            .context("bad generator output shape")
    }
}

pub struct TractRetargeter {
    stitching: Plan,
    eye: Plan,
    lip: Plan,
}

impl Retargeter for TractRetargeter {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn run(&self, kind: RetargetKind, input: &[f32]) -> Result<Vec<f32>> {
        let plan = match kind {
            RetargetKind::Stitching => &self.stitching,
            RetargetKind::Eye => &self.eye,
            RetargetKind::Lip => &self.lip,
        };
        let outputs = run(plan, tvec!(to_tensor(&[1, input.len()], input)?))?;
        let (_, data) = output(&outputs, 0)?;
        Ok(data)
    }
}
