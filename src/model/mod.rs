//! Neural module interfaces and the wrapper the engine drives them through.
//!
//! - `backend`: capability traits (pose, appearance, decoder, retargeter)
//! - `backends`: deterministic stubs and the optional tract ONNX runtime
//! - `wrapper`: tensor preparation, shape checks, keypoint projection,
//!   stitching/retargeting glue and output parsing

pub mod backend;
pub mod backends;
mod wrapper;

pub use backend::{
    headpose_bins_to_degrees, AppearanceExtractor, Decoder, ModelBundle, MotionOutput,
    PoseExtractor, RetargetKind, Retargeter,
};
pub use backends::stub_bundle;
pub use wrapper::{ModelWrapper, WrapperSettings};

use anyhow::Result;

use crate::config::ModelSettings;

/// Wrapper over the stub backends or the ONNX models in `settings.model_dir`.
pub fn build_wrapper(settings: &ModelSettings, use_stub: bool) -> Result<ModelWrapper> {
    let wrapper_settings = WrapperSettings {
        input_size: settings.input_size,
        num_keypoints: settings.num_keypoints,
    };
    if use_stub {
        log::warn!("using stub model backends; output is not a real reenactment");
        return Ok(ModelWrapper::new(
            stub_bundle(settings.num_keypoints),
            wrapper_settings,
        ));
    }
    #[cfg(feature = "backend-tract")]
    {
        let bundle = backends::load_tract_bundle(&settings.model_dir, &wrapper_settings)?;
        Ok(ModelWrapper::new(bundle, wrapper_settings))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(anyhow::anyhow!(
            "ONNX inference requires the backend-tract feature (or pass --stub)"
        ))
    }
}
