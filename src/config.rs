use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::sampling::MismatchMethod;

pub const DEFAULT_LIP_ZERO_THRESHOLD: f32 = 0.03;
pub const DEFAULT_RETARGETING_MULTIPLIER: f32 = 1.0;
pub const DEFAULT_DSIZE: u32 = 512;
pub const DEFAULT_CROP_SCALE: f32 = 2.3;
pub const DEFAULT_VX_RATIO: f32 = 0.0;
pub const DEFAULT_VY_RATIO: f32 = -0.125;
pub const DEFAULT_INPUT_SIZE: u32 = 256;
pub const DEFAULT_MODEL_DIR: &str = "models";

const MULTIPLIER_RANGE: (f32, f32) = (0.01, 10.0);
const DSIZE_RANGE: (u32, u32) = (64, 2048);
const SCALE_RANGE: (f32, f32) = (1.0, 4.0);
const OFFSET_RANGE: (f32, f32) = (-1.0, 1.0);

#[derive(Debug, Deserialize, Default)]
struct KernelConfigFile {
    animation: Option<AnimationConfigFile>,
    crop: Option<CropConfigFile>,
    models: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AnimationConfigFile {
    relative: Option<bool>,
    stitching: Option<bool>,
    lip_zero: Option<bool>,
    eye_retargeting: Option<bool>,
    lip_retargeting: Option<bool>,
    do_crop: Option<bool>,
    pasteback: Option<bool>,
    eyes_retargeting_multiplier: Option<f32>,
    lip_retargeting_multiplier: Option<f32>,
    lip_zero_threshold: Option<f32>,
    mismatch_method: Option<MismatchMethod>,
}

#[derive(Debug, Deserialize, Default)]
struct CropConfigFile {
    dsize: Option<u32>,
    scale: Option<f32>,
    vx_ratio: Option<f32>,
    vy_ratio: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    model_dir: Option<PathBuf>,
    input_size: Option<u32>,
    num_keypoints: Option<usize>,
    mask_template: Option<PathBuf>,
}

/// Flags selecting the engine's per-frame composition branch.
///
/// A run never writes back to this struct; the lip-zero latch lives in the
/// engine's run state.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationConfig {
    pub flag_relative: bool,
    pub flag_stitching: bool,
    pub flag_lip_zero: bool,
    pub flag_eye_retargeting: bool,
    pub flag_lip_retargeting: bool,
    pub flag_do_crop: bool,
    pub flag_pasteback: bool,
    pub eyes_retargeting_multiplier: f32,
    pub lip_retargeting_multiplier: f32,
    pub lip_zero_threshold: f32,
    pub mismatch_method: MismatchMethod,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            flag_relative: true,
            flag_stitching: true,
            flag_lip_zero: true,
            flag_eye_retargeting: false,
            flag_lip_retargeting: false,
            flag_do_crop: true,
            flag_pasteback: true,
            eyes_retargeting_multiplier: DEFAULT_RETARGETING_MULTIPLIER,
            lip_retargeting_multiplier: DEFAULT_RETARGETING_MULTIPLIER,
            lip_zero_threshold: DEFAULT_LIP_ZERO_THRESHOLD,
            mismatch_method: MismatchMethod::default(),
        }
    }
}

impl AnimationConfig {
    pub fn retargeting(&self) -> bool {
        self.flag_eye_retargeting || self.flag_lip_retargeting
    }

    pub fn validate(&self) -> Result<()> {
        check_range(
            "eyes_retargeting_multiplier",
            self.eyes_retargeting_multiplier,
            MULTIPLIER_RANGE,
        )?;
        check_range(
            "lip_retargeting_multiplier",
            self.lip_retargeting_multiplier,
            MULTIPLIER_RANGE,
        )?;
        if self.lip_zero_threshold.is_nan() || self.lip_zero_threshold < 0.0 {
            return Err(anyhow!(
                "lip_zero_threshold must be non-negative, got {}",
                self.lip_zero_threshold
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropSettings {
    /// Side of the aligned crop in pixels.
    pub dsize: u32,
    /// Crop side relative to the landmark box.
    pub scale: f32,
    pub vx_ratio: f32,
    pub vy_ratio: f32,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            dsize: DEFAULT_DSIZE,
            scale: DEFAULT_CROP_SCALE,
            vx_ratio: DEFAULT_VX_RATIO,
            vy_ratio: DEFAULT_VY_RATIO,
        }
    }
}

impl CropSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dsize < DSIZE_RANGE.0 || self.dsize > DSIZE_RANGE.1 {
            return Err(anyhow!(
                "crop dsize must be in [{}, {}], got {}",
                DSIZE_RANGE.0,
                DSIZE_RANGE.1,
                self.dsize
            ));
        }
        check_range("crop scale", self.scale, SCALE_RANGE)?;
        check_range("crop vx_ratio", self.vx_ratio, OFFSET_RANGE)?;
        check_range("crop vy_ratio", self.vy_ratio, OFFSET_RANGE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Directory holding the ONNX model files.
    pub model_dir: PathBuf,
    pub input_size: u32,
    pub num_keypoints: usize,
    /// Paste-back mask image; the generated mask is used when unset.
    pub mask_template: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            input_size: DEFAULT_INPUT_SIZE,
            num_keypoints: crate::keypoints::NUM_KEYPOINTS,
            mask_template: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelConfig {
    pub animation: AnimationConfig,
    pub crop: CropSettings,
    pub models: ModelSettings,
}

impl KernelConfig {
    /// Defaults, then the file named by `REENACT_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("REENACT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as [`KernelConfig::load`] with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: KernelConfigFile) -> Self {
        let defaults = AnimationConfig::default();
        let anim = file.animation.unwrap_or_default();
        let animation = AnimationConfig {
            flag_relative: anim.relative.unwrap_or(defaults.flag_relative),
            flag_stitching: anim.stitching.unwrap_or(defaults.flag_stitching),
            flag_lip_zero: anim.lip_zero.unwrap_or(defaults.flag_lip_zero),
            flag_eye_retargeting: anim
                .eye_retargeting
                .unwrap_or(defaults.flag_eye_retargeting),
            flag_lip_retargeting: anim
                .lip_retargeting
                .unwrap_or(defaults.flag_lip_retargeting),
            flag_do_crop: anim.do_crop.unwrap_or(defaults.flag_do_crop),
            flag_pasteback: anim.pasteback.unwrap_or(defaults.flag_pasteback),
            eyes_retargeting_multiplier: anim
                .eyes_retargeting_multiplier
                .unwrap_or(defaults.eyes_retargeting_multiplier),
            lip_retargeting_multiplier: anim
                .lip_retargeting_multiplier
                .unwrap_or(defaults.lip_retargeting_multiplier),
            lip_zero_threshold: anim
                .lip_zero_threshold
                .unwrap_or(defaults.lip_zero_threshold),
            mismatch_method: anim.mismatch_method.unwrap_or(defaults.mismatch_method),
        };

        let crop_file = file.crop.unwrap_or_default();
        let crop = CropSettings {
            dsize: crop_file.dsize.unwrap_or(DEFAULT_DSIZE),
            scale: crop_file.scale.unwrap_or(DEFAULT_CROP_SCALE),
            vx_ratio: crop_file.vx_ratio.unwrap_or(DEFAULT_VX_RATIO),
            vy_ratio: crop_file.vy_ratio.unwrap_or(DEFAULT_VY_RATIO),
        };

        let model_defaults = ModelSettings::default();
        let models_file = file.models.unwrap_or_default();
        let models = ModelSettings {
            model_dir: models_file.model_dir.unwrap_or(model_defaults.model_dir),
            input_size: models_file.input_size.unwrap_or(model_defaults.input_size),
            num_keypoints: models_file
                .num_keypoints
                .unwrap_or(model_defaults.num_keypoints),
            mask_template: models_file.mask_template,
        };

        Self {
            animation,
            crop,
            models,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("REENACT_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.models.model_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("REENACT_MASK_TEMPLATE") {
            if !path.trim().is_empty() {
                self.models.mask_template = Some(PathBuf::from(path));
            }
        }
        if let Ok(method) = std::env::var("REENACT_MISMATCH_METHOD") {
            if !method.trim().is_empty() {
                self.animation.mismatch_method = method.trim().parse()?;
            }
        }
        if let Ok(threshold) = std::env::var("REENACT_LIP_ZERO_THRESHOLD") {
            self.animation.lip_zero_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("REENACT_LIP_ZERO_THRESHOLD must be a number"))?;
        }
        if let Ok(dsize) = std::env::var("REENACT_DSIZE") {
            self.crop.dsize = dsize
                .trim()
                .parse()
                .map_err(|_| anyhow!("REENACT_DSIZE must be an integer pixel size"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.animation.validate()?;
        self.crop.validate()?;
        if self.models.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        if self.models.num_keypoints == 0 {
            return Err(anyhow!("model num_keypoints must be greater than zero"));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: f32, (lo, hi): (f32, f32)) -> Result<()> {
    if !(lo..=hi).contains(&value) {
        return Err(anyhow!("{name} must be in [{lo}, {hi}], got {value}"));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<KernelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
