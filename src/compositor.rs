//! Paste-back compositing.
//!
//! The decoded crop is warped into the source frame's coordinate space and,
//! when paste-back is enabled, blended against the source frame through a
//! warped soft mask:
//!
//! `output = clip(mask · warped_crop + (1 − mask) · original, 0, 255)`
//!
//! The mask template is loaded once per `Compositor` and reused across frames
//! and runs.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;

use crate::crop::CropInfo;
use crate::error::ShapeError;

/// Side length of the generated mask template.
pub const DEFAULT_MASK_SIZE: u32 = 512;

/// Where the soft mask template comes from.
#[derive(Clone, Debug, Default)]
pub enum MaskSource {
    /// Feathered ellipse generated in memory.
    #[default]
    Generated,
    /// Image file read on first use.
    File(PathBuf),
    /// Caller-supplied image.
    Image(RgbImage),
}

pub struct Compositor {
    source: MaskSource,
    mask: OnceLock<RgbImage>,
}

impl Compositor {
    pub fn new(source: MaskSource) -> Self {
        Self {
            source,
            mask: OnceLock::new(),
        }
    }

    /// The mask template, loaded on first call and cached afterwards.
    pub fn mask(&self) -> Result<&RgbImage> {
        if let Some(mask) = self.mask.get() {
            return Ok(mask);
        }
        let loaded = match &self.source {
            MaskSource::Generated => generated_mask(DEFAULT_MASK_SIZE, DEFAULT_MASK_SIZE),
            MaskSource::File(path) => image::open(path)
                .with_context(|| format!("failed to read mask template {}", path.display()))?
                .to_rgb8(),
            MaskSource::Image(img) => img.clone(),
        };
        log::debug!(
            "mask template ready ({}x{})",
            loaded.width(),
            loaded.height()
        );
        Ok(self.mask.get_or_init(|| loaded))
    }

    /// Warp `crop` back into `original`'s frame and optionally blend it in.
    pub fn paste_back(
        &self,
        crop: &RgbImage,
        crop_info: &CropInfo,
        original: &RgbImage,
        pasteback: bool,
    ) -> Result<RgbImage> {
        let (crop_w, crop_h) = crop_info.image.dimensions();
        let (width, height) = original.dimensions();

        let crop = fit_to(crop, crop_w, crop_h);
        let warped = warp_affine(&crop, &crop_info.crop_to_original, width, height)?;
        if !pasteback {
            return Ok(warped);
        }

        let mask = fit_to(self.mask()?, crop_w, crop_h);
        let mask_ori = warp_affine(&mask, &crop_info.crop_to_original, width, height)?;
        blend(&warped, &mask_ori, original)
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(MaskSource::default())
    }
}

/// Affine warp with bilinear sampling; uncovered pixels are black.
///
/// Only the top two rows of `transform` are used, mapping input coordinates
/// to output coordinates.
pub fn warp_affine(
    image: &RgbImage,
    transform: &Matrix3<f32>,
    width: u32,
    height: u32,
) -> Result<RgbImage> {
    let m = transform;
    #[rustfmt::skip]
    let projection = Projection::from_matrix([
        m[(0, 0)], m[(0, 1)], m[(0, 2)],
        m[(1, 0)], m[(1, 1)], m[(1, 2)],
        0.0,       0.0,       1.0,
    ])
    .ok_or_else(|| anyhow!("affine transform is not invertible"))?;

    let mut out = RgbImage::new(width, height);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut out,
    );
    Ok(out)
}

/// Per-channel linear blend through `mask` (255 = fully `warped`).
pub fn blend(warped: &RgbImage, mask: &RgbImage, original: &RgbImage) -> Result<RgbImage> {
    for (what, img) in [("warped crop", warped), ("mask", mask)] {
        if img.dimensions() != original.dimensions() {
            return Err(ShapeError::Tensor {
                what,
                expected: vec![original.height() as usize, original.width() as usize, 3],
                got: vec![img.height() as usize, img.width() as usize, 3],
            }
            .into());
        }
    }

    let mut out = RgbImage::new(original.width(), original.height());
    for (((dst, w), m), o) in out
        .pixels_mut()
        .zip(warped.pixels())
        .zip(mask.pixels())
        .zip(original.pixels())
    {
        for c in 0..3 {
            let alpha = m[c] as f32 / 255.0;
            let value = alpha * w[c] as f32 + (1.0 - alpha) * o[c] as f32;
            dst[c] = value.clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Feathered elliptical mask: opaque in the centre, fading to zero at the edge.
pub fn generated_mask(width: u32, height: u32) -> RgbImage {
    const INNER: f32 = 0.75;
    const OUTER: f32 = 0.95;

    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    RgbImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 + 0.5 - cx) / cx;
        let dy = (y as f32 + 0.5 - cy) / cy;
        let d = (dx * dx + dy * dy).sqrt();
        let alpha = ((OUTER - d) / (OUTER - INNER)).clamp(0.0, 1.0);
        let v = (alpha * 255.0).round() as u8;
        Rgb([v, v, v])
    })
}

fn fit_to(image: &RgbImage, width: u32, height: u32) -> Cow<'_, RgbImage> {
    if image.dimensions() == (width, height) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(imageops::resize(image, width, height, FilterType::Triangle))
    }
}
