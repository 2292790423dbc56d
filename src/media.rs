//! Local image sequence I/O.
//!
//! - Frame sequences are directories of PNG/JPEG files, ordered by file name
//! - Landmarks are JSON: one `{"points": [[x, y], ...]}` object, or a list of
//!   them for a driving sequence

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::keypoints::Landmarks;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

fn ensure_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("empty path"));
    }
    Ok(())
}

pub fn load_image(path: &Path) -> Result<RgbImage> {
    ensure_path(path)?;
    Ok(image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .to_rgb8())
}

/// Frame files in `dir`, sorted by name.
pub fn frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_path(dir)?;
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list frame directory {}", dir.display()))?
    {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_frame && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn load_frames_from_dir(dir: &Path) -> Result<Vec<RgbImage>> {
    let paths = frame_paths(dir)?;
    if paths.is_empty() {
        log::warn!("no PNG/JPEG frames found in {}", dir.display());
    }
    paths.iter().map(|path| load_image(path)).collect()
}

/// Write `frames` as `frame_00000.png`, `frame_00001.png`, ... under `dir`.
pub fn save_frames(dir: &Path, frames: &[RgbImage]) -> Result<Vec<PathBuf>> {
    ensure_path(dir)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let path = dir.join(format!("frame_{i:05}.png"));
            frame
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(path)
        })
        .collect()
}

/// One landmark set.
pub fn load_landmarks(path: &Path) -> Result<Landmarks> {
    read_json(path)
}

/// One landmark set per frame.
pub fn load_landmark_sequence(path: &Path) -> Result<Vec<Landmarks>> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    ensure_path(path)?;
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read landmarks {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("invalid landmarks {}: {}", path.display(), e))
}
