use image::{Rgb, RgbImage};
use indicatif::ProgressBar;
use serde_json::Value;
use tempfile::NamedTempFile;

use reenact_kernel::model::stub_bundle;
use reenact_kernel::{Landmarks, ModelWrapper, MotionTemplate, WrapperSettings};

fn wrapper() -> ModelWrapper {
    ModelWrapper::new(
        stub_bundle(21),
        WrapperSettings {
            input_size: 16,
            num_keypoints: 21,
        },
    )
}

fn frames(n: u8) -> Vec<RgbImage> {
    (0..n)
        .map(|i| RgbImage::from_pixel(24, 24, Rgb([i * 30, 100, 255 - i * 20])))
        .collect()
}

fn extract(n: u8, landmarks: Option<Vec<Landmarks>>) -> MotionTemplate {
    MotionTemplate::extract(&wrapper(), &frames(n), landmarks, &ProgressBar::hidden()).unwrap()
}

#[test]
fn extracted_template_round_trips_through_disk() {
    let lmk = vec![Landmarks::new(vec![[1.0, 2.0]]); 3];
    let template = extract(3, Some(lmk));
    assert_eq!(template.len(), 3);
    for (i, frame) in template.frames.iter().enumerate() {
        assert_eq!(frame.frame_index, i);
        assert_eq!(frame.n_frames, 3);
        assert_eq!(frame.expression.len(), 63);
    }

    let file = NamedTempFile::new().unwrap();
    template.save(file.path()).unwrap();
    let loaded = MotionTemplate::load(file.path()).unwrap();
    assert_eq!(loaded, template);

    let pose = loaded.driving_pose(2, 21).unwrap();
    assert_eq!(pose.scale, template.frames[2].scale);
}

#[test]
fn extraction_matches_live_pose() {
    let w = wrapper();
    let driving = frames(2);
    let template =
        MotionTemplate::extract(&w, &driving, None, &ProgressBar::hidden()).unwrap();
    let info = w.extract_pose(&w.prepare(&driving[1])).unwrap();
    let pose = template.driving_pose(1, 21).unwrap();
    assert_eq!(pose.rotation, info.rotation());
    assert_eq!(pose.expression, info.expression);
    assert_eq!(pose.translation, info.translation);
}

#[test]
fn landmark_count_must_match_frames() {
    let lmk = vec![Landmarks::default(); 2];
    assert!(MotionTemplate::extract(&wrapper(), &frames(3), Some(lmk), &ProgressBar::hidden())
        .is_err());
}

fn tampered(edit: impl FnOnce(&mut Value)) -> anyhow::Result<MotionTemplate> {
    let template = extract(2, None);
    let mut json = serde_json::to_value(&template).unwrap();
    edit(&mut json);
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), serde_json::to_string(&json).unwrap()).unwrap();
    MotionTemplate::load(file.path())
}

#[test]
fn load_rejects_tampered_values() {
    let err = tampered(|v| v["frames"][0]["scale"] = Value::from(9.0)).unwrap_err();
    assert!(format!("{err:#}").contains("digest mismatch"));
}

#[test]
fn load_rejects_version_mismatch() {
    assert!(tampered(|v| v["version"] = Value::from(99)).is_err());
}

#[test]
fn load_rejects_reordered_frames() {
    assert!(tampered(|v| {
        if let Some(frames) = v["frames"].as_array_mut() {
            frames.swap(0, 1);
        }
    })
    .is_err());
}

#[test]
fn load_rejects_inconsistent_frame_count() {
    assert!(tampered(|v| v["frames"][1]["n_frames"] = Value::from(5)).is_err());
}

#[test]
fn load_rejects_landmarks_for_missing_frames() {
    assert!(tampered(|v| v["landmarks"] = serde_json::json!([{ "points": [] }])).is_err());
}
