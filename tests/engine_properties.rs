use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use nalgebra::Matrix3;

use reenact_kernel::model::backends::StubRetargeter;
use reenact_kernel::model::stub_bundle;
use reenact_kernel::retargeting::{eye_close_ratio, lip_close_ratio};
use reenact_kernel::{
    AnimationConfig, Compositor, CorrectionMode, CropInfo, CropSettings, DrivingInput,
    FaceCropper, Keypoints, Landmarks, LipZero, MismatchMethod, ModelWrapper, MotionTemplate,
    MotionTransferEngine, ShapeError, StaticCropper, WrapperSettings,
};

const NUM_KP: usize = 21;

/// 203 landmarks whose eye ratio is `eye_open / 10` and lip ratio `lip_open / 20`.
fn face_landmarks(eye_open: f32, lip_open: f32, offset: f32) -> Landmarks {
    let mut points = vec![[offset + 15.0, offset + 10.0]; 203];
    let mut set = |i: usize, x: f32, y: f32| points[i] = [offset + x, offset + y];
    set(0, 0.0, 0.0);
    set(12, 10.0, 0.0);
    set(6, 5.0, -eye_open / 2.0);
    set(18, 5.0, eye_open / 2.0);
    set(24, 20.0, 0.0);
    set(36, 30.0, 0.0);
    set(30, 25.0, -eye_open / 2.0);
    set(42, 25.0, eye_open / 2.0);
    set(48, 0.0, 20.0);
    set(66, 20.0, 20.0);
    set(90, 10.0, 20.0 - lip_open / 2.0);
    set(102, 10.0, 20.0 + lip_open / 2.0);
    Landmarks::new(points)
}

fn portrait(seed: u32) -> RgbImage {
    RgbImage::from_fn(96, 96, |x, y| {
        Rgb([
            ((x * 2 + seed * 40) % 256) as u8,
            ((y * 2 + seed * 15) % 256) as u8,
            ((x + y + seed * 70) % 256) as u8,
        ])
    })
}

const RETARGET_GAIN: f32 = 0.05;

fn wrapper_with(retargeter: StubRetargeter) -> ModelWrapper {
    let mut bundle = stub_bundle(NUM_KP);
    bundle.retargeter = Box::new(retargeter);
    ModelWrapper::new(
        bundle,
        WrapperSettings {
            input_size: 32,
            num_keypoints: NUM_KP,
        },
    )
}

fn wrapper() -> ModelWrapper {
    wrapper_with(StubRetargeter::default())
}

fn crop_settings() -> CropSettings {
    CropSettings {
        dsize: 64,
        scale: 2.0,
        vx_ratio: 0.0,
        vy_ratio: 0.0,
    }
}

fn plain_config() -> AnimationConfig {
    AnimationConfig {
        flag_stitching: false,
        flag_lip_zero: false,
        ..AnimationConfig::default()
    }
}

fn static_engine(cfg: AnimationConfig, driving_lmk: Vec<Landmarks>) -> MotionTransferEngine {
    let cropper = StaticCropper::new(crop_settings())
        .with_source_landmarks(face_landmarks(4.0, 5.0, 30.0))
        .with_driving_landmarks(driving_lmk);
    MotionTransferEngine::new(wrapper(), Box::new(cropper), Compositor::default(), cfg).unwrap()
}

/// Hands out a scripted landmark set per crop call and counts the calls.
struct ScriptedCropper {
    landmarks: Vec<Landmarks>,
    calls: Arc<AtomicUsize>,
}

impl FaceCropper for ScriptedCropper {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn crop_single_image(&mut self, frame: &RgbImage) -> Result<CropInfo> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let dsize = 64;
        let sx = frame.width() as f32 / dsize as f32;
        let sy = frame.height() as f32 / dsize as f32;
        Ok(CropInfo {
            image: imageops::resize(frame, dsize, dsize, FilterType::Triangle),
            landmarks: self.landmarks[call.min(self.landmarks.len() - 1)].clone(),
            crop_to_original: Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0),
        })
    }

    fn retargeting_landmarks(&mut self, frames: &[RgbImage]) -> Result<Vec<Landmarks>> {
        Ok(vec![face_landmarks(4.0, 5.0, 0.0); frames.len()])
    }
}

#[test]
fn identical_driving_frames_give_identical_output() {
    let mut engine = static_engine(plain_config(), Vec::new());
    let driving = vec![portrait(3); 5];
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();

    assert_eq!(out.cropped.len(), 5);
    assert_eq!(out.full.len(), 5);
    for i in 1..5 {
        assert_eq!(out.cropped[i], out.cropped[0]);
        assert_eq!(out.full[i], out.full[0]);
    }
}

#[test]
fn relative_frame_zero_matches_source_projection() {
    let mut engine = static_engine(plain_config(), Vec::new());
    let source = portrait(0);
    let driving = vec![portrait(5), portrait(9)];
    let out = engine
        .execute(std::slice::from_ref(&source), DrivingInput::Frames(&driving))
        .unwrap();

    let mut cropper = StaticCropper::new(crop_settings())
        .with_source_landmarks(face_landmarks(4.0, 5.0, 30.0));
    let crop = cropper.crop_single_image(&source).unwrap();
    let w = engine.wrapper();
    let info = w.extract_pose(&w.prepare(&crop.image)).unwrap();
    let projected = w.project_canonical(&info).unwrap();

    let diff = out.reports[0].provisional.max_abs_diff(&projected).unwrap();
    assert!(diff < 1e-4, "frame 0 drifted from the source projection by {diff}");
    assert_eq!(out.reports[0].corrected, out.reports[0].provisional);
}

#[test]
fn lip_zero_latch_stays_off_for_the_rest_of_the_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cropper = ScriptedCropper {
        landmarks: vec![
            face_landmarks(4.0, 5.0, 0.0),
            face_landmarks(4.0, 0.2, 0.0),
            face_landmarks(4.0, 5.0, 0.0),
        ],
        calls: Arc::clone(&calls),
    };
    let cfg = AnimationConfig {
        flag_stitching: false,
        mismatch_method: MismatchMethod::Cycle,
        ..AnimationConfig::default()
    };
    let mut engine =
        MotionTransferEngine::new(wrapper(), Box::new(cropper), Compositor::default(), cfg.clone())
            .unwrap();

    let sources = [portrait(0), portrait(1)];
    let driving = vec![portrait(4); 3];
    let out = engine
        .execute(&sources, DrivingInput::Frames(&driving))
        .unwrap();

    let states: Vec<LipZero> = out.reports.iter().map(|r| r.lip_zero).collect();
    assert_eq!(
        states,
        vec![
            LipZero::Enabled,
            LipZero::DisabledByDegenerateCheck,
            LipZero::DisabledByDegenerateCheck
        ]
    );
    assert!(out.reports[0].lip_correction_applied);
    assert_ne!(out.reports[0].corrected, out.reports[0].provisional);
    for report in &out.reports[1..] {
        assert!(!report.lip_correction_applied);
        assert_eq!(report.corrected, report.provisional);
    }
    // Two sources means no caching: one crop per frame.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // The run never writes the latch back into the configuration.
    assert_eq!(engine.config(), &cfg);
}

#[test]
fn latch_resets_between_runs() {
    let cropper = ScriptedCropper {
        landmarks: vec![face_landmarks(4.0, 0.2, 0.0), face_landmarks(4.0, 5.0, 0.0)],
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let cfg = AnimationConfig {
        flag_stitching: false,
        ..AnimationConfig::default()
    };
    let mut engine =
        MotionTransferEngine::new(wrapper(), Box::new(cropper), Compositor::default(), cfg)
            .unwrap();
    let driving = vec![portrait(4)];

    let first = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();
    assert_eq!(first.reports[0].lip_zero, LipZero::DisabledByDegenerateCheck);

    let second = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();
    assert_eq!(second.reports[0].lip_zero, LipZero::Enabled);
    assert!(second.reports[0].lip_correction_applied);
}

#[test]
fn single_source_is_cropped_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cropper = ScriptedCropper {
        landmarks: vec![face_landmarks(4.0, 5.0, 0.0)],
        calls: Arc::clone(&calls),
    };
    let mut engine =
        MotionTransferEngine::new(wrapper(), Box::new(cropper), Compositor::default(), plain_config())
            .unwrap();
    let driving: Vec<RgbImage> = (0..4).map(portrait).collect();
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();
    assert_eq!(out.full.len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn exactly_one_branch_per_flag_combination() {
    let driving = vec![portrait(2), portrait(6)];
    let driving_lmk = vec![face_landmarks(3.0, 6.0, 0.0), face_landmarks(5.0, 2.0, 0.0)];

    for bits in 0u8..32 {
        let cfg = AnimationConfig {
            flag_relative: bits & 1 != 0,
            flag_stitching: bits & 2 != 0,
            flag_eye_retargeting: bits & 4 != 0,
            flag_lip_retargeting: bits & 8 != 0,
            flag_lip_zero: bits & 16 != 0,
            ..AnimationConfig::default()
        };
        let expected = CorrectionMode::from_config(&cfg);
        let mut engine = static_engine(cfg.clone(), driving_lmk.clone());
        let out = engine
            .execute(&[portrait(0)], DrivingInput::Frames(&driving))
            .unwrap();

        for report in &out.reports {
            assert_eq!(report.mode, expected, "flags {bits:05b}");
            match report.mode {
                CorrectionMode::Plain => {
                    assert_eq!(report.lip_correction_applied, cfg.flag_lip_zero);
                    if !cfg.flag_lip_zero {
                        assert_eq!(report.corrected, report.provisional);
                    }
                }
                CorrectionMode::Stitched => {
                    assert_eq!(report.lip_correction_applied, cfg.flag_lip_zero);
                    assert_ne!(report.corrected, report.provisional);
                }
                CorrectionMode::Retargeted { eye, lip, stitch } => {
                    assert!(eye || lip);
                    assert_eq!(stitch, cfg.flag_stitching);
                    assert!(!report.lip_correction_applied);
                }
            }
        }
    }
}

#[test]
fn empty_driving_gives_empty_output() {
    let cfg = AnimationConfig {
        mismatch_method: MismatchMethod::Nearest,
        ..AnimationConfig::default()
    };
    let mut engine = static_engine(cfg, Vec::new());
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&[]))
        .unwrap();
    assert!(out.cropped.is_empty());
    assert!(out.full.is_empty());
    assert!(out.reports.is_empty());
}

#[test]
fn mirror_policy_drives_source_selection() {
    let cfg = AnimationConfig {
        mismatch_method: MismatchMethod::Mirror,
        ..plain_config()
    };
    let mut engine = static_engine(cfg, Vec::new());
    let sources = [portrait(0), portrait(1), portrait(2)];
    let driving = vec![portrait(7); 7];
    let out = engine
        .execute(&sources, DrivingInput::Frames(&driving))
        .unwrap();
    let picked: Vec<usize> = out.reports.iter().map(|r| r.source_index).collect();
    assert_eq!(picked, vec![0, 1, 2, 1, 0, 1, 2]);
}

#[test]
fn nearest_with_one_driving_frame_uses_first_source() {
    let cfg = AnimationConfig {
        mismatch_method: MismatchMethod::Nearest,
        ..plain_config()
    };
    let mut engine = static_engine(cfg, Vec::new());
    let sources = [portrait(0), portrait(1), portrait(2)];
    let driving = vec![portrait(7)];
    let out = engine
        .execute(&sources, DrivingInput::Frames(&driving))
        .unwrap();
    assert_eq!(out.reports[0].source_index, 0);
}

#[test]
fn template_matches_live_driving() {
    let driving: Vec<RgbImage> = (3..7).map(portrait).collect();
    let mut engine = static_engine(AnimationConfig::default(), Vec::new());
    let live = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();

    let template = MotionTemplate::extract(
        engine.wrapper(),
        &driving,
        None,
        &indicatif::ProgressBar::hidden(),
    )
    .unwrap();
    let replay = engine
        .execute(&[portrait(0)], DrivingInput::Template(&template))
        .unwrap();

    assert_eq!(replay.cropped, live.cropped);
    assert_eq!(replay.full, live.full);
}

#[test]
fn retargeting_without_template_landmarks_is_a_config_error() {
    let driving = vec![portrait(3); 2];
    let cfg = AnimationConfig {
        flag_eye_retargeting: true,
        ..AnimationConfig::default()
    };
    let mut engine = static_engine(cfg, Vec::new());
    let template = MotionTemplate::extract(
        engine.wrapper(),
        &driving,
        None,
        &indicatif::ProgressBar::hidden(),
    )
    .unwrap();
    assert!(engine
        .execute(&[portrait(0)], DrivingInput::Template(&template))
        .is_err());
}

#[test]
fn retargeting_needs_landmarks_for_every_driving_frame() {
    let cfg = AnimationConfig {
        flag_lip_retargeting: true,
        ..AnimationConfig::default()
    };
    let mut engine = static_engine(cfg, vec![face_landmarks(4.0, 5.0, 0.0)]);
    let driving = vec![portrait(3); 2];
    assert!(engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .is_err());
}

#[test]
fn short_landmark_sets_surface_as_shape_errors() {
    let cfg = AnimationConfig {
        flag_stitching: false,
        ..AnimationConfig::default()
    };
    let cropper = StaticCropper::new(crop_settings())
        .with_source_landmarks(Landmarks::new(vec![[30.0, 30.0], [60.0, 60.0]]));
    let mut engine =
        MotionTransferEngine::new(wrapper(), Box::new(cropper), Compositor::default(), cfg)
            .unwrap();
    let err = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&[portrait(1)]))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ShapeError>(),
        Some(ShapeError::LandmarkCount { .. })
    ));
}

#[test]
fn without_pasteback_the_full_frame_is_the_warped_crop() {
    let cfg = AnimationConfig {
        flag_pasteback: false,
        ..plain_config()
    };
    let mut engine = static_engine(cfg, Vec::new());
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&[portrait(2)]))
        .unwrap();

    let mut cropper = StaticCropper::new(crop_settings())
        .with_source_landmarks(face_landmarks(4.0, 5.0, 30.0));
    let crop = cropper.crop_single_image(&portrait(0)).unwrap();
    let resized = imageops::resize(&out.cropped[0], 64, 64, FilterType::Triangle);
    let expected =
        reenact_kernel::compositor::warp_affine(&resized, &crop.crop_to_original, 96, 96).unwrap();
    assert_eq!(out.full[0], expected);
}

fn retargeting_engine(cfg: AnimationConfig, driving_lmk: Vec<Landmarks>) -> MotionTransferEngine {
    let cropper = StaticCropper::new(crop_settings())
        .with_source_landmarks(face_landmarks(4.0, 5.0, 30.0))
        .with_driving_landmarks(driving_lmk);
    MotionTransferEngine::new(
        wrapper_with(StubRetargeter::with_gain(RETARGET_GAIN)),
        Box::new(cropper),
        Compositor::default(),
        cfg,
    )
    .unwrap()
}

fn retargeting_driving() -> (Vec<RgbImage>, Vec<Landmarks>) {
    (
        vec![portrait(2), portrait(6)],
        vec![face_landmarks(3.0, 6.0, 0.0), face_landmarks(5.0, 2.0, 0.0)],
    )
}

/// Source crop landmarks and projected source keypoints for `portrait(0)`.
fn source_reference(engine: &MotionTransferEngine) -> (Landmarks, Keypoints) {
    let mut cropper = StaticCropper::new(crop_settings())
        .with_source_landmarks(face_landmarks(4.0, 5.0, 30.0));
    let crop = cropper.crop_single_image(&portrait(0)).unwrap();
    let w = engine.wrapper();
    let info = w.extract_pose(&w.prepare(&crop.image)).unwrap();
    (crop.landmarks, w.project_canonical(&info).unwrap())
}

fn lip_only(relative: bool, stitching: bool, multiplier: f32) -> AnimationConfig {
    AnimationConfig {
        flag_relative: relative,
        flag_stitching: stitching,
        flag_lip_zero: false,
        flag_lip_retargeting: true,
        lip_retargeting_multiplier: multiplier,
        ..AnimationConfig::default()
    }
}

fn assert_keypoints_close(actual: &Keypoints, expected: &Keypoints, what: &str) {
    let diff = actual.max_abs_diff(expected).unwrap();
    assert!(diff < 1e-6, "{what}: off by {diff}");
}

#[test]
fn relative_lip_retargeting_starts_from_source_keypoints() {
    let (driving, driving_lmk) = retargeting_driving();
    let mut engine = retargeting_engine(lip_only(true, false, 1.0), driving_lmk.clone());
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();
    let (src_lmk, kp_source) = source_reference(&engine);
    let src_lip = lip_close_ratio(&src_lmk).unwrap();

    for (report, lmk) in out.reports.iter().zip(&driving_lmk) {
        let drv_lip = lip_close_ratio(lmk).unwrap();
        let delta = engine
            .wrapper()
            .retarget_lip(&kp_source, &[src_lip, drv_lip])
            .unwrap();
        let expected = kp_source.checked_add(&delta).unwrap();
        assert_keypoints_close(&report.corrected, &expected, "relative lip");
        assert!(!report.lip_correction_applied);
    }
    // Frame 1 moves away from the source while the correction stays anchored on it.
    assert!(out.reports[1].provisional.max_abs_diff(&kp_source).unwrap() > 1e-4);
}

#[test]
fn absolute_lip_retargeting_adds_delta_to_driving_keypoints() {
    let (driving, driving_lmk) = retargeting_driving();
    let mut engine = retargeting_engine(lip_only(false, false, 1.0), driving_lmk.clone());
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();
    let (src_lmk, kp_source) = source_reference(&engine);
    let src_lip = lip_close_ratio(&src_lmk).unwrap();

    for (report, lmk) in out.reports.iter().zip(&driving_lmk) {
        let drv_lip = lip_close_ratio(lmk).unwrap();
        let delta = engine
            .wrapper()
            .retarget_lip(&kp_source, &[src_lip, drv_lip])
            .unwrap();
        let expected = report.provisional.checked_add(&delta).unwrap();
        assert_keypoints_close(&report.corrected, &expected, "absolute lip");
        assert_ne!(report.corrected, report.provisional);
    }
}

#[test]
fn lip_multiplier_scales_source_and_driving_ratios() {
    let (driving, driving_lmk) = retargeting_driving();
    let run = |multiplier: f32| {
        retargeting_engine(lip_only(false, false, multiplier), driving_lmk.clone())
            .execute(&[portrait(0)], DrivingInput::Frames(&driving))
            .unwrap()
    };
    let single = run(1.0);
    let double = run(2.0);
    let src_lip = lip_close_ratio(&face_landmarks(4.0, 5.0, 30.0)).unwrap();

    for (i, lmk) in driving_lmk.iter().enumerate() {
        let (a, b) = (&single.reports[i], &double.reports[i]);
        assert_eq!(a.provisional, b.provisional);
        // The stub lip delta is gain * m * (drv - src), so doubling m adds
        // one more gain * (drv - src) to every coordinate.
        let step = RETARGET_GAIN * (lip_close_ratio(lmk).unwrap() - src_lip);
        assert!(step.abs() > 1e-3);
        let added = b.corrected.checked_sub(&a.corrected).unwrap();
        for v in added.as_array().iter() {
            assert!((v - step).abs() < 1e-5, "frame {i}: added {v}, expected {step}");
        }
    }
}

#[test]
fn eye_multiplier_scales_the_combined_eye_ratio() {
    let (driving, driving_lmk) = retargeting_driving();
    let cfg = AnimationConfig {
        flag_stitching: false,
        flag_lip_zero: false,
        flag_eye_retargeting: true,
        eyes_retargeting_multiplier: 2.0,
        ..AnimationConfig::default()
    };
    let mut engine = retargeting_engine(cfg, driving_lmk.clone());
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();
    let (src_lmk, kp_source) = source_reference(&engine);
    let [src_left, src_right] = eye_close_ratio(&src_lmk).unwrap();

    for (report, lmk) in out.reports.iter().zip(&driving_lmk) {
        let [drv_left, _] = eye_close_ratio(lmk).unwrap();
        let ratio = [2.0 * src_left, 2.0 * src_right, 2.0 * drv_left];
        let delta = engine.wrapper().retarget_eye(&kp_source, &ratio).unwrap();
        let expected = kp_source.checked_add(&delta).unwrap();
        assert_keypoints_close(&report.corrected, &expected, "relative eye");
    }
}

#[test]
fn stitching_runs_after_retargeting() {
    let (driving, driving_lmk) = retargeting_driving();
    let mut engine = retargeting_engine(lip_only(true, true, 1.0), driving_lmk.clone());
    let out = engine
        .execute(&[portrait(0)], DrivingInput::Frames(&driving))
        .unwrap();
    let (src_lmk, kp_source) = source_reference(&engine);
    let src_lip = lip_close_ratio(&src_lmk).unwrap();

    for (report, lmk) in out.reports.iter().zip(&driving_lmk) {
        let drv_lip = lip_close_ratio(lmk).unwrap();
        let w = engine.wrapper();
        let delta = w.retarget_lip(&kp_source, &[src_lip, drv_lip]).unwrap();
        let retargeted = kp_source.checked_add(&delta).unwrap();
        let expected = w.stitch(&kp_source, &retargeted).unwrap();
        assert_keypoints_close(&report.corrected, &expected, "stitched lip");
        assert_ne!(report.corrected, retargeted);
    }
}
