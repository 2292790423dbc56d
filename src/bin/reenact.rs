//! reenact - Animate a source portrait with driving motion.
//!
//! Reads the source image(s) and either a directory of driving frames or a
//! motion template, runs the motion-transfer engine and writes two PNG
//! sequences under `--out`:
//! - `cropped/`: the decoded face crops
//! - `full/`: the crops pasted back into the source framing

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use reenact_kernel::ui::Ui;
use reenact_kernel::{
    media, model, Compositor, DrivingInput, KernelConfig, LipZero, MaskSource, MismatchMethod,
    MotionTemplate, MotionTransferEngine, StaticCropper,
};

#[derive(Parser, Debug)]
#[command(
    name = "reenact",
    version,
    about = "Animate a source portrait with driving motion"
)]
struct Args {
    /// Source image; repeat for a source sequence
    #[arg(long, required = true, num_args = 1.., value_name = "PATH")]
    source: Vec<PathBuf>,

    /// Directory of driving frames (PNG/JPEG, name order)
    #[arg(
        long,
        value_name = "DIR",
        conflicts_with = "template",
        required_unless_present = "template"
    )]
    driving_dir: Option<PathBuf>,

    /// Motion template produced by motion_template
    #[arg(long, value_name = "PATH")]
    template: Option<PathBuf>,

    /// Output directory
    #[arg(long, value_name = "DIR")]
    out: PathBuf,

    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "REENACT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// 203-point source landmarks (JSON, source image coordinates)
    #[arg(long, value_name = "PATH")]
    source_landmarks: Option<PathBuf>,

    /// Per-frame 203-point driving landmarks (JSON list)
    #[arg(long, value_name = "PATH", conflicts_with = "template")]
    driving_landmarks: Option<PathBuf>,

    /// Source/driving length mismatch policy (repeat|cycle|mirror|nearest)
    #[arg(long, value_name = "METHOD")]
    mismatch: Option<MismatchMethod>,

    /// Use deterministic stub models instead of ONNX
    #[arg(long)]
    stub: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = {
        let _stage = ui.stage("Load config");
        KernelConfig::load_from(args.config.as_deref())?
    };

    let sources = {
        let _stage = ui.stage("Load source");
        args.source
            .iter()
            .map(|path| media::load_image(path))
            .collect::<Result<Vec<_>>>()?
    };

    let source_landmarks = args
        .source_landmarks
        .as_deref()
        .map(media::load_landmarks)
        .transpose()?;
    if source_landmarks.is_none() {
        if config.animation.retargeting() {
            return Err(anyhow!("eye/lip retargeting needs --source-landmarks"));
        }
        if config.animation.flag_lip_zero {
            log::warn!("no source landmarks; lip-zero disabled");
            config.animation.flag_lip_zero = false;
        }
    }

    let mut cropper = StaticCropper::new(config.crop);
    if let Some(lmk) = source_landmarks {
        cropper = cropper.with_source_landmarks(lmk);
    }
    if let Some(path) = &args.driving_landmarks {
        cropper = cropper.with_driving_landmarks(media::load_landmark_sequence(path)?);
    }

    let wrapper = {
        let _stage = ui.stage("Load models");
        model::build_wrapper(&config.models, args.stub)?
    };
    let mask = match &config.models.mask_template {
        Some(path) => MaskSource::File(path.clone()),
        None => MaskSource::Generated,
    };
    if let Some(method) = args.mismatch {
        config.animation.mismatch_method = method;
    }
    let mut engine = MotionTransferEngine::new(
        wrapper,
        Box::new(cropper),
        Compositor::new(mask),
        config.animation.clone(),
    )?
    .with_progress(ui.frame_progress("animate"));

    let driving_frames;
    let template;
    let driving = match (&args.driving_dir, &args.template) {
        (Some(dir), _) => {
            let _stage = ui.stage("Load driving frames");
            driving_frames = media::load_frames_from_dir(dir)?;
            DrivingInput::Frames(&driving_frames)
        }
        (None, Some(path)) => {
            let _stage = ui.stage("Load motion template");
            template = MotionTemplate::load(path)?;
            DrivingInput::Template(&template)
        }
        (None, None) => return Err(anyhow!("pass --driving-dir or --template")),
    };

    let output = {
        let _stage = ui.stage("Animate");
        engine.execute(&sources, driving)?
    };

    {
        let _stage = ui.stage("Write frames");
        media::save_frames(&args.out.join("cropped"), &output.cropped)?;
        media::save_frames(&args.out.join("full"), &output.full)?;
    }

    let lip_zero_latched = output
        .reports
        .iter()
        .any(|r| r.lip_zero == LipZero::DisabledByDegenerateCheck);
    println!(
        "reenact: wrote {} frames to {}",
        output.full.len(),
        args.out.display()
    );
    if lip_zero_latched {
        println!("reenact: lip-zero switched off (source lip ratio below threshold)");
    }
    Ok(())
}
