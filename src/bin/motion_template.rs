//! motion_template - Extract a reusable motion template from driving frames.
//!
//! The template records the driving pose of every frame (and, optionally,
//! the retargeting landmarks) so `reenact --template` can skip driving pose
//! extraction.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use reenact_kernel::ui::Ui;
use reenact_kernel::{media, model, KernelConfig, MotionTemplate};

#[derive(Parser, Debug)]
#[command(
    name = "motion_template",
    version,
    about = "Extract a motion template from a directory of driving frames"
)]
struct Args {
    /// Directory of driving frames (PNG/JPEG, name order)
    #[arg(long, value_name = "DIR")]
    driving_dir: PathBuf,

    /// Output template file (JSON)
    #[arg(long, value_name = "PATH")]
    out: PathBuf,

    /// Per-frame 203-point driving landmarks to store with the template
    #[arg(long, value_name = "PATH")]
    driving_landmarks: Option<PathBuf>,

    /// Use deterministic stub models instead of ONNX
    #[arg(long)]
    stub: bool,

    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "REENACT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

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

    let config = KernelConfig::load_from(args.config.as_deref())?;
    let frames = {
        let _stage = ui.stage("Load driving frames");
        media::load_frames_from_dir(&args.driving_dir)?
    };
    let landmarks = args
        .driving_landmarks
        .as_deref()
        .map(media::load_landmark_sequence)
        .transpose()?;
    let wrapper = {
        let _stage = ui.stage("Load models");
        model::build_wrapper(&config.models, args.stub)?
    };

    let template = {
        let _stage = ui.stage("Extract motion");
        MotionTemplate::extract(
            &wrapper,
            &frames,
            landmarks,
            &ui.frame_progress("extract"),
        )?
    };
    template.save(&args.out)?;

    println!(
        "motion_template: {} frames -> {} (digest {})",
        template.len(),
        args.out.display(),
        &template.digest[..16]
    );
    Ok(())
}
