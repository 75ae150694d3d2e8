use std::{path::PathBuf, process::ExitCode};

use argh::FromArgs;
use twoview::{
    error::ReconstructionError,
    io::read_json,
    reconstruction::{reconstruct_files, scale_from_images, ReconstructionConfig},
};

#[derive(FromArgs)]
/// Recover the pose of a second calibrated camera and triangulate the matched points
struct Args {
    /// path to the correspondences JSON, {"pts1": [[x, y], ..], "pts2": [[x, y], ..]}
    #[argh(option, short = 'c')]
    correspondences: PathBuf,

    /// path to the intrinsics JSON, {"K1": [[..], [..], [..]], "K2": [[..], [..], [..]]}
    #[argh(option, short = 'k')]
    intrinsics: PathBuf,

    /// where to write M2, C2 and the triangulated points
    #[argh(option, short = 'o', default = "PathBuf::from(\"reconstruction.json\")")]
    output: PathBuf,

    /// optional JSON file with a ReconstructionConfig
    #[argh(option)]
    config: Option<PathBuf>,

    /// normalization scale for the eight-point solver
    #[argh(option)]
    scale: Option<f64>,

    /// first image, only its dimensions are read
    #[argh(option)]
    image1: Option<PathBuf>,

    /// second image, only its dimensions are read
    #[argh(option)]
    image2: Option<PathBuf>,

    /// maximum accepted total squared reprojection error
    #[argh(option)]
    max_error: Option<f64>,
}

fn run(args: Args) -> Result<(), ReconstructionError> {
    let mut config = match &args.config {
        Some(path) => read_json::<ReconstructionConfig>(path)?,
        None => ReconstructionConfig::default(),
    };

    if let Some(scale) = args.scale {
        config.scale = Some(scale);
    } else if config.scale.is_none() {
        let images: Vec<_> = args.image1.iter().chain(&args.image2).collect();
        config.scale = scale_from_images(&images)?;
    }
    if let Some(max_error) = args.max_error {
        config.max_reprojection_error = max_error;
    }

    reconstruct_files(&args.correspondences, &args.intrinsics, &args.output, &config)?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
