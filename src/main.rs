use aquacal::all::*;
use aquacal::util;

use anyhow::{Context, Result};
use clap::Parser;

fn handle_error(err: &anyhow::Error) {
  for (i, e) in err.chain().enumerate() {
    eprintln!("  {}: {}", i + 1, e);
  }
}

fn main() {
  if let Err(err) = run() {
    handle_error(&err);
    std::process::exit(1);
  }
}

fn run() -> Result<()> {
  let params = ParameterSet::parse();
  util::init_logging(if params.verbose { LevelFilter::Debug } else { LevelFilter::Info });

  let config = params.to_config()?;
  info!("Calibrating camera using the following parameters:");
  info!(" - image folder: {}", params.image_folder.display());
  info!(" - checkerboard size: {}", config.board);
  info!(" - square size: {}", config.square_size);
  info!(" - refractive indices: air {}, acrylic {}, water {}",
    config.indices.air, config.indices.acrylic, config.indices.water);

  let calibrator = Calibrator::new(config)?;
  let calibration = match calibrator.calibrate_folder() {
    Ok(calibration) => calibration,
    Err(CalibrationError::NonConvergence { calibration, rms, iterations }) => {
      warn!("Refinement stopped after {} iterations at rms {:.4} px, the result may be inaccurate.", iterations, rms);
      *calibration
    },
    Err(err) => {
      return Err(err).context(format!("Calibration from {} failed.", params.image_folder.display()));
    },
  };

  for (id, reason) in calibration.report.skipped() {
    info!("Skipped {}: {}", id, reason);
  }
  info!("Intrinsic:\n{}", calibration.camera.camera_matrix());
  info!("Distortion: {:?}", calibration.camera.distortion().to_array());
  info!("Reprojection rms {:.4} px from {} images.", calibration.report.rms, calibration.report.used_count());

  let root = CameraSetupRoot { cameras: vec![CameraSetup::from(&calibration)] };
  println!("{}", root.to_json().context("Failed to serialize the camera setup.")?);
  Ok(())
}
