use crate::all::*;

pub const DEFAULT_MIN_IMAGES: usize = 3;

// Command line surface of the driver binary.
#[derive(Debug)]
#[derive(clap::Parser)]
#[clap(about = "Intrinsic calibration of a camera behind a flat underwater port.")]
pub struct ParameterSet {
  // Inner corners of the checkerboard, e.g. `9 6`.
  #[clap(short = 'c', long, alias = "cs", number_of_values = 2, required = true)]
  pub checkerboard_size: Vec<usize>,

  // Side length of one square, in centimeters.
  #[clap(short = 's', long, alias = "ss")]
  pub square_size: f64,

  #[clap(short = 'i', long, alias = "if")]
  pub image_folder: PathBuf,

  // File name suffix of the images, e.g. `.jpg`.
  #[clap(short = 't', long, alias = "it", default_value = ".jpg")]
  pub image_type: String,

  // Refractive indices.
  #[clap(long, alias = "refractive-index-air", default_value = "1.0")]
  pub n_air: f64,
  #[clap(long, alias = "refractive-index-acrylic", default_value = "1.49")]
  pub n_acrylic: f64,
  #[clap(long, alias = "refractive-index-water", default_value = "1.33")]
  pub n_water: f64,

  // Flat port geometry, same units as the square size.
  #[clap(long, default_value = "1.0")]
  pub port_distance: f64,
  #[clap(long, default_value = "0.0")]
  pub port_thickness: f64,

  // Solver.
  #[clap(long, default_value = "3")]
  pub min_images: usize,
  #[clap(long, default_value = "100")]
  pub max_iterations: usize,
  #[clap(long)]
  pub no_distortion: bool,

  #[clap(short = 'v', long)]
  pub verbose: bool,
}

impl ParameterSet {
  pub fn to_config(&self) -> CalibrationResult<CalibrationConfig> {
    if self.checkerboard_size.len() != 2 {
      return Err(CalibrationError::InvalidConfig(
        format!("checkerboard size needs two values, got {:?}", self.checkerboard_size),
      ));
    }
    let mut config = CalibrationConfig::new(
      BoardSize::new(self.checkerboard_size[0], self.checkerboard_size[1]),
      self.square_size,
    );
    config.image_folder = Some(self.image_folder.clone());
    config.image_type = self.image_type.clone();
    config.indices = RefractiveIndices {
      air: self.n_air,
      acrylic: self.n_acrylic,
      water: self.n_water,
    };
    config.interface.distance = self.port_distance;
    config.interface.thickness = self.port_thickness;
    config.min_images = self.min_images;
    config.solver.refine.max_iterations = self.max_iterations;
    config.solver.refine.estimate_distortion = !self.no_distortion;
    config.validate()?;
    Ok(config)
  }
}

// Everything a calibration run needs, checked once by `validate()`.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationConfig {
  pub board: BoardSize,
  pub square_size: f64,
  // Only needed by `Calibrator::calibrate_folder()`.
  pub image_folder: Option<PathBuf>,
  pub image_type: String,
  pub indices: RefractiveIndices,
  pub interface: FlatInterface,
  pub min_images: usize,
  pub detector: DetectorParameters,
  pub solver: SolverOptions,
}

impl CalibrationConfig {
  pub fn new(board: BoardSize, square_size: f64) -> CalibrationConfig {
    CalibrationConfig {
      board,
      square_size,
      image_folder: None,
      image_type: ".jpg".to_string(),
      indices: RefractiveIndices::default(),
      interface: FlatInterface::default(),
      min_images: DEFAULT_MIN_IMAGES,
      detector: DetectorParameters::default(),
      solver: SolverOptions::default(),
    }
  }

  pub fn validate(&self) -> CalibrationResult<()> {
    let invalid = |s: String| Err(CalibrationError::InvalidConfig(s));
    if self.board.width < 2 || self.board.height < 2 {
      return invalid(format!("checkerboard needs at least 2x2 inner corners, got {}", self.board));
    }
    if !self.square_size.is_finite() || self.square_size <= 0. {
      return invalid(format!("square size must be positive, got {}", self.square_size));
    }
    if self.image_type.is_empty() {
      return invalid("image type must not be empty".to_string());
    }
    self.indices.validate().map_err(CalibrationError::InvalidConfig)?;
    self.interface.validate().map_err(CalibrationError::InvalidConfig)?;
    if self.min_images < MIN_VIEWS {
      return invalid(format!("minimum image count must be at least {}, got {}", MIN_VIEWS, self.min_images));
    }
    if !(self.detector.blur_sigma > 0.) || self.detector.subpixel.max_iterations == 0 {
      return invalid("detector blur and subpixel iterations must be positive".to_string());
    }
    if self.solver.refine.max_iterations == 0 {
      return invalid("solver needs at least one iteration".to_string());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[test]
  fn test_parse_arguments() {
    let params = ParameterSet::try_parse_from([
      "aquacal", "-c", "9", "6", "-s", "0.935", "-i", "data/checkerboard_images", "-t", ".png",
      "--n-water", "1.34",
    ]).unwrap();
    let config = params.to_config().unwrap();
    assert_eq!(config.board, BoardSize::new(9, 6));
    assert_eq!(config.square_size, 0.935);
    assert_eq!(config.image_folder, Some(PathBuf::from("data/checkerboard_images")));
    assert_eq!(config.image_type, ".png");
    assert_eq!(config.indices, RefractiveIndices { air: 1.0, acrylic: 1.49, water: 1.34 });
    assert_eq!(config.min_images, 3);
  }

  #[test]
  fn test_long_aliases() {
    let params = ParameterSet::try_parse_from([
      "aquacal", "--cs", "7", "5", "--ss", "2.5", "--if", "images", "--it", ".jpg",
    ]).unwrap();
    assert_eq!(params.checkerboard_size, vec![7, 5]);
    assert_eq!(params.n_acrylic, 1.49);
  }

  #[test]
  fn test_missing_arguments_rejected() {
    assert!(ParameterSet::try_parse_from(["aquacal", "-s", "1.0", "-i", "x"]).is_err());
    assert!(ParameterSet::try_parse_from(["aquacal", "-c", "9", "-s", "1.0", "-i", "x"]).is_err());
  }

  #[test]
  fn test_validate() {
    let config = CalibrationConfig::new(BoardSize::new(9, 6), 0.935);
    assert!(config.validate().is_ok());

    let invalid = |config: CalibrationConfig| matches!(config.validate(), Err(CalibrationError::InvalidConfig(_)));
    assert!(invalid(CalibrationConfig::new(BoardSize::new(1, 6), 0.935)));
    assert!(invalid(CalibrationConfig::new(BoardSize::new(9, 6), 0.)));
    assert!(invalid(CalibrationConfig::new(BoardSize::new(9, 6), f64::NAN)));
    let mut config = CalibrationConfig::new(BoardSize::new(9, 6), 1.);
    config.indices.water = -1.33;
    assert!(invalid(config.clone()));
    config.indices.water = 1.33;
    config.min_images = 1;
    assert!(invalid(config.clone()));
    config.min_images = 2;
    config.interface.distance = 0.;
    assert!(invalid(config));
  }
}
