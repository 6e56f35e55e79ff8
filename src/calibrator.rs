use crate::all::*;

use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub enum ImageStatus {
  // Reprojection RMS of the image in pixels and the estimated board pose.
  Used { rms: f64, pose: Pose },
  Skipped(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageDiagnostics {
  pub id: String,
  pub status: ImageStatus,
}

#[derive(Clone, Debug)]
pub struct CalibrationReport {
  // In input order (sorted file names for folders).
  pub images: Vec<ImageDiagnostics>,
  pub rms: f64,
  pub iterations: usize,
}

impl CalibrationReport {
  pub fn used_count(&self) -> usize {
    self.images.iter().filter(|x| matches!(x.status, ImageStatus::Used { .. })).count()
  }

  pub fn skipped(&self) -> impl Iterator<Item = (&str, &str)> {
    self.images.iter().filter_map(|x| match &x.status {
      ImageStatus::Skipped(reason) => Some((x.id.as_str(), reason.as_str())),
      ImageStatus::Used { .. } => None,
    })
  }
}

#[derive(Clone, Debug)]
pub struct Calibration {
  pub camera: CameraModel,
  pub report: CalibrationReport,
}

// Detector output for one input image.
struct Detection {
  id: String,
  image_size: (usize, usize),
  corners: Result<CornerSet, String>,
}

pub struct Calibrator {
  config: CalibrationConfig,
  grid: ObjectGrid,
}

impl Calibrator {
  pub fn new(config: CalibrationConfig) -> CalibrationResult<Calibrator> {
    config.validate()?;
    let grid = ObjectGrid::new(config.board, config.square_size);
    Ok(Calibrator { config, grid })
  }

  pub fn config(&self) -> &CalibrationConfig {
    &self.config
  }

  pub fn grid(&self) -> &ObjectGrid {
    &self.grid
  }

  pub fn calibrate(&self, images: Vec<CalibrationImage>) -> CalibrationResult<Calibration> {
    let detector = Detector::new(self.config.board, self.config.detector.clone());
    let detections = images.into_par_iter()
      .map(|image| detect(&detector, image))
      .collect();
    self.solve(detections)
  }

  // Calibrates from the files in `image_folder` whose names end with
  // `image_type`. Files that fail to decode are skipped like images without
  // a checkerboard.
  pub fn calibrate_folder(&self) -> CalibrationResult<Calibration> {
    let paths = self.image_paths()?;
    info!("Found {} {} images.", paths.len(), self.config.image_type);
    let detector = Detector::new(self.config.board, self.config.detector.clone());
    let detections = paths.par_iter()
      .map(|path| match CalibrationImage::open(path) {
        Ok(image) => detect(&detector, image),
        Err(err) => Detection {
          id: path.display().to_string(),
          image_size: (0, 0),
          corners: Err(format!("failed to load image: {}", err)),
        },
      })
      .collect();
    self.solve(detections)
  }

  fn image_paths(&self) -> CalibrationResult<Vec<PathBuf>> {
    let folder = self.config.image_folder.as_ref()
      .ok_or_else(|| CalibrationError::InvalidConfig("no image folder given".to_string()))?;
    let io_error = |source| CalibrationError::Io { path: folder.clone(), source };
    let mut paths = vec![];
    for entry in std::fs::read_dir(folder).map_err(io_error)? {
      let path = entry.map_err(io_error)?.path();
      let matches = path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.ends_with(&self.config.image_type));
      if matches && path.is_file() {
        paths.push(path);
      }
    }
    paths.sort();
    Ok(paths)
  }

  fn solve(&self, detections: Vec<Detection>) -> CalibrationResult<Calibration> {
    let mut image_size = None;
    let mut statuses = Vec::with_capacity(detections.len());
    let mut views = vec![];
    for detection in detections {
      let Detection { id, image_size: size, corners } = detection;
      let status = match corners {
        Ok(corners) => {
          let expected = *image_size.get_or_insert(size);
          if size == expected {
            views.push(View::new(id.clone(), corners, &self.grid));
            None
          }
          else {
            Some(format!(
              "image size {}x{} differs from {}x{}",
              size.0, size.1, expected.0, expected.1,
            ))
          }
        },
        Err(reason) => Some(reason),
      };
      if let Some(reason) = &status {
        warn!("Skipping {}: {}", id, reason);
      }
      statuses.push((id, status));
    }

    if views.len() < self.config.min_images {
      return Err(CalibrationError::InsufficientData {
        found: views.len(),
        required: self.config.min_images,
      });
    }
    let image_size = image_size.unwrap_or((0, 0));
    info!("Calibrating from {} of {} images.", views.len(), statuses.len());

    let solver = IntrinsicSolver::new(self.config.solver.clone());
    match solver.solve(&views, image_size) {
      Ok(solution) => Ok(self.assemble(solution, image_size, statuses)),
      Err(SolverError::NonConvergence { best, iterations }) => {
        let rms = best.rms;
        Err(CalibrationError::NonConvergence {
          calibration: Box::new(self.assemble(*best, image_size, statuses)),
          rms,
          iterations,
        })
      },
      Err(SolverError::InsufficientViews { found, required }) => {
        Err(CalibrationError::InsufficientData { found, required })
      },
      Err(SolverError::Degenerate(reason)) => Err(CalibrationError::DegeneratePoses(reason)),
      Err(SolverError::InvalidView { view, reason }) => {
        Err(CalibrationError::DegeneratePoses(format!("{}: {}", views[view].id, reason)))
      },
    }
  }

  fn assemble(
    &self,
    solution: IntrinsicSolution,
    image_size: (usize, usize),
    statuses: Vec<(String, Option<String>)>,
  ) -> Calibration {
    let mut used = solution.poses.iter().zip(&solution.per_view_rms);
    let images = statuses.into_iter()
      .map(|(id, skipped)| {
        let status = match skipped {
          Some(reason) => ImageStatus::Skipped(reason),
          // Views were built in the same order as the statuses.
          None => match used.next() {
            Some((pose, rms)) => ImageStatus::Used { rms: *rms, pose: *pose },
            None => ImageStatus::Skipped("no solution".to_string()),
          },
        };
        ImageDiagnostics { id, status }
      })
      .collect();
    Calibration {
      camera: CameraModel::new(
        solution.camera,
        image_size,
        self.config.indices,
        self.config.interface,
      ),
      report: CalibrationReport {
        images,
        rms: solution.rms,
        iterations: solution.iterations,
      },
    }
  }
}

fn detect(detector: &Detector, image: CalibrationImage) -> Detection {
  let CalibrationImage { id, image } = image;
  let corners = detector.process(&image).map_err(|err| err.to_string());
  match &corners {
    Ok(_) => debug!("Checkerboard found in {}.", id),
    Err(reason) => debug!("No checkerboard in {}: {}", id, reason),
  }
  Detection {
    id,
    image_size: (image.width, image.height),
    corners,
  }
}
