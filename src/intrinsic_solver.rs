use crate::all::*;

pub const MIN_VIEWS: usize = 2;
// Condition number of the intrinsic information in correlation form above
// which some combination of fx, fy, cx, cy is not determined by the views.
// Boards in parallel planes reach 1e11 and more, views tilted about
// different axes stay around 1e3.
const MAX_CONDITION: f64 = 1e9;
// Upper limit for the predicted standard deviation of a focal length
// relative to its value.
const MAX_RELATIVE_DEVIATION: f64 = 0.5;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct SolverOptions {
  pub refine: RefineOptions,
}

// Camera intrinsics and one board pose per view, with the fit quality.
#[derive(Clone, Debug)]
pub struct IntrinsicSolution {
  pub camera: PinholeModel,
  pub poses: Vec<Pose>,
  pub per_view_rms: Vec<f64>,
  pub rms: f64,
  pub iterations: usize,
}

impl IntrinsicSolution {
  fn from_refinement(refinement: Refinement) -> IntrinsicSolution {
    IntrinsicSolution {
      camera: refinement.camera,
      poses: refinement.poses,
      per_view_rms: refinement.per_view_rms,
      rms: refinement.rms,
      iterations: refinement.iterations,
    }
  }
}

pub struct IntrinsicSolver {
  options: SolverOptions,
}

impl IntrinsicSolver {
  pub fn new(options: SolverOptions) -> IntrinsicSolver {
    IntrinsicSolver { options }
  }

  // Homographies → closed-form intrinsics → poses → joint refinement.
  pub fn solve(&self, views: &[View], image_size: (usize, usize)) -> Result<IntrinsicSolution, SolverError> {
    if views.len() < MIN_VIEWS {
      return Err(SolverError::InsufficientViews { found: views.len(), required: MIN_VIEWS });
    }

    let mut homographies = Vec::with_capacity(views.len());
    for (i, view) in views.iter().enumerate() {
      if view.corners.board != view.grid.board {
        return Err(SolverError::InvalidView {
          view: i,
          reason: format!("{} corners for a {} board", view.corners.board, view.grid.board),
        });
      }
      if view.corners.len() < 4 || view.corners.len() != view.grid.len() {
        return Err(SolverError::InvalidView {
          view: i,
          reason: format!("{} corners for a grid of {}", view.corners.len(), view.grid.len()),
        });
      }
      let H = estimate_homography(&view.grid.planar_points(), &view.corners.points)
        .ok_or_else(|| SolverError::InvalidView {
          view: i,
          reason: "homography estimation failed".to_string(),
        })?;
      homographies.push(H);
    }

    let LinearIntrinsics { fx, fy, cx, cy } = intrinsics_from_homographies(&homographies, image_size)?;
    let initial = PinholeModel::new(fx, fy, cx, cy, Distortion::default());

    let mut poses = Vec::with_capacity(views.len());
    for (i, H) in homographies.iter().enumerate() {
      let pose = pose_from_homography(&initial.camera_matrix, H)
        .ok_or_else(|| SolverError::InvalidView {
          view: i,
          reason: "pose recovery failed".to_string(),
        })?;
      poses.push(pose);
    }

    let refinement = refine(views, &initial, &poses, &self.options.refine)
      .ok_or_else(|| SolverError::Degenerate("initial estimate puts the board behind the camera".to_string()))?;
    info!(
      "Refined intrinsics fx {:.3}, fy {:.3}, cx {:.3}, cy {:.3}, rms {:.4} px after {} iterations.",
      refinement.camera.fx(), refinement.camera.fy(), refinement.camera.cx(), refinement.camera.cy(),
      refinement.rms, refinement.iterations,
    );
    check_observability(&refinement)?;
    if !refinement.converged {
      let iterations = refinement.iterations;
      return Err(SolverError::NonConvergence {
        best: Box::new(IntrinsicSolution::from_refinement(refinement)),
        iterations,
      });
    }
    Ok(IntrinsicSolution::from_refinement(refinement))
  }
}

// Rejects solutions whose intrinsics the views cannot determine, for example
// when all boards lie in parallel planes. Noisy corners can move such sets
// past the closed-form checks and the refinement then settles anywhere
// along the unobservable directions.
fn check_observability(refinement: &Refinement) -> Result<(), SolverError> {
  let I = &refinement.intrinsic_information;
  let scale = I.diagonal().map(|x| x.sqrt());
  if scale.iter().any(|x| !(*x > 0.) || !x.is_finite()) {
    return Err(SolverError::Degenerate("some intrinsic has no influence on the reprojections".to_string()));
  }
  let correlation = I.component_div(&(scale * scale.transpose()));
  let eigenvalues = SymmetricEigen::new(correlation).eigenvalues;
  let largest = eigenvalues.iter().cloned().fold(0., f64::max);
  let smallest = eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
  let condition = if smallest > 0. { largest / smallest } else { f64::INFINITY };
  debug!("Intrinsic information condition {:.3e}.", condition);
  if !(condition < MAX_CONDITION) {
    return Err(SolverError::Degenerate(format!(
      "intrinsics are not determined by the views (condition {:.1e}), tilt the board in different directions",
      condition,
    )));
  }

  let covariance = I.try_inverse()
    .ok_or_else(|| SolverError::Degenerate("singular intrinsic information".to_string()))?
    * refinement.residual_variance;
  let focal = [refinement.camera.fx(), refinement.camera.fy()];
  for (k, f) in focal.iter().enumerate() {
    let deviation = covariance[(k, k)].max(0.).sqrt() / f;
    if !(deviation < MAX_RELATIVE_DEVIATION) {
      return Err(SolverError::Degenerate(format!(
        "focal length {:.1} is undetermined (relative deviation {:.2}), tilt the board in different directions",
        f, deviation,
      )));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::synthetic::*;

  fn views<'a>(scene: &SyntheticScene, grid: &'a ObjectGrid, sigma: f64) -> Vec<View<'a>> {
    scene.poses().iter().enumerate()
      .map(|(i, pose)| View::new(format!("view{}", i), scene.noisy_corners(pose, sigma, 100 + i as u64), grid))
      .collect()
  }

  #[test]
  fn test_round_trip() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let views = views(&scene, &grid, 0.);
    let solution = IntrinsicSolver::new(SolverOptions::default()).solve(&views, scene.image_size).unwrap();
    assert!((solution.camera.fx() - 600.).abs() < 1e-3);
    assert!((solution.camera.fy() - 600.).abs() < 1e-3);
    assert!((solution.camera.cx() - 320.).abs() < 1e-3);
    assert!((solution.camera.cy() - 240.).abs() < 1e-3);
    assert!(solution.rms < 1e-6);
    assert_eq!(solution.poses.len(), 6);
    assert_eq!(solution.per_view_rms.len(), 6);
    for (estimate, truth) in solution.poses.iter().zip(scene.poses()) {
      assert!((estimate.t - truth.t).norm() < 1e-3);
      assert!(estimate.R.angle_to(&truth.R) < 1e-5);
    }
  }

  #[test]
  fn test_round_trip_with_distortion() {
    let scene = SyntheticScene::default_scene()
      .with_distortion(Distortion { k1: -0.2, k2: 0.05, ..Default::default() });
    let grid = scene.grid();
    let views = views(&scene, &grid, 0.05);
    let solution = IntrinsicSolver::new(SolverOptions::default()).solve(&views, scene.image_size).unwrap();
    assert!((solution.camera.fx() - 600.).abs() / 600. < 0.01);
    assert!((solution.camera.fy() - 600.).abs() / 600. < 0.01);
    assert!((solution.camera.cx() - 320.).abs() < 3.);
    assert!((solution.camera.cy() - 240.).abs() < 3.);
    assert!((solution.camera.distortion.k1 + 0.2).abs() < 0.03);
    assert!(solution.rms < 0.1);
  }

  #[test]
  fn test_deterministic() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let views = views(&scene, &grid, 0.2);
    let solver = IntrinsicSolver::new(SolverOptions::default());
    let a = solver.solve(&views, scene.image_size).unwrap();
    let b = solver.solve(&views, scene.image_size).unwrap();
    assert_eq!(a.camera, b.camera);
    assert_eq!(a.poses, b.poses);
    assert_eq!(a.rms, b.rms);
    assert_eq!(a.iterations, b.iterations);
  }

  #[test]
  fn test_too_few_views() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let views = views(&scene, &grid, 0.);
    let result = IntrinsicSolver::new(SolverOptions::default()).solve(&views[..1], scene.image_size);
    assert!(matches!(result, Err(SolverError::InsufficientViews { found: 1, required: 2 })));
  }

  #[test]
  fn test_mismatched_corners_rejected() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let solver = IntrinsicSolver::new(SolverOptions::default());
    let mut short = views(&scene, &grid, 0.);
    short[2].corners.points.truncate(40);
    let result = solver.solve(&short, scene.image_size);
    assert!(matches!(result, Err(SolverError::InvalidView { view: 2, .. })));

    let mut transposed = views(&scene, &grid, 0.);
    transposed[4].corners.board = BoardSize::new(6, 9);
    let result = solver.solve(&transposed, scene.image_size);
    assert!(matches!(result, Err(SolverError::InvalidView { view: 4, .. })));
  }

  #[test]
  fn test_parallel_views_degenerate() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let R = Rotation3d::from_euler_angles(0.3, 0.0, 0.0);
    let views: Vec<View> = (0..4)
      .map(|i| {
        let pose = scene.pose_looking_at(R, Vector3d::new(i as f64, -(i as f64), 60. + 3. * i as f64));
        View::new(format!("{}", i), scene.noisy_corners(&pose, 0., 0), &grid)
      })
      .collect();
    let result = IntrinsicSolver::new(SolverOptions::default()).solve(&views, scene.image_size);
    assert!(matches!(result, Err(SolverError::Degenerate(_))));
  }

  #[test]
  fn test_noisy_parallel_views_degenerate() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let setups = [(0.0, 90.), (0.0, 150.), (0.3, 60.), (0.3, 90.)];
    for (rx, distance) in setups {
      let R = Rotation3d::from_euler_angles(rx, 0., 0.);
      let views: Vec<View> = (0..6)
        .map(|i| {
          let center = Vector3d::new(i as f64, -(i as f64), distance + 3. * i as f64);
          let pose = scene.pose_looking_at(R, center);
          View::new(format!("{}", i), scene.noisy_corners(&pose, 0.5, 7 + i as u64), &grid)
        })
        .collect();
      let result = IntrinsicSolver::new(SolverOptions::default()).solve(&views, scene.image_size);
      assert!(
        matches!(result, Err(SolverError::Degenerate(_))),
        "rx {} distance {}: {:?}", rx, distance, result.map(|s| s.camera),
      );
    }
  }

  #[test]
  fn test_noisy_views_accepted() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let views = views(&scene, &grid, 0.5);
    let solution = IntrinsicSolver::new(SolverOptions::default()).solve(&views, scene.image_size).unwrap();
    assert!((solution.camera.fx() - 600.).abs() / 600. < 0.08);
    assert!((solution.camera.fy() - 600.).abs() / 600. < 0.08);
    assert!(solution.rms < 1.);
  }

  #[test]
  fn test_non_convergence_keeps_best() {
    let scene = SyntheticScene::default_scene()
      .with_distortion(Distortion { k1: -0.2, k2: 0.05, ..Default::default() });
    let grid = scene.grid();
    let views = views(&scene, &grid, 0.1);
    let options = SolverOptions { refine: RefineOptions { max_iterations: 1, ..Default::default() } };
    match IntrinsicSolver::new(options).solve(&views, scene.image_size) {
      Err(SolverError::NonConvergence { best, iterations }) => {
        assert_eq!(iterations, 1);
        assert_eq!(best.poses.len(), 6);
        assert!(best.rms.is_finite());
      },
      other => panic!("unexpected {:?}", other.map(|s| s.rms)),
    }
  }
}
