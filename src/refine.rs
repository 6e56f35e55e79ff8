// Joint Levenberg–Marquardt refinement of intrinsics, distortion and board
// poses, minimizing the squared reprojection error.
//
// Parameter layout: fx, fy, cx, cy, k1, k2, p1, p2, k3, then per view the
// rotation increment ω (applied as `exp(ω) R`) and the translation.

use crate::all::*;

type Matrix29d = nalgebra::SMatrix::<f64, 2, 9>;
type Matrix26d = nalgebra::SMatrix::<f64, 2, 6>;

const CAMERA_PARAMETERS: usize = 9;
const POSE_PARAMETERS: usize = 6;
const MAX_DAMPING: f64 = 1e14;
const MIN_DAMPING: f64 = 1e-12;
// Scale floor for the damping diagonal, for parameters with no observations.
const MIN_DIAGONAL: f64 = 1e-9;
// Below this reprojection RMS (pixels) the data is fit exactly.
const EXACT_FIT_RMS: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct RefineOptions {
  pub max_iterations: usize,
  // Relative decrease of the cost below which an accepted step ends the loop.
  pub cost_tolerance: f64,
  pub step_tolerance: f64,
  pub gradient_tolerance: f64,
  pub initial_damping: f64,
  // When false the distortion coefficients stay fixed at their initial values.
  pub estimate_distortion: bool,
}

impl Default for RefineOptions {
  fn default() -> RefineOptions {
    RefineOptions {
      max_iterations: 100,
      cost_tolerance: 1e-9,
      step_tolerance: 1e-12,
      gradient_tolerance: 1e-10,
      initial_damping: 1e-3,
      estimate_distortion: true,
    }
  }
}

#[derive(Clone, Debug)]
pub struct Refinement {
  pub camera: PinholeModel,
  pub poses: Vec<Pose>,
  pub per_view_rms: Vec<f64>,
  pub rms: f64,
  pub iterations: usize,
  pub converged: bool,
  // Information matrix of fx, fy, cx, cy at the solution, with the poses
  // eliminated. Unscaled by the residual variance.
  pub intrinsic_information: Matrix4d,
  // Per coordinate, corrected for the number of estimated parameters.
  pub residual_variance: f64,
}

#[derive(Clone, Debug)]
struct State {
  intrinsics: [f64; 4],
  distortion: Distortion,
  poses: Vec<Pose>,
}

impl State {
  fn camera(&self) -> PinholeModel {
    let [fx, fy, cx, cy] = self.intrinsics;
    PinholeModel::new(fx, fy, cx, cy, self.distortion)
  }

  fn parameter_norm(&self) -> f64 {
    let camera: f64 = self.intrinsics.iter().chain(self.distortion.to_array().iter())
      .map(|x| x * x)
      .sum();
    let poses: f64 = self.poses.iter().map(|p| p.t.norm_squared()).sum();
    (camera + poses).sqrt()
  }

  // None if the step would make a focal length non-positive.
  fn step(&self, delta: &Vectord) -> Option<State> {
    let mut intrinsics = self.intrinsics;
    for (k, value) in intrinsics.iter_mut().enumerate() {
      *value += delta[k];
    }
    if !(intrinsics[0] > 0. && intrinsics[1] > 0.) { return None }
    let mut coefficients = self.distortion.to_array();
    for (k, value) in coefficients.iter_mut().enumerate() {
      *value += delta[4 + k];
    }
    let poses = self.poses.iter().enumerate()
      .map(|(v, pose)| {
        let o = CAMERA_PARAMETERS + POSE_PARAMETERS * v;
        let omega = Vector3d::new(delta[o], delta[o + 1], delta[o + 2]);
        let dt = Vector3d::new(delta[o + 3], delta[o + 4], delta[o + 5]);
        pose.perturbed(&omega, &dt)
      })
      .collect();
    Some(State {
      intrinsics,
      distortion: Distortion::from_array(coefficients),
      poses,
    })
  }
}

// Sums of squared residuals, per view. None if a point falls behind the camera.
fn view_costs(views: &[View], state: &State) -> Option<Vec<f64>> {
  let camera = state.camera();
  views.iter().zip(&state.poses)
    .map(|(view, pose)| {
      let mut sum = 0.;
      for (X, observed) in view.correspondences() {
        let pixel = camera.ray_to_pixel(pose.transform(X))?;
        sum += (pixel - observed).norm_squared();
      }
      Some(sum)
    })
    .collect()
}

struct NormalEquations {
  A: Matrixd,
  g: Vectord,
}

fn normal_equations(views: &[View], state: &State, options: &RefineOptions) -> Option<NormalEquations> {
  let n = CAMERA_PARAMETERS + POSE_PARAMETERS * views.len();
  let mut A = Matrixd::zeros(n, n);
  let mut g = Vectord::zeros(n);
  let camera = state.camera();
  let (fx, fy) = (camera.fx(), camera.fy());

  for (v, (view, pose)) in views.iter().zip(&state.poses).enumerate() {
    let o = CAMERA_PARAMETERS + POSE_PARAMETERS * v;
    let mut A_cc = nalgebra::SMatrix::<f64, 9, 9>::zeros();
    let mut A_cp = nalgebra::SMatrix::<f64, 9, 6>::zeros();
    let mut A_pp = nalgebra::SMatrix::<f64, 6, 6>::zeros();
    let mut g_c = nalgebra::SVector::<f64, 9>::zeros();
    let mut g_p = nalgebra::SVector::<f64, 6>::zeros();

    for (X, observed) in view.correspondences() {
      let RX = pose.R * X;
      let Pc = RX + pose.t;
      let (pixel, dpixel) = camera.ray_to_pixel_d(Pc, true);
      let r = pixel? - observed;
      let dpixel = dpixel?;

      let p = Vector2d::new(Pc[0] / Pc[2], Pc[1] / Pc[2]);
      let (d, _) = camera.distort(p, false);
      let mut J_c = Matrix29d::zeros();
      J_c[(0, 0)] = d[0];
      J_c[(1, 1)] = d[1];
      J_c[(0, 2)] = 1.;
      J_c[(1, 3)] = 1.;
      if options.estimate_distortion {
        let dd = camera.distort_d_coefficients(p);
        for k in 0..Distortion::LEN {
          J_c[(0, 4 + k)] = fx * dd[(0, k)];
          J_c[(1, 4 + k)] = fy * dd[(1, k)];
        }
      }

      let mut J_p = Matrix26d::zeros();
      // d(exp(ω) R X) / dω = -[R X]×
      J_p.fixed_slice_mut::<2, 3>(0, 0).copy_from(&(dpixel * -cross_matrix(&RX)));
      J_p.fixed_slice_mut::<2, 3>(0, 3).copy_from(&dpixel);

      A_cc += J_c.transpose() * J_c;
      A_cp += J_c.transpose() * J_p;
      A_pp += J_p.transpose() * J_p;
      g_c += J_c.transpose() * r;
      g_p += J_p.transpose() * r;
    }

    let mut block = A.fixed_slice_mut::<9, 9>(0, 0);
    block += A_cc;
    let mut block = A.fixed_slice_mut::<9, 6>(0, o);
    block += A_cp;
    let mut block = A.fixed_slice_mut::<6, 9>(o, 0);
    block += A_cp.transpose();
    let mut block = A.fixed_slice_mut::<6, 6>(o, o);
    block += A_pp;
    let mut segment = g.fixed_rows_mut::<9>(0);
    segment += g_c;
    let mut segment = g.fixed_rows_mut::<6>(o);
    segment += g_p;
  }

  if !options.estimate_distortion {
    // Pin the distortion parameters: zero gradient and unit curvature.
    for k in 4..CAMERA_PARAMETERS {
      for c in 0..n {
        A[(k, c)] = 0.;
        A[(c, k)] = 0.;
      }
      A[(k, k)] = 1.;
      g[k] = 0.;
    }
  }
  Some(NormalEquations { A, g })
}

// Schur complement of the normal matrix on fx, fy, cx, cy: the pose blocks
// are eliminated, the distortion is held fixed. Zero if a pose block is
// singular.
fn intrinsic_information(views: &[View], state: &State, options: &RefineOptions) -> Matrix4d {
  let A = match normal_equations(views, state, options) {
    Some(NormalEquations { A, .. }) => A,
    None => return Matrix4d::zeros(),
  };
  let mut S: Matrix4d = A.fixed_slice::<4, 4>(0, 0).into_owned();
  for v in 0..views.len() {
    let o = CAMERA_PARAMETERS + POSE_PARAMETERS * v;
    let A_ip = A.fixed_slice::<4, 6>(0, o).into_owned();
    let A_pp = A.fixed_slice::<6, 6>(o, o).into_owned();
    let A_pp_inv = match A_pp.cholesky() {
      Some(cholesky) => cholesky.inverse(),
      None => return Matrix4d::zeros(),
    };
    S -= A_ip * A_pp_inv * A_ip.transpose();
  }
  S
}

fn finish(
  views: &[View],
  state: State,
  costs: Vec<f64>,
  iterations: usize,
  converged: bool,
  options: &RefineOptions,
) -> Refinement {
  let per_view_rms = views.iter().zip(&costs)
    .map(|(view, cost)| rms(*cost, view.corners.len()))
    .collect();
  let count: usize = views.iter().map(|v| v.corners.len()).sum();
  let cost: f64 = costs.iter().sum();
  let camera_parameters = if options.estimate_distortion { CAMERA_PARAMETERS } else { 4 };
  let parameters = camera_parameters + POSE_PARAMETERS * views.len();
  let residual_variance = cost / (2 * count).saturating_sub(parameters).max(1) as f64;
  let intrinsic_information = intrinsic_information(views, &state, options);
  Refinement {
    camera: state.camera(),
    poses: state.poses,
    per_view_rms,
    rms: rms(cost, count),
    iterations,
    converged,
    intrinsic_information,
    residual_variance,
  }
}

// True once the damping is so large that no step reduces the cost.
fn damping_saturated(damping: f64) -> bool {
  if damping > MAX_DAMPING {
    debug!("Refinement stopped, damping saturated at {:.1e}.", damping);
    return true;
  }
  false
}

// Refines the given initial estimate. Returns None only if the initial
// estimate projects some point behind the camera. Non-convergence is
// reported through `Refinement::converged`.
pub fn refine(
  views: &[View],
  camera: &PinholeModel,
  poses: &[Pose],
  options: &RefineOptions,
) -> Option<Refinement> {
  assert_eq!(views.len(), poses.len());
  let mut state = State {
    intrinsics: [camera.fx(), camera.fy(), camera.cx(), camera.cy()],
    distortion: camera.distortion,
    poses: poses.to_vec(),
  };
  let point_count: usize = views.iter().map(|v| v.corners.len()).sum();
  let mut costs = view_costs(views, &state)?;
  let mut cost: f64 = costs.iter().sum();
  let mut damping = options.initial_damping;
  debug!("Refinement start: rms {:.6}", rms(cost, point_count));

  for iteration in 0..options.max_iterations {
    if rms(cost, point_count) < EXACT_FIT_RMS {
      return Some(finish(views, state, costs, iteration, true, options));
    }
    let NormalEquations { A, g } = normal_equations(views, &state, options)?;
    if g.amax() < options.gradient_tolerance {
      return Some(finish(views, state, costs, iteration, true, options));
    }

    let mut augmented = A.clone();
    for k in 0..augmented.nrows() {
      augmented[(k, k)] += damping * A[(k, k)].max(MIN_DIAGONAL);
    }
    let delta = match augmented.cholesky() {
      Some(cholesky) => -cholesky.solve(&g),
      None => {
        damping *= 10.;
        if damping_saturated(damping) {
          return Some(finish(views, state, costs, iteration + 1, true, options));
        }
        continue;
      },
    };

    if delta.norm() < options.step_tolerance * (state.parameter_norm() + options.step_tolerance) {
      return Some(finish(views, state, costs, iteration + 1, true, options));
    }

    let candidate = state.step(&delta)
      .and_then(|s| view_costs(views, &s).map(|c| (s, c)));
    let (new_state, new_costs) = match candidate {
      Some(x) => x,
      None => {
        damping *= 10.;
        if damping_saturated(damping) {
          return Some(finish(views, state, costs, iteration + 1, true, options));
        }
        continue;
      },
    };
    let new_cost: f64 = new_costs.iter().sum();

    // Gain ratio between the actual and the linearized decrease. With
    // (A + λD) δ = -g the decrease of the linear model is -δᵀg + λ δᵀDδ.
    let mut predicted = -delta.dot(&g);
    for k in 0..delta.len() {
      predicted += delta[k] * delta[k] * damping * A[(k, k)].max(MIN_DIAGONAL);
    }
    let rho = (cost - new_cost) / predicted.max(f64::MIN_POSITIVE);

    if new_cost < cost {
      let relative_decrease = (cost - new_cost) / cost;
      state = new_state;
      costs = new_costs;
      cost = new_cost;
      if rho > 0.75 {
        damping = (damping * 0.3).max(MIN_DAMPING);
      }
      else if rho < 0.25 {
        damping *= 10.;
      }
      debug!("Refinement iteration {}: rms {:.6}, damping {:.1e}", iteration, rms(cost, point_count), damping);
      if relative_decrease < options.cost_tolerance {
        return Some(finish(views, state, costs, iteration + 1, true, options));
      }
    }
    else {
      damping *= 10.;
      if damping_saturated(damping) {
        return Some(finish(views, state, costs, iteration + 1, true, options));
      }
    }
  }
  Some(finish(views, state, costs, options.max_iterations, false, options))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::synthetic::*;

  fn perturbed_start(poses: &[Pose]) -> (PinholeModel, Vec<Pose>) {
    let camera = PinholeModel::new(630., 580., 330., 232., Distortion::default());
    let poses = poses.iter()
      .map(|p| p.perturbed(&Vector3d::new(0.01, -0.01, 0.005), &Vector3d::new(0.3, -0.2, 1.)))
      .collect();
    (camera, poses)
  }

  #[test]
  fn test_refine_recovers_camera() {
    let scene = SyntheticScene::default_scene()
      .with_distortion(Distortion { k1: -0.2, k2: 0.05, ..Default::default() });
    let grid = scene.grid();
    let poses = scene.poses();
    let views: Vec<View> = poses.iter().enumerate()
      .map(|(i, pose)| View::new(format!("{}", i), scene.noisy_corners(pose, 0., 0), &grid))
      .collect();
    let (camera, start) = perturbed_start(&poses);
    let result = refine(&views, &camera, &start, &RefineOptions::default()).unwrap();
    assert!(result.converged);
    assert!(result.rms < 1e-6, "rms {}", result.rms);
    assert!((result.camera.fx() - 600.).abs() < 1e-3);
    assert!((result.camera.fy() - 600.).abs() < 1e-3);
    assert!((result.camera.cx() - 320.).abs() < 1e-3);
    assert!((result.camera.cy() - 240.).abs() < 1e-3);
    assert!((result.camera.distortion.k1 + 0.2).abs() < 1e-4);
    for (estimate, truth) in result.poses.iter().zip(&poses) {
      assert!((estimate.t - truth.t).norm() < 1e-3);
    }
  }

  #[test]
  fn test_fixed_distortion_stays_fixed() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let poses = scene.poses();
    let views: Vec<View> = poses.iter().enumerate()
      .map(|(i, pose)| View::new(format!("{}", i), scene.noisy_corners(pose, 0.1, i as u64), &grid))
      .collect();
    let (camera, start) = perturbed_start(&poses);
    let options = RefineOptions { estimate_distortion: false, ..Default::default() };
    let result = refine(&views, &camera, &start, &options).unwrap();
    assert!(result.converged);
    assert!(result.camera.distortion.is_zero());
    assert!(result.rms < 0.2);
    assert!((result.camera.fx() - 600.).abs() < 3.);
    assert_eq!(result.per_view_rms.len(), 6);
  }

  #[test]
  fn test_iteration_cap() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let poses = scene.poses();
    let views: Vec<View> = poses.iter().enumerate()
      .map(|(i, pose)| View::new(format!("{}", i), scene.noisy_corners(pose, 0.1, i as u64), &grid))
      .collect();
    let (camera, start) = perturbed_start(&poses);
    let options = RefineOptions { max_iterations: 1, ..Default::default() };
    let result = refine(&views, &camera, &start, &options).unwrap();
    assert!(!result.converged);
    assert_eq!(result.iterations, 1);
  }

  #[test]
  fn test_saturated_damping_stops() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let poses = scene.poses();
    let views: Vec<View> = poses.iter().enumerate()
      .map(|(i, pose)| View::new(format!("{}", i), scene.noisy_corners(pose, 0.1, i as u64), &grid))
      .collect();
    let (camera, start) = perturbed_start(&poses);
    // Only the damping can end the loop once the cost stops decreasing.
    let options = RefineOptions {
      max_iterations: 1000,
      cost_tolerance: 0.,
      step_tolerance: 0.,
      gradient_tolerance: 0.,
      ..Default::default()
    };
    let result = refine(&views, &camera, &start, &options).unwrap();
    assert!(result.converged);
    assert!(result.iterations < 1000);
    assert!(result.rms < 0.2);
  }

  #[test]
  fn test_intrinsic_information() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let poses = scene.poses();
    let views: Vec<View> = poses.iter().enumerate()
      .map(|(i, pose)| View::new(format!("{}", i), scene.noisy_corners(pose, 0.2, i as u64), &grid))
      .collect();
    let (camera, start) = perturbed_start(&poses);
    let result = refine(&views, &camera, &start, &RefineOptions::default()).unwrap();
    let I = result.intrinsic_information;
    assert!((I - I.transpose()).amax() <= 1e-9 * I.amax());
    assert!(I.cholesky().is_some());
    // Per coordinate variance of the injected noise.
    assert!((result.residual_variance - 0.04).abs() < 0.02, "{}", result.residual_variance);
  }

  #[test]
  fn test_behind_camera_rejected() {
    let scene = SyntheticScene::default_scene();
    let grid = scene.grid();
    let pose = fronto_parallel_pose(&scene);
    let views = vec![View::new("0", scene.noisy_corners(&pose, 0., 0), &grid)];
    let mut behind = pose;
    behind.t[2] = -60.;
    assert!(refine(&views, &scene.camera, &[behind], &RefineOptions::default()).is_none());
  }
}
