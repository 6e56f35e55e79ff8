// Closed-form initialization of planar calibration (Zhang, "A flexible new
// technique for camera calibration", 2000): every plane homography gives two
// linear constraints on the image of the absolute conic B = K⁻ᵀ K⁻¹.

use crate::all::*;

// Second smallest eigenvalue of VᵀV relative to the largest below which the
// constraint system is rank deficient.
const RANK_TOLERANCE: f64 = 1e-14;
// Parallel planes share their vanishing line. Below this spread of the
// (normalized) vanishing lines the plane orientations are considered equal;
// corner noise of a fraction of a pixel stays well under it.
const MIN_ORIENTATION_SPREAD: f64 = 5e-3;

// Intrinsics without skew, as returned by the linear initialization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearIntrinsics {
  pub fx: f64,
  pub fy: f64,
  pub cx: f64,
  pub cy: f64,
}

// Constraint row `v_ij` such that `h_iᵀ B h_j = v_ij · b`.
fn v_ij(H: &Matrix3d, i: usize, j: usize) -> [f64; 6] {
  let hi = H.column(i);
  let hj = H.column(j);
  [
    hi[0] * hj[0],
    hi[0] * hj[1] + hi[1] * hj[0],
    hi[1] * hj[1],
    hi[2] * hj[0] + hi[0] * hj[2],
    hi[2] * hj[1] + hi[1] * hj[2],
    hi[2] * hj[2],
  ]
}

// Pixel coordinates are mapped to roughly [-1, 1] before building the
// constraints, otherwise the entries of V span many orders of magnitude.
fn image_normalization(image_size: (usize, usize)) -> (Matrix3d, f64) {
  let (w, h) = (image_size.0 as f64, image_size.1 as f64);
  let s = 0.5 * w.max(h).max(1.);
  let N = Matrix3d::new(
    1. / s, 0., -0.5 * w / s,
    0., 1. / s, -0.5 * h / s,
    0., 0., 1.,
  );
  (N, s)
}

// Spread of the vanishing lines `H⁻ᵀ (0, 0, 1)` of the planes: ratio of the
// second to the largest singular value of the stacked unit lines. Zero iff
// all planes are parallel.
fn orientation_spread(normalized: &[Matrix3d]) -> Option<f64> {
  let mut M = Matrix3d::zeros();
  for H in normalized {
    let l = H.try_inverse()?.row(2).transpose();
    let l = l / l.norm();
    M += l * l.transpose();
  }
  let mut values: Vec<f64> = SymmetricEigen::new(M).eigenvalues.iter().map(|x| x.max(0.)).collect();
  values.sort_by(|a, b| a.total_cmp(b));
  if !(values[2] > 0.) { return None }
  Some((values[1] / values[2]).sqrt())
}

pub fn intrinsics_from_homographies(
  homographies: &[Matrix3d],
  image_size: (usize, usize),
) -> Result<LinearIntrinsics, SolverError> {
  if homographies.len() < 2 {
    return Err(SolverError::InsufficientViews { found: homographies.len(), required: 2 });
  }
  let (N, s) = image_normalization(image_size);
  let m = homographies.len();
  let normalized: Vec<Matrix3d> = homographies.iter()
    .map(|H| {
      let Hn = N * H;
      Hn / Hn.norm()
    })
    .collect();

  let spread = orientation_spread(&normalized).unwrap_or(0.);
  debug!("Plane orientation spread {:.3e}.", spread);
  if spread < MIN_ORIENTATION_SPREAD {
    return Err(SolverError::Degenerate(format!(
      "the {} boards are all parallel to each other, tilt the board between images",
      m,
    )));
  }

  let mut V = DMatrix::<f64>::zeros(2 * m + 1, 6);
  for (k, Hn) in normalized.iter().enumerate() {
    let v12 = v_ij(Hn, 0, 1);
    let v11 = v_ij(Hn, 0, 0);
    let v22 = v_ij(Hn, 1, 1);
    for c in 0..6 {
      V[(2 * k, c)] = v12[c];
      V[(2 * k + 1, c)] = v11[c] - v22[c];
    }
  }
  // Zero skew: B12 = 0.
  V[(2 * m, 1)] = 1.;

  let (b, eigenvalues) = null_vector(&V);
  let largest = eigenvalues[eigenvalues.len() - 1];
  if !(largest > 0.) || eigenvalues[1] < RANK_TOLERANCE * largest {
    return Err(SolverError::Degenerate(format!(
      "the {} plane orientations do not constrain the intrinsics",
      m,
    )));
  }

  // The null vector is defined up to sign; B must be positive definite.
  let b = if b[0] < 0. { -b } else { b };
  let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);
  let denom = b11 * b22 - b12 * b12;
  if !(b11 > 0.) || !(denom > 0.) {
    return Err(SolverError::Degenerate("recovered conic is not positive definite".to_string()));
  }
  let v0 = (b12 * b13 - b11 * b23) / denom;
  let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
  if !(lambda > 0.) {
    return Err(SolverError::Degenerate("recovered conic has an invalid scale".to_string()));
  }
  let alpha = (lambda / b11).sqrt();
  let beta = (lambda * b11 / denom).sqrt();
  let gamma = -b12 * alpha * alpha * beta / lambda;
  let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

  // Undo the normalization.
  let (w, h) = (image_size.0 as f64, image_size.1 as f64);
  let intrinsics = LinearIntrinsics {
    fx: s * alpha,
    fy: s * beta,
    cx: s * u0 + 0.5 * w,
    cy: s * v0 + 0.5 * h,
  };
  let values = [intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy];
  if values.iter().any(|x| !x.is_finite()) || intrinsics.fx <= 0. || intrinsics.fy <= 0. {
    return Err(SolverError::Degenerate("non-finite intrinsics".to_string()));
  }
  debug!("Linear intrinsics: {:?}", intrinsics);
  Ok(intrinsics)
}

// Decomposes `H ~ K [r1 r2 t]` into a pose with the board in front of the
// camera. The rotation is projected onto SO(3).
pub fn pose_from_homography(K: &Matrix3d, H: &Matrix3d) -> Option<Pose> {
  let K_inv = K.try_inverse()?;
  let a1 = K_inv * H.column(0);
  let a2 = K_inv * H.column(1);
  let a3 = K_inv * H.column(2);
  let mut lambda = 2. / (a1.norm() + a2.norm());
  if !lambda.is_finite() { return None }
  if a3[2] * lambda < 0. {
    lambda = -lambda;
  }
  let r1 = a1 * lambda;
  let r2 = a2 * lambda;
  let r3 = r1.cross(&r2);
  let R = Matrix3d::from_columns(&[r1, r2, r3]);

  let svd = R.svd(true, true);
  let u = svd.u?;
  let v_t = svd.v_t?;
  let mut R = u * v_t;
  if R.determinant() < 0. {
    let mut u = u;
    u.column_mut(2).neg_mut();
    R = u * v_t;
  }
  let t = a3 * lambda;
  Some(Pose::new(Rotation3d::from_matrix_unchecked(R), t))
}
