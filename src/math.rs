use crate::all::*;

// Skew-symmetric matrix such that `cross_matrix(a) * b == a.cross(&b)`.
pub fn cross_matrix(a: &Vector3d) -> Matrix3d {
  Matrix3d::new(
    0., -a[2], a[1],
    a[2], 0., -a[0],
    -a[1], a[0], 0.,
  )
}

pub fn transform_3d(R: &Rotation3d, t: &Vector3d, x: &Vector3d) -> Vector3d {
  R * x + t
}

// Unit vector spanning the (approximate) null space of `A`, found from the
// eigen decomposition of AᵀA. The eigenvalues come unordered from nalgebra.
// Also returns all eigenvalues sorted ascending so that callers can judge the
// rank of `A`.
pub fn null_vector(A: &Matrixd) -> (Vectord, Vec<f64>) {
  let ata = A.transpose() * A;
  let eigen = SymmetricEigen::new(ata);
  let mut min_ind = 0;
  for i in 1..eigen.eigenvalues.len() {
    if eigen.eigenvalues[i] < eigen.eigenvalues[min_ind] { min_ind = i }
  }
  let mut values: Vec<f64> = eigen.eigenvalues.iter().map(|x| x.max(0.)).collect();
  values.sort_by(|a, b| a.total_cmp(b));
  (eigen.eigenvectors.column(min_ind).into_owned(), values)
}

// Hartley normalization: translate the centroid to origin and scale so that
// the mean distance from it is √2. Returns the normalized points and the
// transformation that was applied.
pub fn normalize_points(points: &[Vector2d]) -> (Vec<Vector2d>, Matrix3d) {
  let n = points.len().max(1) as f64;
  let mean = points.iter().fold(Vector2d::zeros(), |acc, p| acc + p) / n;
  let mean_dist = points.iter().map(|p| (p - mean).norm()).sum::<f64>() / n;
  let scale = if mean_dist > 1e-12 { std::f64::consts::SQRT_2 / mean_dist } else { 1. };
  let normalized = points.iter().map(|p| (p - mean) * scale).collect();
  let T = Matrix3d::new(
    scale, 0., -mean[0] * scale,
    0., scale, -mean[1] * scale,
    0., 0., 1.,
  );
  (normalized, T)
}

pub fn rms(squared_sum: f64, count: usize) -> f64 {
  if count == 0 { return 0. }
  (squared_sum / count as f64).sqrt()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cross_matrix() {
    let a = Vector3d::new(0.3, -1.2, 2.5);
    let b = Vector3d::new(-0.7, 0.1, 0.4);
    assert!((cross_matrix(&a) * b - a.cross(&b)).norm() < 1e-12);
  }

  #[test]
  fn test_null_vector() {
    // Rows orthogonal to (1, 2, 3).
    let A = DMatrix::from_row_slice(3, 3, &[
      3., 0., -1.,
      2., -1., 0.,
      0., 3., -2.,
    ]);
    let (v, values) = null_vector(&A);
    let expected = Vector3d::new(1., 2., 3.).normalize();
    let v = Vector3d::new(v[0], v[1], v[2]);
    assert!((v - expected).norm() < 1e-9 || (v + expected).norm() < 1e-9);
    assert!(values[0] < 1e-12);
    assert!(values[1] > 1e-3);
  }

  #[test]
  fn test_normalize_points() {
    let points = vec![
      Vector2d::new(10., 10.),
      Vector2d::new(30., 10.),
      Vector2d::new(30., 30.),
      Vector2d::new(10., 30.),
    ];
    let (normalized, T) = normalize_points(&points);
    let mean = normalized.iter().fold(Vector2d::zeros(), |acc, p| acc + p) / 4.;
    assert!(mean.norm() < 1e-12);
    for (p, q) in points.iter().zip(&normalized) {
      let h = T * Vector3d::new(p[0], p[1], 1.);
      assert!((Vector2d::new(h[0], h[1]) - q).norm() < 1e-12);
      assert!((q.norm() - std::f64::consts::SQRT_2).abs() < 1e-12);
    }
  }
}
