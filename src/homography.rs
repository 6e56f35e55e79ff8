use crate::all::*;

// Plane-to-image homography H with `image ~ H * plane`, from the normalized
// direct linear transform. H is scaled so that H[(2, 2)] = 1 when possible.
pub fn estimate_homography(plane: &[Vector2d], image: &[Vector2d]) -> Option<Matrix3d> {
  let n = plane.len();
  if n < 4 || image.len() != n { return None }
  let (plane_n, T_plane) = normalize_points(plane);
  let (image_n, T_image) = normalize_points(image);

  let mut A = DMatrix::<f64>::zeros(2 * n, 9);
  for (i, (p, q)) in plane_n.iter().zip(&image_n).enumerate() {
    let (x, y) = (p[0], p[1]);
    let (u, v) = (q[0], q[1]);
    let r0 = 2 * i;
    let r1 = r0 + 1;
    A[(r0, 0)] = -x;
    A[(r0, 1)] = -y;
    A[(r0, 2)] = -1.;
    A[(r0, 6)] = u * x;
    A[(r0, 7)] = u * y;
    A[(r0, 8)] = u;

    A[(r1, 3)] = -x;
    A[(r1, 4)] = -y;
    A[(r1, 5)] = -1.;
    A[(r1, 6)] = v * x;
    A[(r1, 7)] = v * y;
    A[(r1, 8)] = v;
  }

  let (h, eigenvalues) = null_vector(&A);
  // A second vanishing eigenvalue means the points are collinear.
  if eigenvalues[1] < 1e-12 * eigenvalues[8].max(1e-300) { return None }
  let Hn = Matrix3d::new(
    h[0], h[1], h[2],
    h[3], h[4], h[5],
    h[6], h[7], h[8],
  );
  let mut H = T_image.try_inverse()? * Hn * T_plane;
  if H[(2, 2)].abs() > 1e-12 {
    H /= H[(2, 2)];
  }
  if H.iter().all(|x| x.is_finite()) { Some(H) } else { None }
}

pub fn apply_homography(H: &Matrix3d, p: &Vector2d) -> Vector2d {
  let h = H * Vector3d::new(p[0], p[1], 1.);
  Vector2d::new(h[0] / h[2], h[1] / h[2])
}
