// Pinhole model with the OpenCV (Brown–Conrady) distortion model: three radial
// and two tangential coefficients.
//
// NOTE The distortion and undistortion code is based on the HybVIO implementation here:
//   <https://github.com/SpectacularAI/HybVIO/blob/main/src/tracker/camera.cpp>

use crate::all::*;

const UNDISTORT_MAX_ITERATIONS: usize = 20;
const UNDISTORT_CONVERGENCE_THRESHOLD: f64 = 1e-10;

pub type Matrix25d = nalgebra::Matrix2x5::<f64>;

// Coefficients in OpenCV order: k1, k2, p1, p2, k3.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
  pub k1: f64,
  pub k2: f64,
  pub p1: f64,
  pub p2: f64,
  pub k3: f64,
}

impl Distortion {
  pub const LEN: usize = 5;

  pub fn from_array(c: [f64; 5]) -> Distortion {
    Distortion { k1: c[0], k2: c[1], p1: c[2], p2: c[3], k3: c[4] }
  }

  pub fn to_array(&self) -> [f64; 5] {
    [self.k1, self.k2, self.p1, self.p2, self.k3]
  }

  pub fn is_zero(&self) -> bool {
    self.to_array().iter().all(|c| *c == 0.)
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PinholeModel {
  pub camera_matrix: Matrix3d,
  pub camera_matrix_inv: Matrix3d,
  pub distortion: Distortion,
}

impl PinholeModel {
  // Zero skew. Focal lengths must be positive.
  pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, distortion: Distortion) -> PinholeModel {
    assert!(fx > 0. && fy > 0.);
    PinholeModel {
      camera_matrix: Matrix3d::new(
        fx, 0., cx,
        0., fy, cy,
        0., 0., 1.,
      ),
      camera_matrix_inv: Matrix3d::new(
        1. / fx, 0., -cx / fx,
        0., 1. / fy, -cy / fy,
        0., 0., 1.,
      ),
      distortion,
    }
  }

  pub fn fx(&self) -> f64 { self.camera_matrix[(0, 0)] }
  pub fn fy(&self) -> f64 { self.camera_matrix[(1, 1)] }
  pub fn cx(&self) -> f64 { self.camera_matrix[(0, 2)] }
  pub fn cy(&self) -> f64 { self.camera_matrix[(1, 2)] }

  // Distorts normalized coordinates. The optional derivative is wrt `p`.
  pub fn distort(&self, p: Vector2d, compute_derivative: bool) -> (Vector2d, Option<Matrix2d>) {
    let c = &self.distortion;
    let x = p[0];
    let y = p[1];
    let r2 = x * x + y * y;
    let radial = 1. + r2 * (c.k1 + r2 * (c.k2 + r2 * c.k3));
    let d = Vector2d::new(
      x * radial + 2. * c.p1 * x * y + c.p2 * (r2 + 2. * x * x),
      y * radial + c.p1 * (r2 + 2. * y * y) + 2. * c.p2 * x * y,
    );
    let dp = if compute_derivative {
      // d(radial) / d(r²)
      let dradial = c.k1 + r2 * (2. * c.k2 + 3. * c.k3 * r2);
      Some(Matrix2d::new(
        radial + 2. * x * x * dradial + 2. * c.p1 * y + 6. * c.p2 * x,
        2. * x * y * dradial + 2. * c.p1 * x + 2. * c.p2 * y,
        2. * x * y * dradial + 2. * c.p1 * x + 2. * c.p2 * y,
        radial + 2. * y * y * dradial + 6. * c.p1 * y + 2. * c.p2 * x,
      ))
    }
    else {
      None
    };
    (d, dp)
  }

  // Derivative of the distorted normalized point wrt (k1, k2, p1, p2, k3).
  pub fn distort_d_coefficients(&self, p: Vector2d) -> Matrix25d {
    let x = p[0];
    let y = p[1];
    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    Matrix25d::new(
      x * r2, x * r4, 2. * x * y, r2 + 2. * x * x, x * r6,
      y * r2, y * r4, r2 + 2. * y * y, 2. * x * y, y * r6,
    )
  }

  // Newton iteration on `distort()`. None if the iteration does not converge
  // or ends where the distortion folds over (Jacobian not positive), both
  // of which happen only far outside the valid field of view.
  pub fn undistort(&self, dist: Vector2d) -> Option<Vector2d> {
    if self.distortion.is_zero() { return Some(dist) }
    let mut point = dist;
    for _ in 0..UNDISTORT_MAX_ITERATIONS {
      let (p, dp) = self.distort(point, true);
      let dp = dp?;
      let delta = dp.try_inverse()? * (dist - p);
      point += delta;
      if !point.iter().all(|x| x.is_finite()) { return None }
      if delta.norm() < UNDISTORT_CONVERGENCE_THRESHOLD {
        let folded = dp.determinant() <= 0. || dp.trace() <= 0.;
        return if folded { None } else { Some(point) };
      }
    }
    None
  }

  // Unit ray in camera coordinates.
  pub fn pixel_to_ray(&self, pixel: Vector2d) -> Option<Vector3d> {
    let dist = Vector2d::new(
      (pixel[0] - self.cx()) / self.fx(),
      (pixel[1] - self.cy()) / self.fy(),
    );
    let p = self.undistort(dist)?;
    Some(Vector3d::new(p[0], p[1], 1.).normalize())
  }

  // Projects a ray (or any point) in camera coordinates. The optional
  // derivative is wrt the ray.
  pub fn ray_to_pixel_d(&self, ray: Vector3d, compute_derivative: bool)
    -> (Option<Vector2d>, Option<Matrix23d>)
  {
    if ray[2] <= 0. { return (None, None) }
    let iz = 1. / ray[2];
    let (dist, ddist) = self.distort(iz * Vector2d::new(ray[0], ray[1]), compute_derivative);
    let p = Vector3d::new(dist[0], dist[1], 1.);
    let pixel = self.camera_matrix * p;

    let dpixel = match ddist {
      Some(ddist) => {
        let dhomog = matrix!(
          iz, 0., -ray[0] * iz * iz;
          0., iz, -ray[1] * iz * iz;
        );
        Some(self.camera_matrix.fixed_slice::<2, 2>(0, 0) * ddist * dhomog)
      },
      None => None,
    };
    (Some(Vector2d::new(pixel[0], pixel[1])), dpixel)
  }

  pub fn ray_to_pixel(&self, ray: Vector3d) -> Option<Vector2d> {
    self.ray_to_pixel_d(ray, false).0
  }
}
