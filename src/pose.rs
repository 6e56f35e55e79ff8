use crate::all::*;

// Rigid transformation from board coordinates to camera coordinates:
// `x_camera = R * x_board + t`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
  pub R: Rotation3d,
  pub t: Vector3d,
}

impl Pose {
  pub fn new(R: Rotation3d, t: Vector3d) -> Pose {
    Pose { R, t }
  }

  pub fn identity() -> Pose {
    Pose::new(Rotation3d::identity(), Vector3d::zeros())
  }

  pub fn transform(&self, x: &Vector3d) -> Vector3d {
    transform_3d(&self.R, &self.t, x)
  }

  // Left-multiplicative update used by the refinement: the rotation is
  // perturbed in the camera frame, `R ← exp(ω) R`.
  pub fn perturbed(&self, omega: &Vector3d, dt: &Vector3d) -> Pose {
    Pose::new(Rotation3d::new(*omega) * self.R, self.t + dt)
  }

  // Rotation vector (axis times angle), e.g. for reporting.
  pub fn rotation_vector(&self) -> Vector3d {
    self.R.scaled_axis()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_perturbed() {
    let pose = Pose::new(Rotation3d::from_euler_angles(0.1, -0.2, 0.3), Vector3d::new(1., 2., 3.));
    let x = Vector3d::new(0.5, -0.5, 0.);
    let omega = Vector3d::new(1e-7, -2e-7, 3e-7);
    let moved = pose.perturbed(&omega, &Vector3d::zeros()).transform(&x);
    // First order: exp(ω) R x ≈ R x + ω × R x.
    let expected = pose.transform(&x) + omega.cross(&(pose.R * x));
    assert!((moved - expected).norm() < 1e-12);
    assert!((pose.perturbed(&Vector3d::zeros(), &Vector3d::new(1., 0., 0.)).t - Vector3d::new(2., 2., 3.)).norm() < 1e-15);
  }
}
