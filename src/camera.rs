use crate::all::*;

// Calibrated camera behind a flat port. Built once by the `Calibrator` and
// not modified afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraModel {
  pub pinhole: PinholeModel,
  pub image_size: (usize, usize),
  pub refraction: RefractionModel,
}

impl CameraModel {
  pub fn new(
    pinhole: PinholeModel,
    image_size: (usize, usize),
    indices: RefractiveIndices,
    interface: FlatInterface,
  ) -> CameraModel {
    CameraModel {
      pinhole,
      image_size,
      refraction: RefractionModel::new(indices, interface),
    }
  }

  pub fn camera_matrix(&self) -> &Matrix3d {
    &self.pinhole.camera_matrix
  }

  pub fn distortion(&self) -> &Distortion {
    &self.pinhole.distortion
  }

  pub fn indices(&self) -> &RefractiveIndices {
    &self.refraction.indices
  }

  pub fn interface(&self) -> &FlatInterface {
    &self.refraction.interface
  }

  // Light path of a pixel out into the water. Pixels far outside the field
  // of view of a strongly distorting lens fail with `Undistortion`.
  pub fn backproject(&self, pixel: Vector2d) -> Result<RayPath, RefractionError> {
    let ray = self.pinhole.pixel_to_ray(pixel).ok_or(RefractionError::Undistortion)?;
    self.refraction.trace(&ray)
  }

  // Pixel at which a point in the water is seen through the port.
  pub fn project_refracted(&self, point: &Vector3d) -> Option<Vector2d> {
    let path = self.refraction.locate(point).ok()?;
    self.pinhole.ray_to_pixel(path.segments[0].direction)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_camera() -> CameraModel {
    let distortion = Distortion { k1: -0.1, k2: 0.01, ..Default::default() };
    CameraModel::new(
      PinholeModel::new(800., 810., 640., 360., distortion),
      (1280, 720),
      RefractiveIndices::default(),
      FlatInterface { distance: 3., thickness: 1., ..Default::default() },
    )
  }

  #[test]
  fn test_backproject_and_project() {
    let camera = make_camera();
    for pixel in [Vector2d::new(640., 360.), Vector2d::new(100., 50.), Vector2d::new(1200., 700.)] {
      let path = camera.backproject(pixel).unwrap();
      let point = path.water().point_at(120.);
      let projected = camera.project_refracted(&point).unwrap();
      assert!((projected - pixel).norm() < 1e-6, "{} vs {}", projected, pixel);
    }
  }

  #[test]
  fn test_backproject_outside_lens_model() {
    let mut camera = make_camera();
    camera.pinhole.distortion = Distortion { k1: -0.5, ..Default::default() };
    // Normalized radius 0.7 lies beyond the fold of the distortion.
    let result = camera.backproject(Vector2d::new(640. + 0.7 * 800., 360.));
    assert!(matches!(result, Err(RefractionError::Undistortion)));
    assert!(camera.backproject(Vector2d::new(700., 400.)).is_ok());
  }

  #[test]
  fn test_refraction_narrows_field_of_view() {
    // Water seen through a flat port appears magnified: the water ray is
    // closer to the axis than the air ray.
    let camera = make_camera();
    let path = camera.backproject(Vector2d::new(100., 50.)).unwrap();
    let axis = camera.interface().normal;
    assert!(path.water().direction.dot(&axis) > path.segments[0].direction.dot(&axis));
  }
}
