// Light path from the camera through a flat port: air inside the housing,
// the acrylic window, then water. All functions here are pure.

use crate::all::*;

use thiserror::Error;

const LOCATE_MAX_ITERATIONS: usize = 200;
const LOCATE_TOLERANCE: f64 = 1e-15;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefractiveIndices {
  pub air: f64,
  pub acrylic: f64,
  pub water: f64,
}

impl Default for RefractiveIndices {
  fn default() -> RefractiveIndices {
    RefractiveIndices {
      air: 1.0,
      acrylic: 1.49,
      water: 1.33,
    }
  }
}

impl RefractiveIndices {
  pub fn validate(&self) -> Result<(), String> {
    for (name, value) in [("air", self.air), ("acrylic", self.acrylic), ("water", self.water)] {
      if !value.is_finite() || value <= 0. {
        return Err(format!("refractive index of {} must be finite and positive, got {}", name, value));
      }
    }
    Ok(())
  }

  pub fn of(&self, medium: Medium) -> f64 {
    match medium {
      Medium::Air => self.air,
      Medium::Acrylic => self.acrylic,
      Medium::Water => self.water,
    }
  }
}

// Flat port in camera coordinates. The air/acrylic surface is the plane
// `normal · x = distance`, the acrylic/water surface lies `thickness`
// further along the normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlatInterface {
  pub normal: Vector3d,
  pub distance: f64,
  pub thickness: f64,
}

impl Default for FlatInterface {
  // Parallel to the image plane.
  fn default() -> FlatInterface {
    FlatInterface {
      normal: Vector3d::new(0., 0., 1.),
      distance: 1.,
      thickness: 0.,
    }
  }
}

impl FlatInterface {
  pub fn validate(&self) -> Result<(), String> {
    if !self.normal.iter().all(|x| x.is_finite()) || (self.normal.norm() - 1.).abs() > 1e-9 {
      return Err(format!("interface normal must be a unit vector, got {:?}", self.normal.as_slice()));
    }
    if !self.distance.is_finite() || self.distance <= 0. {
      return Err(format!("interface distance must be positive, got {}", self.distance));
    }
    if !self.thickness.is_finite() || self.thickness < 0. {
      return Err(format!("interface thickness must be non-negative, got {}", self.thickness));
    }
    Ok(())
  }

  pub fn water_distance(&self) -> f64 {
    self.distance + self.thickness
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Medium {
  Air,
  Acrylic,
  Water,
}

#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum RefractionError {
  #[error("total internal reflection: incidence {incidence_angle:.4} rad exceeds critical angle {critical_angle:.4} rad")]
  TotalInternalReflection { incidence_angle: f64, critical_angle: f64 },

  #[error("ray does not reach the interface")]
  MissesInterface,

  #[error("pixel cannot be undistorted")]
  Undistortion,

  #[error("point is not in the water")]
  NotInWater,

  #[error("no camera ray reaches the point")]
  Unreachable,
}

// Vector form of Snell's law. `d` is the unit incident direction, `normal`
// the unit surface normal (either side). Returns the unit transmitted
// direction.
pub fn refract(
  d: &Vector3d,
  normal: &Vector3d,
  n_incident: f64,
  n_transmitted: f64,
) -> Result<Vector3d, RefractionError> {
  let mut n = *normal;
  let mut cos_i = -n.dot(d);
  if cos_i < 0. {
    n = -n;
    cos_i = -cos_i;
  }
  let eta = n_incident / n_transmitted;
  let k = 1. - eta * eta * (1. - cos_i * cos_i);
  if k < 0. {
    return Err(RefractionError::TotalInternalReflection {
      incidence_angle: cos_i.min(1.).acos(),
      critical_angle: (n_transmitted / n_incident).asin(),
    });
  }
  Ok(eta * d + (eta * cos_i - k.sqrt()) * n)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaySegment {
  pub medium: Medium,
  pub origin: Vector3d,
  // Unit length.
  pub direction: Vector3d,
}

impl RaySegment {
  pub fn point_at(&self, s: f64) -> Vector3d {
    self.origin + s * self.direction
  }
}

// Segments in air, acrylic and water, in that order. With a zero thickness
// port the acrylic segment has zero length.
#[derive(Clone, Debug, PartialEq)]
pub struct RayPath {
  pub segments: [RaySegment; 3],
}

impl RayPath {
  pub fn water(&self) -> &RaySegment {
    &self.segments[2]
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefractionModel {
  pub indices: RefractiveIndices,
  pub interface: FlatInterface,
}

impl RefractionModel {
  pub fn new(indices: RefractiveIndices, interface: FlatInterface) -> RefractionModel {
    RefractionModel { indices, interface }
  }

  // Follows a ray leaving the camera center through both surfaces of the port.
  pub fn trace(&self, ray: &Vector3d) -> Result<RayPath, RefractionError> {
    let n = self.interface.normal;
    let d0 = ray.normalize();
    let cos0 = n.dot(&d0);
    if !(cos0 > 0.) { return Err(RefractionError::MissesInterface) }
    let p1 = d0 * (self.interface.distance / cos0);

    let d1 = refract(&d0, &n, self.indices.air, self.indices.acrylic)?;
    let p2 = p1 + d1 * (self.interface.thickness / n.dot(&d1));

    let d2 = refract(&d1, &n, self.indices.acrylic, self.indices.water)?;
    Ok(RayPath {
      segments: [
        RaySegment { medium: Medium::Air, origin: Vector3d::zeros(), direction: d0 },
        RaySegment { medium: Medium::Acrylic, origin: p1, direction: d1 },
        RaySegment { medium: Medium::Water, origin: p2, direction: d2 },
      ],
    })
  }

  // Lateral offset from the optical axis of the port reached at depth `depth`
  // by a ray whose sine of the angle in air is `u`, or None past a grazing angle.
  fn lateral_offset(&self, u: f64, depth: f64) -> Option<f64> {
    let n = &self.indices;
    let tan = |s: f64| if s < 1. { Some(s / (1. - s * s).sqrt()) } else { None };
    let u_acrylic = n.air * u / n.acrylic;
    let u_water = n.air * u / n.water;
    Some(
      self.interface.distance * tan(u)?
      + self.interface.thickness * tan(u_acrylic)?
      + (depth - self.interface.water_distance()) * tan(u_water)?
    )
  }

  // The camera ray whose refracted path passes through `point` in the water.
  // The path stays in the plane spanned by the normal and the point, so this
  // is a monotone 1D problem in the angle of the ray, solved by bisection.
  pub fn locate(&self, point: &Vector3d) -> Result<RayPath, RefractionError> {
    let n = self.interface.normal;
    let depth = n.dot(point);
    if !(depth > self.interface.water_distance()) {
      return Err(RefractionError::NotInWater);
    }
    let lateral = point - depth * n;
    let r = lateral.norm();
    if r < 1e-12 * depth {
      return self.trace(&n);
    }
    let e = lateral / r;

    let idx = &self.indices;
    let mut hi = 1f64.min(idx.acrylic / idx.air).min(idx.water / idx.air);
    hi *= 1. - 1e-15;
    match self.lateral_offset(hi, depth) {
      Some(offset) if offset >= r => {},
      _ => return Err(RefractionError::Unreachable),
    }
    let mut lo = 0.;
    for _ in 0..LOCATE_MAX_ITERATIONS {
      let mid = 0.5 * (lo + hi);
      match self.lateral_offset(mid, depth) {
        Some(offset) if offset < r => lo = mid,
        _ => hi = mid,
      }
      if hi - lo < LOCATE_TOLERANCE { break }
    }
    let u = 0.5 * (lo + hi);
    let ray = u * e + (1. - u * u).sqrt() * n;
    self.trace(&ray)
  }
}
