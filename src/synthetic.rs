// Rendered and projected checkerboards with known ground truth, for tests.

use crate::all::*;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

const SUPERSAMPLING: usize = 4;
const BLACK: f64 = 30.;
const WHITE: f64 = 220.;
const BACKGROUND: f64 = 100.;

#[derive(Clone, Debug)]
pub struct SyntheticScene {
  pub board: BoardSize,
  pub square_size: f64,
  pub camera: PinholeModel,
  pub image_size: (usize, usize),
}

impl SyntheticScene {
  pub fn default_scene() -> SyntheticScene {
    SyntheticScene {
      board: BoardSize::new(9, 6),
      square_size: 3.,
      camera: PinholeModel::new(600., 600., 320., 240., Distortion::default()),
      image_size: (640, 480),
    }
  }

  pub fn with_distortion(mut self, distortion: Distortion) -> SyntheticScene {
    self.camera.distortion = distortion;
    self
  }

  pub fn grid(&self) -> ObjectGrid {
    ObjectGrid::new(self.board, self.square_size)
  }

  fn board_center(&self) -> Vector3d {
    let s = self.square_size;
    Vector3d::new(
      0.5 * (self.board.width - 1) as f64 * s,
      0.5 * (self.board.height - 1) as f64 * s,
      0.,
    )
  }

  // Places the board center at `center` in camera coordinates.
  pub fn pose_looking_at(&self, R: Rotation3d, center: Vector3d) -> Pose {
    Pose::new(R, center - R * self.board_center())
  }

  // Tilted views around different axes, all of the board inside the image.
  pub fn poses(&self) -> Vec<Pose> {
    let setups = [
      (0.35, 0.0, 0.05, Vector3d::new(2., -1., 60.)),
      (-0.3, 0.1, -0.05, Vector3d::new(-3., 2., 65.)),
      (0.0, 0.35, 0.1, Vector3d::new(1., 1., 62.)),
      (0.1, -0.35, 0.0, Vector3d::new(-2., -2., 68.)),
      (0.25, 0.25, -0.1, Vector3d::new(0., 2., 70.)),
      (-0.25, -0.25, 0.08, Vector3d::new(3., 0., 64.)),
    ];
    setups.iter()
      .map(|(rx, ry, rz, center)| self.pose_looking_at(Rotation3d::from_euler_angles(*rx, *ry, *rz), *center))
      .collect()
  }

  pub fn project_grid(&self, pose: &Pose) -> Vec<Vector2d> {
    self.grid().points.iter()
      .map(|X| self.camera.ray_to_pixel(pose.transform(X)).unwrap())
      .collect()
  }

  // Exact projections plus zero-mean gaussian noise, seeded.
  pub fn noisy_corners(&self, pose: &Pose, sigma: f64, seed: u64) -> CornerSet {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let points = self.project_grid(pose).into_iter()
      .map(|p| p + sigma * Vector2d::new(gaussian(&mut rng), gaussian(&mut rng)))
      .collect();
    CornerSet { board: self.board, points }
  }

  fn color_at(&self, pose: &Pose, pixel: Vector2d) -> f64 {
    let ray = match self.camera.pixel_to_ray(pixel) {
      Some(ray) => ray,
      None => return BACKGROUND,
    };
    // Intersect with the z = 0 plane in board coordinates.
    let origin = pose.R.inverse() * (-pose.t);
    let direction = pose.R.inverse() * ray;
    if direction[2].abs() < 1e-12 { return BACKGROUND }
    let s = -origin[2] / direction[2];
    if s <= 0. { return BACKGROUND }
    let p = origin + s * direction;
    let sx = (p[0] / self.square_size).floor() as i64;
    let sy = (p[1] / self.square_size).floor() as i64;
    let (w, h) = (self.board.width as i64, self.board.height as i64);
    if sx >= -1 && sx < w && sy >= -1 && sy < h {
      if (sx + sy).rem_euclid(2) == 0 { BLACK } else { WHITE }
    }
    else if sx >= -2 && sx <= w && sy >= -2 && sy <= h {
      WHITE
    }
    else {
      BACKGROUND
    }
  }

  // Anti-aliased rendering. Integer pixel coordinates are pixel centers.
  pub fn render(&self, pose: &Pose) -> Image {
    let (width, height) = self.image_size;
    let mut image = Image::filled(width, height, 0);
    let n = SUPERSAMPLING as f64;
    for y in 0..height {
      for x in 0..width {
        let mut sum = 0.;
        for a in 0..SUPERSAMPLING {
          for b in 0..SUPERSAMPLING {
            let sample = Vector2d::new(
              x as f64 - 0.5 + (b as f64 + 0.5) / n,
              y as f64 - 0.5 + (a as f64 + 0.5) / n,
            );
            sum += self.color_at(pose, sample);
          }
        }
        image.set_value(x, y, (sum / (n * n)).round() as u8);
      }
    }
    image
  }
}

pub fn fronto_parallel_pose(scene: &SyntheticScene) -> Pose {
  let s = scene.square_size;
  Pose::new(Rotation3d::identity(), Vector3d::new(-4. * s, -2.5 * s, 60.))
}

// Box-Muller.
fn gaussian(rng: &mut Xoshiro256PlusPlus) -> f64 {
  let u1: f64 = rng.gen_range(f64::EPSILON..1.);
  let u2: f64 = rng.gen();
  (-2. * u1.ln()).sqrt() * (2. * std::f64::consts::PI * u2).cos()
}
