// Iterative corner refinement by gradient orthogonality: every image gradient
// near a saddle point is orthogonal to the vector from the corner to the
// gradient's location, so the corner q solves Σ g gᵀ (p - q) = 0 over a window.
// Same idea as OpenCV's `cornerSubPix()`.

use crate::all::*;

#[derive(Clone, Debug, PartialEq)]
pub struct SubpixelParameters {
  // Upper limit, the detector shrinks the window for closely spaced corners.
  pub window_half_size: usize,
  pub max_iterations: usize,
  // Stop when the corner moves less than this many pixels.
  pub tolerance: f64,
}

impl Default for SubpixelParameters {
  fn default() -> SubpixelParameters {
    SubpixelParameters {
      window_half_size: 5,
      max_iterations: 20,
      tolerance: 0.01,
    }
  }
}

pub struct Gradients {
  pub x: FloatImage,
  pub y: FloatImage,
}

impl Gradients {
  // Scharr derivatives in intensity per pixel, borders padded by continuity.
  pub fn scharr(image: &Image) -> Gradients {
    let gray = image.to_gray();
    let to_float = |g: ::image::ImageBuffer<::image::Luma<i16>, Vec<i16>>| {
      let (width, height) = g.dimensions();
      FloatImage {
        // The kernel weights sum to 32 on either side.
        data: g.into_raw().into_iter().map(|v| v as f32 / 32.).collect(),
        width: width as usize,
        height: height as usize,
      }
    };
    Gradients {
      x: to_float(imageproc::gradients::horizontal_scharr(&gray)),
      y: to_float(imageproc::gradients::vertical_scharr(&gray)),
    }
  }
}

// Returns None if the window leaves the image, the gradient structure is
// degenerate (flat area or a single edge), or the corner drifts out of the
// window.
pub fn refine_corner(
  gradients: &Gradients,
  initial: Vector2d,
  window_half_size: usize,
  params: &SubpixelParameters,
) -> Option<Vector2d> {
  let r = window_half_size as i32;
  // Gaussian weights favour gradients close to the corner.
  let sigma = 0.5 * window_half_size.max(1) as f64;
  let mut q = initial;
  for _ in 0..params.max_iterations {
    let mut G = Matrix2d::zeros();
    let mut b = Vector2d::zeros();
    for dy in -r..=r {
      for dx in -r..=r {
        let offset = Vector2d::new(dx as f64, dy as f64);
        let p = q + offset;
        let gx = gradients.x.bilinear(p)?;
        let gy = gradients.y.bilinear(p)?;
        let w = (-offset.norm_squared() / (2. * sigma * sigma)).exp();
        let gxx = w * gx * gx;
        let gxy = w * gx * gy;
        let gyy = w * gy * gy;
        G += Matrix2d::new(gxx, gxy, gxy, gyy);
        b += Vector2d::new(gxx * p[0] + gxy * p[1], gxy * p[0] + gyy * p[1]);
      }
    }
    // Relative determinant check rejects flat patches and straight edges.
    let trace = G.trace();
    if trace <= 0. || G.determinant() < 1e-6 * trace * trace { return None }
    let q_new = G.try_inverse()? * b;
    let movement = (q_new - q).norm();
    q = q_new;
    if (q - initial).norm() > window_half_size as f64 { return None }
    if movement < params.tolerance { break }
  }
  Some(q)
}
