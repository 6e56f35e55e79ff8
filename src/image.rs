use crate::all::*;

use ::image::{ImageBuffer, Luma};

pub type FloatBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

// Row-major grayscale image storage.
// Could also have used nalebgra::DMatrix, but the detector only ever walks
// the data row by row.
#[derive(Clone)]
pub struct Image {
  pub data: Vec<u8>,
  pub width: usize,
  pub height: usize,
}

impl Image {
  pub fn new(width: usize, height: usize, data: Vec<u8>) -> Image {
    assert_eq!(data.len(), width * height);
    Image {
      data,
      width,
      height,
    }
  }

  pub fn filled(width: usize, height: usize, value: u8) -> Image {
    Image::new(width, height, vec![value; width * height])
  }

  #[inline(always)]
  pub fn value(&self, x: usize, y: usize) -> u8 {
    self.data[y * self.width + x]
  }

  #[inline(always)]
  pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
    self.data[y * self.width + x] = value;
  }

  pub fn to_gray(&self) -> ::image::GrayImage {
    ::image::GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
      Luma([self.value(x as usize, y as usize)])
    })
  }

  pub fn to_float(&self) -> FloatImage {
    FloatImage {
      data: self.data.iter().map(|&v| v as f32).collect(),
      width: self.width,
      height: self.height,
    }
  }
}

// Element access in the manner of `image[y][x]`.
impl Index<usize> for Image {
  type Output = [u8];
  fn index(&self, y: usize) -> &Self::Output {
    &self.data[y * self.width .. (y + 1) * self.width]
  }
}

impl fmt::Debug for Image {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Image {{ width: {}, height: {} }}", self.width, self.height)
  }
}

// Floating point working copy used for smoothing and gradient sampling.
// Stored as f32, read back as f64.
#[derive(Clone, Debug)]
pub struct FloatImage {
  pub data: Vec<f32>,
  pub width: usize,
  pub height: usize,
}

impl FloatImage {
  pub fn zeros(width: usize, height: usize) -> FloatImage {
    FloatImage {
      data: vec![0.; width * height],
      width,
      height,
    }
  }

  pub fn from_buffer(buffer: FloatBuffer) -> FloatImage {
    let (width, height) = buffer.dimensions();
    FloatImage {
      data: buffer.into_raw(),
      width: width as usize,
      height: height as usize,
    }
  }

  pub fn to_buffer(&self) -> FloatBuffer {
    FloatBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
      Luma([self.data[y as usize * self.width + x as usize]])
    })
  }

  #[inline(always)]
  pub fn value(&self, x: usize, y: usize) -> f64 {
    self.data[y * self.width + x] as f64
  }

  #[inline(always)]
  pub fn set_value(&mut self, x: usize, y: usize, value: f64) {
    self.data[y * self.width + x] = value as f32;
  }

  pub fn max_value(&self) -> f64 {
    self.data.iter().fold(0., |m, &v| f64::max(m, v as f64))
  }

  // Coordinate (0, 0) is the center of the top-left pixel. Returns None
  // outside the area where all four neighbours exist.
  #[inline(always)]
  pub fn bilinear(&self, u: Vector2d) -> Option<f64> {
    if !(u[0] >= 0. && u[1] >= 0.) { return None }
    let x0 = u[0] as usize;
    let y0 = u[1] as usize;
    if x0 + 1 >= self.width || y0 + 1 >= self.height { return None }
    let xa = u[0] - x0 as f64;
    let ya = u[1] - y0 as f64;
    Some((1. - xa) * (1. - ya) * self.value(x0, y0)
      + xa * (1. - ya) * self.value(x0 + 1, y0)
      + (1. - xa) * ya * self.value(x0, y0 + 1)
      + xa * ya * self.value(x0 + 1, y0 + 1))
  }

  // Gaussian blur with clamped borders.
  pub fn gaussian_blur(&self, sigma: f64) -> FloatImage {
    if !(sigma > 0.) { return self.clone() }
    FloatImage::from_buffer(imageproc::filter::gaussian_blur_f32(&self.to_buffer(), sigma as f32))
  }
}

// One input of a calibration run. Consumed by the detector, only the
// detected corners are kept afterwards.
#[derive(Clone, Debug)]
pub struct CalibrationImage {
  pub id: String,
  pub image: Image,
}

impl CalibrationImage {
  pub fn new(id: impl Into<String>, image: Image) -> CalibrationImage {
    CalibrationImage {
      id: id.into(),
      image,
    }
  }

  // Decoding is delegated to the `image` crate; color images are converted
  // to 8-bit luma.
  pub fn open(path: &Path) -> Result<CalibrationImage, ::image::ImageError> {
    let gray = ::image::open(path)?.to_luma8();
    let (width, height) = gray.dimensions();
    Ok(CalibrationImage {
      id: path.display().to_string(),
      image: Image::new(width as usize, height as usize, gray.into_raw()),
    })
  }
}
