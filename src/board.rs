use crate::all::*;

// Number of inner corners of the checkerboard along both axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSize {
  pub width: usize,
  pub height: usize,
}

impl BoardSize {
  pub fn new(width: usize, height: usize) -> BoardSize {
    BoardSize { width, height }
  }

  pub fn corner_count(&self) -> usize {
    self.width * self.height
  }

  // Raster index of the corner at column `i`, row `j`.
  #[inline(always)]
  pub fn index(&self, i: usize, j: usize) -> usize {
    j * self.width + i
  }
}

impl fmt::Display for BoardSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

// Subpixel corner locations of one image, row-major: index `j * width + i`.
#[derive(Clone, Debug)]
pub struct CornerSet {
  pub board: BoardSize,
  pub points: Vec<Vector2d>,
}

impl CornerSet {
  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }
}

// The physical board on the z = 0 plane, in the same order as `CornerSet`.
#[derive(Clone, Debug)]
pub struct ObjectGrid {
  pub board: BoardSize,
  pub square_size: f64,
  pub points: Vec<Vector3d>,
}

impl ObjectGrid {
  pub fn new(board: BoardSize, square_size: f64) -> ObjectGrid {
    let mut points = Vec::with_capacity(board.corner_count());
    for j in 0..board.height {
      for i in 0..board.width {
        points.push(Vector3d::new(i as f64 * square_size, j as f64 * square_size, 0.));
      }
    }
    ObjectGrid {
      board,
      square_size,
      points,
    }
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  // Plane coordinates for homography estimation.
  pub fn planar_points(&self) -> Vec<Vector2d> {
    self.points.iter().map(|p| Vector2d::new(p[0], p[1])).collect()
  }
}

// One accepted image: the detected corners paired with the shared grid.
// Whether the corners match the grid is checked by the solver.
#[derive(Clone, Debug)]
pub struct View<'a> {
  pub id: String,
  pub corners: CornerSet,
  pub grid: &'a ObjectGrid,
}

impl<'a> View<'a> {
  pub fn new(id: impl Into<String>, corners: CornerSet, grid: &'a ObjectGrid) -> View<'a> {
    View {
      id: id.into(),
      corners,
      grid,
    }
  }

  pub fn correspondences(&self) -> impl Iterator<Item = (&Vector3d, &Vector2d)> {
    self.grid.points.iter().zip(self.corners.points.iter())
  }
}
