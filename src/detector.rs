// Checkerboard inner corner detector.
//
// Inner corners of a checkerboard are X-junctions: saddle points of the
// smoothed intensity. They are found as peaks of the saddle response
// `Ixy² - Ixx Iyy`, then linked into a lattice by growing from a seed
// corner, and finally ordered and refined to subpixel accuracy.

use crate::all::*;

use thiserror::Error;

// Corners closer than this to the image border are not considered.
const BORDER: usize = 4;
// Number of strongest candidates tried as grid seeds.
const MAX_SEEDS: usize = 8;
// A neighbour is searched within this fraction of the predicted lattice step.
const SEARCH_RADIUS: f64 = 0.35;
// Second lattice direction must differ from the first by at least 60 degrees.
const MAX_AXIS_COS: f64 = 0.5;

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorParameters {
  pub blur_sigma: f64,
  // Candidates must reach this fraction of the strongest saddle response.
  // L and T junctions on the board border respond with about 0.25.
  pub relative_threshold: f64,
  // Absolute floor for the saddle response, in (intensity / pixel²)².
  pub min_response: f64,
  pub nms_radius: usize,
  pub max_candidates: usize,
  pub subpixel: SubpixelParameters,
}

impl Default for DetectorParameters {
  fn default() -> DetectorParameters {
    DetectorParameters {
      blur_sigma: 1.5,
      relative_threshold: 0.35,
      min_response: 0.25,
      nms_radius: 3,
      max_candidates: 2000,
      subpixel: SubpixelParameters::default(),
    }
  }
}

// Reasons a checkerboard was not found. Never fatal to a calibration run.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DetectionFailure {
  #[error("image {width}x{height} is too small")]
  ImageTooSmall { width: usize, height: usize },
  #[error("{found} corner candidates, need at least {needed}")]
  TooFewCandidates { found: usize, needed: usize },
  #[error("no {0} corner grid found")]
  NoGrid(BoardSize),
  #[error("subpixel refinement failed for corner {0}")]
  Refinement(usize),
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
  point: Vector2d,
  response: f64,
}

// A candidate attached to the lattice, with local step estimates along the
// two lattice axes.
#[derive(Clone, Copy, Debug)]
struct GridNode {
  candidate: usize,
  su: Vector2d,
  sv: Vector2d,
}

pub struct Detector {
  board: BoardSize,
  params: DetectorParameters,
}

impl Detector {
  pub fn new(board: BoardSize, params: DetectorParameters) -> Detector {
    Detector {
      board,
      params,
    }
  }

  pub fn board(&self) -> BoardSize {
    self.board
  }

  pub fn process(&self, image: &Image) -> Result<CornerSet, DetectionFailure> {
    if image.width < 4 * BORDER || image.height < 4 * BORDER {
      return Err(DetectionFailure::ImageTooSmall { width: image.width, height: image.height });
    }
    let smooth = image.to_float().gaussian_blur(self.params.blur_sigma);
    let response = saddle_response(&smooth);
    let candidates = self.find_candidates(&response);
    let needed = self.board.corner_count();
    if candidates.len() < needed {
      return Err(DetectionFailure::TooFewCandidates { found: candidates.len(), needed });
    }

    let coarse = (0..candidates.len().min(MAX_SEEDS))
      .filter_map(|seed| self.grow_grid(&candidates, seed))
      .next()
      .ok_or(DetectionFailure::NoGrid(self.board))?;
    debug!("Grid {} found among {} candidates.", self.board, candidates.len());

    let gradients = Gradients::scharr(image);
    let spacing = self.min_spacing(&coarse);
    let half = self.params.subpixel.window_half_size
      .min((0.4 * spacing).floor() as usize)
      .max(2);
    let mut points = Vec::with_capacity(coarse.len());
    for (i, p) in coarse.iter().enumerate() {
      let q = refine_corner(&gradients, *p, half, &self.params.subpixel)
        .ok_or(DetectionFailure::Refinement(i))?;
      points.push(q);
    }
    Ok(CornerSet {
      board: self.board,
      points,
    })
  }

  // Non-maximum suppressed response peaks, strongest first.
  fn find_candidates(&self, response: &FloatImage) -> Vec<Candidate> {
    let max_response = response.max_value();
    if max_response < self.params.min_response { return vec![] }
    let threshold = f64::max(self.params.min_response, self.params.relative_threshold * max_response);
    let r = self.params.nms_radius as i64;
    let mut candidates = vec![];
    for y in BORDER..(response.height - BORDER) {
      for x in BORDER..(response.width - BORDER) {
        let v = response.value(x, y);
        if v < threshold { continue }
        if !is_local_maximum(response, x, y, r) { continue }
        candidates.push(Candidate {
          point: Vector2d::new(x as f64, y as f64),
          response: v,
        });
      }
    }
    candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
    candidates.truncate(self.params.max_candidates);
    candidates
  }

  // Breadth-first lattice growth from one seed. Returns the corners in
  // canonical raster order if a complete grid of the board size was found.
  fn grow_grid(&self, candidates: &[Candidate], seed: usize) -> Option<Vec<Vector2d>> {
    let (su, sv) = seed_axes(candidates, seed)?;
    let max_nodes = 4 * self.board.corner_count();
    let mut used = vec![false; candidates.len()];
    let mut nodes: HashMap<(i32, i32), GridNode> = HashMap::new();
    let mut queue = VecDeque::new();
    used[seed] = true;
    nodes.insert((0, 0), GridNode { candidate: seed, su, sv });
    queue.push_back((0, 0));

    while let Some(key) = queue.pop_front() {
      let node = nodes[&key];
      let p = candidates[node.candidate].point;
      for (di, dj) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
        let neighbour_key = (key.0 + di, key.1 + dj);
        if nodes.contains_key(&neighbour_key) { continue }
        let step = if di != 0 { node.su * di as f64 } else { node.sv * dj as f64 };
        let radius = SEARCH_RADIUS * step.norm();
        let found = nearest_unused(candidates, &used, p + step, radius);
        if let Some(c) = found {
          let actual = candidates[c].point - p;
          let (su, sv) = if di != 0 {
            (actual * di as f64, node.sv)
          }
          else {
            (node.su, actual * dj as f64)
          };
          used[c] = true;
          nodes.insert(neighbour_key, GridNode { candidate: c, su, sv });
          queue.push_back(neighbour_key);
          if nodes.len() > max_nodes { return None }
        }
      }
    }

    let lattice: HashMap<(i32, i32), Vector2d> = nodes.iter()
      .map(|(k, n)| (*k, candidates[n.candidate].point))
      .collect();
    order_grid(&lattice, self.board)
  }

  fn min_spacing(&self, grid: &[Vector2d]) -> f64 {
    let b = self.board;
    let mut spacing = f64::MAX;
    for j in 0..b.height {
      for i in 0..b.width {
        let p = grid[b.index(i, j)];
        if i + 1 < b.width { spacing = spacing.min((grid[b.index(i + 1, j)] - p).norm()) }
        if j + 1 < b.height { spacing = spacing.min((grid[b.index(i, j + 1)] - p).norm()) }
      }
    }
    spacing
  }
}

// Convenience wrapper for one-off detection.
pub fn detect_corners(
  image: &Image,
  board: BoardSize,
  params: &DetectorParameters,
) -> Result<CornerSet, DetectionFailure> {
  Detector::new(board, params.clone()).process(image)
}

// `Ixy² - Ixx Iyy`, positive at saddle points, zero along straight edges.
fn saddle_response(image: &FloatImage) -> FloatImage {
  let mut out = FloatImage::zeros(image.width, image.height);
  let v = |x: usize, y: usize| image.value(x, y);
  for y in 1..(image.height - 1) {
    for x in 1..(image.width - 1) {
      let ixx = v(x + 1, y) - 2. * v(x, y) + v(x - 1, y);
      let iyy = v(x, y + 1) - 2. * v(x, y) + v(x, y - 1);
      let ixy = 0.25 * (v(x + 1, y + 1) - v(x + 1, y - 1) - v(x - 1, y + 1) + v(x - 1, y - 1));
      out.set_value(x, y, f64::max(0., ixy * ixy - ixx * iyy));
    }
  }
  out
}

// Ties are broken by raster order so that plateaus yield a single peak.
fn is_local_maximum(response: &FloatImage, x: usize, y: usize, r: i64) -> bool {
  let v = response.value(x, y);
  for dy in -r..=r {
    for dx in -r..=r {
      if dx == 0 && dy == 0 { continue }
      let xx = x as i64 + dx;
      let yy = y as i64 + dy;
      if xx < 0 || yy < 0 || xx >= response.width as i64 || yy >= response.height as i64 { continue }
      let w = response.value(xx as usize, yy as usize);
      let before = dy < 0 || (dy == 0 && dx < 0);
      if w > v || (before && w == v) { return false }
    }
  }
  true
}

// Lattice directions at the seed: the nearest neighbour, and the nearest
// neighbour that is not roughly parallel to it.
fn seed_axes(candidates: &[Candidate], seed: usize) -> Option<(Vector2d, Vector2d)> {
  let p = candidates[seed].point;
  let mut neighbours: Vec<Vector2d> = candidates.iter().enumerate()
    .filter(|(i, _)| *i != seed)
    .map(|(_, c)| c.point - p)
    .collect();
  neighbours.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));
  neighbours.truncate(8);
  let u = *neighbours.first()?;
  let du = u.norm();
  if du < 2. { return None }
  let v = neighbours.iter()
    .skip(1)
    .find(|n| {
      let dn = n.norm();
      dn < 2. * du && (u.dot(n) / (du * dn)).abs() < MAX_AXIS_COS
    })?;
  Some((u, *v))
}

fn nearest_unused(
  candidates: &[Candidate],
  used: &[bool],
  predicted: Vector2d,
  radius: f64,
) -> Option<usize> {
  let mut best: Option<(usize, f64)> = None;
  for (i, c) in candidates.iter().enumerate() {
    if used[i] { continue }
    let d = (c.point - predicted).norm();
    if d > radius { continue }
    if best.map_or(true, |(_, bd)| d < bd) {
      best = Some((i, d));
    }
  }
  best.map(|(i, _)| i)
}

// Maps the lattice to raster order. The first axis has `board.width` corners
// and points towards +x (+y if it is mostly vertical); the second axis is
// chosen so that the grid is right-handed in image coordinates. Every image of
// the same board gets the same ordering this way, up to views that rotate the
// board past 90 degrees in the image.
fn order_grid(lattice: &HashMap<(i32, i32), Vector2d>, board: BoardSize) -> Option<Vec<Vector2d>> {
  let min_i = lattice.keys().map(|k| k.0).min()?;
  let max_i = lattice.keys().map(|k| k.0).max()?;
  let min_j = lattice.keys().map(|k| k.1).min()?;
  let max_j = lattice.keys().map(|k| k.1).max()?;
  let span_i = (max_i - min_i + 1) as usize;
  let span_j = (max_j - min_j + 1) as usize;
  if lattice.len() != span_i * span_j { return None }
  let raw = |a: usize, b: usize| lattice.get(&(min_i + a as i32, min_j + b as i32)).copied();

  let fits = span_i == board.width && span_j == board.height;
  let fits_transposed = span_i == board.height && span_j == board.width;
  if !fits && !fits_transposed { return None }
  let transpose = if fits && fits_transposed {
    // Square board: the first axis is the more horizontal one.
    let di = raw(span_i - 1, 0)? - raw(0, 0)?;
    let dj = raw(0, span_j - 1)? - raw(0, 0)?;
    dj[0].abs() / dj.norm() > di[0].abs() / di.norm()
  }
  else {
    fits_transposed
  };
  let at = |i: usize, j: usize| if transpose { raw(j, i) } else { raw(i, j) };

  let w = board.width;
  let h = board.height;
  let di = at(w - 1, 0)? - at(0, 0)?;
  let flip_i = if di[0].abs() >= di[1].abs() { di[0] < 0. } else { di[1] < 0. };
  let at_i = |i: usize, j: usize| if flip_i { at(w - 1 - i, j) } else { at(i, j) };
  let di = at_i(w - 1, 0)? - at_i(0, 0)?;
  let dj = at_i(0, h - 1)? - at_i(0, 0)?;
  let flip_j = di[0] * dj[1] - di[1] * dj[0] < 0.;

  let mut points = Vec::with_capacity(board.corner_count());
  for j in 0..h {
    for i in 0..w {
      let jj = if flip_j { h - 1 - j } else { j };
      points.push(at_i(i, jj)?);
    }
  }
  Some(points)
}
