// NOTE This kind of import-all file isn't a common Rust idiom.

pub use crate::{
  board::*,
  calibrator::*,
  camera::*,
  camera_pinhole::*,
  camera_setup::*,
  detector::*,
  error::*,
  homography::*,
  image::*,
  intrinsic_solver::*,
  linear_init::*,
  math::*,
  parameters::*,
  pose::*,
  refine::*,
  refraction::*,
  subpixel::*,
  types::*,
};

pub use {
  std::{
    collections::{HashMap, VecDeque},
    fmt,
    ops::Index,
    path::{Path, PathBuf},
  },
  log::{debug, error, info, warn, LevelFilter},
  nalgebra::{matrix, DMatrix, DVector, SymmetricEigen},
  serde::{Deserialize, Serialize},
};
