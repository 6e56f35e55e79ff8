// Intrinsic calibration of a camera looking into water through a flat acrylic
// port: checkerboard detection, planar calibration and a Snell's law layer
// for mapping pixels to rays in water.

// Matrix variables follow the usual math notation (K, R, H, ...).
#![allow(non_snake_case)]

pub mod all;
pub mod board;
pub mod calibrator;
pub mod camera;
pub mod camera_pinhole;
pub mod camera_setup;
pub mod detector;
pub mod error;
pub mod homography;
pub mod image;
pub mod intrinsic_solver;
pub mod linear_init;
pub mod math;
pub mod parameters;
pub mod pose;
pub mod refine;
pub mod refraction;
pub mod subpixel;
pub mod types;
pub mod util;

#[cfg(test)]
pub mod synthetic;
