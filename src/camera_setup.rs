use crate::all::*;

// JSON view of a calibration result, in the same shape as the camera
// calibration files of the tracking tools that consume it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct CameraSetup {
  pub focalLengthX: f64,
  pub focalLengthY: f64,
  pub principalPointX: f64,
  pub principalPointY: f64,
  // k1, k2, p1, p2, k3.
  pub distortionCoefficients: Vec<f64>,
  pub imageWidth: usize,
  pub imageHeight: usize,
  pub model: String,
  pub refractiveIndices: RefractiveIndices,
  pub portNormal: [f64; 3],
  pub portDistance: f64,
  pub portThickness: f64,
  pub rms: f64,
  pub imagesUsed: usize,
  pub imagesSkipped: Vec<SkippedImage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedImage {
  pub id: String,
  pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraSetupRoot {
  pub cameras: Vec<CameraSetup>,
}

impl From<&Calibration> for CameraSetup {
  fn from(calibration: &Calibration) -> CameraSetup {
    let camera = &calibration.camera;
    let interface = camera.interface();
    CameraSetup {
      focalLengthX: camera.pinhole.fx(),
      focalLengthY: camera.pinhole.fy(),
      principalPointX: camera.pinhole.cx(),
      principalPointY: camera.pinhole.cy(),
      distortionCoefficients: camera.distortion().to_array().to_vec(),
      imageWidth: camera.image_size.0,
      imageHeight: camera.image_size.1,
      model: "pinhole".to_string(),
      refractiveIndices: *camera.indices(),
      portNormal: [interface.normal[0], interface.normal[1], interface.normal[2]],
      portDistance: interface.distance,
      portThickness: interface.thickness,
      rms: calibration.report.rms,
      imagesUsed: calibration.report.used_count(),
      imagesSkipped: calibration.report.skipped()
        .map(|(id, reason)| SkippedImage { id: id.to_string(), reason: reason.to_string() })
        .collect(),
    }
  }
}

impl CameraSetupRoot {
  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(self)
  }
}
