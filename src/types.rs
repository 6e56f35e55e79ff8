// Eigen-like aliases.
pub type Vector2d = nalgebra::Vector2::<f64>;
pub type Vector3d = nalgebra::Vector3::<f64>;
pub type Vectord = nalgebra::DVector::<f64>;
pub type Matrix2d = nalgebra::Matrix2::<f64>;
pub type Matrix3d = nalgebra::Matrix3::<f64>;
pub type Matrix4d = nalgebra::Matrix4::<f64>;
pub type Matrix23d = nalgebra::Matrix2x3::<f64>;
pub type Matrixd = nalgebra::DMatrix::<f64>;
pub type Rotation3d = nalgebra::Rotation3::<f64>;
pub type Pixel = nalgebra::Vector2::<i32>;
