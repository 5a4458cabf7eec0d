//! Regularized linear models and calibration curves

mod elastic_net;
mod isotonic;

pub use elastic_net::{sigmoid, ElasticNet, Family, Penalty, SolverOptions};
pub use isotonic::IsotonicCalibrator;
