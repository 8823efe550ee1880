pub mod controller;
pub mod estimator;
pub mod loops;
pub mod replay;

pub use controller::AdmissionController;
pub use estimator::LatencyEstimator;
pub use replay::ReplayPolicy;
