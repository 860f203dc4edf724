pub mod core;
pub mod error;
pub mod estimator;
pub mod factors;
pub mod geodetic;
pub mod imu;
pub mod io;
pub mod linalg;
pub mod logger;
pub mod manifold;
pub mod optimizer;

pub use error::{FusionError, FusionResult};
pub use estimator::{
    AbsoluteFix, EpochOutput, EstimatorWorker, FusionConfig, FusionEstimator, SensorEvent,
};
pub use geodetic::{FixConverter, GeodeticConfig, Llh};
pub use imu::{ImuBias, ImuSample, InertialFactorKind, PreintegratedImuMeasurements};
pub use io::*;
pub use logger::{init_logger, init_logger_with_level};
