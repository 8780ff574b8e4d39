// Motion control for the differential-drive base
//
// Provides:
// - Kinematics (motion requests -> velocity/radius drive commands)
// - Cancellation tokens and the single in-flight operation slot
// - The base driver (timed motions, velocity control, named commands)

mod driver;
pub mod kinematics;
pub mod operation;

pub use driver::{BaseDriver, Command, Geometry, Properties};
pub use kinematics::{MotionRequest, RobotGeometry, Vector3};
pub use operation::{CancelReason, CancelToken};
