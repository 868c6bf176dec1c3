/*!
# Shared Types and Utilities

Rig-independent core of the I-Scan Wizard: the targeting-angle calculator,
stepper kinematics, operation records and the operation queue.

## Core Types

- [`TargetingGeometry`] - Target centre and sensor offset, computes servo angles
- [`Direction`] - Travel direction along the rail
- [`Operation`] - One queue entry (`type`, `params`, `description`)
- [`OperationQueue`] - Ordered, CSV-persisted list of operations
- [`ScanPlanConfig`] - Generates a full scan as an operation queue

## Modules

- [`targeting`] - Servo angle calculation
- [`rig`] - Step/distance conversion for the drive wheel
- [`operation`] - Operation records and typed commands
- [`queue`] - Queue editing and CSV import/export
- [`scan_plan`] - Scan plan generation
- [`error`] - Common error types
*/

pub mod error;
pub mod operation;
pub mod queue;
pub mod rig;
pub mod scan_plan;
pub mod targeting;

// Re-export commonly used types
pub use error::{Result, SharedError};
pub use operation::{Command, Operation, OperationKind, StepperAmount, StepperMove};
pub use queue::OperationQueue;
pub use rig::Direction;
pub use scan_plan::{ScanPlanConfig, ScanPoint, ScanPreset};
pub use targeting::{AngleInfo, ServoLimit, TargetCenter, TargetingGeometry};
