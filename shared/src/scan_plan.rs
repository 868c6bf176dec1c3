/*!
Scan plan generation.

A scan plan homes the carriage, then walks it up the rail in equal steps,
aiming the sensor at the target and taking a photo at every point the servo
can actually reach.
*/

use crate::error::{Result, SharedError};
use crate::operation::{check_delay_secs, Operation, OperationKind, DELAY_KEY};
use crate::queue::OperationQueue;
use crate::rig::{self, Direction, DEFAULT_MOTOR_SPEED, DEFAULT_WHEEL_DIAMETER_MM};
use crate::targeting::TargetingGeometry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Scan parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPlanConfig {
    pub geometry: TargetingGeometry,
    /// Total carriage travel covered by the scan, in cm
    pub scan_distance_cm: f64,
    /// Number of measurement points, including both ends
    pub measurements: u32,
    pub wheel_diameter_mm: f64,
    pub motor_speed: u32,
    /// Autofocus delay written into each photo operation
    pub photo_delay_secs: f64,
}

impl Default for ScanPlanConfig {
    fn default() -> Self {
        Self {
            geometry: TargetingGeometry::default(),
            scan_distance_cm: 50.0,
            measurements: 6,
            wheel_diameter_mm: DEFAULT_WHEEL_DIAMETER_MM,
            motor_speed: DEFAULT_MOTOR_SPEED,
            photo_delay_secs: 2.0,
        }
    }
}

/// Named starting points offered by the calculator panel and the `plan` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPreset {
    /// Original I-Scan bench setup: target (33, 50), 80 cm, 7 points
    Original,
    /// Target (50, 50), 100 cm, 10 points
    Standard,
    /// Short run for checking the rig: target (30, 40), 60 cm, 5 points
    QuickTest,
}

impl ScanPreset {
    pub const ALL: [ScanPreset; 3] = [Self::Original, Self::Standard, Self::QuickTest];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Standard => "standard",
            Self::QuickTest => "quick-test",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name.trim().to_lowercase())
    }

    pub fn config(&self) -> ScanPlanConfig {
        let (target_x, target_y, scan_distance_cm, measurements) = match self {
            Self::Original => (33.0, 50.0, 80.0, 7),
            Self::Standard => (50.0, 50.0, 100.0, 10),
            Self::QuickTest => (30.0, 40.0, 60.0, 5),
        };
        ScanPlanConfig {
            geometry: TargetingGeometry {
                target_x,
                target_y,
                sensor_x: 0.0,
            },
            scan_distance_cm,
            measurements,
            ..ScanPlanConfig::default()
        }
    }
}

/// One row of the per-point table
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanPoint {
    /// 1-based point number
    pub number: u32,
    pub y_cm: f64,
    pub raw_angle: f64,
    pub servo_angle: u8,
    pub reachable: bool,
}

impl ScanPlanConfig {
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        rig::validate_diameter(self.wheel_diameter_mm)?;
        if self.measurements < 2 {
            return Err(SharedError::config(format!(
                "a scan needs at least 2 measurements, got {}",
                self.measurements
            )));
        }
        if !self.scan_distance_cm.is_finite() || self.scan_distance_cm <= 0.0 {
            return Err(SharedError::config(format!(
                "scan distance must be positive, got {}",
                self.scan_distance_cm
            )));
        }
        check_delay_secs("photo delay", self.photo_delay_secs)
    }

    /// Carriage travel between two consecutive points, in cm
    pub fn step_cm(&self) -> f64 {
        self.scan_distance_cm / f64::from(self.measurements.saturating_sub(1).max(1))
    }

    /// Motor steps for one `step_cm` move
    pub fn steps_per_point(&self) -> Result<u32> {
        rig::steps_for_distance_rounded(self.step_cm(), self.wheel_diameter_mm)
    }

    pub fn scan_points(&self) -> Result<Vec<ScanPoint>> {
        self.validate()?;
        let step = self.step_cm();

        (0..self.measurements)
            .map(|i| {
                let y_cm = f64::from(i) * step;
                let raw_angle = self.geometry.raw_servo_angle(y_cm)?;
                Ok(ScanPoint {
                    number: i + 1,
                    y_cm,
                    raw_angle,
                    servo_angle: self.geometry.servo_angle(y_cm)?,
                    reachable: self.geometry.is_reachable(y_cm)?,
                })
            })
            .collect()
    }

    /// Build the operation queue for this scan
    pub fn build_queue(&self) -> Result<OperationQueue> {
        let points = self.scan_points()?;
        let step = self.step_cm();
        let steps = self.steps_per_point()?;

        let mut operations = vec![Operation::home().with_description("Execute home function")];

        for (i, point) in points.iter().enumerate() {
            if point.reachable {
                operations.push(Operation::servo(point.servo_angle).with_description(format!(
                    "Point {}: Set servo to {}° (Y={:.1}cm)",
                    point.number, point.servo_angle, point.y_cm
                )));

                let mut params = Map::new();
                params.insert(DELAY_KEY.to_string(), Value::from(self.photo_delay_secs));
                operations.push(Operation::new(
                    OperationKind::Photo,
                    params,
                    format!("Point {}: Capture photo", point.number),
                ));
            } else {
                debug!(
                    "Point {} at Y={:.1}cm is out of servo range ({:.1}°), skipped",
                    point.number, point.y_cm, point.raw_angle
                );
            }

            // every point but the last moves on, reachable or not
            if i + 1 < points.len() {
                operations.push(
                    Operation::stepper_steps(steps, Direction::Up, self.motor_speed, step)
                        .with_description(format!("Move {:.2}cm forward ({} steps)", step, steps)),
                );
            }
        }

        let reachable = points.iter().filter(|p| p.reachable).count();
        info!(
            "📐 Scan plan: {} points ({} reachable), {:.2}cm / {} steps between points",
            points.len(),
            reachable,
            step,
            steps
        );

        Ok(OperationQueue::from_operations(operations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Command, StepperAmount};
    use approx::assert_relative_eq;

    #[test]
    fn test_default_plan_layout() {
        let config = ScanPlanConfig::default();
        let queue = config.build_queue().unwrap();

        // home + 6 x (servo, photo) + 5 moves
        assert_eq!(queue.len(), 1 + 12 + 5);
        assert_eq!(queue.get(0).unwrap().kind, OperationKind::Home);
        assert_eq!(queue.get(0).unwrap().description, "Execute home function");

        let first_servo = queue.get(1).unwrap();
        assert_eq!(first_servo.command().unwrap(), Command::Servo { angle: 63 });
        assert_eq!(first_servo.description, "Point 1: Set servo to 63° (Y=0.0cm)");

        let photo = queue.get(2).unwrap();
        assert_eq!(photo.kind, OperationKind::Photo);
        assert_eq!(photo.description, "Point 1: Capture photo");
        assert_eq!(photo.params.get(DELAY_KEY), Some(&Value::from(2.0)));

        let step = queue.get(3).unwrap();
        assert_eq!(step.description, "Move 10.00cm forward (4656 steps)");
        match step.command().unwrap() {
            Command::Stepper(m) => {
                assert_eq!(m.amount, StepperAmount::Steps(4656));
                assert_eq!(m.direction, Direction::Up);
                assert_eq!(m.speed, Some(80));
            }
            other => panic!("expected stepper, got {:?}", other),
        }

        assert_eq!(queue.operations().last().unwrap().kind, OperationKind::Photo);
    }

    #[test]
    fn test_unreachable_points_keep_moves() {
        // beyond Y=75 the target is behind the sensor's travel
        let config = ScanPlanConfig {
            scan_distance_cm: 150.0,
            measurements: 4,
            ..ScanPlanConfig::default()
        };
        let points = config.scan_points().unwrap();
        let reachable: Vec<bool> = points.iter().map(|p| p.reachable).collect();
        assert_eq!(reachable, vec![true, true, false, false]);
        assert_eq!(points[3].servo_angle, 90);

        let queue = config.build_queue().unwrap();
        let count = |kind| queue.iter().filter(|op| op.kind == kind).count();
        assert_eq!(count(OperationKind::Servo), 2);
        assert_eq!(count(OperationKind::Photo), 2);
        assert_eq!(count(OperationKind::Stepper), 3);
    }

    #[test]
    fn test_point_positions() {
        let points = ScanPreset::Original.config().scan_points().unwrap();
        assert_eq!(points.len(), 7);
        assert_relative_eq!(points[1].y_cm, 80.0 / 6.0);
        assert_relative_eq!(points[6].y_cm, 80.0);
        assert_eq!(points[6].number, 7);
    }

    #[test]
    fn test_invalid_configs() {
        let too_few = ScanPlanConfig {
            measurements: 1,
            ..ScanPlanConfig::default()
        };
        assert!(matches!(too_few.build_queue().unwrap_err(), SharedError::Config(_)));

        let no_distance = ScanPlanConfig {
            scan_distance_cm: 0.0,
            ..ScanPlanConfig::default()
        };
        assert!(no_distance.scan_points().is_err());

        let bad_wheel = ScanPlanConfig {
            wheel_diameter_mm: -1.0,
            ..ScanPlanConfig::default()
        };
        assert!(bad_wheel.build_queue().is_err());

        let endless_photo = ScanPlanConfig {
            photo_delay_secs: 1e20,
            ..ScanPlanConfig::default()
        };
        assert!(endless_photo.build_queue().unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_presets() {
        assert_eq!(ScanPreset::from_name("Quick-Test"), Some(ScanPreset::QuickTest));
        assert_eq!(ScanPreset::from_name("nope"), None);
        for preset in ScanPreset::ALL {
            assert!(preset.config().build_queue().is_ok(), "{}", preset.name());
        }
    }
}
