/*!
Stepper kinematics for the linear stage.

The carriage is driven by a 28BYJ-48 stepper through a friction wheel, so
travel is a function of step count and wheel diameter only.
*/

use crate::error::{Result, SharedError};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Half-steps per output shaft revolution of the 28BYJ-48
pub const STEPS_PER_REVOLUTION: u32 = 4096;

/// Drive wheel diameter of the reference rig, in millimetres
pub const DEFAULT_WHEEL_DIAMETER_MM: f64 = 28.0;

/// Default motor speed sent with move commands
pub const DEFAULT_MOTOR_SPEED: u32 = 80;

/// Travel direction along the rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    /// Away from the home switch (wire value `1`)
    Up,
    /// Toward the home switch (wire value `-1`)
    Down,
}

impl Direction {
    /// Value used by the firmware's `direction` query parameter
    pub fn as_wire(&self) -> i8 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }

    pub fn from_wire(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            other => Err(SharedError::invalid_input(format!(
                "direction must be 1 (up) or -1 (down), got {}",
                other
            ))),
        }
    }

    /// Sign applied to the rail position for a move in this direction
    pub fn sign(&self) -> f64 {
        f64::from(self.as_wire())
    }

}

impl TryFrom<i8> for Direction {
    type Error = SharedError;

    fn try_from(value: i8) -> Result<Self> {
        Self::from_wire(i64::from(value))
    }
}

impl From<Direction> for i8 {
    fn from(direction: Direction) -> Self {
        direction.as_wire()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Wheel circumference in millimetres
pub fn circumference_mm(wheel_diameter_mm: f64) -> f64 {
    PI * wheel_diameter_mm
}

/// Step count for a travel distance, truncated toward zero
pub fn steps_for_distance(distance_cm: f64, wheel_diameter_mm: f64) -> Result<u32> {
    step_count(raw_steps(distance_cm, wheel_diameter_mm)?.trunc(), distance_cm)
}

/// Step count for a travel distance, rounded to the nearest step
pub fn steps_for_distance_rounded(distance_cm: f64, wheel_diameter_mm: f64) -> Result<u32> {
    step_count(raw_steps(distance_cm, wheel_diameter_mm)?.round(), distance_cm)
}

fn raw_steps(distance_cm: f64, wheel_diameter_mm: f64) -> Result<f64> {
    validate_diameter(wheel_diameter_mm)?;
    if !distance_cm.is_finite() || distance_cm < 0.0 {
        return Err(SharedError::invalid_input(format!(
            "distance must be a finite, non-negative number of centimetres, got {}",
            distance_cm
        )));
    }

    let revolutions = (distance_cm * 10.0) / circumference_mm(wheel_diameter_mm);
    Ok(revolutions * f64::from(STEPS_PER_REVOLUTION))
}

fn step_count(steps: f64, distance_cm: f64) -> Result<u32> {
    if steps > f64::from(u32::MAX) {
        return Err(SharedError::invalid_input(format!(
            "{} cm needs more than {} motor steps",
            distance_cm,
            u32::MAX
        )));
    }
    Ok(steps as u32)
}

/// Travel in centimetres produced by a step count
pub fn distance_for_steps(steps: u32, wheel_diameter_mm: f64) -> Result<f64> {
    validate_diameter(wheel_diameter_mm)?;
    Ok(f64::from(steps) / f64::from(STEPS_PER_REVOLUTION) * circumference_mm(wheel_diameter_mm) / 10.0)
}

pub fn validate_diameter(wheel_diameter_mm: f64) -> Result<()> {
    if wheel_diameter_mm.is_finite() && wheel_diameter_mm > 0.0 {
        Ok(())
    } else {
        Err(SharedError::invalid_input(format!(
            "wheel diameter must be a positive number of millimetres, got {}",
            wheel_diameter_mm
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_one_revolution() {
        let circumference_cm = circumference_mm(DEFAULT_WHEEL_DIAMETER_MM) / 10.0;
        assert_eq!(steps_for_distance_rounded(circumference_cm, DEFAULT_WHEEL_DIAMETER_MM).unwrap(), 4096);
        assert_relative_eq!(
            distance_for_steps(4096, DEFAULT_WHEEL_DIAMETER_MM).unwrap(),
            circumference_cm,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_home_step_distance() {
        // 100 steps on the 28 mm wheel
        let cm = distance_for_steps(100, 28.0).unwrap();
        assert_relative_eq!(cm, 0.21475731030398978, epsilon = 1e-12);
    }

    #[test]
    fn test_truncation_vs_rounding() {
        // 10 cm on a 28 mm wheel is 4656.4... steps
        assert_eq!(steps_for_distance(10.0, 28.0).unwrap(), 4656);
        assert_eq!(steps_for_distance_rounded(10.0, 28.0).unwrap(), 4656);
        // 5 cm is 2328.2... steps
        assert_eq!(steps_for_distance(5.0, 28.0).unwrap(), 2328);
        assert_eq!(steps_for_distance(0.0, 28.0).unwrap(), 0);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(steps_for_distance(-1.0, 28.0).is_err());
        assert!(steps_for_distance(f64::NAN, 28.0).is_err());
        assert!(steps_for_distance(1.0, 0.0).is_err());
        assert!(distance_for_steps(10, -3.0).is_err());
    }

    #[test]
    fn test_distance_beyond_step_range() {
        let err = steps_for_distance(1e12, 28.0).unwrap_err();
        assert!(err.is_invalid_input());
        assert!(steps_for_distance_rounded(1e12, 28.0).is_err());

        // about 94 km of rail still fits in a u32 step count
        assert!(steps_for_distance(9_000_000.0, DEFAULT_WHEEL_DIAMETER_MM).is_ok());
    }

    #[test]
    fn test_direction_wire_format() {
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Direction::Down).unwrap(), "-1");
        assert_eq!(serde_json::from_str::<Direction>("-1").unwrap(), Direction::Down);
        assert!(serde_json::from_str::<Direction>("0").is_err());
        assert_eq!(Direction::Down.sign(), -1.0);
    }
}
