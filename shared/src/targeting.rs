/*!
Targeting-angle calculation.

Converts the sensor carriage position along its rail into the servo command
that keeps the sensor aimed at a fixed target point.

Conventions: the positive X axis is bearing 0°, bearings grow
counter-clockwise, and servo 0° corresponds to a bearing of 90° from the
target. Pre-clamp angles outside the servo's travel are normal for this rig
and are clamped, never reported as errors.
*/

use crate::error::{Result, SharedError};
use serde::{Deserialize, Serialize};

/// Lowest servo command the rig accepts (sensor parallel to the rail)
pub const SERVO_MIN_ANGLE: u8 = 0;

/// Highest servo command the rig accepts (sensor parallel to the X axis)
pub const SERVO_MAX_ANGLE: u8 = 90;

/// Fixed point the sensor aims at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetCenter {
    pub x: f64,
    pub y: f64,
}

/// Why a computed angle was (or was not) clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServoLimit {
    /// Pre-clamp angle below 0°, servo pinned at 0°
    TooLow,
    /// Pre-clamp angle above 90°, servo pinned at 90°
    TooHigh,
    WithinRange,
}

impl ServoLimit {
    pub fn is_limited(&self) -> bool {
        !matches!(self, Self::WithinRange)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooLow => "Too low",
            Self::TooHigh => "Too high",
            Self::WithinRange => "Within range",
        }
    }
}

/// Full breakdown of one angle computation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AngleInfo {
    pub current_y: f64,
    pub target: TargetCenter,
    pub sensor_x: f64,
    pub dx: f64,
    pub dy: f64,
    pub bearing_deg: f64,
    pub angle_to_horizontal: f64,
    pub servo_angle: u8,
    pub limit: ServoLimit,
    pub distance_to_target: f64,
}

/// Rig geometry: target centre plus the fixed X offset of the sensor carriage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetingGeometry {
    pub target_x: f64,
    pub target_y: f64,
    pub sensor_x: f64,
}

impl TargetingGeometry {
    /// Create a geometry, rejecting non-finite coordinates
    pub fn new(target_x: f64, target_y: f64, sensor_x: f64) -> Result<Self> {
        let geometry = Self {
            target_x,
            target_y,
            sensor_x,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Same sensor offset, different target centre
    pub fn with_target(&self, target_x: f64, target_y: f64) -> Result<Self> {
        Self::new(target_x, target_y, self.sensor_x)
    }

    pub fn target(&self) -> TargetCenter {
        TargetCenter {
            x: self.target_x,
            y: self.target_y,
        }
    }

    /// Check that every coordinate is finite
    pub fn validate(&self) -> Result<()> {
        ensure_finite("target_x", self.target_x)?;
        ensure_finite("target_y", self.target_y)?;
        ensure_finite("sensor_x", self.sensor_x)
    }

    fn displacement(&self, current_y: f64) -> Result<(f64, f64)> {
        self.validate()?;
        ensure_finite("current_y", current_y)?;
        Ok((self.target_x - self.sensor_x, self.target_y - current_y))
    }

    /// Bearing from the carriage to the target, in degrees
    pub fn bearing_deg(&self, current_y: f64) -> Result<f64> {
        let (dx, dy) = self.displacement(current_y)?;
        Ok(dy.atan2(dx).to_degrees())
    }

    /// Servo angle before clamping (`90 - bearing`)
    pub fn raw_servo_angle(&self, current_y: f64) -> Result<f64> {
        Ok(90.0 - self.bearing_deg(current_y)?)
    }

    /// Servo command for a carriage position, always within `[0, 90]`
    pub fn servo_angle(&self, current_y: f64) -> Result<u8> {
        Ok(clamp_servo_angle(self.raw_servo_angle(current_y)?))
    }

    /// True when the target can be aimed at without clamping
    pub fn is_reachable(&self, current_y: f64) -> Result<bool> {
        let raw = self.raw_servo_angle(current_y)?;
        Ok(!servo_limit(raw).is_limited())
    }

    pub fn angle_info(&self, current_y: f64) -> Result<AngleInfo> {
        let (dx, dy) = self.displacement(current_y)?;
        let bearing_deg = dy.atan2(dx).to_degrees();
        let angle_to_horizontal = 90.0 - bearing_deg;

        Ok(AngleInfo {
            current_y,
            target: self.target(),
            sensor_x: self.sensor_x,
            dx,
            dy,
            bearing_deg,
            angle_to_horizontal,
            servo_angle: clamp_servo_angle(angle_to_horizontal),
            limit: servo_limit(angle_to_horizontal),
            distance_to_target: dx.hypot(dy),
        })
    }
}

impl Default for TargetingGeometry {
    fn default() -> Self {
        Self {
            target_x: 150.0,
            target_y: 75.0,
            sensor_x: 0.0,
        }
    }
}

/// Servo command for the given target, sensor offset and carriage position
pub fn servo_angle(target_x: f64, target_y: f64, sensor_x: f64, current_y: f64) -> Result<u8> {
    TargetingGeometry::new(target_x, target_y, sensor_x)?.servo_angle(current_y)
}

/// Clamp a pre-clamp angle into the servo's travel, rounding half away from zero
pub fn clamp_servo_angle(angle_to_horizontal: f64) -> u8 {
    match servo_limit(angle_to_horizontal) {
        ServoLimit::TooLow => SERVO_MIN_ANGLE,
        ServoLimit::TooHigh => SERVO_MAX_ANGLE,
        ServoLimit::WithinRange => angle_to_horizontal.round() as u8,
    }
}

fn servo_limit(angle_to_horizontal: f64) -> ServoLimit {
    if angle_to_horizontal < f64::from(SERVO_MIN_ANGLE) {
        ServoLimit::TooLow
    } else if angle_to_horizontal > f64::from(SERVO_MAX_ANGLE) {
        ServoLimit::TooHigh
    } else {
        ServoLimit::WithinRange
    }
}

/// Check whether a servo command is inside the physical range
pub fn is_valid_servo_angle(angle: i64) -> bool {
    (i64::from(SERVO_MIN_ANGLE)..=i64::from(SERVO_MAX_ANGLE)).contains(&angle)
}

fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SharedError::invalid_input(format!(
            "{} must be finite, got {}",
            name, value
        )))
    }
}
