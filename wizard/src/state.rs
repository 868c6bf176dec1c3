/*!
Application state shared between the GUI, the CLI and the task runner.
*/

use crate::config::RigConfig;
use serde::Serialize;
use shared::rig;
use shared::{Direction, Result, TargetingGeometry};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle passed to everything that reads or moves the rig
pub type SharedState = Arc<Mutex<AppState>>;

/// What the application believes the rig is doing
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    /// Carriage position above the home switch, in cm
    position_cm: f64,
    /// Last angle sent to the servo
    servo_angle: u8,
    /// Re-aim the servo after every move
    tracking: bool,
    geometry: TargetingGeometry,
    wheel_diameter_mm: f64,
    /// False until a home run has established the zero position
    homed: bool,
}

/// Copy of the state for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub position_cm: f64,
    pub servo_angle: u8,
    pub tracking: bool,
    pub homed: bool,
    pub geometry: TargetingGeometry,
    pub wheel_diameter_mm: f64,
    /// Angle the servo would need to aim at the target from here
    pub target_angle: Option<u8>,
}

impl AppState {
    pub fn new(geometry: TargetingGeometry, wheel_diameter_mm: f64, tracking: bool) -> Result<Self> {
        geometry.validate()?;
        rig::validate_diameter(wheel_diameter_mm)?;
        Ok(Self {
            position_cm: 0.0,
            servo_angle: 0,
            tracking,
            geometry,
            wheel_diameter_mm,
            homed: false,
        })
    }

    pub fn from_config(config: &RigConfig) -> Result<Self> {
        Self::new(config.geometry, config.wheel_diameter_mm, config.tracking)
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn tracking(&self) -> bool {
        self.tracking
    }

    pub fn wheel_diameter_mm(&self) -> f64 {
        self.wheel_diameter_mm
    }

    pub fn set_tracking(&mut self, tracking: bool) {
        self.tracking = tracking;
    }

    pub fn set_geometry(&mut self, geometry: TargetingGeometry) -> Result<()> {
        geometry.validate()?;
        self.geometry = geometry;
        Ok(())
    }

    pub fn set_wheel_diameter(&mut self, wheel_diameter_mm: f64) -> Result<()> {
        rig::validate_diameter(wheel_diameter_mm)?;
        self.wheel_diameter_mm = wheel_diameter_mm;
        Ok(())
    }

    /// Servo angle that aims at the target from the current position
    pub fn target_angle(&self) -> Result<u8> {
        self.geometry.servo_angle(self.position_cm)
    }

    /// Record a stepper move. With tracking on, returns the angle the servo
    /// must be sent to keep aiming at the target; the recorded servo angle
    /// only changes once that command goes through [`Self::override_servo`].
    pub fn apply_move(&mut self, direction: Direction, steps: u32) -> Result<Option<u8>> {
        let distance = rig::distance_for_steps(steps, self.wheel_diameter_mm)?;
        // the carriage cannot pass the home switch
        self.position_cm = (self.position_cm + direction.sign() * distance).max(0.0);

        if self.tracking {
            self.target_angle().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Record a servo angle set directly by the user or a queued operation
    pub fn override_servo(&mut self, angle: u8) {
        self.servo_angle = angle;
    }

    /// Position zero after a home run; returns the target angle from home
    pub fn reset_home(&mut self) -> Result<u8> {
        self.position_cm = 0.0;
        self.homed = true;
        self.target_angle()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            position_cm: self.position_cm,
            servo_angle: self.servo_angle,
            tracking: self.tracking,
            homed: self.homed,
            geometry: self.geometry,
            wheel_diameter_mm: self.wheel_diameter_mm,
            target_angle: self.target_angle().ok(),
        }
    }
}

/// Lock the shared state, recovering it if a worker panicked while holding it
pub fn lock(state: &SharedState) -> MutexGuard<'_, AppState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn reference_state(tracking: bool) -> AppState {
        AppState::new(TargetingGeometry::default(), 28.0, tracking).unwrap()
    }

    #[test]
    fn test_move_updates_position() {
        let mut state = reference_state(false);
        // 4656 steps on the 28 mm wheel is just under 10 cm
        assert_eq!(state.apply_move(Direction::Up, 4656).unwrap(), None);
        assert!((state.snapshot().position_cm - 10.0).abs() < 0.001);

        state.apply_move(Direction::Down, 2328).unwrap();
        assert!((state.snapshot().position_cm - 5.0).abs() < 0.001);

        state.apply_move(Direction::Down, 10_000).unwrap();
        assert_eq!(state.snapshot().position_cm, 0.0);
    }

    #[test]
    fn test_tracking_recomputes_angle() {
        let mut state = reference_state(true);
        state.override_servo(10);

        // 75 cm up puts the carriage level with the target
        let steps = rig::steps_for_distance_rounded(75.0, 28.0).unwrap();
        let angle = state.apply_move(Direction::Up, steps).unwrap();
        assert_eq!(angle, Some(90));
        // not sent yet
        assert_eq!(state.snapshot().servo_angle, 10);
    }

    #[test]
    fn test_default_config_tracks_target() {
        let mut state = AppState::from_config(&AppConfig::new().rig).unwrap();
        state.override_servo(10);

        assert_eq!(state.apply_move(Direction::Up, 4656).unwrap(), Some(67));
        assert_eq!(state.snapshot().target_angle, Some(67));
    }

    #[test]
    fn test_reset_home() {
        let mut state = reference_state(false);
        state.apply_move(Direction::Up, 5000).unwrap();
        assert!(!state.snapshot().homed);

        assert_eq!(state.reset_home().unwrap(), 63);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.position_cm, 0.0);
        assert!(snapshot.homed);
        assert_eq!(snapshot.target_angle, Some(63));
    }

    #[test]
    fn test_rejects_bad_settings() {
        assert!(AppState::new(TargetingGeometry::default(), 0.0, false).is_err());

        let mut state = reference_state(false);
        let bad = TargetingGeometry {
            target_x: f64::NAN,
            ..TargetingGeometry::default()
        };
        assert!(state.set_geometry(bad).is_err());
        assert_eq!(state.snapshot().geometry, TargetingGeometry::default());
        assert!(state.set_wheel_diameter(-2.0).is_err());
    }
}
