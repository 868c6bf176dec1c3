/*!
Home routine.

Drives the carriage down in fixed increments until the limit switch closes,
then backs off one increment. If the switch is already held when the routine
starts, it first waits for it to release.
*/

use crate::config::HomeConfig;
use crate::device::DeviceApi;
use crate::error::ExecResult;
use crate::tasks::CancelToken;
use shared::Direction;
use std::time::Duration;
use tracing::{info, warn};

/// Result of one home run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomeOutcome {
    /// Seek attempt on which the switch read pressed
    pub pressed_at_attempt: Option<u32>,
    /// False if the switch was still held after the release phase
    pub released: bool,
}

impl HomeOutcome {
    pub fn found_switch(&self) -> bool {
        self.pressed_at_attempt.is_some()
    }
}

/// Run the home sequence. `progress` receives user-facing status lines.
///
/// The caller resets the rail position afterwards; a cancelled run returns
/// `Cancelled` before touching anything else.
pub fn run_home(
    device: &dyn DeviceApi,
    config: &HomeConfig,
    token: &CancelToken,
    mut progress: impl FnMut(String),
) -> ExecResult<HomeOutcome> {
    let mut report = |line: String| {
        info!("🏠 {}", line);
        progress(line);
    };

    report("Starting home routine".to_string());

    // release phase
    let mut released = false;
    for attempt in 1..=config.release_attempts {
        token.check()?;
        if !device.button_state()?.pressed {
            released = true;
            break;
        }
        report(format!(
            "Button still pressed, waiting for release ({}/{})",
            attempt, config.release_attempts
        ));
        token.sleep(Duration::from_secs_f64(config.release_poll_secs))?;
    }
    if !released {
        warn!(
            "Home switch still pressed after {} checks, continuing anyway",
            config.release_attempts
        );
        report("Button did not release, continuing".to_string());
    }

    token.sleep(Duration::from_secs_f64(config.settle_secs))?;
    token.check()?;
    device.move_stepper(config.step_size, Direction::Down, config.speed)?;

    // seek phase
    let mut pressed_at_attempt = None;
    for attempt in 1..=config.max_attempts {
        token.check()?;
        if device.button_state()?.pressed {
            report(format!("Home switch reached on attempt {}", attempt));
            token.check()?;
            device.move_stepper(config.step_size, Direction::Up, config.speed)?;
            pressed_at_attempt = Some(attempt);
            break;
        }

        token.check()?;
        device.move_stepper(config.step_size, Direction::Down, config.speed)?;
        if attempt % 5 == 0 {
            report(format!(
                "Seeking home switch, attempt {}/{}",
                attempt, config.max_attempts
            ));
        }
        token.sleep(Duration::from_secs_f64(config.poll_interval_secs))?;
    }

    if pressed_at_attempt.is_none() {
        warn!(
            "Home switch not reached after {} attempts, treating current position as home",
            config.max_attempts
        );
        report("Home switch not found, position reset anyway".to_string());
    }

    Ok(HomeOutcome {
        pressed_at_attempt,
        released,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedRig;

    fn instant_config() -> HomeConfig {
        HomeConfig {
            release_poll_secs: 0.0,
            settle_secs: 0.0,
            poll_interval_secs: 0.0,
            ..HomeConfig::default()
        }
    }

    #[test]
    fn test_finds_switch_and_backs_off() {
        let rig = SimulatedRig::new(450);
        let mut lines = Vec::new();
        let outcome = run_home(&rig, &instant_config(), &CancelToken::new(), |l| lines.push(l)).unwrap();

        // 450 -> 350 before seeking, then four more moves to reach the stop
        assert_eq!(
            outcome,
            HomeOutcome {
                pressed_at_attempt: Some(5),
                released: true
            }
        );
        assert_eq!(rig.carriage_steps(), 100);
        assert_eq!(
            rig.calls().last().map(String::as_str),
            Some("setMotor?steps=100&direction=1")
        );
        assert!(!lines.iter().any(|l| l == "Seeking home switch, attempt 5/100"));
        assert!(lines.iter().any(|l| l == "Home switch reached on attempt 5"));
    }

    #[test]
    fn test_waits_for_release() {
        let rig = SimulatedRig::new(1000);
        rig.hold_button(3);
        let outcome = run_home(&rig, &instant_config(), &CancelToken::new(), |_| {}).unwrap();
        assert!(outcome.released);
        // three held polls, one released poll
        let polls = rig.calls().iter().take_while(|c| *c == "getButtonState").count();
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_never_released() {
        let rig = SimulatedRig::new(1000);
        rig.hold_button(20);
        let outcome = run_home(&rig, &instant_config(), &CancelToken::new(), |_| {}).unwrap();
        assert!(!outcome.released);
        // still held on the first seek poll
        assert_eq!(outcome.pressed_at_attempt, Some(1));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let rig = SimulatedRig::new(100_000);
        let config = HomeConfig {
            max_attempts: 10,
            ..instant_config()
        };
        let mut lines = Vec::new();
        let outcome = run_home(&rig, &config, &CancelToken::new(), |l| lines.push(l)).unwrap();
        assert_eq!(outcome.pressed_at_attempt, None);
        // initial move plus one per attempt
        assert_eq!(rig.carriage_steps(), 100_000 - 11 * 100);
        assert!(lines.contains(&"Seeking home switch, attempt 10/10".to_string()));
    }

    #[test]
    fn test_cancelled_before_start() {
        let rig = SimulatedRig::new(500);
        let token = CancelToken::new();
        token.cancel();
        let err = run_home(&rig, &instant_config(), &token, |_| {}).unwrap_err();
        assert!(err.is_cancelled());
        assert!(rig.calls().is_empty());
    }

    #[test]
    fn test_device_error_aborts() {
        let rig = SimulatedRig::new(500);
        rig.set_offline(true);
        assert!(run_home(&rig, &instant_config(), &CancelToken::new(), |_| {}).is_err());
    }
}
