/*!
Simulated rig.

A [`DeviceApi`] backed by a virtual carriage instead of the microcontroller.
The home switch sits at the bottom end stop: the button reads pressed while
the carriage rests on it, and the carriage cannot travel past it. Replies use
the same texts as the firmware.
*/

use crate::device::{
    check_brightness, check_hex_color, check_servo_angle, ButtonState, DeviceApi, DeviceError,
    DeviceResult,
};
use shared::Direction;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct SimState {
    /// Carriage position in steps above the end stop
    carriage_steps: i64,
    servo_angle: u8,
    color: String,
    brightness: u8,
    /// Polls that still read pressed regardless of position (operator holding the button)
    held_polls: u32,
    offline: bool,
    /// Requests still answered before the rig drops off
    requests_left: Option<u32>,
    calls: Vec<String>,
}

pub struct SimulatedRig {
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimulatedRig {
    /// Carriage starting `carriage_steps` above the end stop
    pub fn new(carriage_steps: u32) -> Self {
        Self {
            state: Mutex::new(SimState {
                carriage_steps: i64::from(carriage_steps),
                servo_angle: 0,
                color: "#FFFFFF".to_string(),
                brightness: 100,
                held_polls: 0,
                offline: false,
                requests_left: None,
                calls: Vec::new(),
            }),
            latency: Duration::ZERO,
        }
    }

    /// Add a fixed delay to every request, like a slow Wi-Fi link
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // a panicking test thread must not wedge the rest of the suite
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request<T>(
        &self,
        endpoint: &str,
        call: String,
        apply: impl FnOnce(&mut SimState) -> T,
    ) -> DeviceResult<T> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let mut state = self.lock();
        if state.requests_left == Some(0) {
            state.offline = true;
        }
        if state.offline {
            return Err(DeviceError::Http {
                endpoint: endpoint.to_string(),
                message: "simulated rig is offline".to_string(),
            });
        }
        if let Some(left) = state.requests_left.as_mut() {
            *left -= 1;
        }
        debug!("🧪 sim {}", call);
        state.calls.push(call);
        Ok(apply(&mut state))
    }
}

/// Inspection and fault injection for tests
#[cfg(test)]
impl SimulatedRig {
    /// Report the button as pressed for the next `polls` queries
    pub fn hold_button(&self, polls: u32) {
        self.lock().held_polls = polls;
    }

    /// Make every request fail as if the rig dropped off the network
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Answer `requests` more requests, then go offline
    pub fn set_offline_after(&self, requests: u32) {
        self.lock().requests_left = Some(requests);
    }

    pub fn carriage_steps(&self) -> i64 {
        self.lock().carriage_steps
    }

    pub fn servo_angle(&self) -> u8 {
        self.lock().servo_angle
    }

    pub fn led(&self) -> (String, u8) {
        let state = self.lock();
        (state.color.clone(), state.brightness)
    }

    /// Requests seen so far, formatted as `endpoint?query`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new(2000)
    }
}

impl DeviceApi for SimulatedRig {
    fn set_servo(&self, angle: u8) -> DeviceResult<String> {
        check_servo_angle(angle)?;
        self.request("setServo", format!("setServo?angle={}", angle), |state| {
            state.servo_angle = angle;
            format!("Servo positioned to {} degrees", angle)
        })
    }

    fn move_stepper(&self, steps: u32, direction: Direction, speed: Option<u32>) -> DeviceResult<String> {
        let call = match speed {
            Some(speed) => format!(
                "setMotor?steps={}&direction={}&speed={}",
                steps,
                direction.as_wire(),
                speed
            ),
            None => format!("setMotor?steps={}&direction={}", steps, direction.as_wire()),
        };
        self.request("setMotor", call, |state| {
            let delta = i64::from(steps) * i64::from(direction.as_wire());
            // end stop
            state.carriage_steps = (state.carriage_steps + delta).max(0);
            format!(
                "Motor moved {} steps in direction {}",
                steps,
                direction.as_wire()
            )
        })
    }

    fn set_led_color(&self, hex: &str) -> DeviceResult<String> {
        let hex = check_hex_color(hex)?;
        self.request("hexcolor", format!("hexcolor?hex={}", hex), |state| {
            state.color = hex.clone();
            format!("Color changed to {}", hex)
        })
    }

    fn set_brightness(&self, value: u8) -> DeviceResult<String> {
        check_brightness(value)?;
        self.request("setBrightness", format!("setBrightness?value={}", value), |state| {
            state.brightness = value;
            format!("Brightness set to {}", value)
        })
    }

    fn button_state(&self) -> DeviceResult<ButtonState> {
        self.request("getButtonState", "getButtonState".to_string(), |state| {
            if state.held_polls > 0 {
                state.held_polls -= 1;
                ButtonState::pressed()
            } else {
                ButtonState {
                    pressed: state.carriage_steps <= 0,
                }
            }
        })
    }

    fn name(&self) -> String {
        "simulated rig".to_string()
    }
}
