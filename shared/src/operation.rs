/*!
Operation records and their typed commands.

An operation is stored the way the queue file stores it: a type tag, a JSON
object of parameters and a human-readable description. The typed [`Command`]
is derived from the record on demand, so unknown parameter keys survive a
load/save cycle untouched.
*/

use crate::error::{Result, SharedError};
use crate::rig::Direction;
use crate::targeting::{SERVO_MAX_ANGLE, SERVO_MIN_ANGLE};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// Parameter key that repeats an operation in place
pub const REPEAT_COUNT_KEY: &str = "repeat_count";

/// Parameter key for delays (autofocus delay on photo operations)
pub const DELAY_KEY: &str = "delay";

/// Longest wait a photo operation or configured pause may ask for
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Highest brightness the LED driver accepts, in percent
pub const MAX_BRIGHTNESS: u8 = 100;

/// Operation type tags as written in queue files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Servo,
    Stepper,
    LedColor,
    LedBrightness,
    Button,
    Home,
    Photo,
}

impl OperationKind {
    /// Parse an operation type tag (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "servo" => Some(Self::Servo),
            "stepper" => Some(Self::Stepper),
            "led_color" => Some(Self::LedColor),
            "led_brightness" => Some(Self::LedBrightness),
            "button" => Some(Self::Button),
            "home" => Some(Self::Home),
            "photo" => Some(Self::Photo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Servo => "servo",
            Self::Stepper => "stepper",
            Self::LedColor => "led_color",
            Self::LedBrightness => "led_brightness",
            Self::Button => "button",
            Self::Home => "home",
            Self::Photo => "photo",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a stepper operation moves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepperAmount {
    Steps(u32),
    /// Resolved to steps at execution time using the configured wheel diameter
    DistanceCm(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepperMove {
    pub amount: StepperAmount,
    pub direction: Direction,
    pub speed: Option<u32>,
}

/// Typed view of an operation record
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Servo { angle: u8 },
    Stepper(StepperMove),
    LedColor { color: String },
    LedBrightness { brightness: u8 },
    Button,
    Home,
    Photo { delay_secs: Option<f64>, camera_index: u32 },
}

#[derive(Deserialize)]
struct ServoParams {
    angle: i64,
}

#[derive(Deserialize)]
struct StepperParams {
    steps: Option<i64>,
    distance_cm: Option<f64>,
    direction: i64,
    speed: Option<u32>,
}

#[derive(Deserialize)]
struct LedColorParams {
    color: String,
}

#[derive(Deserialize)]
struct LedBrightnessParams {
    brightness: i64,
}

#[derive(Deserialize)]
struct PhotoParams {
    delay: Option<f64>,
    camera_index: Option<u32>,
}

/// One queue entry: `{type, params, description}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub params: Map<String, Value>,
    pub description: String,
}

impl Operation {
    pub fn new(kind: OperationKind, params: Map<String, Value>, description: impl Into<String>) -> Self {
        Self {
            kind,
            params,
            description: description.into(),
        }
    }

    pub fn servo(angle: u8) -> Self {
        Self::new(
            OperationKind::Servo,
            params([("angle", Value::from(angle))]),
            format!("Servo: Set angle to {}°", angle),
        )
    }

    /// Stepper move by step count; `distance_cm` only feeds the description
    pub fn stepper_steps(steps: u32, direction: Direction, speed: u32, distance_cm: f64) -> Self {
        Self::new(
            OperationKind::Stepper,
            params([
                ("steps", Value::from(steps)),
                ("direction", Value::from(direction.as_wire())),
                ("speed", Value::from(speed)),
            ]),
            format!(
                "Stepper: {} steps, {} cm, direction {}, speed: {}",
                steps, distance_cm, direction, speed
            ),
        )
    }

    /// Drive up/down by distance, resolved to steps when executed
    pub fn stepper_distance(distance_cm: f64, direction: Direction, speed: u32) -> Self {
        let label = match direction {
            Direction::Up => "Drive Up",
            Direction::Down => "Drive Down",
        };
        Self::new(
            OperationKind::Stepper,
            params([
                ("distance_cm", Value::from(distance_cm)),
                ("direction", Value::from(direction.as_wire())),
                ("speed", Value::from(speed)),
            ]),
            format!(
                "{}: {}cm, direction {}, speed {}",
                label,
                distance_cm,
                direction.as_wire(),
                speed
            ),
        )
    }

    pub fn led_color(color: &str) -> Result<Self> {
        let color = normalize_hex_color(color)?;
        Ok(Self::new(
            OperationKind::LedColor,
            params([("color", Value::from(color.clone()))]),
            format!("LED: Set color to {}", color),
        ))
    }

    pub fn led_brightness(brightness: u8) -> Self {
        Self::new(
            OperationKind::LedBrightness,
            params([("brightness", Value::from(brightness))]),
            format!("LED: Set brightness to {}%", brightness),
        )
    }

    pub fn button() -> Self {
        Self::new(OperationKind::Button, Map::new(), "Button: Query button status")
    }

    pub fn home() -> Self {
        Self::new(OperationKind::Home, Map::new(), "Home: Return to home position")
    }

    pub fn photo(delay_secs: f64, camera_index: u32) -> Self {
        Self::new(
            OperationKind::Photo,
            params([
                (DELAY_KEY, Value::from(delay_secs)),
                ("camera_index", Value::from(camera_index)),
            ]),
            format!("Camera {}: Take photo (Delay: {}s)", camera_index, delay_secs),
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: Value) {
        self.params.insert(key.into(), value);
    }

    /// How many times the executor runs this operation (at least once)
    pub fn repeat_count(&self) -> u32 {
        self.params
            .get(REPEAT_COUNT_KEY)
            .and_then(Value::as_u64)
            .map(|count| count.clamp(1, u64::from(u32::MAX)) as u32)
            .unwrap_or(1)
    }

    /// Parameters serialized as the JSON object string used in queue files
    pub fn params_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.params)?)
    }

    /// Decode and validate the typed command behind this record
    pub fn command(&self) -> Result<Command> {
        match self.kind {
            OperationKind::Servo => {
                let p: ServoParams = self.decode_params()?;
                Ok(Command::Servo {
                    angle: servo_angle_param(p.angle)?,
                })
            }
            OperationKind::Stepper => {
                let p: StepperParams = self.decode_params()?;
                let amount = match (p.steps, p.distance_cm) {
                    (Some(steps), _) => StepperAmount::Steps(u32::try_from(steps).map_err(|_| {
                        SharedError::invalid_input(format!(
                            "step count must be a non-negative integer, got {}",
                            steps
                        ))
                    })?),
                    (None, Some(distance)) if distance.is_finite() && distance >= 0.0 => {
                        StepperAmount::DistanceCm(distance)
                    }
                    (None, Some(distance)) => {
                        return Err(SharedError::invalid_input(format!(
                            "distance must be a finite, non-negative number of centimetres, got {}",
                            distance
                        )))
                    }
                    (None, None) => {
                        return Err(SharedError::invalid_operation(
                            "stepper operation needs either 'steps' or 'distance_cm'",
                        ))
                    }
                };
                Ok(Command::Stepper(StepperMove {
                    amount,
                    direction: Direction::from_wire(p.direction)?,
                    speed: p.speed,
                }))
            }
            OperationKind::LedColor => {
                let p: LedColorParams = self.decode_params()?;
                Ok(Command::LedColor {
                    color: normalize_hex_color(&p.color)?,
                })
            }
            OperationKind::LedBrightness => {
                let p: LedBrightnessParams = self.decode_params()?;
                Ok(Command::LedBrightness {
                    brightness: brightness_param(p.brightness)?,
                })
            }
            OperationKind::Button => Ok(Command::Button),
            OperationKind::Home => Ok(Command::Home),
            OperationKind::Photo => {
                let p: PhotoParams = self.decode_params()?;
                if let Some(delay) = p.delay {
                    check_delay_secs("photo delay", delay)?;
                }
                Ok(Command::Photo {
                    delay_secs: p.delay,
                    camera_index: p.camera_index.unwrap_or(0),
                })
            }
        }
    }

    fn decode_params<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|e| {
            SharedError::invalid_operation(format!("bad params for '{}' operation: {}", self.kind, e))
        })
    }
}

/// Reject delays that are negative, non-finite or longer than [`MAX_DELAY_SECS`]
pub fn check_delay_secs(name: &str, secs: f64) -> Result<()> {
    if secs.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&secs) {
        Ok(())
    } else {
        Err(SharedError::invalid_input(format!(
            "{} must be between 0 and {} seconds, got {}",
            name, MAX_DELAY_SECS, secs
        )))
    }
}

fn params<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn servo_angle_param(angle: i64) -> Result<u8> {
    if (i64::from(SERVO_MIN_ANGLE)..=i64::from(SERVO_MAX_ANGLE)).contains(&angle) {
        Ok(angle as u8)
    } else {
        Err(SharedError::invalid_input(format!(
            "servo angle must be between {} and {}, got {}",
            SERVO_MIN_ANGLE, SERVO_MAX_ANGLE, angle
        )))
    }
}

fn brightness_param(brightness: i64) -> Result<u8> {
    if (0..=i64::from(MAX_BRIGHTNESS)).contains(&brightness) {
        Ok(brightness as u8)
    } else {
        Err(SharedError::invalid_input(format!(
            "brightness must be between 0 and {}, got {}",
            MAX_BRIGHTNESS, brightness
        )))
    }
}

fn hex_color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex color pattern is valid"))
}

/// Normalize a colour to the `#RRGGBB` form the LED endpoint expects
pub fn normalize_hex_color(color: &str) -> Result<String> {
    let trimmed = color.trim();
    let candidate = if trimmed.starts_with('#') {
        trimmed.to_string()
    } else {
        format!("#{}", trimmed)
    };

    if hex_color_pattern().is_match(&candidate) {
        Ok(candidate.to_uppercase())
    } else {
        Err(SharedError::invalid_input(format!(
            "'{}' is not a hex colour of the form #RRGGBB",
            color
        )))
    }
}
