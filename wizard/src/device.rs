/*!
Rig device API.

The microcontroller exposes a handful of GET endpoints (`setServo`,
`setMotor`, `hexcolor`, `setBrightness`, `getButtonState`). [`DeviceApi`]
is the seam between the application and the hardware so the executor and
home routine can run against either [`HttpDevice`] or the simulated rig.
*/

use serde::Deserialize;
use shared::operation::{normalize_hex_color, MAX_BRIGHTNESS};
use shared::targeting::{is_valid_servo_angle, SERVO_MAX_ANGLE, SERVO_MIN_ANGLE};
use shared::Direction;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;
use ureq::Agent;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum DeviceError {
    /// Connection, timeout or transport failure
    #[error("HTTP request to {endpoint} failed: {message}")]
    Http { endpoint: String, message: String },

    /// Firmware answered with a non-success status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {endpoint}: {body}")]
    InvalidResponse { endpoint: String, body: String },

    /// Rejected before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// State of the home limit switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ButtonState {
    pub pressed: bool,
}

impl ButtonState {
    pub fn pressed() -> Self {
        Self { pressed: true }
    }

    pub fn released() -> Self {
        Self { pressed: false }
    }

    /// Parse a `getButtonState` body: `{"pressed": bool}` or a bare keyword
    pub fn parse(body: &str) -> Option<Self> {
        let trimmed = body.trim();
        if let Ok(state) = serde_json::from_str::<ButtonState>(trimmed) {
            return Some(state);
        }

        match trimmed.to_lowercase().as_str() {
            "true" | "1" | "pressed" => Some(Self::pressed()),
            "false" | "0" | "released" => Some(Self::released()),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        if self.pressed {
            "pressed"
        } else {
            "released"
        }
    }
}

/// Commands understood by the rig firmware
pub trait DeviceApi: Send + Sync {
    fn set_servo(&self, angle: u8) -> DeviceResult<String>;

    /// `speed` is left to the firmware default when `None`
    fn move_stepper(&self, steps: u32, direction: Direction, speed: Option<u32>) -> DeviceResult<String>;

    fn set_led_color(&self, hex: &str) -> DeviceResult<String>;

    fn set_brightness(&self, value: u8) -> DeviceResult<String>;

    fn button_state(&self) -> DeviceResult<ButtonState>;

    /// Short name for log lines
    fn name(&self) -> String;
}

pub(crate) fn check_servo_angle(angle: u8) -> DeviceResult<()> {
    if is_valid_servo_angle(i64::from(angle)) {
        Ok(())
    } else {
        Err(DeviceError::InvalidArgument(format!(
            "servo angle must be between {} and {}, got {}",
            SERVO_MIN_ANGLE, SERVO_MAX_ANGLE, angle
        )))
    }
}

pub(crate) fn check_brightness(value: u8) -> DeviceResult<()> {
    if value <= MAX_BRIGHTNESS {
        Ok(())
    } else {
        Err(DeviceError::InvalidArgument(format!(
            "brightness must be between 0 and {}, got {}",
            MAX_BRIGHTNESS, value
        )))
    }
}

pub(crate) fn check_hex_color(hex: &str) -> DeviceResult<String> {
    normalize_hex_color(hex).map_err(|e| DeviceError::InvalidArgument(e.to_string()))
}

/// HTTP client for the rig's web server
pub struct HttpDevice {
    base_url: String,
    agent: Agent,
}

impl HttpDevice {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            agent: Agent::new_with_config(config),
        }
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> DeviceResult<String> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("GET {} {:?}", url, query);

        let mut request = self.agent.get(&url);
        for (key, value) in query {
            request = request.query(*key, value);
        }

        let response = request.call().map_err(|e| DeviceError::Http {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|e| DeviceError::Http {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        if !(200..300).contains(&status) {
            return Err(DeviceError::Status {
                endpoint: endpoint.to_string(),
                status,
                body: body.trim().to_string(),
            });
        }

        Ok(body)
    }
}

impl DeviceApi for HttpDevice {
    fn set_servo(&self, angle: u8) -> DeviceResult<String> {
        check_servo_angle(angle)?;
        self.get("setServo", &[("angle", angle.to_string())])
    }

    fn move_stepper(&self, steps: u32, direction: Direction, speed: Option<u32>) -> DeviceResult<String> {
        let mut query = vec![
            ("steps", steps.to_string()),
            ("direction", direction.as_wire().to_string()),
        ];
        if let Some(speed) = speed {
            query.push(("speed", speed.to_string()));
        }
        self.get("setMotor", &query)
    }

    fn set_led_color(&self, hex: &str) -> DeviceResult<String> {
        let hex = check_hex_color(hex)?;
        self.get("hexcolor", &[("hex", hex)])
    }

    fn set_brightness(&self, value: u8) -> DeviceResult<String> {
        check_brightness(value)?;
        self.get("setBrightness", &[("value", value.to_string())])
    }

    fn button_state(&self) -> DeviceResult<ButtonState> {
        let nocache = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let body = self.get("getButtonState", &[("nocache", nocache.to_string())])?;

        ButtonState::parse(&body).ok_or_else(|| DeviceError::InvalidResponse {
            endpoint: "getButtonState".to_string(),
            body: body.trim().to_string(),
        })
    }

    fn name(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// One-shot HTTP server: answers a single request and returns its request line
    fn serve_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header.trim().is_empty() {
                    break;
                }
            }

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {} X\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            )
            .unwrap();
            stream.flush().unwrap();
            request_line.trim().to_string()
        });

        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_button_state_parsing() {
        assert_eq!(ButtonState::parse(r#"{"pressed": true}"#), Some(ButtonState::pressed()));
        assert_eq!(ButtonState::parse(r#"{"pressed":false}"#), Some(ButtonState::released()));
        assert_eq!(ButtonState::parse(" TRUE\n"), Some(ButtonState::pressed()));
        assert_eq!(ButtonState::parse("1"), Some(ButtonState::pressed()));
        assert_eq!(ButtonState::parse("released"), Some(ButtonState::released()));
        assert_eq!(ButtonState::parse("0"), Some(ButtonState::released()));
        // no substring guessing
        assert_eq!(ButtonState::parse("not pressed"), None);
        assert_eq!(ButtonState::parse(r#"{"state": 1}"#), None);
    }

    #[test]
    fn test_validation_before_sending() {
        // unroutable: any request that got through would fail differently
        let device = HttpDevice::new("http://127.0.0.1:9", Duration::from_millis(200));
        assert!(matches!(device.set_servo(91), Err(DeviceError::InvalidArgument(_))));
        assert!(matches!(device.set_brightness(101), Err(DeviceError::InvalidArgument(_))));
        assert!(matches!(device.set_led_color("red"), Err(DeviceError::InvalidArgument(_))));
    }

    #[test]
    fn test_servo_request() {
        let (url, server) = serve_once(200, "Servo positioned to 45 degrees");
        let device = HttpDevice::new(&format!("{}/", url), Duration::from_secs(2));

        let reply = device.set_servo(45).unwrap();
        assert_eq!(reply, "Servo positioned to 45 degrees");
        assert_eq!(server.join().unwrap(), "GET /setServo?angle=45 HTTP/1.1");
    }

    #[test]
    fn test_motor_request_omits_missing_speed() {
        let (url, server) = serve_once(200, "Motor moved");
        let device = HttpDevice::new(&url, Duration::from_secs(2));

        device.move_stepper(100, Direction::Down, None).unwrap();
        assert_eq!(server.join().unwrap(), "GET /setMotor?steps=100&direction=-1 HTTP/1.1");
    }

    #[test]
    fn test_button_request() {
        let (url, server) = serve_once(200, r#"{"pressed": true}"#);
        let device = HttpDevice::new(&url, Duration::from_secs(2));

        assert!(device.button_state().unwrap().pressed);
        assert!(server.join().unwrap().starts_with("GET /getButtonState?nocache="));
    }

    #[test]
    fn test_error_status() {
        let (url, server) = serve_once(400, "Missing 'angle' parameter");
        let device = HttpDevice::new(&url, Duration::from_secs(2));

        match device.set_servo(10) {
            Err(DeviceError::Status { status, body, .. }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "Missing 'angle' parameter");
            }
            other => panic!("expected status error, got {:?}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_unparseable_button_reply() {
        let (url, server) = serve_once(200, "maybe");
        let device = HttpDevice::new(&url, Duration::from_secs(2));

        assert!(matches!(device.button_state(), Err(DeviceError::InvalidResponse { .. })));
        server.join().unwrap();
    }
}
