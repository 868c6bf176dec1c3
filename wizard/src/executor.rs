/*!
Queue executor.

Runs operations one after another against a [`DeviceApi`], keeping the
shared [`AppState`](crate::state::AppState) in step with what was sent. A
failing operation is reported and skipped; only cancellation stops a run.
Progress is published as [`ExecEvent`]s for the GUI log and status panels.
*/

use crate::config::{AppConfig, ExecutorConfig, HomeConfig};
use crate::device::DeviceApi;
use crate::error::{ExecError, ExecResult};
use crate::home::{self, HomeOutcome};
use crate::state::{self, SharedState, StateSnapshot};
use crate::tasks::{CancelToken, DeviceCommand, PauseFlag};
use crossbeam_channel::Sender;
use shared::rig;
use shared::{Command, Direction, Operation, OperationQueue, SharedError, StepperAmount};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Progress notifications from a running job
#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    Log(String),
    StateChanged(StateSnapshot),
    /// A photo operation finished its autofocus wait
    PhotoRequested { camera_index: u32, description: String },
    OperationFailed {
        index: usize,
        description: String,
        error: String,
    },
    Finished {
        label: String,
        executed: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Counters for one queue run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub failed: usize,
    /// Completed or started passes over the queue
    pub passes: u32,
}

pub struct Executor {
    device: Arc<dyn DeviceApi>,
    state: SharedState,
    settings: ExecutorConfig,
    home: HomeConfig,
    events: Sender<ExecEvent>,
    pause: PauseFlag,
}

impl Executor {
    pub fn new(
        device: Arc<dyn DeviceApi>,
        state: SharedState,
        config: &AppConfig,
        events: Sender<ExecEvent>,
        pause: PauseFlag,
    ) -> Self {
        Self {
            device,
            state,
            settings: config.executor.clone(),
            home: config.home.clone(),
            events,
            pause,
        }
    }

    /// Run every operation in order; with `repeat`, start over until cancelled
    pub fn run_queue(&self, queue: &OperationQueue, repeat: bool, token: &CancelToken) -> ExecResult<RunSummary> {
        let label = if repeat {
            "Queue (repeat)".to_string()
        } else {
            "Queue".to_string()
        };

        if queue.is_empty() {
            self.log("Queue is empty, nothing to execute");
            self.finish(&label, &RunSummary::default(), false);
            return Ok(RunSummary::default());
        }

        info!("▶ Executing {} operations on {}", queue.len(), self.device.name());
        let mut summary = RunSummary::default();
        let result = self.run_passes(queue, repeat, token, &mut summary);

        let cancelled = matches!(result, Err(ExecError::Cancelled));
        if cancelled {
            self.log("Execution cancelled");
        } else {
            self.log(format!(
                "Execution finished: {} succeeded, {} failed",
                summary.executed, summary.failed
            ));
        }
        self.finish(&label, &summary, cancelled);

        result.map(|_| summary)
    }

    fn run_passes(
        &self,
        queue: &OperationQueue,
        repeat: bool,
        token: &CancelToken,
        summary: &mut RunSummary,
    ) -> ExecResult<()> {
        let total = queue.len();
        let delay = self.settings.operation_delay();

        loop {
            summary.passes += 1;
            if repeat {
                self.log(format!("Pass {}", summary.passes));
            }

            for (index, operation) in queue.iter().enumerate() {
                self.pause.wait_while_paused(token)?;
                self.log(format!(
                    "Executing {}/{}: {}",
                    index + 1,
                    total,
                    operation.description
                ));

                match self.execute(operation, token) {
                    Ok(()) => summary.executed += 1,
                    Err(ExecError::Cancelled) => return Err(ExecError::Cancelled),
                    Err(e) => {
                        summary.failed += 1;
                        error!("Operation {} failed: {}", index + 1, e);
                        self.emit(ExecEvent::OperationFailed {
                            index,
                            description: operation.description.clone(),
                            error: e.to_string(),
                        });
                    }
                }

                token.sleep(delay)?;
            }

            if !repeat {
                return Ok(());
            }
        }
    }

    /// Execute one selected operation as its own job
    pub fn run_single(&self, operation: &Operation, token: &CancelToken) -> ExecResult<()> {
        self.log(format!("Executing: {}", operation.description));
        let result = self.execute(operation, token);
        let summary = RunSummary {
            executed: usize::from(result.is_ok()),
            failed: usize::from(matches!(result, Err(ref e) if !e.is_cancelled())),
            passes: 1,
        };
        if let Err(ref e) = result {
            if !e.is_cancelled() {
                self.emit(ExecEvent::OperationFailed {
                    index: 0,
                    description: operation.description.clone(),
                    error: e.to_string(),
                });
            }
        }
        self.finish(
            &operation.description,
            &summary,
            matches!(result, Err(ExecError::Cancelled)),
        );
        result
    }

    /// Home as its own job
    pub fn run_home(&self, token: &CancelToken) -> ExecResult<HomeOutcome> {
        let result = self.home_inner(token);
        let summary = RunSummary {
            executed: usize::from(result.is_ok()),
            failed: usize::from(matches!(result, Err(ref e) if !e.is_cancelled())),
            passes: 1,
        };
        if let Err(ref e) = result {
            if !e.is_cancelled() {
                self.log(format!("Home failed: {}", e));
            }
        }
        self.finish("Home", &summary, matches!(result, Err(ExecError::Cancelled)));
        result
    }

    /// Direct control from the GUI or CLI, outside any queue
    pub fn run_device_command(&self, command: &DeviceCommand, token: &CancelToken) -> ExecResult<()> {
        token.check()?;
        let result = match command {
            DeviceCommand::Servo(angle) => self.set_servo(*angle),
            DeviceCommand::Move {
                steps,
                direction,
                speed,
            } => self.move_steps(*steps, *direction, *speed, token),
            DeviceCommand::LedColor(color) => self.set_led_color(color),
            DeviceCommand::Brightness(value) => self.set_brightness(*value),
            DeviceCommand::Button => self.query_button(),
        };

        if let Err(ref e) = result {
            if !e.is_cancelled() {
                self.log(format!("Command failed: {}", e));
            }
        }
        let summary = RunSummary {
            executed: usize::from(result.is_ok()),
            failed: usize::from(matches!(result, Err(ref e) if !e.is_cancelled())),
            passes: 1,
        };
        self.finish(
            &format!("{:?}", command),
            &summary,
            matches!(result, Err(ExecError::Cancelled)),
        );
        result
    }

    /// Dispatch one operation, honouring its `repeat_count`
    pub fn execute(&self, operation: &Operation, token: &CancelToken) -> ExecResult<()> {
        let command = operation.command()?;
        let repeats = operation.repeat_count();

        for round in 1..=repeats {
            token.check()?;
            if repeats > 1 {
                self.log(format!("Repetition {}/{}", round, repeats));
            }
            self.dispatch(&command, &operation.description, token)?;
        }
        Ok(())
    }

    fn dispatch(&self, command: &Command, description: &str, token: &CancelToken) -> ExecResult<()> {
        match command {
            Command::Servo { angle } => self.set_servo(*angle),
            Command::Stepper(movement) => {
                let steps = match movement.amount {
                    StepperAmount::Steps(steps) => steps,
                    StepperAmount::DistanceCm(cm) => {
                        let wheel = state::lock(&self.state).wheel_diameter_mm();
                        rig::steps_for_distance(cm, wheel)?
                    }
                };
                self.move_steps(steps, movement.direction, movement.speed, token)
            }
            Command::LedColor { color } => self.set_led_color(color),
            Command::LedBrightness { brightness } => self.set_brightness(*brightness),
            Command::Button => self.query_button(),
            Command::Home => self.home_inner(token).map(|_| ()),
            Command::Photo {
                delay_secs,
                camera_index,
            } => {
                let delay = delay_secs.unwrap_or(self.settings.photo_delay_secs);
                self.log(format!("Camera {}: waiting {}s for autofocus", camera_index, delay));
                let wait = Duration::try_from_secs_f64(delay).map_err(|e| {
                    SharedError::invalid_input(format!("photo delay {}s: {}", delay, e))
                })?;
                token.sleep(wait)?;
                self.log(format!("📷 Camera {}: photo requested", camera_index));
                self.emit(ExecEvent::PhotoRequested {
                    camera_index: *camera_index,
                    description: description.to_string(),
                });
                Ok(())
            }
        }
    }

    fn set_servo(&self, angle: u8) -> ExecResult<()> {
        let reply = self.device.set_servo(angle)?;
        self.log_reply(&reply);
        let snapshot = {
            let mut state = state::lock(&self.state);
            state.override_servo(angle);
            state.snapshot()
        };
        self.emit(ExecEvent::StateChanged(snapshot));
        Ok(())
    }

    fn move_steps(&self, steps: u32, direction: Direction, speed: Option<u32>, token: &CancelToken) -> ExecResult<()> {
        let reply = self.device.move_stepper(steps, direction, speed)?;
        self.log_reply(&reply);

        let (tracking_angle, snapshot) = {
            let mut state = state::lock(&self.state);
            let angle = state.apply_move(direction, steps)?;
            (angle, state.snapshot())
        };
        self.emit(ExecEvent::StateChanged(snapshot));

        if let Some(angle) = tracking_angle {
            token.check()?;
            self.log(format!("Tracking: servo to {}°", angle));
            // recorded only once the rig has accepted it
            self.set_servo(angle)?;
        }
        Ok(())
    }

    fn set_led_color(&self, color: &str) -> ExecResult<()> {
        let reply = self.device.set_led_color(color)?;
        self.log_reply(&reply);
        Ok(())
    }

    fn set_brightness(&self, value: u8) -> ExecResult<()> {
        let reply = self.device.set_brightness(value)?;
        self.log_reply(&reply);
        Ok(())
    }

    fn query_button(&self) -> ExecResult<()> {
        let button = self.device.button_state()?;
        self.log(format!("Button is {}", button.label()));
        Ok(())
    }

    fn home_inner(&self, token: &CancelToken) -> ExecResult<HomeOutcome> {
        let outcome = home::run_home(self.device.as_ref(), &self.home, token, |line| {
            self.emit(ExecEvent::Log(line))
        })?;

        let (angle, tracking, snapshot) = {
            let mut state = state::lock(&self.state);
            let angle = state.reset_home()?;
            (angle, state.tracking(), state.snapshot())
        };
        if !outcome.found_switch() {
            warn!("Position reset to 0 without seeing the home switch");
        }
        self.log("Home position set");
        self.emit(ExecEvent::StateChanged(snapshot));

        if tracking {
            token.check()?;
            self.set_servo(angle)?;
        }
        Ok(outcome)
    }

    fn log_reply(&self, reply: &str) {
        let reply = reply.trim();
        if !reply.is_empty() {
            self.log(reply.to_string());
        }
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.emit(ExecEvent::Log(line));
    }

    fn finish(&self, label: &str, summary: &RunSummary, cancelled: bool) {
        self.emit(ExecEvent::Finished {
            label: label.to_string(),
            executed: summary.executed,
            failed: summary.failed,
            cancelled,
        });
    }

    fn emit(&self, event: ExecEvent) {
        // nobody listening is fine (CLI runs without a log view)
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedRig;
    use crate::state::AppState;
    use crossbeam_channel::{unbounded, Receiver};
    use serde_json::json;
    use shared::{OperationKind, TargetingGeometry};
    use std::thread;
    use std::time::Instant;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::new();
        config.executor.operation_delay_secs = 0.0;
        config.executor.photo_delay_secs = 0.0;
        config.home.release_poll_secs = 0.0;
        config.home.settle_secs = 0.0;
        config.home.poll_interval_secs = 0.0;
        config
    }

    fn setup(rig: Arc<SimulatedRig>, tracking: bool) -> (Executor, SharedState, Receiver<ExecEvent>, PauseFlag) {
        let state = AppState::new(TargetingGeometry::default(), 28.0, tracking)
            .unwrap()
            .into_shared();
        let (tx, rx) = unbounded();
        let pause = PauseFlag::new();
        let executor = Executor::new(rig, Arc::clone(&state), &fast_config(), tx, pause.clone());
        (executor, state, rx, pause)
    }

    fn drain(rx: &Receiver<ExecEvent>) -> Vec<ExecEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_dispatches_every_kind() {
        let rig = Arc::new(SimulatedRig::new(300));
        let (executor, state, rx, _) = setup(rig.clone(), false);

        let queue = OperationQueue::from_operations(vec![
            Operation::servo(45),
            Operation::stepper_steps(4656, Direction::Up, 80, 10.0),
            Operation::led_color("#B00B69").unwrap(),
            Operation::led_brightness(69),
            Operation::button(),
            Operation::photo(0.0, 1),
        ]);
        let summary = executor.run_queue(&queue, false, &CancelToken::new()).unwrap();
        assert_eq!(summary, RunSummary { executed: 6, failed: 0, passes: 1 });

        assert_eq!(
            rig.calls(),
            vec![
                "setServo?angle=45",
                "setMotor?steps=4656&direction=1&speed=80",
                "hexcolor?hex=#B00B69",
                "setBrightness?value=69",
                "getButtonState",
            ]
        );
        assert!((state::lock(&state).snapshot().position_cm - 10.0).abs() < 0.001);

        let events = drain(&rx);
        assert!(events.contains(&ExecEvent::Log("Executing 1/6: Servo: Set angle to 45°".into())));
        assert!(events.iter().any(|e| matches!(e, ExecEvent::PhotoRequested { camera_index: 1, .. })));
        assert!(matches!(
            events.last(),
            Some(ExecEvent::Finished { executed: 6, failed: 0, cancelled: false, .. })
        ));
    }

    #[test]
    fn test_failure_is_logged_and_skipped() {
        let rig = Arc::new(SimulatedRig::default());
        let (executor, _, rx, _) = setup(rig.clone(), false);

        let mut params = serde_json::Map::new();
        params.insert("angle".into(), json!(200));
        let bad = Operation::new(OperationKind::Servo, params, "bad servo");

        let queue = OperationQueue::from_operations(vec![Operation::servo(10), bad, Operation::servo(20)]);
        let summary = executor.run_queue(&queue, false, &CancelToken::new()).unwrap();

        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(rig.calls(), vec!["setServo?angle=10", "setServo?angle=20"]);
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, ExecEvent::OperationFailed { index: 1, .. })));
    }

    #[test]
    fn test_device_failure_continues() {
        let rig = Arc::new(SimulatedRig::default());
        rig.set_offline(true);
        let (executor, _, _, _) = setup(rig, false);

        let queue = OperationQueue::from_operations(vec![Operation::servo(10), Operation::home()]);
        let summary = executor.run_queue(&queue, false, &CancelToken::new()).unwrap();
        assert_eq!(summary.failed, 2);
    }

    #[test]
    fn test_tracking_follows_moves() {
        let rig = Arc::new(SimulatedRig::default());
        let (executor, state, _, _) = setup(rig.clone(), true);

        let op = Operation::stepper_distance(10.0, Direction::Up, 80);
        executor.execute(&op, &CancelToken::new()).unwrap();

        // 10 cm truncates to 4656 steps; from y~10 the target needs 67°
        assert_eq!(
            rig.calls(),
            vec!["setMotor?steps=4656&direction=1&speed=80", "setServo?angle=67"]
        );
        assert_eq!(state::lock(&state).snapshot().servo_angle, 67);
    }

    #[test]
    fn test_failed_tracking_servo_keeps_recorded_angle() {
        let rig = Arc::new(SimulatedRig::default());
        let (executor, state, rx, _) = setup(rig.clone(), true);
        state::lock(&state).override_servo(10);
        // the move goes through, the follow-up servo command does not
        rig.set_offline_after(1);

        let op = Operation::stepper_distance(10.0, Direction::Up, 80);
        assert!(executor.execute(&op, &CancelToken::new()).is_err());

        let snapshot = state::lock(&state).snapshot();
        assert!((snapshot.position_cm - 10.0).abs() < 0.001);
        assert_eq!(snapshot.servo_angle, 10);
        assert!(drain(&rx)
            .iter()
            .all(|e| !matches!(e, ExecEvent::StateChanged(s) if s.servo_angle != 10)));
        assert_eq!(rig.calls(), vec!["setMotor?steps=4656&direction=1&speed=80"]);
    }

    #[test]
    fn test_repeat_count() {
        let rig = Arc::new(SimulatedRig::default());
        let (executor, _, _, _) = setup(rig.clone(), false);

        let mut op = Operation::button();
        op.set_param(shared::operation::REPEAT_COUNT_KEY, json!(3));
        executor.execute(&op, &CancelToken::new()).unwrap();
        assert_eq!(rig.calls().len(), 3);
    }

    #[test]
    fn test_home_operation_resets_position() {
        let rig = Arc::new(SimulatedRig::new(0));
        let (executor, state, _, _) = setup(rig.clone(), true);
        state::lock(&state).apply_move(Direction::Up, 5000).unwrap();

        // carriage starts on the switch: it never releases, one move down, then found
        let outcome = executor.run_home(&CancelToken::new()).unwrap();
        assert!(!outcome.released);
        assert_eq!(outcome.pressed_at_attempt, Some(1));

        let snapshot = state::lock(&state).snapshot();
        assert_eq!(snapshot.position_cm, 0.0);
        assert!(snapshot.homed);
        // tracking re-aims from home
        assert_eq!(rig.calls().last().map(String::as_str), Some("setServo?angle=63"));
    }

    #[test]
    fn test_cancelled_home_keeps_position() {
        let rig = Arc::new(SimulatedRig::new(500));
        let (executor, state, _, _) = setup(rig, false);
        state::lock(&state).apply_move(Direction::Up, 5000).unwrap();
        let before = state::lock(&state).snapshot().position_cm;

        let token = CancelToken::new();
        token.cancel();
        assert!(executor.run_home(&token).unwrap_err().is_cancelled());
        assert_eq!(state::lock(&state).snapshot().position_cm, before);
    }

    #[test]
    fn test_cancel_stops_queue() {
        let rig = Arc::new(SimulatedRig::default());
        let (executor, _, rx, _) = setup(rig.clone(), false);

        let token = CancelToken::new();
        token.cancel();
        let queue = OperationQueue::from_operations(vec![Operation::servo(10)]);
        assert!(executor.run_queue(&queue, false, &token).unwrap_err().is_cancelled());
        assert!(rig.calls().is_empty());
        assert!(matches!(
            drain(&rx).last(),
            Some(ExecEvent::Finished { cancelled: true, .. })
        ));
    }

    #[test]
    fn test_pause_holds_execution() {
        let rig = Arc::new(SimulatedRig::default());
        let (executor, _, _, pause) = setup(rig.clone(), false);
        pause.set(true);

        let queue = OperationQueue::from_operations(vec![Operation::servo(10)]);
        let token = CancelToken::new();
        let handle = {
            let token = token.clone();
            thread::spawn(move || executor.run_queue(&queue, false, &token))
        };

        thread::sleep(Duration::from_millis(100));
        assert!(rig.calls().is_empty());

        pause.set(false);
        let deadline = Instant::now() + Duration::from_secs(5);
        while rig.calls().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.join().unwrap().unwrap().executed, 1);
    }

    #[test]
    fn test_empty_repeat_returns() {
        let rig = Arc::new(SimulatedRig::default());
        let (executor, _, _, _) = setup(rig, false);
        let summary = executor
            .run_queue(&OperationQueue::new(), true, &CancelToken::new())
            .unwrap();
        assert_eq!(summary, RunSummary::default());
    }
}
