/*!
Background task runner.

All hardware work runs on one long-lived worker thread fed through a
channel, so at most one job drives the rig at a time. Every job gets a fresh
[`CancelToken`]; the runner keeps a handle to the current one so the GUI or
a Ctrl+C handler can stop it. Progress goes back over the event channel.
*/

use crate::config::AppConfig;
use crate::device::DeviceApi;
use crate::error::{ExecError, ExecResult};
use crate::executor::{ExecEvent, Executor};
use crate::home::HomeOutcome;
use crate::state::SharedState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use shared::{Direction, Operation, OperationQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag for one job
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has fired
    pub fn check(&self) -> ExecResult<()> {
        if self.is_cancelled() {
            Err(ExecError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with `Cancelled` if the token fires
    pub fn sleep(&self, duration: Duration) -> ExecResult<()> {
        // a deadline past what Instant can hold only ends on cancel
        let deadline = Instant::now().checked_add(duration);
        loop {
            self.check()?;
            let now = Instant::now();
            let slice = match deadline {
                Some(deadline) if now >= deadline => return Ok(()),
                Some(deadline) => SLEEP_SLICE.min(deadline - now),
                None => SLEEP_SLICE,
            };
            thread::sleep(slice);
        }
    }
}

/// Pause switch shared by the runner and queue jobs
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Block while paused; cancellation still wins
    pub fn wait_while_paused(&self, cancel: &CancelToken) -> ExecResult<()> {
        while self.is_paused() {
            cancel.sleep(Duration::from_millis(50))?;
        }
        cancel.check()
    }
}

/// Direct hardware commands, run outside the queue
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Servo(u8),
    Move {
        steps: u32,
        direction: Direction,
        speed: Option<u32>,
    },
    LedColor(String),
    Brightness(u8),
    Button,
}

/// Work items accepted by the runner
#[derive(Debug, Clone)]
pub enum Job {
    Home,
    RunQueue { queue: OperationQueue, repeat: bool },
    RunOperation(Operation),
    Device(DeviceCommand),
}

impl Job {
    pub fn label(&self) -> String {
        match self {
            Job::Home => "home".to_string(),
            Job::RunQueue { queue, repeat: true } => format!("queue of {} (repeating)", queue.len()),
            Job::RunQueue { queue, .. } => format!("queue of {}", queue.len()),
            Job::RunOperation(op) => op.description.clone(),
            Job::Device(cmd) => format!("{:?}", cmd),
        }
    }
}

enum RunnerMessage {
    Job(Job),
    Shutdown,
}

/// Handle to the worker thread
pub struct TaskRunner {
    job_tx: Sender<RunnerMessage>,
    events_rx: Receiver<ExecEvent>,
    current: Arc<Mutex<Option<CancelToken>>>,
    busy: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    pause: PauseFlag,
    worker: Option<JoinHandle<()>>,
}

impl TaskRunner {
    pub fn start(device: Arc<dyn DeviceApi>, state: SharedState, config: &AppConfig) -> Self {
        let (job_tx, job_rx) = unbounded::<RunnerMessage>();
        let (events_tx, events_rx) = unbounded::<ExecEvent>();
        let current: Arc<Mutex<Option<CancelToken>>> = Arc::new(Mutex::new(None));
        let busy = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));
        let pause = PauseFlag::new();

        let worker = {
            let current = Arc::clone(&current);
            let busy = Arc::clone(&busy);
            let stopping = Arc::clone(&stopping);
            let executor = Executor::new(device, state, config, events_tx, pause.clone());
            thread::spawn(move || Self::worker_thread(executor, job_rx, current, busy, stopping))
        };

        Self {
            job_tx,
            events_rx,
            current,
            busy,
            stopping,
            pause,
            worker: Some(worker),
        }
    }

    /// Queue a job behind whatever is running
    pub fn submit(&self, job: Job) -> bool {
        let label = job.label();
        if self.job_tx.send(RunnerMessage::Job(job)).is_err() {
            error!("Task runner has stopped, dropping job: {}", label);
            return false;
        }
        true
    }

    /// Cancel the running job; queued jobs still run afterwards
    pub fn cancel_current(&self) {
        if let Some(token) = self.current_token() {
            info!("🛑 Cancelling current job");
            token.cancel();
        }
        self.pause.set(false);
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.set(paused);
        info!("{}", if paused { "⏸ Paused" } else { "▶ Resumed" });
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &Receiver<ExecEvent> {
        &self.events_rx
    }

    /// Cancel the running job, drop queued ones and join the worker
    pub fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.cancel_current();
        let _ = self.job_tx.send(RunnerMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Task runner thread panicked");
            }
        }
    }

    fn current_token(&self) -> Option<CancelToken> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn worker_thread(
        executor: Executor,
        job_rx: Receiver<RunnerMessage>,
        current: Arc<Mutex<Option<CancelToken>>>,
        busy: Arc<AtomicBool>,
        stopping: Arc<AtomicBool>,
    ) {
        info!("Task runner started");

        while let Ok(RunnerMessage::Job(job)) = job_rx.recv() {
            if stopping.load(Ordering::SeqCst) {
                continue;
            }
            let token = CancelToken::new();
            *current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.clone());
            busy.store(true, Ordering::SeqCst);

            let label = job.label();
            match Self::run_job(&executor, job, &token) {
                Ok(()) => {}
                Err(ExecError::Cancelled) => warn!("Job cancelled: {}", label),
                Err(e) => error!("Job failed: {}: {}", label, e),
            }

            busy.store(false, Ordering::SeqCst);
            *current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        }

        info!("Task runner stopped");
    }

    fn run_job(executor: &Executor, job: Job, token: &CancelToken) -> ExecResult<()> {
        match job {
            Job::Home => executor.run_home(token).map(|_: HomeOutcome| ()),
            Job::RunQueue { queue, repeat } => executor.run_queue(&queue, repeat, token).map(|_| ()),
            Job::RunOperation(op) => executor.run_single(&op, token),
            Job::Device(command) => executor.run_device_command(&command, token),
        }
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
