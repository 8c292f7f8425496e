use crate::error::PressResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Paused => 2,
        }
    }
}

/// The three periodic tasks of the press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Status,
    Control,
    Record,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Status, TaskKind::Control, TaskKind::Record];

    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Control => "control",
            Self::Record => "record",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub ticks: u64,
    pub failures: u64,
}

#[derive(Debug)]
struct TaskControl {
    state: AtomicU8,
    period_us: AtomicU64,
    ticks: AtomicU64,
    failures: AtomicU64,
}

impl TaskControl {
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TaskState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn period(&self) -> Duration {
        Duration::from_micros(self.period_us.load(Ordering::Relaxed))
    }
}

pub type StepFn<S> = Arc<dyn Fn(&mut S) -> PressResult<()> + Send + Sync>;

/// A periodically repeated step over task-private state `S`.
///
/// The state sits behind the task's own lock, held for exactly one step per
/// tick. The command layer can take the same lock through [`with_state`] to
/// act between ticks. Cancellation is cooperative: the state flag is checked
/// at tick boundaries only.
///
/// `pause` and `stop` join the worker, so they must not be called from
/// inside the task's own step.
///
/// [`with_state`]: PeriodicTask::with_state
pub struct PeriodicTask<S: Send + 'static> {
    name: &'static str,
    state: Arc<Mutex<S>>,
    control: Arc<TaskControl>,
    step: StepFn<S>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: Send + 'static> PeriodicTask<S> {
    pub fn new<F>(name: &'static str, state: S, period: Duration, step: F) -> Self
    where
        F: Fn(&mut S) -> PressResult<()> + Send + Sync + 'static,
    {
        Self {
            name,
            state: Arc::new(Mutex::new(state)),
            control: Arc::new(TaskControl {
                state: AtomicU8::new(TaskState::Stopped.as_u8()),
                period_us: AtomicU64::new(period.as_micros() as u64),
                ticks: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            step: Arc::new(step),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            ticks: self.control.ticks.load(Ordering::Relaxed),
            failures: self.control.failures.load(Ordering::Relaxed),
        }
    }

    pub fn period(&self) -> Duration {
        self.control.period()
    }

    /// Takes effect from the next wait.
    pub fn set_period(&self, period: Duration) {
        self.control
            .period_us
            .store(period.as_micros() as u64, Ordering::Relaxed);
    }

    /// Run `f` on the task-private state, serialized with the task's steps.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = lock_recover(&self.state);
        f(&mut *guard)
    }

    /// Start or resume the worker. Returns `false` if it was already running.
    pub fn start(&self) -> PressResult<bool> {
        let mut worker = lock_recover(&self.worker);
        if self.control.state() == TaskState::Running {
            log::info!("{} task already running", self.name);
            return Ok(false);
        }
        if let Some(previous) = worker.take() {
            // A paused worker has already left its loop.
            if previous.join().is_err() {
                log::error!("{} task worker panicked", self.name);
            }
        }

        self.control.set_state(TaskState::Running);
        let name = self.name;
        let state = Arc::clone(&self.state);
        let control = Arc::clone(&self.control);
        let step = Arc::clone(&self.step);
        let spawned = thread::Builder::new()
            .name(format!("press-{name}"))
            .spawn(move || run_worker(name, &state, &control, &step));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("{name} task started");
                Ok(true)
            }
            Err(e) => {
                self.control.set_state(TaskState::Stopped);
                Err(e.into())
            }
        }
    }

    /// Running -> Paused. Blocks until the worker has finished its current tick.
    pub fn pause(&self) -> bool {
        let mut worker = lock_recover(&self.worker);
        if self.control.state() != TaskState::Running {
            log::info!("{} task is not running", self.name);
            return false;
        }
        self.control.set_state(TaskState::Paused);
        self.join(worker.take());
        log::info!("{} task paused", self.name);
        true
    }

    /// Any -> Stopped. Blocks until the worker has finished its current tick.
    pub fn stop(&self) -> bool {
        let mut worker = lock_recover(&self.worker);
        if self.control.state() == TaskState::Stopped {
            log::info!("{} task was not running", self.name);
            return false;
        }
        self.control.set_state(TaskState::Stopped);
        self.join(worker.take());
        log::info!("{} task stopped", self.name);
        true
    }

    /// Equivalent to `start` unless the task is stopped.
    pub fn resume(&self) -> PressResult<bool> {
        if self.control.state() == TaskState::Stopped {
            log::info!("{} task already stopped", self.name);
            return Ok(false);
        }
        self.start()
    }

    fn join(&self, handle: Option<JoinHandle<()>>) {
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("{} task worker panicked", self.name);
            }
        }
    }
}

impl<S: Send + 'static> Drop for PeriodicTask<S> {
    fn drop(&mut self) {
        self.control.set_state(TaskState::Stopped);
        let handle = lock_recover(&self.worker).take();
        self.join(handle);
    }
}

fn run_worker<S>(name: &str, state: &Mutex<S>, control: &TaskControl, step: &StepFn<S>) {
    while control.state() == TaskState::Running {
        let tick_start = Instant::now();
        {
            let mut guard = lock_recover(state);
            if let Err(e) = (**step)(&mut *guard) {
                control.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("{name} tick failed: {e}");
            }
        }
        control.ticks.fetch_add(1, Ordering::Relaxed);

        let deadline = tick_start + control.period();
        loop {
            if control.state() != TaskState::Running {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }
    log::debug!("{name} worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PressError;
    use std::sync::atomic::AtomicBool;

    fn counting_task(period: Duration) -> (PeriodicTask<u64>, Arc<AtomicU64>) {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_step = Arc::clone(&seen);
        let task = PeriodicTask::new("count", 0u64, period, move |n: &mut u64| {
            *n += 1;
            seen_step.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (task, seen)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn no_step_runs_after_stop_returns() {
        let (task, seen) = counting_task(Duration::from_millis(1));
        assert!(task.start().unwrap());
        assert!(task.stop());

        let after_stop = seen.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(seen.load(Ordering::SeqCst), after_stop);
        assert_eq!(task.state(), TaskState::Stopped);
        assert_eq!(task.with_state(|n| *n), after_stop);
    }

    #[test]
    fn start_twice_is_a_notice() {
        let (task, _seen) = counting_task(Duration::from_millis(5));
        assert!(task.start().unwrap());
        assert!(!task.start().unwrap());
        task.stop();
    }

    #[test]
    fn pause_then_resume_continues_ticking() {
        let (task, seen) = counting_task(Duration::from_millis(1));
        task.start().unwrap();
        wait_for(|| seen.load(Ordering::SeqCst) > 0);

        assert!(task.pause());
        assert_eq!(task.state(), TaskState::Paused);
        let paused_at = seen.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(seen.load(Ordering::SeqCst), paused_at);

        assert!(task.resume().unwrap());
        wait_for(|| seen.load(Ordering::SeqCst) > paused_at);
        task.stop();
    }

    #[test]
    fn resume_after_stop_is_ignored() {
        let (task, _seen) = counting_task(Duration::from_millis(1));
        assert!(!task.resume().unwrap());
        assert_eq!(task.state(), TaskState::Stopped);
        assert!(!task.pause());
        assert!(!task.stop());
    }

    #[test]
    fn stop_does_not_wait_out_the_period() {
        let (task, seen) = counting_task(Duration::from_secs(30));
        task.start().unwrap();
        wait_for(|| seen.load(Ordering::SeqCst) == 1);

        let started = Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn failing_tick_does_not_kill_worker() {
        let task = PeriodicTask::new("flaky", (), Duration::from_millis(1), |_: &mut ()| {
            Err(PressError::sensor_unavailable("no hx711"))
        });
        task.start().unwrap();
        wait_for(|| task.stats().failures >= 3);
        assert_eq!(task.state(), TaskState::Running);
        task.stop();
        let stats = task.stats();
        assert_eq!(stats.ticks, stats.failures);
    }

    #[test]
    fn with_state_is_serialized_with_steps() {
        let in_step = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&in_step);
        let task = PeriodicTask::new("guarded", 0u32, Duration::from_millis(5), move |_: &mut u32| {
            flag.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            flag.store(false, Ordering::SeqCst);
            Ok(())
        });
        task.start().unwrap();
        for _ in 0..20 {
            task.with_state(|n| {
                assert!(!in_step.load(Ordering::SeqCst));
                *n += 1;
            });
        }
        task.stop();
        assert_eq!(task.with_state(|n| *n), 20);
    }

    #[test]
    fn period_change_applies_to_next_wait() {
        let (task, seen) = counting_task(Duration::from_secs(30));
        task.set_period(Duration::from_millis(1));
        task.start().unwrap();
        wait_for(|| seen.load(Ordering::SeqCst) >= 3);
        task.stop();
        assert_eq!(task.period(), Duration::from_millis(1));
    }
}
