//! Parameter Automation Scheduler
//!
//! Time-driven interpolation of effect parameters on a background thread.
//!
//! # Purpose
//! A task moves one parameter from a start to an end value over a duration.
//! Every tick (~60 Hz) each task's progress is computed, its callback receives
//! the interpolated value, and once progress reaches 1 the callback receives the
//! end value exactly once and the task is dropped.
//!
//! # Design Notes
//! - Tasks and the effects chain live in one `ChainState` behind one mutex. The
//!   callbacks write parameters while the worker holds that lock, so the frame
//!   callback's snapshot never sees a half-applied tick.
//! - One worker thread, spawned lazily from the control plane (`start`, or the
//!   first `schedule`). With no tasks it parks on a condvar tied to the chain
//!   mutex; scheduling wakes it. `schedule_locked`, the path the frame callback
//!   uses, only inserts and notifies and never spawns a thread.
//! - `stop` wakes the worker, joins it, and closes the scheduler for good.
//! - Scheduling a task for a key that already has one replaces it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::dsp::utils::lerp;
use crate::effects::{EffectKind, EffectsChain};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    #[default]
    Linear,
    Exponential,
}

impl Curve {
    pub fn interpolate(&self, start: f32, end: f32, progress: f32) -> f32 {
        match self {
            Curve::Linear => lerp(start, end, progress),
            Curve::Exponential => start + (end - start) * (1.0 - (-5.0 * progress).exp()),
        }
    }
}

/// Receives the locked chain and the value to write.
pub type ParamCallback = Box<dyn FnMut(&mut EffectsChain, f32) + Send>;

/// Key under which a parameter's task is stored: `"<effect>.<param>"`.
pub fn task_key(kind: EffectKind, param: &str) -> String {
    format!("{}.{}", kind.name(), param)
}

/// Callback writing `param` on every instance of `kind`.
pub fn param_writer(kind: EffectKind, param: &str) -> ParamCallback {
    let param = param.to_string();
    Box::new(move |chain, v| {
        chain.set_param(kind, &param, v);
    })
}

pub struct AutomationTask {
    start_value: f32,
    end_value: f32,
    duration_secs: f32,
    started: Instant,
    curve: Curve,
    callback: ParamCallback,
}

impl AutomationTask {
    pub fn new(
        start_value: f32,
        end_value: f32,
        duration_secs: f32,
        curve: Curve,
        callback: ParamCallback,
    ) -> Self {
        Self {
            start_value,
            end_value,
            duration_secs,
            started: Instant::now(),
            curve,
            callback,
        }
    }

    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    pub fn end_value(&self) -> f32 {
        self.end_value
    }

    /// Non-positive durations complete on the first tick.
    pub fn progress(&self, now: Instant) -> f32 {
        if !(self.duration_secs > 0.0) {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started).as_secs_f32();
        elapsed / self.duration_secs
    }
}

/// The effects chain plus the automation tasks that write into it.
#[derive(Default)]
pub struct ChainState {
    pub chain: EffectsChain,
    tasks: HashMap<String, AutomationTask>,
}

impl ChainState {
    pub fn new(chain: EffectsChain) -> Self {
        Self {
            chain,
            ..Self::default()
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&self, key: &str) -> Option<&AutomationTask> {
        self.tasks.get(key)
    }
}

pub type SharedChainState = Arc<Mutex<ChainState>>;

fn lock(state: &Mutex<ChainState>) -> MutexGuard<'_, ChainState> {
    match state.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Advance every task to `now`. Returns how many tasks completed.
pub fn tick(state: &mut ChainState, now: Instant) -> usize {
    let ChainState { chain, tasks, .. } = state;
    let before = tasks.len();
    tasks.retain(|_, task| {
        let progress = task.progress(now);
        if progress >= 1.0 {
            (task.callback)(chain, task.end_value);
            false
        } else {
            let value = task
                .curve
                .interpolate(task.start_value, task.end_value, progress.max(0.0));
            (task.callback)(chain, value);
            true
        }
    });
    before - tasks.len()
}

pub struct AutomationScheduler {
    state: SharedChainState,
    wake: Arc<Condvar>,
    tick_interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
}

impl AutomationScheduler {
    pub fn new(state: SharedChainState, tick_hz: f32) -> Self {
        Self {
            state,
            wake: Arc::new(Condvar::new()),
            tick_interval: Duration::from_secs_f32(1.0 / tick_hz.max(1.0)),
            worker: Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> &SharedChainState {
        &self.state
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(EngineError::Resource("automation scheduler stopped".into()));
        }
        Ok(())
    }

    /// Schedule (or replace) the task for `key`, blocking on the chain lock.
    pub fn schedule(&self, key: impl Into<String>, task: AutomationTask) -> EngineResult<()> {
        self.ensure_open()?;
        lock(&self.state).tasks.insert(key.into(), task);
        self.start();
        self.wake.notify_one();
        Ok(())
    }

    /// Like `schedule`, but gives up with `Ok(false)` when the lock is contended.
    pub fn try_schedule(&self, key: impl Into<String>, task: AutomationTask) -> EngineResult<bool> {
        self.ensure_open()?;
        {
            let mut st = match self.state.try_lock() {
                Ok(st) => st,
                Err(TryLockError::WouldBlock) => return Ok(false),
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
            };
            st.tasks.insert(key.into(), task);
        }
        self.start();
        self.wake.notify_one();
        Ok(true)
    }

    /// Schedule through a guard the caller already holds on `state()`.
    /// Never spawns: the task waits for a worker started by `start`.
    pub fn schedule_locked(
        &self,
        st: &mut ChainState,
        key: impl Into<String>,
        task: AutomationTask,
    ) -> EngineResult<()> {
        self.ensure_open()?;
        st.tasks.insert(key.into(), task);
        self.wake.notify_one();
        Ok(())
    }

    pub fn add_automation(
        &self,
        key: impl Into<String>,
        start_value: f32,
        end_value: f32,
        duration_secs: f32,
        curve: Curve,
        callback: ParamCallback,
    ) -> EngineResult<()> {
        self.schedule(
            key,
            AutomationTask::new(start_value, end_value, duration_secs, curve, callback),
        )
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).pending()
    }

    /// True while the worker thread exists, busy or parked.
    pub fn is_running(&self) -> bool {
        match self.worker.lock() {
            Ok(w) => w.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Spawn the worker if it is not there yet. No-op once stopped.
    /// Must not be called with the chain lock held.
    pub fn start(&self) {
        if self.is_stopped() {
            return;
        }
        let mut slot = match self.worker.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        let wake = Arc::clone(&self.wake);
        let stopped = Arc::clone(&self.stopped);
        let interval = self.tick_interval;
        let spawned = std::thread::Builder::new()
            .name("orionwave-automation".into())
            .spawn(move || worker_loop(state, wake, stopped, interval));
        match spawned {
            Ok(handle) => *slot = Some(handle),
            Err(e) => log::error!("failed to spawn automation worker: {}", e),
        }
    }

    /// Stop the worker, drop pending tasks and refuse new ones.
    pub fn stop(&self) {
        {
            // Set under the chain lock so a worker about to park sees it.
            let _st = lock(&self.state);
            self.stopped.store(true, Ordering::Release);
            self.wake.notify_all();
        }
        let handle = match self.worker.lock() {
            Ok(mut s) => s.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(h) = handle {
            if h.join().is_err() {
                log::error!("automation worker panicked");
            }
        }
        let mut st = lock(&self.state);
        let dropped = st.tasks.len();
        st.tasks.clear();
        if dropped > 0 {
            log::debug!("automation stopped with {} pending tasks", dropped);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn worker_id(&self) -> Option<std::thread::ThreadId> {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.thread().id())
    }
}

impl Drop for AutomationScheduler {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.stop();
        }
    }
}

fn worker_loop(
    state: SharedChainState,
    wake: Arc<Condvar>,
    stopped: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut st = lock(&state);
    loop {
        if stopped.load(Ordering::Acquire) {
            return;
        }
        if st.tasks.is_empty() {
            st = match wake.wait(st) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            continue;
        }
        tick(&mut st, Instant::now());
        drop(st);
        std::thread::sleep(interval);
        st = lock(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectSpec;
    use std::sync::atomic::AtomicUsize;

    fn recorder(values: Arc<Mutex<Vec<f32>>>) -> ParamCallback {
        Box::new(move |_chain, v| values.lock().unwrap().push(v))
    }

    #[test]
    fn test_curves() {
        assert_eq!(Curve::Linear.interpolate(0.0, 10.0, 0.5), 5.0);
        let e = Curve::Exponential.interpolate(0.0, 1.0, 0.2);
        assert!((e - (1.0 - (-1.0f32).exp())).abs() < 1e-6);
    }

    #[test]
    fn test_completion_fires_end_value_exactly_once() {
        let t0 = Instant::now();
        let values = Arc::new(Mutex::new(Vec::new()));
        let mut st = ChainState::default();
        st.tasks.insert(
            "reverb.mix".into(),
            AutomationTask::new(0.0, 1.0, 1.0, Curve::Linear, recorder(values.clone()))
                .started_at(t0),
        );

        assert_eq!(tick(&mut st, t0 + Duration::from_millis(500)), 0);
        assert_eq!(tick(&mut st, t0 + Duration::from_millis(1000)), 1);
        assert_eq!(tick(&mut st, t0 + Duration::from_millis(1500)), 0);

        let v = values.lock().unwrap();
        assert_eq!(v.len(), 2);
        assert!((v[0] - 0.5).abs() < 1e-6);
        assert_eq!(v[1], 1.0);
        assert_eq!(v.iter().filter(|&&x| x == 1.0).count(), 1);
    }

    #[test]
    fn test_zero_duration_completes_immediately() {
        let values = Arc::new(Mutex::new(Vec::new()));
        let mut st = ChainState::default();
        st.tasks.insert(
            "k".into(),
            AutomationTask::new(3.0, 7.0, 0.0, Curve::Exponential, recorder(values.clone())),
        );
        assert_eq!(tick(&mut st, Instant::now()), 1);
        assert_eq!(*values.lock().unwrap(), vec![7.0]);
    }

    #[test]
    fn test_replacement_supersedes() {
        let state: SharedChainState = Arc::new(Mutex::new(ChainState::default()));
        let sched = AutomationScheduler::new(state.clone(), 120.0);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        {
            let mut st = state.lock().unwrap();
            let f = first.clone();
            let task = AutomationTask::new(
                0.0,
                1.0,
                0.02,
                Curve::Linear,
                Box::new(move |_, _| {
                    f.fetch_add(1, Ordering::SeqCst);
                }),
            );
            sched.schedule_locked(&mut st, "reverb.mix", task).unwrap();
            let s2 = second.clone();
            let task = AutomationTask::new(
                0.0,
                1.0,
                0.02,
                Curve::Linear,
                Box::new(move |_, _| {
                    s2.fetch_add(1, Ordering::SeqCst);
                }),
            );
            sched.schedule_locked(&mut st, "reverb.mix", task).unwrap();
            assert_eq!(st.pending(), 1);
        }
        sched.start();
        let deadline = Instant::now() + Duration::from_secs(2);
        while sched.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert!(second.load(Ordering::SeqCst) >= 1);
        sched.stop();
    }

    #[test]
    fn test_worker_writes_chain_and_parks() {
        let mut chain = EffectsChain::new();
        chain.push(EffectSpec::new("reverb")).unwrap();
        let state: SharedChainState = Arc::new(Mutex::new(ChainState::new(chain)));
        let sched = AutomationScheduler::new(state.clone(), 120.0);
        sched
            .add_automation(
                "reverb.mix",
                0.2,
                0.8,
                0.05,
                Curve::Linear,
                param_writer(EffectKind::Reverb, "mix"),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while sched.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sched.pending(), 0);
        let mix = state.lock().unwrap().chain.param(EffectKind::Reverb, "mix");
        assert_eq!(mix, Some(0.8));
        assert!(sched.is_running());
        let parked = sched.worker_id();

        // The parked worker picks up the next task; no new thread.
        sched
            .add_automation(
                task_key(EffectKind::Reverb, "mix"),
                0.8,
                0.1,
                0.0,
                Curve::Linear,
                param_writer(EffectKind::Reverb, "mix"),
            )
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while sched.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            state.lock().unwrap().chain.param(EffectKind::Reverb, "mix"),
            Some(0.1)
        );
        assert_eq!(sched.worker_id(), parked);
        sched.stop();
        assert!(!sched.is_running());
    }

    #[test]
    fn test_locked_schedule_never_spawns() {
        let state: SharedChainState = Arc::new(Mutex::new(ChainState::default()));
        let sched = AutomationScheduler::new(state.clone(), 120.0);
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let mut st = state.lock().unwrap();
            let h = hits.clone();
            let task = AutomationTask::new(
                0.0,
                1.0,
                0.0,
                Curve::Linear,
                Box::new(move |_, _| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
            );
            sched.schedule_locked(&mut st, "reverb.mix", task).unwrap();
        }
        assert!(!sched.is_running());
        assert_eq!(sched.pending(), 1);

        sched.start();
        assert!(sched.is_running());
        let deadline = Instant::now() + Duration::from_secs(2);
        while sched.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        sched.stop();
    }

    #[test]
    fn test_stop_refuses_new_tasks() {
        let state: SharedChainState = Arc::new(Mutex::new(ChainState::default()));
        let sched = AutomationScheduler::new(state, 60.0);
        sched
            .add_automation("a", 0.0, 1.0, 10.0, Curve::Linear, Box::new(|_, _| {}))
            .unwrap();
        sched.stop();
        assert_eq!(sched.pending(), 0);
        assert!(!sched.is_running());
        assert!(sched
            .add_automation("a", 0.0, 1.0, 10.0, Curve::Linear, Box::new(|_, _| {}))
            .is_err());
    }

    #[test]
    fn test_try_schedule_yields_when_contended() {
        let state: SharedChainState = Arc::new(Mutex::new(ChainState::default()));
        let sched = AutomationScheduler::new(Arc::clone(&state), 60.0);
        {
            let _guard = state.lock().unwrap();
            let task = AutomationTask::new(0.0, 1.0, 10.0, Curve::Linear, Box::new(|_, _| {}));
            assert!(!sched.try_schedule("a", task).unwrap());
        }
        let task = AutomationTask::new(0.0, 1.0, 10.0, Curve::Linear, Box::new(|_, _| {}));
        assert!(sched.try_schedule("a", task).unwrap());
        assert_eq!(sched.pending(), 1);
        sched.stop();
    }
}
