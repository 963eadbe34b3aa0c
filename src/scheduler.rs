//! 定时刷新调度（single-flight，可暂停/恢复）。
//!
//! 一个计时线程负责到点触发；每次刷新在独立的工作线程里执行。
//! 运行中再次触发（手动或定时）直接拒绝，不排队。
//! 倒计时始终由 `deadline - now` 计算，不做递减。

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::pipeline::{RunReport, RunStatus};

const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Running,
    Paused,
}

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Tick { remaining: Duration },
    RunStarted { manual: bool },
    RunFinished(RunReport),
    TriggerRejected { manual: bool },
    Paused,
    Resumed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub accepted: usize,
    pub rejected: usize,
    pub completed: usize,
}

pub type Job = Arc<dyn Fn() -> RunReport + Send + Sync>;
pub type EventSink = Arc<dyn Fn(SchedulerEvent) + Send + Sync>;

enum Command {
    Wake,
    Shutdown,
}

#[derive(Debug)]
struct ScheduleState {
    interval: Duration,
    paused: bool,
    deadline: Option<Instant>,
    state: SchedulerState,
}

struct Shared {
    job: Job,
    sink: EventSink,
    running: AtomicBool,
    schedule: Mutex<ScheduleState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    completed: AtomicUsize,
    wake: Sender<Command>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ScheduleState> {
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SchedulerEvent) {
        (self.sink)(event);
    }

    fn wake(&self) {
        let _ = self.wake.send(Command::Wake);
    }
}

pub struct RefreshScheduler {
    shared: Arc<Shared>,
    commands: Option<Receiver<Command>>,
    timer: Option<JoinHandle<()>>,
    tick: Duration,
}

impl RefreshScheduler {
    pub fn new(interval: Duration, job: Job) -> Self {
        let (tx, rx) = channel::unbounded();
        let shared = Arc::new(Shared {
            job,
            sink: Arc::new(|_| {}),
            running: AtomicBool::new(false),
            schedule: Mutex::new(ScheduleState {
                interval,
                paused: false,
                deadline: None,
                state: SchedulerState::Idle,
            }),
            worker: Mutex::new(None),
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            wake: tx,
        });
        Self {
            shared,
            commands: Some(rx),
            timer: None,
            tick: DEFAULT_TICK,
        }
    }

    /// 倒计时事件的刷新间隔。
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// 事件回调；必须在 `start` 之前设置。
    pub fn on_event<F>(mut self, sink: F) -> Self
    where
        F: Fn(SchedulerEvent) + Send + Sync + 'static,
    {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.sink = Arc::new(sink);
        }
        self
    }

    /// `Idle → Scheduled`（或以暂停状态启动）。重复调用无效。
    ///
    /// 启动前调用过 `pause()` 的话，同样以暂停状态启动。
    pub fn start(&mut self, paused: bool) {
        let Some(rx) = self.commands.take() else {
            return;
        };
        {
            let mut s = self.shared.lock();
            s.paused |= paused;
            if s.state != SchedulerState::Running {
                if s.paused {
                    s.state = SchedulerState::Paused;
                    s.deadline = None;
                } else {
                    s.state = SchedulerState::Scheduled;
                    s.deadline = Some(Instant::now() + s.interval);
                }
            }
        }

        let shared = Arc::clone(&self.shared);
        let tick = self.tick;
        match thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || timer_loop(shared, rx, tick))
        {
            Ok(h) => self.timer = Some(h),
            Err(e) => error!("无法启动调度线程: {}", e),
        }
    }

    /// 手动刷新。运行中返回 `false`（被拒绝，不排队）。
    pub fn trigger(&self) -> bool {
        try_start(&self.shared, true)
    }

    /// 暂停自动刷新，取消待触发的定时；不会中断正在进行的刷新。
    pub fn pause(&self) {
        {
            let mut s = self.shared.lock();
            if s.paused {
                return;
            }
            s.paused = true;
            s.deadline = None;
            if s.state != SchedulerState::Running {
                s.state = SchedulerState::Paused;
            }
        }
        info!("自动刷新已暂停");
        self.shared.wake();
        self.shared.emit(SchedulerEvent::Paused);
    }

    /// 恢复自动刷新，从完整的间隔重新计时。
    pub fn resume(&self) {
        {
            let mut s = self.shared.lock();
            if !s.paused {
                return;
            }
            s.paused = false;
            if s.state != SchedulerState::Running {
                s.state = SchedulerState::Scheduled;
                s.deadline = Some(Instant::now() + s.interval);
            }
        }
        info!("自动刷新已恢复");
        self.shared.wake();
        self.shared.emit(SchedulerEvent::Resumed);
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.lock().state
    }

    /// 距离下一次自动刷新的时间；暂停或运行中为 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        remaining_at(&self.shared.lock(), Instant::now())
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            accepted: self.shared.accepted.load(Ordering::SeqCst),
            rejected: self.shared.rejected.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
        }
    }

    /// 停止计时线程，并等待正在进行的刷新结束。
    pub fn shutdown(&mut self) {
        let _ = self.shared.wake.send(Command::Shutdown);
        if let Some(h) = self.timer.take() {
            let _ = h.join();
        }
        let worker = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(h) = worker {
            if !h.is_finished() {
                info!("等待当前刷新结束…");
            }
            let _ = h.join();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if self.timer.is_some() {
            self.shutdown();
        }
    }
}

fn remaining_at(s: &ScheduleState, now: Instant) -> Option<Duration> {
    s.deadline.map(|d| d.saturating_duration_since(now))
}

fn timer_loop(shared: Arc<Shared>, rx: Receiver<Command>, tick: Duration) {
    debug!("调度线程启动");
    loop {
        let now = Instant::now();
        let (due, wait) = {
            let s = shared.lock();
            match s.deadline {
                Some(d) if !s.paused && s.state == SchedulerState::Scheduled => {
                    let left = d.saturating_duration_since(now);
                    (left.is_zero(), left.min(tick))
                }
                _ => (false, tick),
            }
        };

        if due {
            try_start(&shared, false);
            continue;
        }

        match rx.recv_timeout(wait) {
            Ok(Command::Wake) => continue,
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let remaining = remaining_at(&shared.lock(), Instant::now());
                if let Some(remaining) = remaining {
                    shared.emit(SchedulerEvent::Tick { remaining });
                }
            }
        }
    }
    debug!("调度线程退出");
}

/// single-flight 入口：原子地占用运行标记，失败即拒绝。
///
/// 定时触发在锁内重新确认仍处于 `Scheduled`，到点判断之后的暂停会让它直接放弃。
fn try_start(shared: &Arc<Shared>, manual: bool) -> bool {
    {
        let mut s = shared.lock();
        if !manual && (s.paused || s.state != SchedulerState::Scheduled) {
            debug!("定时触发已失效（暂停或状态已变化），跳过");
            return false;
        }
        if shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            if !manual {
                // 定时到点但手动刷新仍在进行：等它结束后再重新计时
                s.deadline = None;
            }
            drop(s);
            shared.rejected.fetch_add(1, Ordering::SeqCst);
            warn!("刷新正在进行，忽略本次{}触发", if manual { "手动" } else { "定时" });
            shared.emit(SchedulerEvent::TriggerRejected { manual });
            return false;
        }
        s.state = SchedulerState::Running;
        s.deadline = None;
    }

    shared.accepted.fetch_add(1, Ordering::SeqCst);
    shared.emit(SchedulerEvent::RunStarted { manual });

    let worker_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name("refresh".to_string())
        .spawn(move || run_job(worker_shared));
    match spawned {
        Ok(h) => {
            let previous = shared
                .worker
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .replace(h);
            // 上一个工作线程已经清掉运行标记，这里只是回收句柄
            if let Some(prev) = previous {
                let _ = prev.join();
            }
            true
        }
        Err(e) => {
            error!("无法启动刷新线程: {}", e);
            finish_run(shared);
            false
        }
    }
}

fn run_job(shared: Arc<Shared>) {
    let started = Instant::now();
    let job = Arc::clone(&shared.job);
    let report = panic::catch_unwind(AssertUnwindSafe(|| job())).unwrap_or_else(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        error!("刷新任务 panic: {}", detail);
        RunReport {
            status: RunStatus::Aborted,
            total: 0,
            resolved: 0,
            published: false,
            artifact_path: None,
            error: Some(format!("panic: {detail}")),
            elapsed: started.elapsed(),
        }
    });

    shared.completed.fetch_add(1, Ordering::SeqCst);
    finish_run(&shared);
    shared.wake();
    shared.emit(SchedulerEvent::RunFinished(report));
}

/// `Running → Scheduled`（未暂停时），同时释放运行标记。
fn finish_run(shared: &Shared) {
    let mut s = shared.lock();
    shared.running.store(false, Ordering::SeqCst);
    if s.paused {
        s.state = SchedulerState::Paused;
        s.deadline = None;
    } else {
        s.state = SchedulerState::Scheduled;
        s.deadline = Some(Instant::now() + s.interval);
    }
}
