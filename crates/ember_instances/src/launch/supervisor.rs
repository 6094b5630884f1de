//! The process supervisor: one launch at a time, watched from spawn to
//! exit.
//!
//! All state transitions go through a single mutex that is never held
//! across an await point. Monitor tasks (output readers, the waiter, the
//! heartbeat, the fallback timer) carry the launch epoch they were
//! started for and become inert when a newer launch supersedes them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::process::Command;

use ember_core::event::{EventBus, GameErrorKind, GameState, LauncherEvent};
use ember_core::{err, info, pt};

use super::read_log::{self, LaunchSteps};
use super::LaunchError;
use crate::instance::Instance;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_MISS_LIMIT: u32 = 3;
/// If the process is alive but no fully-started pattern matched in this
/// long, assume the log format drifted and call it running anyway.
const LAUNCH_FALLBACK_RUNNING: Duration = Duration::from_secs(90);
const CRASH_AUTO_RESET: Duration = Duration::from_secs(5);
/// Exits this soon after spawn are reported as spawn failures with the
/// captured stderr tail.
const EARLY_CRASH_WINDOW: Duration = Duration::from_secs(10);
const CRASH_LOOP_WINDOW: Duration = Duration::from_secs(300);
const CRASH_LOOP_COUNT: usize = 3;
const REAPER_INTERVAL: Duration = Duration::from_secs(60);
const STDERR_TAIL_LINES: usize = 50;

const STOP_GRACE_WAIT: Duration = Duration::from_secs(1);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_POLL_TOTAL: Duration = Duration::from_secs(3);
const STOP_FORCE_WAIT: Duration = Duration::from_secs(1);

struct SupervisorState {
    game_state: GameState,
    /// Incremented by every `begin_launch`; stale monitor tasks compare
    /// against it and stand down.
    epoch: u64,
    pid: Option<u32>,
    instance_id: Option<String>,
    launch_steps: LaunchSteps,
    launch_started: Option<Instant>,
    running_since: Option<Instant>,
    stderr_tail: VecDeque<String>,
}

impl SupervisorState {
    fn clear_process(&mut self) {
        self.pid = None;
        self.instance_id = None;
        self.launch_started = None;
        self.running_since = None;
        self.stderr_tail.clear();
    }
}

/// Snapshot returned by the `get-game-state` command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub state: GameState,
    pub is_running: bool,
    pub pid: Option<u32>,
    pub uptime_seconds: Option<u64>,
    pub launch_steps: LaunchSteps,
    pub instance_id: Option<String>,
}

pub struct Supervisor {
    state: Mutex<SupervisorState>,
    bus: Arc<EventBus>,
    /// PIDs we have spawned and not yet seen die.
    tracked: Mutex<HashSet<u32>>,
    crash_history: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SupervisorState {
                game_state: GameState::Idle,
                epoch: 0,
                pid: None,
                instance_id: None,
                launch_steps: LaunchSteps::default(),
                launch_started: None,
                running_since: None,
                stderr_tail: VecDeque::new(),
            }),
            bus,
            tracked: Mutex::new(HashSet::new()),
            crash_history: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn status(&self) -> GameStatus {
        let state = self.state.lock().unwrap();
        GameStatus {
            state: state.game_state,
            is_running: state.game_state == GameState::Running,
            pid: state.pid,
            uptime_seconds: state.running_since.map(|since| since.elapsed().as_secs()),
            launch_steps: state.launch_steps,
            instance_id: state.instance_id.clone(),
        }
    }

    fn publish_state(&self, state: GameState, pid: Option<u32>) {
        self.bus
            .publish(LauncherEvent::GameStateChanged { state, pid });
    }

    /// Claims the launch slot. Fails unless the supervisor is IDLE;
    /// exactly one launch is in flight per process.
    pub fn begin_launch(&self, instance_id: Option<String>) -> Result<u64, LaunchError> {
        let epoch = {
            let mut state = self.state.lock().unwrap();
            if state.game_state != GameState::Idle {
                return Err(LaunchError::LaunchInProgress);
            }
            state.game_state = GameState::Launching;
            state.epoch += 1;
            state.clear_process();
            state.launch_steps = LaunchSteps::default();
            state.instance_id = instance_id;
            state.launch_started = Some(Instant::now());
            state.epoch
        };
        self.publish_state(GameState::Launching, None);
        Ok(epoch)
    }

    /// Aborts a launch that failed before a process existed (downloads,
    /// Java resolution, argument composition).
    pub fn fail_launch(&self, epoch: u64, error: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch || state.game_state != GameState::Launching {
                return;
            }
            state.game_state = GameState::Idle;
            state.clear_process();
        }
        self.bus.publish(LauncherEvent::LaunchError {
            error: error.to_owned(),
        });
        self.publish_state(GameState::Idle, None);
    }

    /// Spawns the game and wires up every monitor task. Returns the PID.
    pub async fn spawn_game(
        self: &Arc<Self>,
        epoch: u64,
        java: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> Result<u32, LaunchError> {
        tokio::fs::create_dir_all(working_dir)
            .await
            .map_err(|error| LaunchError::SpawnFailed(error.to_string()))?;

        info!("Spawning game process");
        let mut child = match Command::new(java)
            .args(args)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(error) => {
                self.crash(epoch, &format!("couldn't spawn the game: {error}"), None);
                return Err(LaunchError::SpawnFailed(error.to_string()));
            }
        };
        let Some(pid) = child.id() else {
            self.crash(epoch, "spawned process had no PID", None);
            return Err(LaunchError::SpawnFailed("process exited instantly".to_owned()));
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                // A stale pipeline won the spawn race; put the child down.
                _ = child.start_kill();
                return Err(LaunchError::LaunchInProgress);
            }
            state.pid = Some(pid);
        }
        self.tracked.lock().unwrap().insert(pid);
        self.publish_state(GameState::Launching, Some(pid));
        pt!("Game process spawned with PID {pid}");

        if let Some(stdout) = child.stdout.take() {
            let supervisor = self.clone();
            tokio::spawn(async move {
                read_log::pump_lines(stdout, |line| supervisor.handle_stdout_line(epoch, line))
                    .await;
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let supervisor = self.clone();
            tokio::spawn(async move {
                read_log::pump_lines(stderr, |line| supervisor.handle_stderr_line(epoch, line))
                    .await;
            });
        }

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.heartbeat(epoch, pid).await });

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.fallback_to_running(epoch).await });

        let supervisor = self.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let code = status.ok().and_then(|status| status.code());
            supervisor.finalize_exit(epoch, pid, code).await;
        });

        Ok(pid)
    }

    fn handle_stdout_line(self: &Arc<Self>, epoch: u64, line: String) {
        self.bus
            .publish(LauncherEvent::LaunchData { line: line.clone() });
        self.inspect_line(epoch, &line);
    }

    fn handle_stderr_line(self: &Arc<Self>, epoch: u64, line: String) {
        self.bus
            .publish(LauncherEvent::LaunchDebug { line: line.clone() });
        {
            let mut state = self.state.lock().unwrap();
            if state.epoch == epoch {
                if state.stderr_tail.len() >= STDERR_TAIL_LINES {
                    state.stderr_tail.pop_front();
                }
                state.stderr_tail.push_back(line.clone());
            }
        }
        self.inspect_line(epoch, &line);
    }

    /// Startup-step and fatal-pattern matching, shared by both streams.
    fn inspect_line(self: &Arc<Self>, epoch: u64, line: &str) {
        if read_log::is_fatal_line(line) {
            self.bus.publish(LauncherEvent::GameError {
                kind: GameErrorKind::Fatal,
                message: line.to_owned(),
            });
            let still_launching = {
                let state = self.state.lock().unwrap();
                state.epoch == epoch && state.game_state == GameState::Launching
            };
            if still_launching {
                self.crash(epoch, line, None);
            }
            return;
        }

        let Some(step) = read_log::detect_step(line) else {
            return;
        };
        let started = {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                return;
            }
            let transitioned = state.launch_steps.record(step);
            if transitioned && state.game_state == GameState::Launching {
                state.game_state = GameState::Running;
                state.running_since = Some(Instant::now());
                let duration = state
                    .launch_started
                    .map_or(0, |started| started.elapsed().as_millis() as u64);
                state.pid.map(|pid| (pid, duration))
            } else {
                None
            }
        };
        if let Some((pid, launch_duration_ms)) = started {
            info!("Game fully started in {launch_duration_ms}ms");
            self.bus.publish(LauncherEvent::GameStarted {
                pid,
                launch_duration_ms,
            });
            self.publish_state(GameState::Running, Some(pid));
        }
    }

    /// Heartbeat: probe the PID every 5 seconds while the game is meant
    /// to be alive. Three consecutive misses is a crash.
    async fn heartbeat(self: Arc<Self>, epoch: u64, pid: u32) {
        let mut system = System::new();
        let mut misses = 0u32;
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            {
                let state = self.state.lock().unwrap();
                if state.epoch != epoch
                    || !matches!(
                        state.game_state,
                        GameState::Launching | GameState::Running
                    )
                {
                    return;
                }
            }
            let target = Pid::from_u32(pid);
            system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
            if system.process(target).is_some() {
                misses = 0;
            } else {
                misses += 1;
                if misses >= HEARTBEAT_MISS_LIMIT {
                    err!("Game PID {pid} missed {misses} liveness probes");
                    self.crash(epoch, "process stopped responding to liveness probes", None);
                    return;
                }
            }
        }
    }

    /// The pattern table can drift with new game versions. If the process
    /// is alive 90 seconds into LAUNCHING with no match, transition to
    /// RUNNING anyway, leaving `fully_started` false as the tell.
    async fn fallback_to_running(self: Arc<Self>, epoch: u64) {
        tokio::time::sleep(LAUNCH_FALLBACK_RUNNING).await;
        let started = {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch || state.game_state != GameState::Launching {
                return;
            }
            state.game_state = GameState::Running;
            state.running_since = Some(Instant::now());
            state.pid
        };
        if let Some(pid) = started {
            err!("No startup pattern matched in {LAUNCH_FALLBACK_RUNNING:?}, assuming running");
            self.bus.publish(LauncherEvent::GameStarted {
                pid,
                launch_duration_ms: LAUNCH_FALLBACK_RUNNING.as_millis() as u64,
            });
            self.publish_state(GameState::Running, Some(pid));
        }
    }

    /// Bookkeeping when the child exits, however it exited.
    async fn finalize_exit(self: &Arc<Self>, epoch: u64, pid: u32, code: Option<i32>) {
        self.tracked.lock().unwrap().remove(&pid);

        enum Outcome {
            Closed { minutes: i64 },
            CrashedWhileLaunching { early: bool },
            AlreadyHandled,
        }

        let (outcome, instance_id) = {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                return;
            }
            let instance_id = state.instance_id.clone();
            match state.game_state {
                GameState::Running | GameState::Stopping => {
                    let minutes = state
                        .running_since
                        .map_or(0, |since| (since.elapsed().as_secs() / 60) as i64);
                    state.game_state = GameState::Idle;
                    state.clear_process();
                    (Outcome::Closed { minutes }, instance_id)
                }
                GameState::Launching => {
                    let early = state
                        .launch_started
                        .is_some_and(|started| started.elapsed() < EARLY_CRASH_WINDOW);
                    (Outcome::CrashedWhileLaunching { early }, instance_id)
                }
                GameState::Crashed | GameState::Idle => (Outcome::AlreadyHandled, instance_id),
            }
        };

        match outcome {
            Outcome::Closed { minutes } => {
                info!("Game closed (code {code:?})");
                self.bus.publish(LauncherEvent::GameClosed { code });
                self.bus.publish(LauncherEvent::LaunchClose { code });
                self.publish_state(GameState::Idle, None);
                if let Some(id) = instance_id {
                    if let Err(error) = Instance::add_playtime(&id, minutes).await {
                        err!("Couldn't record playtime for {id}: {error}");
                    }
                }
            }
            Outcome::CrashedWhileLaunching { early } => {
                let tail = {
                    let state = self.state.lock().unwrap();
                    state
                        .stderr_tail
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                let reason = if early {
                    format!("the game exited right after spawn:\n{tail}")
                } else {
                    format!("the game exited before starting up:\n{tail}")
                };
                self.crash(epoch, &reason, code);
            }
            Outcome::AlreadyHandled => {}
        }
    }

    /// Transition to CRASHED, emit events, track crash frequency, and
    /// schedule the auto-reset back to IDLE.
    fn crash(self: &Arc<Self>, epoch: u64, reason: &str, exit_code: Option<i32>) {
        let instance_id = {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch || state.game_state == GameState::Idle {
                return;
            }
            if state.game_state == GameState::Crashed {
                return;
            }
            state.game_state = GameState::Crashed;
            state.instance_id.clone()
        };

        err!("Game crashed: {reason}");
        self.bus.publish(LauncherEvent::GameCrashed {
            reason: reason.to_owned(),
            exit_code,
        });
        self.publish_state(GameState::Crashed, None);

        if let Some(id) = instance_id {
            let count = {
                let mut history = self.crash_history.lock().unwrap();
                let crashes = history.entry(id.clone()).or_default();
                let now = Instant::now();
                crashes.retain(|at| now.duration_since(*at) < CRASH_LOOP_WINDOW);
                crashes.push(now);
                crashes.len()
            };
            if count >= CRASH_LOOP_COUNT {
                err!("Instance {id} crashed {count} times in 5 minutes");
                self.bus
                    .publish(LauncherEvent::FrequentCrashes { instance: id, count });
            }
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CRASH_AUTO_RESET).await;
            let reset = {
                let mut state = supervisor.state.lock().unwrap();
                if state.epoch == epoch && state.game_state == GameState::Crashed {
                    state.game_state = GameState::Idle;
                    state.clear_process();
                    true
                } else {
                    false
                }
            };
            if reset {
                supervisor.publish_state(GameState::Idle, None);
            }
        });
    }

    /// Graceful-then-forceful shutdown of the whole process tree.
    pub async fn stop(self: &Arc<Self>) -> Result<(), LaunchError> {
        let pid = {
            let mut state = self.state.lock().unwrap();
            match (state.game_state, state.pid) {
                (GameState::Running | GameState::Launching, Some(pid)) => {
                    state.game_state = GameState::Stopping;
                    pid
                }
                _ => return Err(LaunchError::NotRunning),
            }
        };
        self.publish_state(GameState::Stopping, Some(pid));
        info!("Stopping game process tree rooted at {pid}");

        let root_gone = tokio::task::spawn_blocking(move || stop_tree_blocking(pid))
            .await
            .unwrap_or(false);

        if root_gone {
            // The waiter observes the exit and finishes the bookkeeping.
            Ok(())
        } else {
            err!("Game PID {pid} survived the forceful kill");
            let mut state = self.state.lock().unwrap();
            if state.game_state == GameState::Stopping {
                state.game_state = GameState::Running;
            }
            Err(LaunchError::StopFailed)
        }
    }

    /// Periodic sweep removing dead PIDs from the tracked set. Does
    /// nothing at all while the set is empty.
    pub async fn run_reaper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(REAPER_INTERVAL);
        loop {
            interval.tick().await;
            let pids: Vec<u32> = self.tracked.lock().unwrap().iter().copied().collect();
            if pids.is_empty() {
                continue;
            }
            let alive = tokio::task::spawn_blocking(move || {
                let mut system = System::new();
                system.refresh_processes(ProcessesToUpdate::All, true);
                pids.into_iter()
                    .filter(|pid| system.process(Pid::from_u32(*pid)).is_some())
                    .collect::<HashSet<u32>>()
            })
            .await
            .unwrap_or_default();
            self.tracked.lock().unwrap().retain(|pid| alive.contains(pid));
        }
    }
}

/// Every process whose parent chain leads to `root`.
fn collect_tree(system: &System, root: u32) -> Vec<Pid> {
    let root = Pid::from_u32(root);
    let mut tree = vec![root];
    loop {
        let mut grew = false;
        for (pid, process) in system.processes() {
            if tree.contains(pid) {
                continue;
            }
            if let Some(parent) = process.parent() {
                if tree.contains(&parent) {
                    tree.push(*pid);
                    grew = true;
                }
            }
        }
        if !grew {
            break;
        }
    }
    tree
}

/// The stop protocol: terminate the tree, verify, escalate to a kill,
/// verify again. Returns whether the root PID is gone.
fn stop_tree_blocking(root: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let tree = collect_tree(&system, root);

    // Graceful pass: SIGTERM where supported, plain kill elsewhere.
    for pid in &tree {
        if let Some(process) = system.process(*pid) {
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
        }
    }
    std::thread::sleep(STOP_GRACE_WAIT);

    let deadline = Instant::now() + STOP_POLL_TOTAL;
    let mut any_alive = true;
    while Instant::now() < deadline {
        system.refresh_processes(ProcessesToUpdate::All, true);
        any_alive = tree.iter().any(|pid| system.process(*pid).is_some());
        if !any_alive {
            break;
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }

    if any_alive {
        system.refresh_processes(ProcessesToUpdate::All, true);
        for pid in &tree {
            if let Some(process) = system.process(*pid) {
                process.kill();
            }
        }
        std::thread::sleep(STOP_FORCE_WAIT);
        system.refresh_processes(ProcessesToUpdate::All, true);
        if system.process(Pid::from_u32(root)).is_some() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> Arc<Supervisor> {
        Supervisor::new(Arc::new(EventBus::new()))
    }

    #[test]
    fn only_one_launch_at_a_time() {
        let supervisor = supervisor();
        let epoch = supervisor.begin_launch(None).unwrap();
        assert!(matches!(
            supervisor.begin_launch(None),
            Err(LaunchError::LaunchInProgress)
        ));

        supervisor.fail_launch(epoch, "no network");
        // Back to IDLE: a new launch may begin.
        let second = supervisor.begin_launch(None).unwrap();
        assert!(second > epoch);
    }

    #[test]
    fn status_reflects_launch_lifecycle() {
        let supervisor = supervisor();
        let status = supervisor.status();
        assert_eq!(status.state, GameState::Idle);
        assert!(!status.is_running);
        assert_eq!(status.pid, None);

        let epoch = supervisor.begin_launch(Some("pack".to_owned())).unwrap();
        let status = supervisor.status();
        assert_eq!(status.state, GameState::Launching);
        assert_eq!(status.instance_id.as_deref(), Some("pack"));
        assert!(!status.launch_steps.fully_started);

        supervisor.fail_launch(epoch, "boom");
        assert_eq!(supervisor.status().state, GameState::Idle);
    }

    #[tokio::test]
    async fn stop_without_a_game_errors() {
        let supervisor = supervisor();
        let result = supervisor.stop().await;
        assert!(matches!(result, Err(LaunchError::NotRunning)));
    }

    #[tokio::test]
    async fn fatal_output_during_launch_crashes_and_resets() {
        let bus = Arc::new(EventBus::new());
        let receiver = bus.subscribe();
        let supervisor = Supervisor::new(bus);

        let epoch = supervisor.begin_launch(Some("pack".to_owned())).unwrap();
        {
            let mut state = supervisor.state.lock().unwrap();
            state.pid = Some(12345);
        }
        supervisor.handle_stdout_line(epoch, "java.lang.OutOfMemoryError: heap".to_owned());

        assert_eq!(supervisor.status().state, GameState::Crashed);
        let events: Vec<_> = receiver.try_iter().collect();
        assert!(events
            .iter()
            .any(|event| matches!(event, LauncherEvent::GameCrashed { .. })));
        assert!(events
            .iter()
            .any(|event| matches!(
                event,
                LauncherEvent::GameError { kind: GameErrorKind::Fatal, .. }
            )));
    }

    #[tokio::test]
    async fn three_crashes_in_window_emit_frequent_crashes() {
        let bus = Arc::new(EventBus::new());
        let receiver = bus.subscribe();
        let supervisor = Supervisor::new(bus);

        for _ in 0..3 {
            let epoch = supervisor.begin_launch(Some("cursed".to_owned())).unwrap();
            supervisor.crash(epoch, "exploded", Some(1));
            // Manually reset instead of waiting out the auto-reset timer.
            let mut state = supervisor.state.lock().unwrap();
            state.game_state = GameState::Idle;
        }

        let frequent: Vec<_> = receiver
            .try_iter()
            .filter(|event| matches!(event, LauncherEvent::FrequentCrashes { .. }))
            .collect();
        assert_eq!(frequent.len(), 1);
        if let LauncherEvent::FrequentCrashes { instance, count } = &frequent[0] {
            assert_eq!(instance, "cursed");
            assert_eq!(*count, 3);
        }
    }

    #[tokio::test]
    async fn step_detection_transitions_to_running() {
        let supervisor = supervisor();
        let epoch = supervisor.begin_launch(None).unwrap();
        {
            let mut state = supervisor.state.lock().unwrap();
            state.pid = Some(999);
        }

        supervisor.handle_stdout_line(epoch, "[main/INFO]: Setting user: Dev".to_owned());
        assert_eq!(supervisor.status().state, GameState::Launching);
        assert!(supervisor.status().launch_steps.user_set);

        supervisor.handle_stdout_line(
            epoch,
            "[Render thread/INFO]: Sound engine started".to_owned(),
        );
        let status = supervisor.status();
        assert_eq!(status.state, GameState::Running);
        assert!(status.is_running);
        assert!(status.launch_steps.fully_started);
    }

    #[tokio::test]
    async fn stale_epoch_lines_are_ignored() {
        let supervisor = supervisor();
        let old_epoch = supervisor.begin_launch(None).unwrap();
        supervisor.fail_launch(old_epoch, "first attempt failed");
        let _new_epoch = supervisor.begin_launch(None).unwrap();

        supervisor.handle_stdout_line(old_epoch, "Sound engine started".to_owned());
        // The stale line must not advance the new launch.
        assert_eq!(supervisor.status().state, GameState::Launching);
        assert!(!supervisor.status().launch_steps.fully_started);
    }
}
