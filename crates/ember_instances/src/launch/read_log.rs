//! Reading the child's output and recognizing what it means.
//!
//! Startup progress and fatal conditions are both detected by
//! case-sensitive substring matching on raw log lines. The pattern tables
//! are declared constants so log-format drift is a one-line fix; the
//! supervisor additionally falls back to heartbeat evidence when no
//! pattern ever matches.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// The observable milestones between spawn and a playable game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStep {
    UserSet,
    LwjglLoaded,
    ResourcesLoaded,
    FullyStarted,
}

const STEP_USER_SET: &str = "Setting user:";
const STEP_LWJGL_LOADED: &str = "Backend library: LWJGL";
const STEP_RESOURCES_LOADED: &str = "Reloading ResourceManager";
/// Any one of these means the game is interactive.
const STEP_FULLY_STARTED: &[&str] = &[
    "OpenAL initialized",
    "Sound engine started",
    "Created: 1024x1024",
];

/// Output that indicates the JVM or the game is going down.
const FATAL_PATTERNS: &[&str] = &[
    "FATAL",
    "Crash Report",
    "java.lang.OutOfMemoryError",
    "Could not create the Java Virtual Machine",
    "Error: Invalid or corrupt jarfile",
];

#[must_use]
pub fn detect_step(line: &str) -> Option<LaunchStep> {
    if line.contains(STEP_USER_SET) {
        Some(LaunchStep::UserSet)
    } else if line.contains(STEP_LWJGL_LOADED) {
        Some(LaunchStep::LwjglLoaded)
    } else if line.contains(STEP_RESOURCES_LOADED) {
        Some(LaunchStep::ResourcesLoaded)
    } else if STEP_FULLY_STARTED
        .iter()
        .any(|pattern| line.contains(pattern))
    {
        Some(LaunchStep::FullyStarted)
    } else {
        None
    }
}

#[must_use]
pub fn is_fatal_line(line: &str) -> bool {
    FATAL_PATTERNS.iter().any(|pattern| line.contains(pattern))
}

/// Which launch steps have been observed so far.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSteps {
    pub user_set: bool,
    pub lwjgl_loaded: bool,
    pub resources_loaded: bool,
    pub fully_started: bool,
}

impl LaunchSteps {
    /// Records a step. Returns true when this call is the transition
    /// into the fully-started state.
    pub fn record(&mut self, step: LaunchStep) -> bool {
        match step {
            LaunchStep::UserSet => self.user_set = true,
            LaunchStep::LwjglLoaded => self.lwjgl_loaded = true,
            LaunchStep::ResourcesLoaded => self.resources_loaded = true,
            LaunchStep::FullyStarted => {
                let first = !self.fully_started;
                self.fully_started = true;
                return first;
            }
        }
        false
    }
}

/// Forwards every line of `stream` to `on_line` until EOF.
pub async fn pump_lines<R>(stream: R, mut on_line: impl FnMut(String))
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        on_line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_each_step() {
        assert_eq!(
            detect_step("[main/INFO]: Setting user: Player123"),
            Some(LaunchStep::UserSet)
        );
        assert_eq!(
            detect_step("[Render thread/INFO]: Backend library: LWJGL version 3.3.2"),
            Some(LaunchStep::LwjglLoaded)
        );
        assert_eq!(
            detect_step("[Worker-Main-7/INFO]: Reloading ResourceManager: Default"),
            Some(LaunchStep::ResourcesLoaded)
        );
        assert_eq!(
            detect_step("[Render thread/INFO]: OpenAL initialized on device"),
            Some(LaunchStep::FullyStarted)
        );
        assert_eq!(
            detect_step("[Render thread/INFO]: Sound engine started"),
            Some(LaunchStep::FullyStarted)
        );
        assert_eq!(
            detect_step("[Render thread/INFO]: Created: 1024x1024x4 minecraft:textures/atlas"),
            Some(LaunchStep::FullyStarted)
        );
        assert_eq!(detect_step("[main/INFO]: Loaded 7 recipes"), None);
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(detect_step("setting user: nope"), None);
        assert!(!is_fatal_line("fatal lowercase is not a crash"));
    }

    #[test]
    fn recognizes_fatal_output() {
        assert!(is_fatal_line("[main/FATAL]: Unreported exception"));
        assert!(is_fatal_line("---- Minecraft Crash Report ----"));
        assert!(is_fatal_line("java.lang.OutOfMemoryError: Java heap space"));
        assert!(is_fatal_line("Error occurred during initialization of VM\nCould not create the Java Virtual Machine"));
        assert!(is_fatal_line("Error: Invalid or corrupt jarfile client.jar"));
        assert!(!is_fatal_line("[main/INFO]: everything is fine"));
    }

    #[test]
    fn steps_record_transition_once() {
        let mut steps = LaunchSteps::default();
        assert!(!steps.record(LaunchStep::UserSet));
        assert!(!steps.record(LaunchStep::LwjglLoaded));
        assert!(steps.record(LaunchStep::FullyStarted));
        // Only the first fully-started observation is a transition.
        assert!(!steps.record(LaunchStep::FullyStarted));
        assert!(steps.user_set && steps.lwjgl_loaded && steps.fully_started);
        assert!(!steps.resources_loaded);
    }
}
