//! The launcher event bus.
//!
//! Components publish typed [`LauncherEvent`]s; the UI boundary subscribes
//! and receives its own `mpsc` stream. Subscribers that hang up are pruned
//! on the next publish, so a dropped receiver unsubscribes its owner.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Idle,
    Launching,
    Running,
    Stopping,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameErrorKind {
    Fatal,
    Warning,
}

/// Everything the UI can hear. Serialized with kebab-case tags so the
/// wire names match the command boundary's event table.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LauncherEvent {
    LaunchProgress {
        task: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        current: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
    LaunchDebug {
        line: String,
    },
    LaunchData {
        line: String,
    },
    LaunchError {
        error: String,
    },
    LaunchClose {
        code: Option<i32>,
    },
    GameStateChanged {
        state: GameState,
        pid: Option<u32>,
    },
    GameStarted {
        pid: u32,
        launch_duration_ms: u64,
    },
    GameClosed {
        code: Option<i32>,
    },
    GameError {
        kind: GameErrorKind,
        message: String,
    },
    GameCrashed {
        reason: String,
        exit_code: Option<i32>,
    },
    FrequentCrashes {
        instance: String,
        count: usize,
    },
    OperationUpdated {
        operation: Operation,
    },
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<LauncherEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver that will observe every event published from
    /// now on, in publish order.
    pub fn subscribe(&self) -> Receiver<LauncherEvent> {
        let (sender, receiver) = std::sync::mpsc::channel();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    pub fn publish(&self, event: LauncherEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }
}
