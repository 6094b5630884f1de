//! Tracked long-running operations.
//!
//! Every install, download sweep or loader setup registers an [`Operation`]
//! here. The single producer updates it through an [`OperationHandle`]; the
//! UI observes it through `OperationUpdated` events and snapshots. A sweeper
//! task flags operations that stop updating and eventually fails them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventBus, LauncherEvent};
use crate::err;

pub type OperationId = u64;

/// No update for this long: warn. Twice this long: fail with a timeout.
const STALE_AFTER: Duration = Duration::from_secs(30);
const TIMEOUT_AFTER: Duration = Duration::from_secs(60);
/// How long terminal operations linger in the registry before removal.
const LINGER_COMPLETED: Duration = Duration::from_secs(3);
const LINGER_FAILED: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    VersionInstall,
    AssetCheck,
    JavaInstall,
    LoaderInstall,
    ModpackInstall,
    ModpackUpdate,
    Download,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStage {
    pub name: String,
    pub state: OperationState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub state: OperationState,
    /// Percentage in `[0, 100]`, derived from `current`/`total`.
    pub progress: f32,
    pub current: usize,
    pub total: usize,
    pub message: Option<String>,
    pub stages: Vec<OperationStage>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

struct OperationSlot {
    operation: Operation,
    cancelled: Arc<AtomicBool>,
    /// Set when the operation turned terminal; drives linger removal.
    finished: Option<DateTime<Utc>>,
    stale_warned: bool,
}

pub struct Operations {
    slots: Mutex<HashMap<OperationId, OperationSlot>>,
    next_id: AtomicU64,
    bus: Arc<EventBus>,
}

impl Operations {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            bus,
        })
    }

    pub fn begin(self: &Arc<Self>, kind: OperationKind) -> OperationHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let cancelled = Arc::new(AtomicBool::new(false));
        let operation = Operation {
            id,
            kind,
            state: OperationState::Active,
            progress: 0.0,
            current: 0,
            total: 0,
            message: None,
            stages: Vec::new(),
            start_time: now,
            last_update: now,
        };
        self.bus.publish(LauncherEvent::OperationUpdated {
            operation: operation.clone(),
        });
        self.slots.lock().unwrap().insert(
            id,
            OperationSlot {
                operation,
                cancelled: cancelled.clone(),
                finished: None,
                stale_warned: false,
            },
        );
        OperationHandle {
            id,
            registry: self.clone(),
            cancelled,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Operation> {
        self.slots
            .lock()
            .unwrap()
            .values()
            .map(|slot| slot.operation.clone())
            .collect()
    }

    /// Requests cooperative cancellation. Returns false for unknown or
    /// already-terminal operations.
    pub fn cancel(&self, id: OperationId) -> bool {
        let mut slots = self.slots.lock().unwrap();
        let Some(slot) = slots.get_mut(&id) else {
            return false;
        };
        if slot.operation.state.is_terminal() {
            return false;
        }
        slot.cancelled.store(true, Ordering::Relaxed);
        true
    }

    fn mutate(&self, id: OperationId, mutate: impl FnOnce(&mut OperationSlot)) {
        let updated = {
            let mut slots = self.slots.lock().unwrap();
            let Some(slot) = slots.get_mut(&id) else {
                return;
            };
            mutate(slot);
            slot.operation.last_update = Utc::now();
            if slot.operation.state.is_terminal() && slot.finished.is_none() {
                slot.finished = Some(Utc::now());
            }
            slot.operation.clone()
        };
        self.bus.publish(LauncherEvent::OperationUpdated {
            operation: updated,
        });
    }

    /// One pass of the stale detector. Returns how many operations were
    /// removed; exposed separately from [`Self::run_sweeper`] for tests.
    pub fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let mut timed_out = Vec::new();
        let mut removed = 0;
        {
            let mut slots = self.slots.lock().unwrap();
            slots.retain(|_, slot| {
                if let Some(finished) = slot.finished {
                    let linger = if slot.operation.state == OperationState::Completed {
                        LINGER_COMPLETED
                    } else {
                        LINGER_FAILED
                    };
                    if age(now, finished) > linger {
                        removed += 1;
                        return false;
                    }
                    return true;
                }
                let idle = age(now, slot.operation.last_update);
                if idle > TIMEOUT_AFTER {
                    timed_out.push(slot.operation.id);
                } else if idle > STALE_AFTER && !slot.stale_warned {
                    slot.stale_warned = true;
                    err!(
                        "Operation {} ({:?}) has had no update for {}s",
                        slot.operation.id,
                        slot.operation.kind,
                        idle.as_secs()
                    );
                }
                true
            });
        }
        for id in timed_out {
            self.mutate(id, |slot| {
                slot.operation.state = OperationState::Failed;
                slot.operation.message = Some("Timeout: operation stopped making progress".to_owned());
            });
        }
        removed
    }

    /// Runs the stale detector forever. Spawn once at startup.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(3));
        loop {
            interval.tick().await;
            self.sweep_once();
        }
    }
}

fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// Single-producer handle to one registered operation.
pub struct OperationHandle {
    id: OperationId,
    registry: Arc<Operations>,
    cancelled: Arc<AtomicBool>,
}

impl OperationHandle {
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn update(&self, current: usize, total: usize, message: Option<String>) {
        self.registry.mutate(self.id, |slot| {
            slot.operation.current = current;
            slot.operation.total = total;
            slot.operation.progress = if total == 0 {
                0.0
            } else {
                (current as f32 / total as f32 * 100.0).clamp(0.0, 100.0)
            };
            if message.is_some() {
                slot.operation.message = message;
            }
        });
    }

    /// Marks the previous stage completed and opens a new active one.
    pub fn stage(&self, name: &str) {
        let name = name.to_owned();
        self.registry.mutate(self.id, |slot| {
            if let Some(last) = slot.operation.stages.last_mut() {
                if !last.state.is_terminal() {
                    last.state = OperationState::Completed;
                }
            }
            slot.operation.stages.push(OperationStage {
                name,
                state: OperationState::Active,
            });
        });
    }

    pub fn complete(&self) {
        self.registry.mutate(self.id, |slot| {
            for stage in &mut slot.operation.stages {
                if !stage.state.is_terminal() {
                    stage.state = OperationState::Completed;
                }
            }
            slot.operation.state = OperationState::Completed;
            slot.operation.progress = 100.0;
        });
    }

    pub fn fail(&self, message: &str) {
        let message = message.to_owned();
        self.registry.mutate(self.id, |slot| {
            if let Some(last) = slot.operation.stages.last_mut() {
                if !last.state.is_terminal() {
                    last.state = OperationState::Failed;
                }
            }
            slot.operation.state = OperationState::Failed;
            slot.operation.message = Some(message);
        });
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.registry.mutate(self.id, |slot| {
            slot.operation.state = OperationState::Cancelled;
        });
    }
}
