use serde::{Deserialize, Serialize};

/// Coarse progress of a multi-step job, sent over an `mpsc` channel to
/// whoever asked for it. `done`/`total` count steps, not bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericProgress {
    pub done: usize,
    pub total: usize,
    pub message: Option<String>,
    pub has_finished: bool,
}

impl Default for GenericProgress {
    fn default() -> Self {
        Self {
            done: 0,
            total: 0,
            message: None,
            has_finished: false,
        }
    }
}

impl GenericProgress {
    #[must_use]
    pub fn finished() -> Self {
        Self {
            done: 1,
            total: 1,
            message: None,
            has_finished: true,
        }
    }
}

/// Byte-level progress of a single file download.
#[derive(Debug, Clone, Copy)]
pub struct ByteProgress {
    pub bytes: u64,
    pub total: Option<u64>,
}
