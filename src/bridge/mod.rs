//! Blocking calls into an async worker thread.
//!
//! Lets synchronous code (query predicates) call an asynchronous, stateful
//! computation (embedding inference) as if it were a plain function.
//!
//! # Architecture
//!
//! - `channel`: single-slot response region + atomic flag with wait/notify
//! - `worker`: worker-side endpoint that runs an async handler per request
//! - `caller`: caller-side bridge exposing a blocking `call`

mod caller;
pub mod channel;
mod worker;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use caller::{BridgeOptions, SyncBridge};
pub use channel::SharedChannel;
pub use worker::{handler_fn, FnHandler, Handler};

/// Default response capacity of a bridge channel (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// An error raised by the worker's handler, carried across the thread
/// boundary as JSON and re-raised on the caller side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct WorkerError {
    /// Kind of failure (e.g. "InitFailed", "Panic")
    pub name: String,
    pub message: String,
}

impl WorkerError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur while using a bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("worker failed to start: {0}")]
    Startup(String),

    #[error("worker did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error(transparent)]
    Handler(#[from] WorkerError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("worker exited")]
    WorkerGone,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("channel lock poisoned")]
    Poisoned,

    #[error("payload of {len} bytes exceeds channel capacity of {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("channel capacity {0} is out of range")]
    Capacity(usize),

    #[error("malformed response payload: {0}")]
    Decode(#[from] serde_json::Error),
}
