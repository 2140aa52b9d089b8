//! Worker side of the bridge.
//!
//! The worker thread owns the handler and a current-thread tokio runtime.
//! Each request is run to completion on that runtime, the outcome is encoded
//! as JSON and published into the shared channel.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::channel::SharedChannel;
use super::{BridgeError, WorkerError};

/// An async request handler living on the worker thread.
///
/// The handler is built on the worker thread and never leaves it, so it
/// need not be `Send`.
pub trait Handler {
    type Request: Send + 'static;
    type Response: Serialize + DeserializeOwned;

    fn handle(
        &mut self,
        request: Self::Request,
    ) -> impl Future<Output = Result<Self::Response, WorkerError>>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F, Req, Resp> {
    f: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

/// Wrap `f` as a handler.
pub fn handler_fn<F, Fut, Req, Resp>(f: F) -> FnHandler<F, Req, Resp>
where
    F: FnMut(Req) -> Fut,
    Fut: Future<Output = Result<Resp, WorkerError>>,
{
    FnHandler {
        f,
        _types: PhantomData,
    }
}

impl<F, Fut, Req, Resp> Handler for FnHandler<F, Req, Resp>
where
    F: FnMut(Req) -> Fut,
    Fut: Future<Output = Result<Resp, WorkerError>>,
    Req: Send + 'static,
    Resp: Serialize + DeserializeOwned,
{
    type Request = Req;
    type Response = Resp;

    fn handle(&mut self, request: Req) -> impl Future<Output = Result<Resp, WorkerError>> {
        (self.f)(request)
    }
}

/// A request tagged with its sequence number.
pub(crate) struct Envelope<Req> {
    pub seq: u64,
    pub request: Req,
}

/// Messages sent from the worker during startup.
pub(crate) enum Startup {
    Online,
    Ready,
    Failed(String),
}

/// Serve requests until the caller hangs up.
pub(crate) fn serve<H: Handler>(
    mut handler: H,
    runtime: tokio::runtime::Runtime,
    requests: mpsc::Receiver<Envelope<H::Request>>,
    channel: &SharedChannel,
) {
    while let Ok(Envelope { seq, request }) = requests.recv() {
        log::debug!("worker: handling request #{seq}");

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            runtime.block_on(handler.handle(request))
        }))
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            log::error!("worker: handler panicked on request #{seq}: {message}");
            Err(WorkerError::new("Panic", message))
        });

        let (payload, failed) = encode(outcome, channel.capacity());
        match channel.publish(seq, &payload, failed) {
            Ok(()) => {}
            Err(BridgeError::WorkerGone) => {
                log::debug!("worker: caller hung up, dropping response #{seq}");
                return;
            }
            Err(err) => {
                log::error!("worker: failed to publish response #{seq}: {err}");
                return;
            }
        }
    }

    log::debug!("worker: request queue closed");
}

/// Encode a handler outcome into a payload that fits `capacity`.
pub(crate) fn encode<T: Serialize>(
    outcome: Result<T, WorkerError>,
    capacity: usize,
) -> (Vec<u8>, bool) {
    let err = match outcome.map(|value| serde_json::to_vec(&value)) {
        Ok(Ok(bytes)) if bytes.len() <= capacity => return (bytes, false),
        Ok(Ok(bytes)) => WorkerError::new(
            "PayloadTooLarge",
            format!(
                "response of {} bytes exceeds channel capacity of {capacity}",
                bytes.len()
            ),
        ),
        Ok(Err(err)) => WorkerError::new("SerializeError", err.to_string()),
        Err(err) => err,
    };

    (encode_failure(err, capacity), true)
}

/// Serialize an error, shortening its message until it fits.
fn encode_failure(mut err: WorkerError, capacity: usize) -> Vec<u8> {
    loop {
        let bytes = serde_json::to_vec(&err).unwrap_or_default();
        if !bytes.is_empty() && bytes.len() <= capacity {
            return bytes;
        }
        if err.message.is_empty() {
            err.name = "Error".to_string();
            return serde_json::to_vec(&err).unwrap_or_else(|_| b"{}".to_vec());
        }
        let keep = err.message.chars().count() / 2;
        err.message = err.message.chars().take(keep).collect();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Build the runtime the handler runs on.
pub(crate) fn build_runtime() -> Result<tokio::runtime::Runtime, BridgeError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Startup(format!("failed to build runtime: {e}")))
}
