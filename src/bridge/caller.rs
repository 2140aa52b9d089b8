//! Caller side of the bridge: a blocking `call` backed by a worker thread.

use std::marker::PhantomData;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::channel::{CloseOnDrop, SharedChannel};
use super::worker::{self, Envelope, Handler, Startup};
use super::{BridgeError, WorkerError, DEFAULT_BUFFER_SIZE};

/// Tuning knobs for a bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Response payload capacity in bytes
    pub buffer_size: usize,
    /// How long to wait for the worker handshake (None = forever)
    pub startup_timeout: Option<Duration>,
    /// How long a single call may block (None = forever)
    pub call_timeout: Option<Duration>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            startup_timeout: Some(Duration::from_secs(30)),
            call_timeout: None,
        }
    }
}

/// Bookkeeping guarded by the call mutex.
struct CallState {
    next_seq: u64,
    /// Calls that timed out whose responses may still arrive
    abandoned: u64,
}

/// Blocking request/response bridge to a dedicated worker thread.
///
/// Requests are delivered by message passing; responses come back through
/// a [`SharedChannel`]. Calls are serialized, so the single response slot
/// is never shared by two requests.
pub struct SyncBridge<Req, Resp> {
    name: String,
    requests: Option<mpsc::Sender<Envelope<Req>>>,
    channel: Arc<SharedChannel>,
    state: Mutex<CallState>,
    call_timeout: Option<Duration>,
    worker: Option<JoinHandle<()>>,
    _response: PhantomData<fn() -> Resp>,
}

impl<Req, Resp> SyncBridge<Req, Resp>
where
    Req: Send + 'static,
    Resp: DeserializeOwned,
{
    /// Start a worker thread and wait until it reports ready.
    ///
    /// `factory` runs on the worker thread and builds the handler there.
    /// Blocks until the worker is online and its handler constructed.
    pub fn spawn<H, F>(name: &str, options: BridgeOptions, factory: F) -> Result<Self, BridgeError>
    where
        H: Handler<Request = Req, Response = Resp> + 'static,
        F: FnOnce() -> anyhow::Result<H> + Send + 'static,
    {
        let channel = SharedChannel::allocate(options.buffer_size)?;
        let (request_tx, request_rx) = mpsc::channel::<Envelope<Req>>();
        let (startup_tx, startup_rx) = mpsc::channel::<Startup>();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn({
                let channel = channel.clone();
                move || {
                    let _close = CloseOnDrop(channel.clone());
                    let _ = startup_tx.send(Startup::Online);

                    let runtime = match worker::build_runtime() {
                        Ok(runtime) => runtime,
                        Err(err) => {
                            let _ = startup_tx.send(Startup::Failed(err.to_string()));
                            return;
                        }
                    };

                    let handler = match factory() {
                        Ok(handler) => handler,
                        Err(err) => {
                            let _ = startup_tx.send(Startup::Failed(format!("{err:#}")));
                            return;
                        }
                    };

                    let _ = startup_tx.send(Startup::Ready);
                    drop(startup_tx);

                    worker::serve(handler, runtime, request_rx, &channel);
                }
            })
            .map_err(|e| BridgeError::Startup(format!("failed to spawn worker thread: {e}")))?;

        Self::await_ready(name, &startup_rx, options.startup_timeout)?;
        log::info!("bridge '{name}' ready");

        Ok(Self {
            name: name.to_string(),
            requests: Some(request_tx),
            channel,
            state: Mutex::new(CallState {
                next_seq: 0,
                abandoned: 0,
            }),
            call_timeout: options.call_timeout,
            worker: Some(worker),
            _response: PhantomData,
        })
    }

    /// Send `request` to the worker and block until it answers.
    ///
    /// A failure raised by the handler comes back as
    /// [`BridgeError::Handler`] with the worker's name and message.
    pub fn call(&self, request: Req) -> Result<Resp, BridgeError> {
        let mut state = self.state.lock().map_err(|_| BridgeError::Poisoned)?;

        if self.channel.is_closed() {
            return Err(BridgeError::WorkerGone);
        }
        if state.abandoned == 0 && self.channel.flag() != 0 {
            return Err(BridgeError::Protocol(format!(
                "bridge '{}': response slot is occupied before request was sent",
                self.name
            )));
        }

        state.next_seq += 1;
        let seq = state.next_seq;

        self.requests
            .as_ref()
            .ok_or(BridgeError::WorkerGone)?
            .send(Envelope { seq, request })
            .map_err(|_| BridgeError::WorkerGone)?;

        let taken = loop {
            let taken = match self.channel.take(self.call_timeout) {
                Ok(taken) => taken,
                Err(err @ BridgeError::Timeout(_)) => {
                    log::warn!("bridge '{}': request #{seq} timed out", self.name);
                    state.abandoned += 1;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            if taken.seq == seq {
                break taken;
            }

            if taken.seq < seq && state.abandoned > 0 {
                log::debug!(
                    "bridge '{}': discarding late response #{} while waiting for #{seq}",
                    self.name,
                    taken.seq
                );
                state.abandoned -= 1;
                continue;
            }

            return Err(BridgeError::Protocol(format!(
                "bridge '{}': expected response #{seq}, got #{}",
                self.name, taken.seq
            )));
        };

        if taken.failed {
            let err: WorkerError = serde_json::from_slice(&taken.payload)?;
            return Err(BridgeError::Handler(err));
        }

        Ok(serde_json::from_slice(&taken.payload)?)
    }

    /// Name given to the worker thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the online signal followed by the ready message.
    fn await_ready(
        name: &str,
        startup: &mpsc::Receiver<Startup>,
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError> {
        let mut online = false;

        loop {
            let message = match timeout {
                Some(timeout) => startup.recv_timeout(timeout).map_err(|e| match e {
                    mpsc::RecvTimeoutError::Timeout => BridgeError::StartupTimeout(timeout),
                    mpsc::RecvTimeoutError::Disconnected => {
                        BridgeError::Startup("worker exited before it was ready".to_string())
                    }
                })?,
                None => startup.recv().map_err(|_| {
                    BridgeError::Startup("worker exited before it was ready".to_string())
                })?,
            };

            match message {
                Startup::Online => {
                    log::debug!("bridge '{name}': worker online");
                    online = true;
                }
                Startup::Ready if online => return Ok(()),
                Startup::Ready => {
                    return Err(BridgeError::Startup(
                        "worker reported ready before online".to_string(),
                    ))
                }
                Startup::Failed(message) => {
                    log::error!("bridge '{name}': worker failed to start: {message}");
                    return Err(BridgeError::Startup(message));
                }
            }
        }
    }
}

impl<Req, Resp> Drop for SyncBridge<Req, Resp> {
    fn drop(&mut self) {
        // Hanging up the request queue ends the worker loop. Closing the
        // channel releases a worker stuck publishing an abandoned response.
        drop(self.requests.take());
        self.channel.close();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("bridge '{}': worker thread panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::handler_fn;

    fn options() -> BridgeOptions {
        BridgeOptions {
            buffer_size: 4096,
            startup_timeout: Some(Duration::from_secs(5)),
            call_timeout: Some(Duration::from_secs(5)),
        }
    }

    fn doubler() -> SyncBridge<u32, u32> {
        SyncBridge::spawn("doubler", options(), || {
            Ok(handler_fn(|x: u32| async move { Ok::<_, WorkerError>(x * 2) }))
        })
        .unwrap()
    }

    #[test]
    fn test_call_round_trip() {
        let bridge = doubler();
        assert_eq!(bridge.call(21).unwrap(), 42);
        assert_eq!(bridge.name(), "doubler");
    }

    #[test]
    fn test_sequential_calls_do_not_mix() {
        let bridge = doubler();
        for i in 0..50 {
            assert_eq!(bridge.call(i).unwrap(), i * 2);
        }
    }

    #[test]
    fn test_factory_error_fails_startup() {
        let missing = true;
        let result: Result<SyncBridge<u32, u32>, _> =
            SyncBridge::spawn("broken", options(), move || {
                let handler = handler_fn(|x: u32| async move { Ok::<_, WorkerError>(x) });
                if missing {
                    anyhow::bail!("model directory missing");
                }
                Ok(handler)
            });

        match result {
            Err(BridgeError::Startup(msg)) => assert!(msg.contains("model directory missing")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("startup should fail"),
        }
    }

    #[test]
    fn test_factory_panic_fails_startup() {
        let explode = true;
        let result: Result<SyncBridge<u32, u32>, _> =
            SyncBridge::spawn("panicky", options(), move || {
                let handler = handler_fn(|x: u32| async move { Ok::<_, WorkerError>(x) });
                if explode {
                    panic!("boom");
                }
                Ok(handler)
            });

        assert!(matches!(result, Err(BridgeError::Startup(_))));
    }

    #[test]
    fn test_startup_timeout() {
        let opts = BridgeOptions {
            startup_timeout: Some(Duration::from_millis(50)),
            ..options()
        };
        let result: Result<SyncBridge<u32, u32>, _> = SyncBridge::spawn("slow-start", opts, || {
            thread::sleep(Duration::from_millis(500));
            Ok(handler_fn(|x: u32| async move { Ok::<_, WorkerError>(x) }))
        });

        assert!(matches!(result, Err(BridgeError::StartupTimeout(_))));
    }

    #[test]
    fn test_handler_error_is_reraised() {
        let bridge: SyncBridge<u32, u32> = SyncBridge::spawn("failing", options(), || {
            Ok(handler_fn(|_: u32| async move {
                Err::<u32, _>(WorkerError::new("HandlerFailure", "model unavailable"))
            }))
        })
        .unwrap();

        for i in 0..3 {
            match bridge.call(i) {
                Err(BridgeError::Handler(err)) => {
                    assert_eq!(err.name, "HandlerFailure");
                    assert_eq!(err.message, "model unavailable");
                }
                other => panic!("expected handler failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_handler_panic_becomes_error_and_worker_survives() {
        let bridge: SyncBridge<u32, u32> = SyncBridge::spawn("fragile", options(), || {
            Ok(handler_fn(|x: u32| async move {
                if x == 0 {
                    panic!("division by zero");
                }
                Ok::<_, WorkerError>(100 / x)
            }))
        })
        .unwrap();

        match bridge.call(0) {
            Err(BridgeError::Handler(err)) => {
                assert_eq!(err.name, "Panic");
                assert!(err.message.contains("division by zero"));
            }
            other => panic!("expected panic error, got {other:?}"),
        }
        assert_eq!(bridge.call(4).unwrap(), 25);
    }

    #[test]
    fn test_timeout_then_late_response_is_discarded() {
        let opts = BridgeOptions {
            call_timeout: Some(Duration::from_millis(200)),
            ..options()
        };
        let bridge: SyncBridge<u64, u64> = SyncBridge::spawn("sleepy", opts, || {
            Ok(handler_fn(|ms: u64| async move {
                thread::sleep(Duration::from_millis(ms));
                Ok::<_, WorkerError>(ms)
            }))
        })
        .unwrap();

        assert!(matches!(bridge.call(300), Err(BridgeError::Timeout(_))));
        // The late answer to the first call must not be mistaken for this one.
        assert_eq!(bridge.call(1).unwrap(), 1);
        assert_eq!(bridge.call(2).unwrap(), 2);
    }

    #[test]
    fn test_drop_after_repeated_timeouts_joins_worker() {
        let opts = BridgeOptions {
            call_timeout: Some(Duration::from_millis(50)),
            ..options()
        };
        let bridge: SyncBridge<u64, u64> = SyncBridge::spawn("abandoned", opts, || {
            Ok(handler_fn(|ms: u64| async move {
                thread::sleep(Duration::from_millis(ms));
                Ok::<_, WorkerError>(ms)
            }))
        })
        .unwrap();

        assert!(matches!(bridge.call(300), Err(BridgeError::Timeout(_))));
        assert!(matches!(bridge.call(300), Err(BridgeError::Timeout(_))));

        // Both late responses are left undrained; dropping must still finish.
        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            drop(bridge);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
    }

    #[test]
    fn test_occupied_slot_is_protocol_violation() {
        let bridge = doubler();
        bridge.channel.publish(99, b"7", false).unwrap();

        assert!(matches!(bridge.call(1), Err(BridgeError::Protocol(_))));
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let bridge = Arc::new(doubler());
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let bridge = bridge.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        let x = t * 1000 + i;
                        assert_eq!(bridge.call(x).unwrap(), x * 2);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
