//! Bridge scenarios that span the caller, channel and worker.

use std::thread;
use std::time::{Duration, Instant};

use crate::bridge::{handler_fn, BridgeError, BridgeOptions, SyncBridge, WorkerError};

fn options() -> BridgeOptions {
    BridgeOptions {
        buffer_size: 4096,
        startup_timeout: Some(Duration::from_secs(5)),
        call_timeout: Some(Duration::from_secs(5)),
    }
}

#[test]
fn test_call_latency_is_bounded_by_handler_latency() {
    let latency = Duration::from_millis(20);
    let bridge: SyncBridge<u32, u32> = SyncBridge::spawn("fixed-latency", options(), move || {
        Ok(handler_fn(move |x: u32| async move {
            thread::sleep(latency);
            Ok::<_, WorkerError>(x + 1)
        }))
    })
    .unwrap();

    for i in 0..10 {
        let started = Instant::now();
        assert_eq!(bridge.call(i).unwrap(), i + 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= latency, "call returned before the handler finished");
        assert!(elapsed < latency + Duration::from_millis(500), "call took {elapsed:?}");
    }
}

#[test]
fn test_always_failing_handler_fails_every_call() {
    let bridge: SyncBridge<String, Vec<f32>> = SyncBridge::spawn("unavailable", options(), || {
        Ok(handler_fn(|_: String| async move {
            Err::<Vec<f32>, _>(WorkerError::new("HandlerFailure", "model unavailable"))
        }))
    })
    .unwrap();

    for text in ["spa", "dinner", "tour"] {
        match bridge.call(text.to_string()) {
            Err(BridgeError::Handler(err)) => assert_eq!(err.message, "model unavailable"),
            other => panic!("expected handler failure, got {other:?}"),
        }
    }
}

#[test]
fn test_oversized_response_is_reported_and_bridge_recovers() {
    let opts = BridgeOptions {
        buffer_size: 256,
        ..options()
    };
    let bridge: SyncBridge<usize, Vec<f32>> = SyncBridge::spawn("small-buffer", opts, || {
        Ok(handler_fn(|n: usize| async move { Ok::<_, WorkerError>(vec![0.25f32; n]) }))
    })
    .unwrap();

    match bridge.call(1000) {
        Err(BridgeError::Handler(err)) => assert_eq!(err.name, "PayloadTooLarge"),
        other => panic!("expected payload error, got {other:?}"),
    }
    assert_eq!(bridge.call(2).unwrap(), vec![0.25, 0.25]);
}

#[test]
fn test_tiny_buffer_is_rejected() {
    let opts = BridgeOptions {
        buffer_size: 16,
        ..options()
    };
    let result: Result<SyncBridge<u32, u32>, _> = SyncBridge::spawn("tiny", opts, || {
        Ok(handler_fn(|x: u32| async move { Ok::<_, WorkerError>(x) }))
    });
    assert!(matches!(result, Err(BridgeError::Capacity(16))));
}

#[test]
fn test_stateful_handler_keeps_state_between_calls() {
    let bridge: SyncBridge<u32, u32> = SyncBridge::spawn("accumulator", options(), || {
        let mut total = 0;
        Ok(handler_fn(move |x: u32| {
            total += x;
            let snapshot = total;
            async move { Ok::<_, WorkerError>(snapshot) }
        }))
    })
    .unwrap();

    assert_eq!(bridge.call(1).unwrap(), 1);
    assert_eq!(bridge.call(2).unwrap(), 3);
    assert_eq!(bridge.call(3).unwrap(), 6);
}
