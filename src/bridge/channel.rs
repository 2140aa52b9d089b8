//! Single-slot response channel shared between a caller and its worker.
//!
//! The channel is a fixed byte region plus one signed synchronization word:
//! - `0`: idle, ready for the next request
//! - `+N`: a success payload of N bytes is waiting
//! - `-N`: a failure payload of N bytes is waiting
//!
//! The worker publishes a response and wakes the caller; the caller takes it
//! and resets the word to `0`, which re-arms the slot. Waiting is done on a
//! condition variable, never by polling.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::BridgeError;

/// Bytes reserved in front of every payload for the sequence number.
pub const HEADER_LEN: usize = 8;

/// Smallest payload capacity accepted by [`SharedChannel::allocate`].
/// Failure payloads are truncated to fit, so this must leave room for one.
pub const MIN_CAPACITY: usize = 256;

/// A response taken out of the slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Taken {
    /// Sequence number of the request this response answers
    pub seq: u64,
    /// True when the worker reported a failure
    pub failed: bool,
    pub payload: Vec<u8>,
}

pub struct SharedChannel {
    flag: AtomicI32,
    closed: AtomicBool,
    /// Header + payload bytes. The mutex doubles as the condvar lock.
    region: Mutex<Box<[u8]>>,
    signal: Condvar,
    capacity: usize,
}

impl SharedChannel {
    /// Allocate a channel able to carry `capacity` payload bytes.
    pub fn allocate(capacity: usize) -> Result<Arc<Self>, BridgeError> {
        if capacity < MIN_CAPACITY || capacity > i32::MAX as usize {
            return Err(BridgeError::Capacity(capacity));
        }

        Ok(Arc::new(Self {
            flag: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            region: Mutex::new(vec![0u8; HEADER_LEN + capacity].into_boxed_slice()),
            signal: Condvar::new(),
            capacity,
        }))
    }

    /// Maximum payload size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current value of the synchronization word.
    pub fn flag(&self) -> i32 {
        self.flag.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the channel dead and wake everyone blocked on it.
    pub fn close(&self) {
        let _guard = self.region.lock();
        self.closed.store(true, Ordering::Release);
        self.signal.notify_all();
    }

    /// Worker side: write a response and signal it.
    ///
    /// Blocks while a previous response is still waiting to be taken.
    pub fn publish(&self, seq: u64, payload: &[u8], failed: bool) -> Result<(), BridgeError> {
        if payload.is_empty() {
            return Err(BridgeError::Protocol("empty response payload".to_string()));
        }
        if payload.len() > self.capacity {
            return Err(BridgeError::PayloadTooLarge {
                len: payload.len(),
                capacity: self.capacity,
            });
        }

        let mut region = self.lock()?;
        while self.flag.load(Ordering::Acquire) != 0 {
            if self.closed.load(Ordering::Acquire) {
                return Err(BridgeError::WorkerGone);
            }
            region = self.signal.wait(region).map_err(|_| BridgeError::Poisoned)?;
        }

        region[..HEADER_LEN].copy_from_slice(&seq.to_le_bytes());
        region[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);

        let len = payload.len() as i32;
        self.flag
            .store(if failed { -len } else { len }, Ordering::Release);
        drop(region);
        self.signal.notify_all();

        Ok(())
    }

    /// Caller side: block until a response is published, copy it out and
    /// reset the slot to idle.
    ///
    /// With `timeout` set, gives up with [`BridgeError::Timeout`] once the
    /// deadline passes. Payloads are never empty (the worker writes JSON),
    /// so a nonzero word always means a response is waiting.
    pub fn take(&self, timeout: Option<Duration>) -> Result<Taken, BridgeError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut region = self.lock()?;

        loop {
            let flag = self.flag.load(Ordering::Acquire);
            if flag != 0 {
                let len = flag.unsigned_abs() as usize;
                let mut seq = [0u8; HEADER_LEN];
                seq.copy_from_slice(&region[..HEADER_LEN]);
                let taken = Taken {
                    seq: u64::from_le_bytes(seq),
                    failed: flag < 0,
                    payload: region[HEADER_LEN..HEADER_LEN + len].to_vec(),
                };

                self.flag.store(0, Ordering::Release);
                drop(region);
                self.signal.notify_all();
                return Ok(taken);
            }

            if self.closed.load(Ordering::Acquire) {
                return Err(BridgeError::WorkerGone);
            }

            region = match deadline {
                None => self.signal.wait(region).map_err(|_| BridgeError::Poisoned)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BridgeError::Timeout(timeout.unwrap_or_default()));
                    }
                    self.signal
                        .wait_timeout(region, deadline - now)
                        .map_err(|_| BridgeError::Poisoned)?
                        .0
                }
            };
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<[u8]>>, BridgeError> {
        self.region.lock().map_err(|_| BridgeError::Poisoned)
    }
}

/// Closes the channel when dropped. Held by the worker thread so that any
/// exit, including a panic, releases a blocked caller.
pub struct CloseOnDrop(pub Arc<SharedChannel>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_allocate_rejects_tiny_capacity() {
        assert!(matches!(
            SharedChannel::allocate(16),
            Err(BridgeError::Capacity(16))
        ));
        assert!(SharedChannel::allocate(MIN_CAPACITY).is_ok());
    }

    #[test]
    fn test_flag_starts_idle() {
        let channel = SharedChannel::allocate(1024).unwrap();
        assert_eq!(channel.flag(), 0);
        assert!(!channel.is_closed());
        assert_eq!(channel.capacity(), 1024);
    }

    #[test]
    fn test_publish_sets_signed_length() {
        let channel = SharedChannel::allocate(1024).unwrap();
        channel.publish(1, b"hello", false).unwrap();
        assert_eq!(channel.flag(), 5);

        let taken = channel.take(None).unwrap();
        assert_eq!(channel.flag(), 0);
        assert_eq!(taken.payload, b"hello");

        channel.publish(2, b"oops!!", true).unwrap();
        assert_eq!(channel.flag(), -6);
        let taken = channel.take(None).unwrap();
        assert!(taken.failed);
        assert_eq!(taken.seq, 2);
    }

    #[test]
    fn test_take_blocks_until_published() {
        let channel = SharedChannel::allocate(1024).unwrap();
        let worker = {
            let channel = channel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                channel.publish(7, b"[1.0]", false).unwrap();
            })
        };

        let taken = channel.take(None).unwrap();
        assert_eq!(taken.seq, 7);
        assert!(!taken.failed);
        assert_eq!(taken.payload, b"[1.0]");
        worker.join().unwrap();
    }

    #[test]
    fn test_publish_waits_for_slot_to_drain() {
        let channel = SharedChannel::allocate(1024).unwrap();
        channel.publish(1, b"first", false).unwrap();

        let worker = {
            let channel = channel.clone();
            thread::spawn(move || channel.publish(2, b"second", false))
        };

        thread::sleep(Duration::from_millis(30));
        let first = channel.take(None).unwrap();
        assert_eq!(first.payload, b"first");

        worker.join().unwrap().unwrap();
        let second = channel.take(None).unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.payload, b"second");
    }

    #[test]
    fn test_take_times_out() {
        let channel = SharedChannel::allocate(1024).unwrap();
        let result = channel.take(Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert_eq!(channel.flag(), 0);
    }

    #[test]
    fn test_close_wakes_waiter() {
        let channel = SharedChannel::allocate(1024).unwrap();
        let closer = {
            let channel = channel.clone();
            thread::spawn(move || {
                let _guard = CloseOnDrop(channel);
                thread::sleep(Duration::from_millis(20));
            })
        };

        assert!(matches!(channel.take(None), Err(BridgeError::WorkerGone)));
        closer.join().unwrap();
        assert!(channel.is_closed());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let channel = SharedChannel::allocate(MIN_CAPACITY).unwrap();
        let payload = vec![b'x'; MIN_CAPACITY + 1];
        assert!(matches!(
            channel.publish(1, &payload, false),
            Err(BridgeError::PayloadTooLarge { .. })
        ));
        assert_eq!(channel.flag(), 0);
    }
}
