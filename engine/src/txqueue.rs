//! The bounded transmit queue and its draining sender thread.
//!
//! One FIFO queue over a `crossbeam_channel` bounded channel: reliable
//! producers block for space, unreliable producers drop on a full queue
//! rather than stalling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::core::Frame;
use crate::events::{emit, Event, EventSender};
use crate::link::LinkEndpoint;

/// Producing half of the transmit queue, cloned into every subsystem that
/// originates outbound frames (the engine's send_* methods, the ACK
/// manager, the router's synthesized ACKs, the presence ticker, file
/// senders).
#[derive(Clone)]
pub struct TxQueue {
    tx: Sender<Frame>,
    drain_deadline: Arc<Mutex<Option<Instant>>>,
}

impl TxQueue {
    /// Builds a fresh bounded queue, returning the producer handle and the
    /// consuming half the sender thread drains.
    pub fn new(capacity: usize) -> (Self, Receiver<Frame>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (
            Self {
                tx,
                drain_deadline: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// Enqueues a reliable frame, blocking the caller until space exists.
    pub fn enqueue_reliable(&self, frame: Frame) {
        if self.tx.send(frame).is_err() {
            log::warn!("transmit queue closed, dropping reliable frame");
        }
    }

    /// Enqueues an unreliable frame; if the queue is full it is dropped
    /// with a warning rather than blocking the producer. `events` is
    /// accepted for symmetry with the router's call sites even though a
    /// full queue is a local condition that does not itself reach the
    /// application event sink.
    pub fn enqueue_unreliable(&self, frame: Frame, _events: &EventSender) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("transmit queue full, dropping unreliable frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("transmit queue closed, dropping unreliable frame");
            }
        }
    }

    /// True once every enqueued frame has been picked up by the sender.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Bounds how long the sender thread keeps draining already-enqueued
    /// frames once shutdown begins (`shutdown_drain_ms`).
    pub fn set_drain_deadline(&self, deadline: Instant) {
        *self.drain_deadline.lock().expect("drain deadline lock poisoned") = Some(deadline);
    }

    fn drain_deadline_passed(&self) -> bool {
        match *self.drain_deadline.lock().expect("drain deadline lock poisoned") {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// Runs on the dedicated sender thread: pops frames in FIFO order, encodes
/// and obfuscates them, and writes them to the link endpoint. Keeps
/// draining past a shutdown request until the queue is empty or the drain
/// deadline passes, so a just-enqueued BROADCAST_OFFLINE has a chance to
/// reach the wire before the endpoint goes away.
pub fn run_sender(
    endpoint: Arc<dyn LinkEndpoint>,
    rx: Receiver<Frame>,
    queue: TxQueue,
    obfuscation_key: Vec<u8>,
    events: EventSender,
    stop: Arc<AtomicBool>,
) {
    const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;
    let mut consecutive_failures = 0u32;

    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => {
                let encoded = match frame.encode(&obfuscation_key) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        log::warn!("dropping frame that failed to encode: {err}");
                        continue;
                    }
                };
                match endpoint.send(&encoded) {
                    Ok(()) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures += 1;
                        log::warn!(
                            "link endpoint write failed ({consecutive_failures}/{MAX_CONSECUTIVE_WRITE_FAILURES}): {err}"
                        );
                        if consecutive_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                            emit(&events, Event::LinkFailure { reason: err.to_string() });
                            stop.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Acquire) && (rx.is_empty() || queue.drain_deadline_passed()) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
