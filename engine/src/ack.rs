//! ACK manager: tracking and retransmission of outbound reliable frames.
//!
//! A `Mutex<HashMap<(MacAddr, u32), _>>` keyed table since the set of live
//! peers is unbounded. `tick` collects expired entries in one pass and acts
//! on them in a second so the table lock is never held across a
//! transmit-queue send.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use crate::core::Frame;
use crate::events::{emit, Event, EventSender};
use crate::txqueue::TxQueue;

struct PendingRecord {
    frame: Frame,
    send_time: Instant,
    attempts: u32,
}

/// Owns the table of outbound reliable records and drives their
/// retransmission on a periodic tick.
pub struct AckManager {
    table: Mutex<HashMap<(MacAddr, u32), PendingRecord>>,
    max_attempts: u32,
    retransmit_interval: Duration,
}

impl AckManager {
    pub fn new(max_attempts: u32, retransmit_interval: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            max_attempts,
            retransmit_interval,
        }
    }

    /// Registers a just-sent reliable frame for tracking. Must be called
    /// before the frame is handed to the transmit queue.
    pub fn register(&self, frame: Frame) {
        let key = (frame.dest, frame.sequence);
        let mut table = self.table.lock().expect("ack table poisoned");
        table.insert(
            key,
            PendingRecord {
                frame,
                send_time: Instant::now(),
                attempts: 1,
            },
        );
    }

    /// Retires the outbound record for `(peer, sequence)`, if any. Returns
    /// whether a record was actually removed (a late or duplicate ACK for
    /// an already-retired record is a no-op).
    pub fn acknowledge(&self, peer: MacAddr, sequence: u32) -> bool {
        let mut table = self.table.lock().expect("ack table poisoned");
        table.remove(&(peer, sequence)).is_some()
    }

    /// Treats a NACK as an immediate retransmit hint: if the named frame is
    /// still pending, resend it right away and reset its retransmit clock.
    pub fn trigger_immediate_retransmit(&self, peer: MacAddr, sequence: u32, txqueue: &TxQueue) {
        let frame = {
            let mut table = self.table.lock().expect("ack table poisoned");
            table.get_mut(&(peer, sequence)).map(|rec| {
                rec.send_time = Instant::now();
                rec.attempts += 1;
                rec.frame.clone()
            })
        };
        if let Some(frame) = frame {
            txqueue.enqueue_reliable(frame);
        }
    }

    /// Scans the table for records past the retransmit interval: resends
    /// those under `max_attempts`, and drops + raises `delivery_failed` for
    /// those that have exhausted it. Collects both sets before touching the
    /// transmit queue or the event sink so the table lock is never held
    /// across either.
    pub fn tick(&self, txqueue: &TxQueue, events: &EventSender) {
        let now = Instant::now();
        let mut to_retransmit = Vec::new();
        let mut to_fail = Vec::new();

        {
            let mut table = self.table.lock().expect("ack table poisoned");
            for (key, rec) in table.iter_mut() {
                if now.saturating_duration_since(rec.send_time) < self.retransmit_interval {
                    continue;
                }
                if rec.attempts >= self.max_attempts {
                    to_fail.push((*key, rec.frame.kind));
                } else {
                    rec.send_time = now;
                    rec.attempts += 1;
                    to_retransmit.push(rec.frame.clone());
                }
            }
            for (key, _) in &to_fail {
                table.remove(key);
            }
        }

        for frame in to_retransmit {
            txqueue.enqueue_reliable(frame);
        }
        for ((peer, sequence), kind) in to_fail {
            emit(events, Event::DeliveryFailed { kind, peer, sequence });
        }
    }

    /// Number of outbound frames still awaiting an ACK.
    pub fn pending_count(&self) -> usize {
        self.table.lock().expect("ack table poisoned").len()
    }
}
