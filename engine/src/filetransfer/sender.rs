//! Outbound file fragmentation and stop-and-wait delivery.
//!
//! Splits a blob into fixed-size chunks and, in reliable mode, keeps a
//! configurable number of fragments outstanding at once over one
//! MAC-addressed peer, advancing the window as per-fragment FILE_ACKs
//! (delivered through `FileAckRegistry`) retire entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use pnet::util::MacAddr;

use crate::config::Config;
use crate::core::Frame;
use crate::events::{emit, Event, EventSender};
use crate::txqueue::TxQueue;

/// Routes inbound FILE_ACK frames to the file-sender thread driving the
/// matching outbound transfer. The router looks transfers up by id and
/// notifies them; it has no other way to reach a specific sender thread.
#[derive(Clone, Default)]
pub struct FileAckRegistry {
    inner: Arc<Mutex<HashMap<u32, Sender<u32>>>>,
}

impl FileAckRegistry {
    /// Registers a new outbound transfer, returning the receiving half the
    /// sender thread polls for acked fragment indices.
    pub fn register(&self, transfer_id: u32) -> Receiver<u32> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner
            .lock()
            .expect("file ack registry poisoned")
            .insert(transfer_id, tx);
        rx
    }

    /// Removes a transfer once it finishes (successfully or not).
    pub fn unregister(&self, transfer_id: u32) {
        self.inner.lock().expect("file ack registry poisoned").remove(&transfer_id);
    }

    /// Delivers one FILE_ACK to whichever thread is driving `transfer_id`,
    /// if it is still active.
    pub fn notify(&self, transfer_id: u32, fragment_index: u32) {
        let inner = self.inner.lock().expect("file ack registry poisoned");
        if let Some(tx) = inner.get(&transfer_id) {
            let _ = tx.send(fragment_index);
        }
    }
}

/// Everything one outbound file-send thread needs, gathered so
/// `Engine::send_file` can hand it off in a single move.
pub struct FileSendContext {
    pub dest: MacAddr,
    pub local_mac: MacAddr,
    pub bytes: Vec<u8>,
    pub reliable: bool,
    pub transfer_id: u32,
    pub config: Config,
    pub txqueue: TxQueue,
    pub seq_counter: Arc<AtomicU32>,
    pub ack_rx: Receiver<u32>,
    pub events: EventSender,
    pub stop: Arc<AtomicBool>,
}

/// Splits `bytes` into fixed-size FILE frames (at least one, even for an
/// empty blob, so a zero-byte transfer still has a last fragment).
fn build_fragments(ctx: &FileSendContext) -> Vec<Frame> {
    let mtu = ctx.config.payload_mtu.max(1);
    let mut chunks: Vec<&[u8]> = ctx.bytes.chunks(mtu).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let total = chunks.len() as u32;

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let sequence = ctx.seq_counter.fetch_add(1, Ordering::Relaxed);
            Frame::new_file(
                ctx.dest,
                ctx.local_mac,
                sequence,
                ctx.reliable,
                ctx.transfer_id,
                index as u32,
                total,
                chunk.to_vec(),
            )
        })
        .collect()
}

/// Drives one outbound file transfer to completion, failure, or shutdown.
/// Runs on its own thread; returns once the transfer is done one way or
/// another.
pub fn run(ctx: FileSendContext) {
    let frames = build_fragments(&ctx);

    if !ctx.reliable {
        run_unreliable(&ctx, frames);
        return;
    }
    run_reliable(&ctx, frames);
}

fn run_unreliable(ctx: &FileSendContext, frames: Vec<Frame>) {
    for frame in frames {
        if ctx.stop.load(Ordering::Acquire) {
            emit(
                &ctx.events,
                Event::TransferFailed { peer: ctx.dest, transfer_id: ctx.transfer_id },
            );
            return;
        }
        ctx.txqueue.enqueue_unreliable(frame, &ctx.events);
    }
    emit(&ctx.events, Event::TransferSent { transfer_id: ctx.transfer_id, dest: ctx.dest });
}

struct InFlight {
    frame: Frame,
    sent_at: Instant,
    attempts: u32,
}

fn run_reliable(ctx: &FileSendContext, frames: Vec<Frame>) {
    let retransmit_interval = Duration::from_millis(ctx.config.retransmit_interval_ms);
    let ack_tick = Duration::from_millis(ctx.config.ack_tick_ms.max(1));
    let window = ctx.config.send_window.max(1);

    let mut next_to_send = 0usize;
    let mut outstanding: HashMap<u32, InFlight> = HashMap::new();

    loop {
        if ctx.stop.load(Ordering::Acquire) {
            emit(
                &ctx.events,
                Event::TransferFailed { peer: ctx.dest, transfer_id: ctx.transfer_id },
            );
            return;
        }

        while outstanding.len() < window && next_to_send < frames.len() {
            let frame = frames[next_to_send].clone();
            let index = next_to_send as u32;
            ctx.txqueue.enqueue_reliable(frame.clone());
            outstanding.insert(index, InFlight { frame, sent_at: Instant::now(), attempts: 1 });
            next_to_send += 1;
        }

        if outstanding.is_empty() && next_to_send == frames.len() {
            emit(&ctx.events, Event::TransferSent { transfer_id: ctx.transfer_id, dest: ctx.dest });
            return;
        }

        match ctx.ack_rx.recv_timeout(ack_tick) {
            Ok(fragment_index) => {
                outstanding.remove(&fragment_index);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                emit(
                    &ctx.events,
                    Event::TransferFailed { peer: ctx.dest, transfer_id: ctx.transfer_id },
                );
                return;
            }
        }

        let now = Instant::now();
        let mut failed = false;
        for in_flight in outstanding.values_mut() {
            if now.saturating_duration_since(in_flight.sent_at) < retransmit_interval {
                continue;
            }
            if in_flight.attempts >= ctx.config.max_attempts {
                failed = true;
                break;
            }
            ctx.txqueue.enqueue_reliable(in_flight.frame.clone());
            in_flight.sent_at = now;
            in_flight.attempts += 1;
        }
        if failed {
            emit(
                &ctx.events,
                Event::TransferFailed { peer: ctx.dest, transfer_id: ctx.transfer_id },
            );
            return;
        }
    }
}
