//! Frame dispatch: a match-on-kind router over a shared per-peer table.
//!
//! This module owns only interpretation: ACKing, deduplication, presence
//! touches, and handing completed inbound data to the application event
//! sink. Encoding and retransmission stay in `ack`, `txqueue`, and
//! `filetransfer`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pnet::util::MacAddr;

use crate::ack::AckManager;
use crate::core::{Frame, FrameKind};
use crate::events::{emit, Event, EventSender};
use crate::filetransfer::{FileAckRegistry, FileAssembler};
use crate::presence::PresenceManager;
use crate::txqueue::TxQueue;

/// Minimum number of recently-seen sequence numbers kept per peer for
/// duplicate suppression.
const DUP_WINDOW_SIZE: usize = 256;

/// Producing half of the receiver-to-router handoff queue.
#[derive(Clone)]
pub struct RouterInbox {
    tx: crossbeam_channel::Sender<Frame>,
}

impl RouterInbox {
    /// Builds a fresh bounded handoff queue between the receiver thread and
    /// the router thread.
    pub fn channel(capacity: usize) -> (Self, crossbeam_channel::Receiver<Frame>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    /// Hands one decoded frame to the router. Drops it with a warning if
    /// the router has fallen far enough behind to fill the queue, rather
    /// than stalling the receiver thread.
    pub fn push(&self, frame: Frame) {
        if self.tx.try_send(frame).is_err() {
            log::warn!("router inbox full or closed, dropping inbound frame");
        }
    }
}

/// A fixed-capacity set of recently-seen sequence numbers for one peer,
/// used to suppress re-delivery of a reliable frame's retransmitted
/// copies. Sequence numbers are per-sender monotonic and shared across
/// MSG and FILE frames, so one window covers both.
struct DupWindow {
    seen: HashMap<u32, ()>,
    order: VecDeque<u32>,
}

impl DupWindow {
    fn new() -> Self {
        Self { seen: HashMap::new(), order: VecDeque::new() }
    }

    /// Returns true if `sequence` was already recorded; otherwise records
    /// it and evicts the oldest entry once the window is full.
    fn check_and_insert(&mut self, sequence: u32) -> bool {
        if self.seen.contains_key(&sequence) {
            return true;
        }
        self.seen.insert(sequence, ());
        self.order.push_back(sequence);
        if self.order.len() > DUP_WINDOW_SIZE {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        false
    }
}

/// Interprets inbound frames: acknowledges reliable MSG/FILE frames,
/// suppresses duplicates, touches presence on every frame, reassembles
/// file fragments, and raises application events.
pub struct Router {
    dup_windows: Mutex<HashMap<MacAddr, DupWindow>>,
    presence: Arc<PresenceManager>,
    ack_manager: Arc<AckManager>,
    assembler: Arc<FileAssembler>,
    file_acks: FileAckRegistry,
    txqueue: TxQueue,
    events: EventSender,
    local_mac: MacAddr,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        presence: Arc<PresenceManager>,
        ack_manager: Arc<AckManager>,
        assembler: Arc<FileAssembler>,
        file_acks: FileAckRegistry,
        txqueue: TxQueue,
        events: EventSender,
        local_mac: MacAddr,
    ) -> Self {
        Self {
            dup_windows: Mutex::new(HashMap::new()),
            presence,
            ack_manager,
            assembler,
            file_acks,
            txqueue,
            events,
            local_mac,
        }
    }

    fn is_duplicate(&self, peer: MacAddr, sequence: u32) -> bool {
        let mut windows = self.dup_windows.lock().expect("dup window table poisoned");
        windows.entry(peer).or_insert_with(DupWindow::new).check_and_insert(sequence)
    }

    /// Handles one inbound frame. Every frame, regardless of kind, refreshes
    /// the sender's presence entry.
    pub fn handle(&self, frame: Frame) {
        self.presence.touch(frame.src);

        match frame.kind {
            FrameKind::Msg => self.handle_msg(frame),
            FrameKind::Ack => self.handle_ack(frame),
            FrameKind::Nack => self.handle_nack(frame),
            FrameKind::File => self.handle_file(frame),
            FrameKind::FileAck => self.handle_file_ack(frame),
            FrameKind::Hello => self.handle_hello(frame),
            FrameKind::BroadcastOnline => self.handle_broadcast_online(frame),
            FrameKind::BroadcastOffline => self.handle_broadcast_offline(frame),
            FrameKind::Ctrl => {}
        }
    }

    fn handle_msg(&self, frame: Frame) {
        let is_broadcast = frame.dest == MacAddr::broadcast();
        let duplicate = frame.is_reliable() && self.is_duplicate(frame.src, frame.sequence);

        if frame.is_reliable() {
            let ack = Frame::new_ack(frame.src, self.local_mac, frame.sequence);
            self.txqueue.enqueue_unreliable(ack, &self.events);
        }

        if duplicate {
            return;
        }

        if is_broadcast {
            emit(&self.events, Event::BroadcastReceived { from: frame.src, text: frame.payload });
        } else {
            emit(&self.events, Event::MessageReceived { from: frame.src, text: frame.payload });
        }
    }

    fn handle_ack(&self, frame: Frame) {
        self.ack_manager.acknowledge(frame.src, frame.sequence);
    }

    fn handle_nack(&self, frame: Frame) {
        self.ack_manager.trigger_immediate_retransmit(frame.src, frame.sequence, &self.txqueue);
    }

    fn handle_file(&self, frame: Frame) {
        let duplicate = frame.is_reliable() && self.is_duplicate(frame.src, frame.sequence);

        if frame.is_reliable() {
            let ack = Frame::new_file_ack(frame.src, self.local_mac, frame.transfer_id, frame.fragment_index);
            self.txqueue.enqueue_unreliable(ack, &self.events);
        }

        if duplicate {
            return;
        }

        if let Some(bytes) = self.assembler.add_fragment(frame.src, &frame) {
            emit(
                &self.events,
                Event::TransferCompleted { from: frame.src, transfer_id: frame.transfer_id, bytes },
            );
        }
    }

    fn handle_file_ack(&self, frame: Frame) {
        self.file_acks.notify(frame.transfer_id, frame.fragment_index);
    }

    fn handle_hello(&self, frame: Frame) {
        let name = String::from_utf8_lossy(&frame.payload).into_owned();
        self.presence.mark_online(frame.src, name);
    }

    fn handle_broadcast_online(&self, frame: Frame) {
        let name = String::from_utf8_lossy(&frame.payload).into_owned();
        self.presence.mark_online(frame.src, name);
    }

    fn handle_broadcast_offline(&self, frame: Frame) {
        self.presence.mark_offline(frame.src);
    }
}

/// Runs on the dedicated router thread: drains the receiver handoff queue
/// and hands each frame to `router.handle`, forever or until the queue
/// disconnects (which only happens at shutdown, once the receiver thread
/// drops its `RouterInbox`).
pub fn run_router(router: Arc<Router>, rx: crossbeam_channel::Receiver<Frame>, stop: Arc<std::sync::atomic::AtomicBool>) {
    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => router.handle(frame),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Acquire) && rx.is_empty() {
                    return;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use std::time::Duration as StdDuration;

    fn mac(n: u8) -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, n)
    }

    fn router() -> (Router, crossbeam_channel::Receiver<Event>, crossbeam_channel::Receiver<Frame>) {
        let (events, erx) = event_channel(32);
        let presence = Arc::new(PresenceManager::new(events.clone(), StdDuration::from_secs(20), StdDuration::from_secs(60)));
        let ack_manager = Arc::new(AckManager::new(5, StdDuration::from_millis(1000)));
        let assembler = Arc::new(FileAssembler::new(StdDuration::from_secs(60)));
        let file_acks = FileAckRegistry::default();
        let (txqueue, trx) = TxQueue::new(32);
        let router = Router::new(presence, ack_manager, assembler, file_acks, txqueue, events, mac(1));
        (router, erx, trx)
    }

    #[test]
    fn reliable_msg_is_acked_and_delivered_once() {
        let (router, erx, trx) = router();
        let frame = Frame::new_msg(mac(1), mac(2), 5, true, b"hi".to_vec());

        router.handle(frame.clone());
        let ack = trx.try_recv().unwrap();
        assert_eq!(ack.kind, FrameKind::Ack);
        assert_eq!(ack.sequence, 5);
        assert_eq!(
            erx.try_recv(),
            Ok(Event::MessageReceived { from: mac(2), text: b"hi".to_vec() })
        );

        router.handle(frame);
        assert!(trx.try_recv().is_ok()); // still re-acked
        assert!(erx.try_recv().is_err()); // but not re-delivered
    }

    #[test]
    fn broadcast_msg_raises_broadcast_event() {
        let (router, erx, _trx) = router();
        let frame = Frame::new_msg(MacAddr::broadcast(), mac(2), 1, false, b"hey all".to_vec());
        router.handle(frame);
        assert_eq!(
            erx.try_recv(),
            Ok(Event::BroadcastReceived { from: mac(2), text: b"hey all".to_vec() })
        );
    }

    #[test]
    fn file_fragment_completion_raises_transfer_completed() {
        let (router, erx, trx) = router();
        let f0 = Frame::new_file(mac(1), mac(2), 0, true, 42, 0, 2, b"ab".to_vec());
        let f1 = Frame::new_file(mac(1), mac(2), 1, true, 42, 1, 2, b"cd".to_vec());

        router.handle(f0);
        assert_eq!(trx.try_recv().unwrap().kind, FrameKind::FileAck);
        assert!(erx.try_recv().is_err());

        router.handle(f1);
        assert_eq!(trx.try_recv().unwrap().kind, FrameKind::FileAck);
        assert_eq!(
            erx.try_recv(),
            Ok(Event::TransferCompleted { from: mac(2), transfer_id: 42, bytes: b"abcd".to_vec() })
        );
    }

    #[test]
    fn file_ack_notifies_registry() {
        let (router, _erx, _trx) = router();
        let rx = router.file_acks.register(7);
        router.handle(Frame::new_file_ack(mac(1), mac(2), 7, 3));
        assert_eq!(rx.try_recv().unwrap(), 3);
    }

    #[test]
    fn hello_marks_peer_online() {
        let (router, erx, _trx) = router();
        router.handle(Frame::new_hello(mac(1), mac(2), b"bob".to_vec()));
        assert_eq!(
            erx.try_recv(),
            Ok(Event::PeerOnline { mac: mac(2), name: "bob".into() })
        );
    }

    #[test]
    fn broadcast_offline_marks_peer_offline() {
        let (router, erx, _trx) = router();
        router.handle(Frame::new_hello(mac(1), mac(2), b"bob".to_vec()));
        let _ = erx.try_recv();
        router.handle(Frame::new_broadcast_offline(mac(2)));
        assert_eq!(erx.try_recv(), Ok(Event::PeerOffline { mac: mac(2) }));
    }
}
