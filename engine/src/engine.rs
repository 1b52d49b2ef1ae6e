//! The public `Engine` handle.
//!
//! One object that owns every subsystem and spawns the worker threads,
//! exposing a small synchronous API plus an event channel the application
//! drains on its own thread. Thread layout: one receiver thread, one
//! router thread, one sender thread, one presence-ticker thread, one
//! ack-ticker thread, one HELLO-broadcast thread, and one short-lived
//! thread per active outbound file transfer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pnet::util::MacAddr;
use rand::Rng;

use crate::ack::AckManager;
use crate::config::Config;
use crate::core::Frame;
use crate::error::Result;
use crate::events::{event_channel, emit, Event, EventReceiver, EventSender};
use crate::filetransfer::{FileAckRegistry, FileAssembler, FileSendContext};
use crate::link::{LinkEndpoint, PnetLinkEndpoint};
use crate::peer::PeerInfo;
use crate::presence::PresenceManager;
use crate::receiver::{run_receiver, ReceiverStats};
use crate::router::{run_router, Router, RouterInbox};
use crate::txqueue::{run_sender, TxQueue};

/// A running instance of the engine, bound to one link-layer interface.
///
/// Cloning is cheap: every clone shares the same worker threads and
/// internal state, and `shutdown` on any clone stops all of them exactly
/// once (shutdown is idempotent).
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    local_mac: MacAddr,
    display_name: Vec<u8>,
    config: Config,
    txqueue: TxQueue,
    ack_manager: Arc<AckManager>,
    presence: Arc<PresenceManager>,
    file_acks: FileAckRegistry,
    events: EventSender,
    seq_counter: Arc<AtomicU32>,
    transfer_seq: AtomicU32,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    receiver_stats: Arc<ReceiverStats>,
}

impl Engine {
    /// Opens the named interface and starts the engine on it, returning the
    /// engine handle and the receiving half of its event stream.
    pub fn start(interface_name: &str, display_name: String, config: Config) -> Result<(Self, EventReceiver)> {
        let endpoint = PnetLinkEndpoint::open(interface_name)?;
        Self::start_with_endpoint(Arc::new(endpoint), display_name, config)
    }

    /// Starts the engine on an already-constructed `LinkEndpoint`, letting
    /// tests and alternate transports substitute their own implementation.
    pub fn start_with_endpoint(
        endpoint: Arc<dyn LinkEndpoint>,
        display_name: String,
        config: Config,
    ) -> Result<(Self, EventReceiver)> {
        let local_mac = endpoint.local_mac();
        let (events, app_events) = event_channel(config.event_queue_capacity);
        let (txqueue, tx_rx) = TxQueue::new(config.tx_queue_capacity);

        let ack_manager = Arc::new(AckManager::new(
            config.max_attempts,
            Duration::from_millis(config.retransmit_interval_ms),
        ));
        let presence = Arc::new(PresenceManager::new(
            events.clone(),
            Duration::from_millis(config.presence_timeout_ms),
            Duration::from_millis(config.presence_grace_ms),
        ));
        let assembler = Arc::new(FileAssembler::new(Duration::from_millis(config.transfer_timeout_ms)));
        let file_acks = FileAckRegistry::default();

        let stop = Arc::new(AtomicBool::new(false));
        let receiver_stats = Arc::new(ReceiverStats::default());

        let router = Arc::new(Router::new(
            presence.clone(),
            ack_manager.clone(),
            assembler.clone(),
            file_acks.clone(),
            txqueue.clone(),
            events.clone(),
            local_mac,
        ));
        let (inbox, router_rx) = RouterInbox::channel(config.tx_queue_capacity);

        let mut threads = Vec::new();

        threads.push(spawn_named("qbolapp-receiver", {
            let endpoint = endpoint.clone();
            let key = config.obfuscation_key.clone();
            let stats = receiver_stats.clone();
            let stop = stop.clone();
            move || run_receiver(endpoint, key, inbox, stats, stop)
        }));

        threads.push(spawn_named("qbolapp-router", {
            let stop = stop.clone();
            move || run_router(router, router_rx, stop)
        }));

        threads.push(spawn_named("qbolapp-sender", {
            let key = config.obfuscation_key.clone();
            let events = events.clone();
            let stop = stop.clone();
            let queue = txqueue.clone();
            move || run_sender(endpoint, tx_rx, queue, key, events, stop)
        }));

        threads.push(spawn_named("qbolapp-ack-ticker", {
            let ack_manager = ack_manager.clone();
            let txqueue = txqueue.clone();
            let events = events.clone();
            let stop = stop.clone();
            let tick = Duration::from_millis(config.ack_tick_ms);
            move || {
                while !stop.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    ack_manager.tick(&txqueue, &events);
                }
            }
        }));

        threads.push(spawn_named("qbolapp-presence-ticker", {
            let presence = presence.clone();
            let assembler = assembler.clone();
            let events = events.clone();
            let stop = stop.clone();
            // A cadence independent of the retransmit/hello tickers; a
            // fixed short period is enough since presence_timeout/grace
            // are both far coarser than this.
            let tick = Duration::from_secs(1);
            move || {
                while !stop.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    presence.tick();
                    for (peer, transfer_id) in assembler.expire_idle() {
                        emit(&events, Event::TransferFailed { peer, transfer_id });
                    }
                }
            }
        }));

        threads.push(spawn_named("qbolapp-hello", {
            let txqueue = txqueue.clone();
            let events = events.clone();
            let name = display_name.clone().into_bytes();
            let interval = Duration::from_millis(config.hello_interval_ms);
            let stop = stop.clone();
            move || {
                while !stop.load(Ordering::Acquire) {
                    txqueue.enqueue_unreliable(Frame::new_hello(MacAddr::broadcast(), local_mac, name.clone()), &events);
                    thread::sleep(interval);
                }
            }
        }));

        let display_name = display_name.into_bytes();

        txqueue.enqueue_unreliable(
            Frame::new_broadcast_online(local_mac, display_name.clone()),
            &events,
        );

        let engine = Self {
            inner: Arc::new(EngineInner {
                local_mac,
                display_name,
                config,
                txqueue,
                ack_manager,
                presence,
                file_acks,
                events,
                seq_counter: Arc::new(AtomicU32::new(0)),
                transfer_seq: AtomicU32::new(0),
                stop,
                threads: Mutex::new(threads),
                receiver_stats,
            }),
        };

        Ok((engine, app_events))
    }

    /// This engine's own hardware address.
    pub fn local_mac(&self) -> MacAddr {
        self.inner.local_mac
    }

    /// Sends a direct message to `dest`, returning the local sequence number
    /// assigned to it so the caller can correlate a later `delivery_failed`.
    pub fn send_message(&self, dest: MacAddr, text: Vec<u8>, reliable: bool) -> u32 {
        let sequence = self.next_sequence();
        let frame = Frame::new_msg(dest, self.inner.local_mac, sequence, reliable, text);
        if reliable {
            self.inner.ack_manager.register(frame.clone());
            self.inner.txqueue.enqueue_reliable(frame);
        } else {
            self.inner.txqueue.enqueue_unreliable(frame, &self.inner.events);
        }
        sequence
    }

    /// Sends an unreliable broadcast message to every peer on the segment.
    pub fn send_broadcast(&self, text: Vec<u8>) {
        let sequence = self.next_sequence();
        let frame = Frame::new_msg(MacAddr::broadcast(), self.inner.local_mac, sequence, false, text);
        self.inner.txqueue.enqueue_unreliable(frame, &self.inner.events);
    }

    /// Sends an immediate HELLO broadcast, outside the periodic ticker's
    /// own cadence.
    pub fn announce_hello(&self) {
        let frame = Frame::new_hello(MacAddr::broadcast(), self.inner.local_mac, self.inner.display_name.clone());
        self.inner.txqueue.enqueue_unreliable(frame, &self.inner.events);
    }

    /// Starts sending a file to `dest`, returning the transfer id
    /// immediately; completion is reported through the event stream as
    /// `TransferSent` or `TransferFailed`.
    pub fn send_file(&self, dest: MacAddr, bytes: Vec<u8>, reliable: bool) -> u32 {
        let transfer_id = self.next_transfer_id();
        let ack_rx = self.inner.file_acks.register(transfer_id);

        let ctx = FileSendContext {
            dest,
            local_mac: self.inner.local_mac,
            bytes,
            reliable,
            transfer_id,
            config: self.inner.config.clone(),
            txqueue: self.inner.txqueue.clone(),
            seq_counter: self.inner.seq_counter.clone(),
            ack_rx,
            events: self.inner.events.clone(),
            stop: self.inner.stop.clone(),
        };

        let file_acks = self.inner.file_acks.clone();
        let handle = spawn_named(&format!("qbolapp-file-send-{transfer_id}"), move || {
            crate::filetransfer::sender::run(ctx);
            file_acks.unregister(transfer_id);
        });
        self.inner.threads.lock().expect("thread list poisoned").push(handle);

        transfer_id
    }

    /// Snapshot of every known peer.
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.inner.presence.list()
    }

    /// Number of frames dropped by the receiver before reaching the router
    /// (malformed, truncated, CRC mismatch, or unrecognized kind).
    pub fn decode_failure_count(&self) -> u64 {
        self.inner.receiver_stats.decode_failures()
    }

    /// Number of outbound reliable frames still awaiting an ACK.
    pub fn pending_ack_count(&self) -> usize {
        self.inner.ack_manager.pending_count()
    }

    /// Idempotent shutdown: announces BROADCAST_OFFLINE, gives the sender
    /// thread a bounded window to drain it, then signals every worker
    /// thread to stop and joins them.
    pub fn shutdown(&self) {
        if self.inner.stop.swap(true, Ordering::SeqCst) {
            return; // already shutting down
        }

        let offline = Frame::new_broadcast_offline(self.inner.local_mac);
        self.inner.txqueue.enqueue_unreliable(offline, &self.inner.events);
        self.inner
            .txqueue
            .set_drain_deadline(Instant::now() + Duration::from_millis(self.inner.config.shutdown_drain_ms));

        let handles: Vec<JoinHandle<()>> = self.inner.threads.lock().expect("thread list poisoned").drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn next_sequence(&self) -> u32 {
        self.inner.seq_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Transfer ids only need to avoid colliding among this engine's own
    /// concurrent outbound transfers; a monotonic counter folded with a
    /// random salt keeps two engines restarted back to back from reusing
    /// the same id against the same peer.
    fn next_transfer_id(&self) -> u32 {
        let salt: u32 = rand::thread_rng().gen();
        self.inner.transfer_seq.fetch_add(1, Ordering::Relaxed) ^ salt
    }
}

fn spawn_named<F>(name: &str, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .unwrap_or_else(|_| panic!("failed to spawn {name} thread"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ChannelLinkBus;
    use std::time::Duration as StdDuration;

    fn mac(n: u8) -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, n)
    }

    #[test]
    fn two_engines_exchange_a_reliable_message() {
        let bus = ChannelLinkBus::new();
        let ep_a = Arc::new(bus.attach(mac(1)));
        let ep_b = Arc::new(bus.attach(mac(2)));

        let config = Config::new().with_ack_tick_ms(20).with_hello_interval_ms(60_000);
        let (engine_a, _events_a) = Engine::start_with_endpoint(ep_a, "alice".into(), config.clone()).unwrap();
        let (engine_b, events_b) = Engine::start_with_endpoint(ep_b, "bob".into(), config).unwrap();

        engine_a.send_message(mac(2), b"hello bob".to_vec(), true);

        let deadline = std::time::Instant::now() + StdDuration::from_secs(2);
        let wanted = Event::MessageReceived { from: mac(1), text: b"hello bob".to_vec() };
        let mut seen = false;
        while std::time::Instant::now() < deadline {
            if let Ok(event) = events_b.recv_timeout(StdDuration::from_millis(200)) {
                if event == wanted {
                    seen = true;
                    break;
                }
            }
        }
        assert!(seen, "expected message event was not delivered");

        engine_a.shutdown();
        engine_b.shutdown();
    }

    /// A reliable MSG followed by a reliable file transfer to the same peer
    /// must not collide in the router's duplicate window: both draw their
    /// sequence numbers from the same per-engine counter, so a fresh,
    /// transfer-local counter starting back at 0 would make fragment 0
    /// indistinguishable from the MSG that preceded it.
    #[test]
    fn reliable_message_then_reliable_file_to_same_peer_both_land() {
        let bus = ChannelLinkBus::new();
        let ep_a = Arc::new(bus.attach(mac(1)));
        let ep_b = Arc::new(bus.attach(mac(2)));

        let config = Config::new()
            .with_ack_tick_ms(20)
            .with_hello_interval_ms(60_000)
            .with_payload_mtu(4)
            .with_send_window(2);
        let (engine_a, events_a) = Engine::start_with_endpoint(ep_a, "alice".into(), config.clone()).unwrap();
        let (engine_b, events_b) = Engine::start_with_endpoint(ep_b, "bob".into(), config).unwrap();

        engine_a.send_message(mac(2), b"hi".to_vec(), true);
        let blob = b"abcdefgh".to_vec();
        let transfer_id = engine_a.send_file(mac(2), blob.clone(), true);

        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        let mut got_message = false;
        let mut got_transfer = None;
        while std::time::Instant::now() < deadline && (!got_message || got_transfer.is_none()) {
            if let Ok(event) = events_b.recv_timeout(StdDuration::from_millis(200)) {
                match event {
                    Event::MessageReceived { from, text } if from == mac(1) && text == b"hi" => {
                        got_message = true;
                    }
                    Event::TransferCompleted { from, transfer_id: tid, bytes } if from == mac(1) && tid == transfer_id => {
                        got_transfer = Some(bytes);
                    }
                    _ => {}
                }
            }
        }
        assert!(got_message, "the reliable MSG was suppressed as a duplicate of the file transfer");
        assert_eq!(
            got_transfer,
            Some(blob),
            "the file transfer was suppressed as a duplicate of the MSG and never reassembled"
        );

        let sent = {
            let deadline = std::time::Instant::now() + StdDuration::from_secs(2);
            let mut sent = false;
            while std::time::Instant::now() < deadline {
                if let Ok(event) = events_a.recv_timeout(StdDuration::from_millis(200)) {
                    if matches!(event, Event::TransferSent { transfer_id: tid, .. } if tid == transfer_id) {
                        sent = true;
                        break;
                    }
                }
            }
            sent
        };
        assert!(sent, "engine-1 never saw its own transfer as sent (it believed the window advanced on a phantom ack)");

        engine_a.shutdown();
        engine_b.shutdown();
    }
}
