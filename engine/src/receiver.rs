//! The receive loop.
//!
//! A thin receiver that only decodes, handing off to a separate `router`
//! that interprets frame kinds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Error;
use crate::link::LinkEndpoint;
use crate::router::RouterInbox;

/// Frames dropped before or during decode, for diagnostics.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub decode_failures: AtomicU64,
}

impl ReceiverStats {
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }
}

/// Runs on the dedicated receiver thread: pulls raw bytes off the link,
/// decodes them, and hands well-formed frames to the router's inbox.
/// Malformed frames (bad CRC, truncated buffer, unrecognized kind) are
/// dropped silently save for a counter bump, since a noisy or hostile
/// segment must never be able to crash or wedge the engine. Frames addressed
/// to another MAC are dropped without incrementing the counter: a shared
/// segment routinely carries traffic for other hosts, and that is not a
/// decode problem.
pub fn run_receiver(
    endpoint: Arc<dyn LinkEndpoint>,
    obfuscation_key: Vec<u8>,
    inbox: RouterInbox,
    stats: Arc<ReceiverStats>,
    stop: Arc<AtomicBool>,
) {
    let local_mac = endpoint.local_mac();

    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let raw = match endpoint.recv() {
            Ok(bytes) => bytes,
            Err(Error::Timeout) => continue,
            Err(_) => {
                stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        match crate::core::Frame::decode(&raw, &obfuscation_key) {
            Ok(frame) if frame.dest == local_mac || frame.dest == pnet::util::MacAddr::broadcast() => {
                inbox.push(frame)
            }
            Ok(_) => {}
            Err(_) => {
                stats.decode_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frame;
    use crate::link::{ChannelLinkBus, ChannelLinkEndpoint};
    use crate::router::RouterInbox;
    use pnet::util::MacAddr;
    use std::thread;
    use std::time::Duration;

    fn mac(n: u8) -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, n)
    }

    #[test]
    fn well_formed_frame_reaches_the_router_inbox() {
        let key = b"k".to_vec();
        let bus = ChannelLinkBus::new();
        let sender_ep: ChannelLinkEndpoint = bus.attach(mac(1));
        let receiver_ep: Arc<dyn LinkEndpoint> = Arc::new(bus.attach(mac(2)));

        let (inbox, outbox) = RouterInbox::channel(8);
        let stats = Arc::new(ReceiverStats::default());
        let stop = Arc::new(AtomicBool::new(false));

        let stop2 = stop.clone();
        let handle = thread::spawn(move || run_receiver(receiver_ep, key.clone(), inbox, stats, stop2));

        let frame = Frame::new_msg(mac(2), mac(1), 1, false, b"hi".to_vec());
        sender_ep.send(&frame.encode(b"k").unwrap()).unwrap();

        let received = outbox.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(received.src, mac(1));
        assert_eq!(received.payload, b"hi");

        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn malformed_frame_is_dropped_and_counted() {
        let key = b"k".to_vec();
        let bus = ChannelLinkBus::new();
        let sender_ep: ChannelLinkEndpoint = bus.attach(mac(1));
        let receiver_ep: Arc<dyn LinkEndpoint> = Arc::new(bus.attach(mac(2)));

        let (inbox, outbox) = RouterInbox::channel(8);
        let stats = Arc::new(ReceiverStats::default());
        let stop = Arc::new(AtomicBool::new(false));

        let stop2 = stop.clone();
        let stats2 = stats.clone();
        let handle = thread::spawn(move || run_receiver(receiver_ep, key, inbox, stats2, stop2));

        sender_ep.send(b"not a valid frame at all").unwrap();
        thread::sleep(Duration::from_millis(250));

        assert!(stats.decode_failures() >= 1);
        assert!(outbox.try_recv().is_err());

        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
