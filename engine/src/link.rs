//! The raw link-layer I/O boundary.
//!
//! `LinkEndpoint` is intentionally narrow: send a whole frame, receive the
//! next whole frame, report the local MAC. Narrowed from a byte-stream
//! interface to a whole-datagram one since frames here are never split
//! across reads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pnet::util::MacAddr;
use pnet_datalink::{self as datalink, Channel, Config as DatalinkConfig, DataLinkReceiver, DataLinkSender, NetworkInterface};

use crate::error::{Error, Result};

/// How long `recv` may block before returning `Error::Timeout`. Short
/// enough that a receiver thread's shutdown check stays responsive, long
/// enough not to busy-loop.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Something that can send and receive raw link-layer frames.
///
/// Implementations must be safe to use from two threads at once: one
/// thread calling only `send`, another calling only `recv`. `recv` must
/// not block longer than `RECV_POLL_INTERVAL` at a stretch, returning
/// `Error::Timeout` instead, so a caller can observe a shutdown request
/// between frames.
pub trait LinkEndpoint: Send + Sync {
    /// Writes one fully-formed frame (including Ethernet header) to the wire.
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Waits for the next frame, returning its raw bytes (including the
    /// Ethernet header), or `Error::Timeout` if none arrived within
    /// `RECV_POLL_INTERVAL`.
    fn recv(&self) -> Result<Vec<u8>>;

    /// The interface's own hardware address.
    fn local_mac(&self) -> MacAddr;
}

/// A `LinkEndpoint` backed by a real network interface via `pnet_datalink`.
pub struct PnetLinkEndpoint {
    local_mac: MacAddr,
    tx: Mutex<Box<dyn DataLinkSender>>,
    rx: Mutex<Box<dyn DataLinkReceiver>>,
}

impl PnetLinkEndpoint {
    /// Opens a raw datalink channel on the named interface.
    pub fn open(interface_name: &str) -> Result<Self> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface: &NetworkInterface| iface.name == interface_name)
            .ok_or_else(|| Error::InterfaceUnavailable(interface_name.to_string()))?;

        let local_mac = interface
            .mac
            .ok_or_else(|| Error::InterfaceUnavailable(interface_name.to_string()))?;

        let config = DatalinkConfig {
            read_timeout: Some(RECV_POLL_INTERVAL),
            ..Default::default()
        };
        let channel = datalink::channel(&interface, config)
            .map_err(|_| Error::PermissionDenied(interface_name.to_string()))?;

        let (tx, rx) = match channel {
            Channel::Ethernet(tx, rx) => (tx, rx),
            _ => return Err(Error::InterfaceUnavailable(interface_name.to_string())),
        };

        Ok(Self {
            local_mac,
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
        })
    }
}

impl LinkEndpoint for PnetLinkEndpoint {
    fn send(&self, frame: &[u8]) -> Result<()> {
        let mut tx = self.tx.lock().expect("tx lock poisoned");
        match tx.send_to(frame, None) {
            Some(Ok(())) => Ok(()),
            _ => Err(Error::QueueFull),
        }
    }

    fn recv(&self) -> Result<Vec<u8>> {
        let mut rx = self.rx.lock().expect("rx lock poisoned");
        match rx.next() {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(err) => match err.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Err(Error::Timeout),
                _ => Err(Error::MalformedFrame),
            },
        }
    }

    fn local_mac(&self) -> MacAddr {
        self.local_mac
    }
}

/// An in-memory `LinkEndpoint` for tests: every endpoint constructed from
/// the same `ChannelLinkBus` observes every frame any peer sent, mimicking
/// a shared Ethernet segment.
#[derive(Clone)]
pub struct ChannelLinkBus {
    senders: Arc<Mutex<Vec<(MacAddr, crossbeam_channel::Sender<Vec<u8>>)>>>,
}

impl ChannelLinkBus {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attaches a new peer to the bus, returning its endpoint.
    pub fn attach(&self, mac: MacAddr) -> ChannelLinkEndpoint {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.lock().expect("bus lock poisoned").push((mac, tx));
        ChannelLinkEndpoint {
            local_mac: mac,
            bus: self.clone(),
            rx,
        }
    }

    /// Delivers `frame` to every attached peer except `from`, matching a
    /// real shared segment where a sender never sees its own transmission
    /// echoed back.
    fn broadcast(&self, from: MacAddr, frame: &[u8]) {
        let senders = self.senders.lock().expect("bus lock poisoned");
        for (mac, tx) in senders.iter() {
            if *mac == from {
                continue;
            }
            let _ = tx.send(frame.to_vec());
        }
    }
}

impl Default for ChannelLinkBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One peer's handle onto a `ChannelLinkBus`.
pub struct ChannelLinkEndpoint {
    local_mac: MacAddr,
    bus: ChannelLinkBus,
    rx: crossbeam_channel::Receiver<Vec<u8>>,
}

impl LinkEndpoint for ChannelLinkEndpoint {
    fn send(&self, frame: &[u8]) -> Result<()> {
        self.bus.broadcast(self.local_mac, frame);
        Ok(())
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.rx
            .recv_timeout(RECV_POLL_INTERVAL)
            .map_err(|_| Error::Timeout)
    }

    fn local_mac(&self) -> MacAddr {
        self.local_mac
    }
}
