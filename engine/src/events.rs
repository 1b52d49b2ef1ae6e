//! Application-visible events.
//!
//! Every subsystem that has something to tell the application pushes an
//! `Event` into one shared bounded channel; `Engine::events()` hands the
//! receiving half to whoever wants to drain it (the CLI's printer thread,
//! or a test). A send into a channel whose receiver was dropped is
//! swallowed, not propagated: only startup errors unwind out of the public
//! API.

use pnet::util::MacAddr;

use crate::core::FrameKind;

/// Something the application might want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A reliable or unreliable direct message arrived from `from`.
    MessageReceived { from: MacAddr, text: Vec<u8> },
    /// A broadcast message arrived from `from`.
    BroadcastReceived { from: MacAddr, text: Vec<u8> },
    /// A peer transitioned from Offline (or unknown) to Online.
    PeerOnline { mac: MacAddr, name: String },
    /// A peer transitioned from Online to Offline.
    PeerOffline { mac: MacAddr },
    /// An inbound file transfer finished and its bytes are ready.
    TransferCompleted {
        from: MacAddr,
        transfer_id: u32,
        bytes: Vec<u8>,
    },
    /// A file transfer (inbound or outbound) was abandoned.
    TransferFailed { peer: MacAddr, transfer_id: u32 },
    /// A reliable frame exhausted its retransmit budget.
    DeliveryFailed {
        kind: FrameKind,
        peer: MacAddr,
        sequence: u32,
    },
    /// An outbound file transfer finished sending (every fragment enqueued,
    /// or, in reliable mode, ACKed).
    TransferSent { transfer_id: u32, dest: MacAddr },
    /// The link endpoint suffered persistent write failures; the engine is
    /// shutting itself down.
    LinkFailure { reason: String },
}

/// Producing half of the event sink.
pub type EventSender = crossbeam_channel::Sender<Event>;
/// Consuming half of the event sink.
pub type EventReceiver = crossbeam_channel::Receiver<Event>;

/// Builds a fresh bounded event channel of the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    crossbeam_channel::bounded(capacity)
}

/// Pushes `event` into the sink, logging (rather than blocking or erroring)
/// if the sink is full or the application has stopped draining it. Every
/// subsystem uses this instead of a bare `send` so a slow or absent
/// application consumer never stalls engine internals.
pub fn emit(sender: &EventSender, event: Event) {
    if sender.try_send(event).is_err() {
        log::warn!("event sink full or closed, dropping event");
    }
}
