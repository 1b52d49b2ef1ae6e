//! Background thread that drains the engine's event sink and logs each
//! event as a human-readable line. There is nothing to print to beyond
//! `log`, since the REPL owns the terminal via `rustyline`.

use qbolapp_engine::{Event, EventReceiver};

pub fn spawn(events: EventReceiver) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("qbolapp-event-printer".to_string())
        .spawn(move || {
            for event in events.iter() {
                print_event(&event);
            }
        })
        .expect("failed to spawn event-printer thread")
}

fn print_event(event: &Event) {
    match event {
        Event::MessageReceived { from, text } => {
            log::info!("[{from}] {}", String::from_utf8_lossy(text));
        }
        Event::BroadcastReceived { from, text } => {
            log::info!("[{from} broadcast] {}", String::from_utf8_lossy(text));
        }
        Event::PeerOnline { mac, name } => {
            log::info!("peer online: {mac} ({name})");
        }
        Event::PeerOffline { mac } => {
            log::info!("peer offline: {mac}");
        }
        Event::TransferCompleted { from, transfer_id, bytes } => {
            log::info!("transfer {transfer_id:08x} from {from} complete ({} bytes)", bytes.len());
        }
        Event::TransferFailed { peer, transfer_id } => {
            log::warn!("transfer {transfer_id:08x} with {peer} failed");
        }
        Event::DeliveryFailed { kind, peer, sequence } => {
            log::warn!("delivery of {kind:?} to {peer} failed (sequence {sequence})");
        }
        Event::TransferSent { transfer_id, dest } => {
            log::info!("transfer {transfer_id:08x} to {dest} sent");
        }
        Event::LinkFailure { reason } => {
            log::error!("link failure: {reason}");
        }
    }
}
