//! Peer-presence state machine.
//!
//! A periodic-tick-plus-last-activity-timestamp table keyed by peer MAC.
//! Every public method releases the table lock before emitting an event.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use crate::events::{emit, Event, EventSender};
use crate::peer::{PeerInfo, PeerRecord, PeerState};

/// Maintains the online peer set and raises `peer_online`/`peer_offline`
/// events exactly once per state change.
pub struct PresenceManager {
    peers: Mutex<HashMap<MacAddr, PeerRecord>>,
    events: EventSender,
    presence_timeout: Duration,
    presence_grace: Duration,
}

impl PresenceManager {
    pub fn new(events: EventSender, presence_timeout: Duration, presence_grace: Duration) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            events,
            presence_timeout,
            presence_grace,
        }
    }

    /// Refreshes `last_seen` for any inbound frame from `mac`, creating the
    /// peer (without a known name) and marking it Online if this is the
    /// first frame ever seen from it.
    pub fn touch(&self, mac: MacAddr) {
        self.note(mac, None);
    }

    /// Marks a peer Online and records its display name, as learned from a
    /// HELLO or BROADCAST_ONLINE payload.
    pub fn mark_online(&self, mac: MacAddr, name: String) {
        self.note(mac, Some(name));
    }

    fn note(&self, mac: MacAddr, name: Option<String>) {
        let (transitioned, resolved_name) = {
            let mut peers = self.peers.lock().expect("presence table poisoned");
            let entry = peers.entry(mac).or_insert_with(|| PeerRecord {
                name: String::new(),
                last_seen: Instant::now(),
                state: PeerState::Offline,
            });
            if let Some(n) = name {
                entry.name = n;
            }
            entry.last_seen = Instant::now();
            let transitioned = entry.state == PeerState::Offline;
            entry.state = PeerState::Online;
            (transitioned, entry.name.clone())
        };
        if transitioned {
            emit(&self.events, Event::PeerOnline { mac, name: resolved_name });
        }
    }

    /// Marks a peer Offline immediately, as on receipt of BROADCAST_OFFLINE.
    pub fn mark_offline(&self, mac: MacAddr) {
        let transitioned = {
            let mut peers = self.peers.lock().expect("presence table poisoned");
            match peers.get_mut(&mac) {
                Some(rec) if rec.state == PeerState::Online => {
                    rec.state = PeerState::Offline;
                    true
                }
                _ => false,
            }
        };
        if transitioned {
            emit(&self.events, Event::PeerOffline { mac });
        }
    }

    /// Periodic cleanup: Online peers silent past `presence_timeout`
    /// transition to Offline; peers already Offline past an additional
    /// `presence_grace` are forgotten entirely.
    pub fn tick(&self) {
        let now = Instant::now();
        let mut newly_offline = Vec::new();
        {
            let mut peers = self.peers.lock().expect("presence table poisoned");
            let mut to_remove = Vec::new();
            for (mac, rec) in peers.iter_mut() {
                let idle = now.saturating_duration_since(rec.last_seen);
                match rec.state {
                    PeerState::Online if idle > self.presence_timeout => {
                        rec.state = PeerState::Offline;
                        newly_offline.push(*mac);
                    }
                    PeerState::Offline if idle > self.presence_timeout + self.presence_grace => {
                        to_remove.push(*mac);
                    }
                    _ => {}
                }
            }
            for mac in &to_remove {
                peers.remove(mac);
            }
        }
        for mac in newly_offline {
            emit(&self.events, Event::PeerOffline { mac });
        }
    }

    /// Snapshots every known peer for `Engine::list_peers`.
    pub fn list(&self) -> Vec<PeerInfo> {
        let now = Instant::now();
        let peers = self.peers.lock().expect("presence table poisoned");
        peers
            .iter()
            .map(|(mac, rec)| PeerInfo {
                mac: *mac,
                name: rec.name.clone(),
                state: rec.state,
                last_seen: now.saturating_duration_since(rec.last_seen),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    fn mac(n: u8) -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, n)
    }

    #[test]
    fn first_hello_raises_peer_online_once() {
        let (tx, rx) = event_channel(16);
        let mgr = PresenceManager::new(tx, Duration::from_secs(20), Duration::from_secs(60));

        mgr.mark_online(mac(1), "alice".into());
        mgr.mark_online(mac(1), "alice".into());

        assert_eq!(
            rx.try_recv(),
            Ok(Event::PeerOnline { mac: mac(1), name: "alice".into() })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tick_transitions_idle_peer_offline_then_removes_it() {
        let (tx, rx) = event_channel(16);
        let mgr = PresenceManager::new(tx, Duration::from_millis(0), Duration::from_millis(0));

        mgr.mark_online(mac(2), "bob".into());
        let _ = rx.try_recv();

        std::thread::sleep(Duration::from_millis(5));
        mgr.tick();
        assert_eq!(rx.try_recv(), Ok(Event::PeerOffline { mac: mac(2) }));

        std::thread::sleep(Duration::from_millis(5));
        mgr.tick();
        assert!(mgr.list().is_empty());
    }

    #[test]
    fn touch_brings_offline_peer_back_online() {
        let (tx, rx) = event_channel(16);
        let mgr = PresenceManager::new(tx, Duration::from_millis(0), Duration::from_secs(60));

        mgr.mark_online(mac(3), "carol".into());
        let _ = rx.try_recv();
        std::thread::sleep(Duration::from_millis(5));
        mgr.tick();
        let _ = rx.try_recv();

        mgr.touch(mac(3));
        assert_eq!(
            rx.try_recv(),
            Ok(Event::PeerOnline { mac: mac(3), name: "carol".into() })
        );
    }
}
