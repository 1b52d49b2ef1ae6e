//! Inbound file reassembly.
//!
//! Find-or-create entry, duplicate-tolerant fragment insertion, and
//! completion-on-last-fragment-sets-expected-size, over a
//! `HashMap<(MacAddr, u32), InboundTransfer>` of sparse
//! `HashMap<u32, Vec<u8>>` fragment maps rather than a preallocated buffer,
//! since transfer sizes are not known in advance.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use crate::core::Frame;

struct InboundTransfer {
    total: Option<u32>,
    fragments: HashMap<u32, Vec<u8>>,
    last_activity: Instant,
}

/// Reassembles inbound FILE fragments per (source MAC, transfer id).
pub struct FileAssembler {
    transfers: Mutex<HashMap<(MacAddr, u32), InboundTransfer>>,
    transfer_timeout: Duration,
}

impl FileAssembler {
    pub fn new(transfer_timeout: Duration) -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            transfer_timeout,
        }
    }

    /// Feeds one FILE fragment in. Returns the reassembled bytes, in
    /// fragment-index order, if this fragment completed the transfer — the
    /// record is removed in that case. A duplicate fragment index is
    /// accepted without effect (the first copy received wins).
    pub fn add_fragment(&self, src: MacAddr, frame: &Frame) -> Option<Vec<u8>> {
        let key = (src, frame.transfer_id);
        let mut transfers = self.transfers.lock().expect("assembler table poisoned");
        let entry = transfers.entry(key).or_insert_with(|| InboundTransfer {
            total: None,
            fragments: HashMap::new(),
            last_activity: Instant::now(),
        });

        entry.last_activity = Instant::now();
        if frame.total_fragments > 0 {
            entry.total = Some(frame.total_fragments);
        }
        entry
            .fragments
            .entry(frame.fragment_index)
            .or_insert_with(|| frame.payload.clone());

        let complete = matches!(entry.total, Some(total) if entry.fragments.len() as u32 == total);
        if !complete {
            return None;
        }

        let entry = transfers.remove(&key).expect("entry just located under the same lock");
        let total = entry.total.expect("complete implies total_fragments was observed");
        let mut bytes = Vec::new();
        for index in 0..total {
            let chunk = entry
                .fragments
                .get(&index)
                .expect("fragment count matches total but an index is missing");
            bytes.extend_from_slice(chunk);
        }
        Some(bytes)
    }

    /// Discards transfers idle past `transfer_timeout`, returning
    /// `(source MAC, transfer id)` for each so the caller can raise
    /// `transfer_failed`.
    pub fn expire_idle(&self) -> Vec<(MacAddr, u32)> {
        let now = Instant::now();
        let mut transfers = self.transfers.lock().expect("assembler table poisoned");
        let expired: Vec<(MacAddr, u32)> = transfers
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.last_activity) > self.transfer_timeout)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            transfers.remove(key);
        }
        expired
    }

    /// Number of in-progress inbound transfers (used by tests).
    pub fn active_count(&self) -> usize {
        self.transfers.lock().expect("assembler table poisoned").len()
    }
}
