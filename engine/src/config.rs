//! Engine configuration.
//!
//! A plain struct, a `new()` with sane defaults, and `with_*` builder
//! setters that consume and return `Self`.

/// Tunable parameters for an `Engine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum cleartext payload bytes per frame.
    pub payload_mtu: usize,
    /// Milliseconds between retransmit attempts for an unacked reliable frame.
    pub retransmit_interval_ms: u64,
    /// Maximum retransmit attempts before a reliable frame is given up on.
    pub max_attempts: u32,
    /// Tick period of the ACK manager's retransmit scan.
    pub ack_tick_ms: u64,
    /// Period between outgoing HELLO broadcasts.
    pub hello_interval_ms: u64,
    /// Silence duration after which a peer is marked Offline.
    pub presence_timeout_ms: u64,
    /// Additional silence duration, past `presence_timeout_ms`, after which
    /// an Offline peer is forgotten entirely.
    pub presence_grace_ms: u64,
    /// Idle duration after which an incomplete inbound or outbound file
    /// transfer is abandoned.
    pub transfer_timeout_ms: u64,
    /// Outstanding unacked fragments allowed for one reliable file send.
    pub send_window: usize,
    /// Capacity of the transmit queue.
    pub tx_queue_capacity: usize,
    /// Capacity of the event sink channel.
    pub event_queue_capacity: usize,
    /// Shutdown drain deadline for the transmit queue.
    pub shutdown_drain_ms: u64,
    /// Repeating XOR key applied to frame payloads.
    pub obfuscation_key: Vec<u8>,
}

impl Config {
    /// Builds a configuration with the documented default constants.
    pub fn new() -> Self {
        Self {
            payload_mtu: 1400,
            retransmit_interval_ms: 1000,
            max_attempts: 5,
            ack_tick_ms: 200,
            hello_interval_ms: 5000,
            presence_timeout_ms: 20_000,
            presence_grace_ms: 60_000,
            transfer_timeout_ms: 60_000,
            send_window: 4,
            tx_queue_capacity: 1024,
            event_queue_capacity: 256,
            shutdown_drain_ms: 500,
            obfuscation_key: DEFAULT_OBFUSCATION_KEY.to_vec(),
        }
    }

    pub fn with_payload_mtu(mut self, v: usize) -> Self {
        self.payload_mtu = v;
        self
    }

    pub fn with_retransmit_interval_ms(mut self, v: u64) -> Self {
        self.retransmit_interval_ms = v;
        self
    }

    pub fn with_max_attempts(mut self, v: u32) -> Self {
        self.max_attempts = v;
        self
    }

    pub fn with_ack_tick_ms(mut self, v: u64) -> Self {
        self.ack_tick_ms = v;
        self
    }

    pub fn with_hello_interval_ms(mut self, v: u64) -> Self {
        self.hello_interval_ms = v;
        self
    }

    pub fn with_presence_timeout_ms(mut self, v: u64) -> Self {
        self.presence_timeout_ms = v;
        self
    }

    pub fn with_presence_grace_ms(mut self, v: u64) -> Self {
        self.presence_grace_ms = v;
        self
    }

    pub fn with_transfer_timeout_ms(mut self, v: u64) -> Self {
        self.transfer_timeout_ms = v;
        self
    }

    pub fn with_send_window(mut self, v: usize) -> Self {
        self.send_window = v;
        self
    }

    pub fn with_tx_queue_capacity(mut self, v: usize) -> Self {
        self.tx_queue_capacity = v;
        self
    }

    pub fn with_event_queue_capacity(mut self, v: usize) -> Self {
        self.event_queue_capacity = v;
        self
    }

    pub fn with_shutdown_drain_ms(mut self, v: u64) -> Self {
        self.shutdown_drain_ms = v;
        self
    }

    pub fn with_obfuscation_key(mut self, key: Vec<u8>) -> Self {
        self.obfuscation_key = key;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed shared secret used when no key is supplied. Not a secret in any
/// cryptographic sense: the XOR transform only keeps casual packet capture
/// from reading payloads in plain text.
const DEFAULT_OBFUSCATION_KEY: &[u8] = b"qbolapp-lan-link";
