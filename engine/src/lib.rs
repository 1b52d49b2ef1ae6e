//! Link-layer peer-to-peer LAN messaging and file-transfer engine.
//!
//! Operates directly on raw Ethernet frames tagged with a private
//! EtherType — no IP, no broker, no discovery service beyond periodic
//! link-local broadcasts.

mod ack;
mod config;
mod core;
mod engine;
mod error;
mod events;
mod filetransfer;
mod link;
mod peer;
mod presence;
mod receiver;
mod router;
mod txqueue;

pub use config::Config;
pub use core::FrameKind;
pub use engine::Engine;
pub use error::{Error, Result};
pub use events::{Event, EventReceiver};
pub use link::{ChannelLinkBus, ChannelLinkEndpoint, LinkEndpoint, PnetLinkEndpoint};
pub use peer::{PeerInfo, PeerState};
