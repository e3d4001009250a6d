//! Packet queue abstraction
//!
//! The reader pulls packets from a [`PacketQueue`] and answers each with
//! exactly one [`Verdict`]. Two sources are provided:
//!
//! - [`NfQueue`]: the kernel NFQUEUE (Linux, `nfqueue` feature), served on
//!   a dedicated thread through the [`bridge`]
//! - [`ChannelQueue`]: an in-memory queue fed over a tokio channel

use std::fmt;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::packet::Packet;

pub mod bridge;
pub mod channel;
#[cfg(all(target_os = "linux", feature = "nfqueue"))]
pub mod nfqueue;

pub use bridge::{spawn_bridge, BlockingSource, BridgedQueue};
pub use channel::{channel_queue, ChannelQueue, ChannelQueueHandle, QueuedPacket};
#[cfg(all(target_os = "linux", feature = "nfqueue"))]
pub use nfqueue::NfQueue;

/// Answer to one queued packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Let the packet continue, optionally marking it
    Accept {
        /// Mark to set, `None` to leave the packet's mark alone
        mark: Option<u32>,
    },
    /// Discard the packet
    Drop,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept { mark: Some(mark) } => write!(f, "accept(mark={mark})"),
            Self::Accept { mark: None } => write!(f, "accept"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

/// A source of packets and sink of verdicts
#[async_trait]
pub trait PacketQueue: Send {
    /// Wait for the next packet and load it into `packet`
    ///
    /// Cancel safe: if the future is dropped before completing, no packet
    /// is lost.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` once the source is gone for good; other
    /// errors are transient.
    async fn recv(&mut self, packet: &mut Packet) -> Result<(), QueueError>;

    /// Answer the packet most recently received
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the verdict cannot be delivered.
    async fn verdict(&mut self, packet: &Packet, verdict: Verdict) -> Result<(), QueueError>;
}
