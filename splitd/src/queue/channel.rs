//! In-memory packet queue
//!
//! [`channel_queue`] returns the queue, for the reader, and a handle that
//! injects packets and collects the verdicts issued for them. Dropping the
//! handle's sender closes the queue.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{PacketQueue, Verdict};
use crate::error::QueueError;
use crate::packet::{NatInfo, Packet};

/// A packet waiting in a [`ChannelQueue`]
#[derive(Debug, Clone, Default)]
pub struct QueuedPacket {
    /// Packet ID echoed back with the verdict
    pub id: u32,
    /// Interface index the packet arrived on
    pub source_interface: u32,
    /// Mark already on the packet
    pub mark: Option<u32>,
    /// Conntrack tuples, if the source knows them
    pub nat: Option<NatInfo>,
    /// Raw IP packet
    pub payload: Vec<u8>,
}

impl QueuedPacket {
    /// Packet with just an ID and payload
    #[must_use]
    pub fn new(id: u32, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload,
            ..Self::default()
        }
    }
}

/// Reader side of an in-memory queue
#[derive(Debug)]
pub struct ChannelQueue {
    packets: mpsc::Receiver<QueuedPacket>,
    verdicts: mpsc::UnboundedSender<(u32, Verdict)>,
}

/// Injection side of an in-memory queue
#[derive(Debug)]
pub struct ChannelQueueHandle {
    /// Packet injector
    pub packets: mpsc::Sender<QueuedPacket>,
    /// Verdicts, tagged with the packet ID
    pub verdicts: mpsc::UnboundedReceiver<(u32, Verdict)>,
}

impl ChannelQueueHandle {
    /// Inject a packet, waiting for room
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` if the queue has been dropped.
    pub async fn send(&self, packet: QueuedPacket) -> Result<(), QueueError> {
        self.packets.send(packet).await.map_err(|_| QueueError::Closed)
    }

    /// Wait for the next verdict
    pub async fn next_verdict(&mut self) -> Option<(u32, Verdict)> {
        self.verdicts.recv().await
    }
}

/// Create an in-memory queue holding up to `capacity` waiting packets
#[must_use]
pub fn channel_queue(capacity: usize) -> (ChannelQueue, ChannelQueueHandle) {
    let (packet_tx, packet_rx) = mpsc::channel(capacity.max(1));
    let (verdict_tx, verdict_rx) = mpsc::unbounded_channel();
    (
        ChannelQueue {
            packets: packet_rx,
            verdicts: verdict_tx,
        },
        ChannelQueueHandle {
            packets: packet_tx,
            verdicts: verdict_rx,
        },
    )
}

#[async_trait]
impl PacketQueue for ChannelQueue {
    async fn recv(&mut self, packet: &mut Packet) -> Result<(), QueueError> {
        let queued = self.packets.recv().await.ok_or(QueueError::Closed)?;
        packet.load(queued.id, queued.source_interface, queued.mark, &queued.payload);
        if let Some(nat) = queued.nat {
            packet.set_nat(nat);
        }
        Ok(())
    }

    async fn verdict(&mut self, packet: &Packet, verdict: Verdict) -> Result<(), QueueError> {
        // A vanished observer is not the reader's problem
        let _ = self.verdicts.send((packet.id(), verdict));
        Ok(())
    }
}
