//! Kernel NFQUEUE packet source
//!
//! `nfq` reads and answers packets with blocking netlink calls, so the queue
//! is opened and served on its own thread through [`spawn_bridge`]. The
//! reader task only ever sees the async side.

use async_trait::async_trait;
use nfq::{Message, Queue};
use tracing::info;

use super::bridge::{spawn_bridge, BlockingSource, BridgedQueue};
use super::channel::QueuedPacket;
use super::{PacketQueue, Verdict};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::packet::Packet;

/// Bound netlink queue, owned by the bridge thread
struct NfqSource {
    queue: Queue,
}

impl NfqSource {
    fn open(config: &QueueConfig) -> Result<Self, QueueError> {
        let number = config.number;
        let mut queue = Queue::open().map_err(|e| QueueError::Open(e.to_string()))?;
        queue
            .bind(number)
            .map_err(|e| QueueError::bind(number, e.to_string()))?;
        queue
            .set_copy_range(number, config.copy_range)
            .map_err(|e| QueueError::bind(number, format!("copy range: {e}")))?;
        queue
            .set_queue_max_len(number, config.max_length)
            .map_err(|e| QueueError::bind(number, format!("max length: {e}")))?;

        info!(
            queue = number,
            copy_range = config.copy_range,
            max_length = config.max_length,
            "NFQUEUE bound"
        );
        Ok(Self { queue })
    }
}

impl BlockingSource for NfqSource {
    type Message = Message;

    fn recv(&mut self) -> Result<(QueuedPacket, Message), QueueError> {
        let message = self.queue.recv()?;
        let packet = QueuedPacket {
            id: 0,
            source_interface: message.get_indev(),
            mark: match message.get_nfmark() {
                0 => None,
                mark => Some(mark),
            },
            nat: None,
            payload: message.get_payload().to_vec(),
        };
        Ok((packet, message))
    }

    fn verdict(&mut self, mut message: Message, verdict: Verdict) -> Result<(), QueueError> {
        match verdict {
            Verdict::Accept { mark } => {
                if let Some(mark) = mark {
                    message.set_nfmark(mark);
                }
                message.set_verdict(nfq::Verdict::Accept);
            }
            Verdict::Drop => message.set_verdict(nfq::Verdict::Drop),
        }
        self.queue.verdict(message)?;
        Ok(())
    }
}

/// NFQUEUE bound to one queue number
#[derive(Debug)]
pub struct NfQueue {
    inner: BridgedQueue,
    number: u16,
}

impl NfQueue {
    /// Open and bind the queue described by `config`
    ///
    /// The netlink socket is opened on a dedicated thread; this returns once
    /// the bind has succeeded or failed.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Open` if the netlink socket cannot be created
    /// and `QueueError::Bind` if the queue number cannot be taken.
    pub fn open(config: &QueueConfig) -> Result<Self, QueueError> {
        let number = config.number;
        let config = config.clone();
        let inner = spawn_bridge(&format!("nfqueue-{number}"), move || {
            NfqSource::open(&config)
        })?;
        Ok(Self { inner, number })
    }

    /// Queue number
    #[must_use]
    pub const fn number(&self) -> u16 {
        self.number
    }
}

#[async_trait]
impl PacketQueue for NfQueue {
    async fn recv(&mut self, packet: &mut Packet) -> Result<(), QueueError> {
        self.inner.recv(packet).await
    }

    async fn verdict(&mut self, packet: &Packet, verdict: Verdict) -> Result<(), QueueError> {
        self.inner.verdict(packet, verdict).await
    }
}
