//! Thread bridge for blocking packet sources
//!
//! Some sources can only be read with blocking calls. [`spawn_bridge`]
//! opens such a source on a dedicated thread and pumps it in lock-step with
//! the reader: one packet goes out over a [`ChannelQueue`], the thread waits
//! for that packet's verdict, applies it, then reads the next packet.
//!
//! ```text
//! bridge thread                          reader task
//!   source.recv()  ── QueuedPacket ──>   ChannelQueue::recv
//!   source.verdict <── (id, Verdict) ──  ChannelQueue::verdict
//! ```
//!
//! When the reader side is dropped the thread accepts whatever it holds and
//! exits after its next read returns.

use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::channel::{channel_queue, ChannelQueue, ChannelQueueHandle, QueuedPacket};
use super::{PacketQueue, Verdict};
use crate::error::QueueError;
use crate::packet::Packet;

/// Pause after a transient read error before reading again
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// A packet source read with blocking calls
///
/// Lives on the bridge thread only, so it need not be `Send`.
pub trait BlockingSource {
    /// Source-specific handle for a packet awaiting its verdict
    type Message;

    /// Block until the next packet arrives
    ///
    /// The returned packet's `id` is assigned by the bridge.
    ///
    /// # Errors
    ///
    /// Recoverable errors are retried; any other error stops the bridge.
    fn recv(&mut self) -> Result<(QueuedPacket, Self::Message), QueueError>;

    /// Answer a packet returned by [`recv`](Self::recv)
    ///
    /// # Errors
    ///
    /// Returns the source's error; the bridge logs it and carries on.
    fn verdict(&mut self, message: Self::Message, verdict: Verdict) -> Result<(), QueueError>;
}

/// Async side of a bridged blocking source
#[derive(Debug)]
pub struct BridgedQueue {
    queue: ChannelQueue,
    thread: Option<JoinHandle<()>>,
}

impl BridgedQueue {
    /// Whether the bridge thread has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

#[async_trait]
impl PacketQueue for BridgedQueue {
    async fn recv(&mut self, packet: &mut Packet) -> Result<(), QueueError> {
        self.queue.recv(packet).await
    }

    async fn verdict(&mut self, packet: &Packet, verdict: Verdict) -> Result<(), QueueError> {
        self.queue.verdict(packet, verdict).await
    }
}

/// Open a source with `open` on a new thread named `name` and bridge it
///
/// Returns once `open` has finished on the thread.
///
/// # Errors
///
/// Returns the error from `open`, or `QueueError::Open` if the thread
/// cannot be started.
pub fn spawn_bridge<S, F>(name: &str, open: F) -> Result<BridgedQueue, QueueError>
where
    S: BlockingSource,
    F: FnOnce() -> Result<S, QueueError> + Send + 'static,
{
    let (queue, handle) = channel_queue(1);
    let (opened_tx, opened_rx) = std_mpsc::sync_channel(1);

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match open() {
            Ok(source) => {
                let _ = opened_tx.send(Ok(()));
                pump(source, handle);
            }
            Err(e) => {
                let _ = opened_tx.send(Err(e));
            }
        })
        .map_err(|e| QueueError::Open(format!("bridge thread: {e}")))?;

    match opened_rx.recv() {
        Ok(Ok(())) => Ok(BridgedQueue {
            queue,
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(QueueError::Open("bridge thread exited while opening".into()))
        }
    }
}

/// Move packets from `source` to the reader until either side goes away
fn pump<S: BlockingSource>(mut source: S, mut handle: ChannelQueueHandle) {
    info!("Queue bridge started");
    let mut next_id = 0u32;

    loop {
        let (mut packet, message) = match source.recv() {
            Ok(received) => received,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Queue read failed, retrying");
                thread::sleep(READ_ERROR_BACKOFF);
                continue;
            }
            Err(e) => {
                error!(error = %e, "Queue read failed, stopping bridge");
                break;
            }
        };

        next_id = next_id.wrapping_add(1);
        packet.id = next_id;
        if handle.packets.blocking_send(packet).is_err() {
            answer(&mut source, message, Verdict::Accept { mark: None });
            break;
        }

        match wait_for_verdict(&mut handle, next_id) {
            Some(verdict) => answer(&mut source, message, verdict),
            None => {
                answer(&mut source, message, Verdict::Accept { mark: None });
                break;
            }
        }
    }

    info!("Queue bridge stopped");
}

/// Verdict for packet `id`, or `None` once the reader is gone
fn wait_for_verdict(handle: &mut ChannelQueueHandle, id: u32) -> Option<Verdict> {
    loop {
        match handle.verdicts.blocking_recv()? {
            (verdict_id, verdict) if verdict_id == id => return Some(verdict),
            (stale, _) => debug!(packet = stale, expected = id, "Ignoring stale verdict"),
        }
    }
}

fn answer<S: BlockingSource>(source: &mut S, message: S::Message, verdict: Verdict) {
    if let Err(e) = source.verdict(message, verdict) {
        warn!(%verdict, error = %e, "Verdict failed");
    }
}
