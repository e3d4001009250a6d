//! The reader: the packet event loop
//!
//! One task owns the active chain, the packet queue and a single reusable
//! [`Packet`]. It waits on two sources, control messages first:
//!
//! - **Control**: every pending message is drained. `NewChain` adopts the
//!   new chain, which destroys instances the old one does not carry over.
//!   `Shutdown` releases the chain and ends the loop.
//! - **Packet**: one packet is read, scored, answered, and the buffer is
//!   kept for the next one.
//!
//! Until the first chain arrives every packet passes through unmarked.

pub mod stats;

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::chain::{Chain, Decision, PendingChain};
use crate::error::{QueueError, ReaderError};
use crate::packet::Packet;
use crate::queue::PacketQueue;

pub use stats::{IntervalLog, SplitStats};

/// Pause after a transient queue error before reading again
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Control message for the reader
#[derive(Debug)]
pub enum ReaderMessage {
    /// Adopt this chain
    NewChain(PendingChain),
    /// Release the chain and stop
    Shutdown,
}

/// Sending side of the reader's control inbox
#[derive(Debug, Clone)]
pub struct ReaderHandle {
    tx: mpsc::UnboundedSender<ReaderMessage>,
}

impl ReaderHandle {
    /// Hand a chain to the reader without waiting for it to be adopted
    ///
    /// # Errors
    ///
    /// Returns `ReaderError::NotRunning` if the reader has exited; the chain
    /// and its new instances are dropped.
    pub fn publish(&self, chain: PendingChain) -> Result<(), ReaderError> {
        self.tx
            .send(ReaderMessage::NewChain(chain))
            .map_err(|_| ReaderError::NotRunning)
    }

    /// Ask the reader to stop
    ///
    /// # Errors
    ///
    /// Returns `ReaderError::NotRunning` if the reader has already exited.
    pub fn shutdown(&self) -> Result<(), ReaderError> {
        self.tx
            .send(ReaderMessage::Shutdown)
            .map_err(|_| ReaderError::NotRunning)
    }

    /// Whether the reader is still accepting messages
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<ReaderMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

enum Event {
    Control(Option<ReaderMessage>),
    Packet(Result<(), QueueError>),
}

/// The packet event loop
pub struct Reader<Q, R = StdRng> {
    queue: Q,
    inbox: mpsc::UnboundedReceiver<ReaderMessage>,
    chain: Option<Chain>,
    packet: Packet,
    rng: R,
    stats: SplitStats,
    interval: IntervalLog,
    queue_open: bool,
}

impl<Q: PacketQueue + 'static> Reader<Q> {
    /// Create a reader over `queue` with an entropy-seeded RNG
    #[must_use]
    pub fn new(queue: Q) -> (Self, ReaderHandle) {
        Self::with_rng(queue, StdRng::from_entropy())
    }
}

impl<Q, R> Reader<Q, R>
where
    Q: PacketQueue + 'static,
    R: Rng + Send + 'static,
{
    /// Create a reader with an explicit random source
    #[must_use]
    pub fn with_rng(queue: Q, rng: R) -> (Self, ReaderHandle) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let reader = Self {
            queue,
            inbox,
            chain: None,
            packet: Packet::default(),
            rng,
            stats: SplitStats::default(),
            interval: IntervalLog::new(0, Instant::now()),
            queue_open: true,
        };
        (reader, ReaderHandle { tx })
    }

    /// Run the loop on a new task
    pub fn spawn(self) -> JoinHandle<SplitStats> {
        tokio::spawn(self.run())
    }

    /// Run until `Shutdown` or until every handle is dropped
    ///
    /// Returns the counters accumulated over the run.
    pub async fn run(mut self) -> SplitStats {
        info!("Reader started");

        loop {
            let event = tokio::select! {
                biased;
                message = self.inbox.recv() => Event::Control(message),
                result = self.queue.recv(&mut self.packet), if self.queue_open => Event::Packet(result),
            };

            match event {
                Event::Control(Some(message)) => {
                    if !self.drain(message) {
                        break;
                    }
                }
                Event::Control(None) => {
                    info!("All reader handles dropped, stopping");
                    break;
                }
                Event::Packet(Ok(())) => self.handle_packet().await,
                Event::Packet(Err(QueueError::Closed)) => {
                    warn!("Packet queue closed, serving control messages only");
                    self.queue_open = false;
                }
                Event::Packet(Err(e)) if e.is_recoverable() => {
                    warn!(error = %e, "Packet queue read failed");
                    tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                }
                Event::Packet(Err(e)) => {
                    error!(error = %e, "Packet queue failed, serving control messages only");
                    self.queue_open = false;
                }
            }
        }

        if let Some(chain) = self.chain.take() {
            debug!(rules = chain.len(), "Releasing active chain");
        }
        info!(stats = %self.stats, "Reader stopped");
        self.stats
    }

    /// Handle `first` and everything queued behind it
    ///
    /// Returns `false` once `Shutdown` is seen.
    fn drain(&mut self, first: ReaderMessage) -> bool {
        let mut next = Some(first);
        while let Some(message) = next {
            match message {
                ReaderMessage::NewChain(pending) => self.adopt(pending),
                ReaderMessage::Shutdown => {
                    info!("Reader shutdown requested");
                    return false;
                }
            }
            next = self.inbox.try_recv().ok();
        }
        true
    }

    fn adopt(&mut self, pending: PendingChain) {
        let chain = pending.adopt(self.chain.take());
        let snapshot = chain.snapshot();
        self.interval
            .set_interval(snapshot.config.log_interval_seconds);
        info!(
            enabled = snapshot.enabled(),
            uplinks = snapshot.uplinks.len(),
            rules = chain.len(),
            "Chain adopted"
        );
        self.stats.chains += 1;
        self.chain = Some(chain);
    }

    async fn handle_packet(&mut self) {
        self.stats.packets += 1;

        let parsed = self.packet.parse().map(|_| ());
        let decision = match parsed {
            Err(e) => {
                trace!(packet = self.packet.id(), error = %e, "Unparsed packet, passing through");
                self.stats.unparsed += 1;
                Decision::PassThrough
            }
            Ok(()) => match self.chain.as_mut() {
                Some(chain) => chain.process(&self.packet, &mut self.rng),
                None => Decision::PassThrough,
            },
        };

        self.stats.record(&decision);
        if let Decision::Route { uplink, .. } = decision {
            self.interval.count(uplink);
        }

        let verdict = decision.verdict();
        if let Err(e) = self.queue.verdict(&self.packet, verdict).await {
            warn!(packet = self.packet.id(), %verdict, error = %e, "Verdict failed");
        }

        self.interval.flush_if_due(Instant::now());
    }
}
