//! One peer channel: the transport abstraction, the per-channel task,
//! and its protocol wiring.
//!
//! Everything a channel owns runs on its single task. Block download
//! work returns to the pool on any stop, so a dying peer never strands
//! a chunk.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use async_trait::async_trait;
use caryatid_sdk::Context;
use obelisk_archive::Archive;
use obelisk_common::{
    associations::AssociationMap,
    chain::ValidateError,
    messages::{
        ChaseEvent, HashesMessage, Message, OrganizeBlockMessage, OrganizeCode,
        OrganizeHeaderMessage, OrganizeOutcome,
    },
    settings::BitcoinSettings,
    ChannelId,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    block_in::BlockIn,
    block_in_legacy::BlockInLegacy,
    header_in::HeaderIn,
    network::{NetworkEvent, PeerEvent},
    wire::WireMessage,
};

/// Why a channel stopped. Only the channel is affected; global state
/// never is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Peer broke protocol: out-of-order or invalid data.
    ProtocolViolation,
    /// Peer sent a block we never requested.
    Unknown,
    /// Peer sent an invalid block.
    Invalid(ValidateError),
    /// Archive failure; fatal beyond this channel.
    StoreIntegrity,
    /// Transport closed.
    Disconnected,
    /// No traffic within the idle window.
    Idle,
    /// The session found this channel too slow.
    Stalled,
    /// Global shutdown.
    ServiceStopped,
}

/// Abstract peer transport: send/receive of typed messages. The byte
/// codec and socket live behind implementations of this trait.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&mut self, message: WireMessage) -> Result<()>;
    async fn recv(&mut self) -> Result<WireMessage>;
}

/// In-memory duplex transport, for tests and injected peers.
pub struct MemoryTransport {
    tx: mpsc::Sender<WireMessage>,
    rx: mpsc::Receiver<WireMessage>,
}

/// A connected transport pair: messages sent on one side arrive on the
/// other.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::channel(64);
    let (b_tx, b_rx) = mpsc::channel(64);
    (
        MemoryTransport { tx: a_tx, rx: b_rx },
        MemoryTransport { tx: b_tx, rx: a_rx },
    )
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        if self.tx.send(message).await.is_err() {
            bail!("peer closed");
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<WireMessage> {
        match self.rx.recv().await {
            Some(message) => Ok(message),
            None => bail!("peer closed"),
        }
    }
}

/// Per-channel settings snapshot.
#[derive(Clone)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub witness: bool,
    pub header_first: bool,
    pub peer_version: u32,
    pub performance_interval: Duration,
    pub idle_timeout: Duration,
    pub chase_topic: String,
    pub organize_header_topic: String,
    pub organize_block_topic: String,
    pub get_hashes_topic: String,
    pub put_hashes_topic: String,
    pub bitcoin: BitcoinSettings,
}

/// Spawn a channel task over the given transport.
pub fn spawn_channel(
    context: Arc<Context<Message>>,
    archive: Arc<dyn Archive>,
    config: ChannelConfig,
    transport: Box<dyn PeerTransport>,
    events: mpsc::Sender<NetworkEvent>,
) {
    tokio::spawn(run_channel(context, archive, config, transport, events));
}

struct Channel {
    context: Arc<Context<Message>>,
    archive: Arc<dyn Archive>,
    config: ChannelConfig,
    transport: Box<dyn PeerTransport>,
    events: mpsc::Sender<NetworkEvent>,
    header_in: Option<HeaderIn>,
    block_in: BlockIn,
    legacy: Option<BlockInLegacy>,
}

async fn run_channel(
    context: Arc<Context<Message>>,
    archive: Arc<dyn Archive>,
    config: ChannelConfig,
    transport: Box<dyn PeerTransport>,
    events: mpsc::Sender<NetworkEvent>,
) {
    let block_in = BlockIn::new(config.witness);
    let mut channel = Channel {
        context,
        archive,
        config,
        transport,
        events,
        header_in: None,
        block_in,
        legacy: None,
    };

    let reason = channel.run().await;
    channel.stopping(reason).await;
}

impl Channel {
    fn id(&self) -> ChannelId {
        self.config.id
    }

    async fn run(&mut self) -> StopReason {
        let id = self.id();
        let _ = self
            .events
            .send(NetworkEvent::PeerUpdate {
                peer: id,
                event: PeerEvent::Started,
            })
            .await;

        if let Some(reason) = self.start_protocols().await {
            return reason;
        }

        let mut chase = match self.context.subscribe(&self.config.chase_topic).await {
            Ok(subscription) => subscription,
            Err(error) => {
                error!(%id, "chase subscription failed: {error}");
                return StopReason::ServiceStopped;
            }
        };

        let mut performance = tokio::time::interval(self.config.performance_interval);
        performance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The legacy path keeps a perpetual locator timer as its
        // heartbeat.
        let mut locator = tokio::time::interval(Duration::from_secs(1));
        locator.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_activity = Instant::now();

        // The select only decides what woke us; handling happens
        // after, with the transport borrow released.
        enum Tick {
            Wire(Result<WireMessage>),
            Chase(Arc<Message>),
            BusClosed,
            Performance,
            Locator,
        }

        loop {
            let tick = tokio::select! {
                received = self.transport.recv() => Tick::Wire(received),
                read = chase.read() => match read {
                    Ok((_, message)) => Tick::Chase(message),
                    Err(_) => Tick::BusClosed,
                },
                _ = performance.tick() => Tick::Performance,
                _ = locator.tick() => Tick::Locator,
            };

            match tick {
                Tick::Wire(received) => {
                    let Ok(message) = received else {
                        return StopReason::Disconnected;
                    };
                    last_activity = Instant::now();
                    if let Err(reason) = self.handle_wire(message).await {
                        return reason;
                    }
                }
                Tick::Chase(message) => {
                    if let Message::Chase(event) = message.as_ref() {
                        if let Some(reason) = self.handle_chase(event).await {
                            return reason;
                        }
                    }
                }
                Tick::BusClosed => return StopReason::ServiceStopped,
                Tick::Performance => {
                    if last_activity.elapsed() > self.config.idle_timeout {
                        return StopReason::Idle;
                    }
                    let rate = self.block_in.rate();
                    let remaining = self.block_in.remaining();
                    let _ = self
                        .events
                        .send(NetworkEvent::PeerUpdate {
                            peer: id,
                            event: PeerEvent::Rate { rate, remaining },
                        })
                        .await;
                }
                Tick::Locator => {
                    if let Some(legacy) = self.legacy.as_ref() {
                        let request = legacy.heartbeat_request(self.archive.as_ref());
                        if self.transport.send(request).await.is_err() {
                            return StopReason::Disconnected;
                        }
                    }
                }
            }
        }
    }

    /// Attach the protocols this channel runs and fire their opening
    /// requests.
    async fn start_protocols(&mut self) -> Option<StopReason> {
        if self.config.header_first {
            let Some(header_in) =
                HeaderIn::start(self.archive.as_ref(), self.config.bitcoin.clone())
            else {
                return Some(StopReason::StoreIntegrity);
            };
            self.header_in = Some(header_in);

            let request = HeaderIn::initial_request(self.archive.as_ref());
            if self.transport.send(request).await.is_err() {
                return Some(StopReason::Disconnected);
            }

            if let Some(reason) = self.pull_work().await {
                return Some(reason);
            }
        } else {
            let legacy = BlockInLegacy::new(self.config.peer_version);
            for message in legacy.startup_messages() {
                if self.transport.send(message).await.is_err() {
                    return Some(StopReason::Disconnected);
                }
            }
            self.legacy = Some(legacy);
        }
        None
    }

    async fn handle_wire(&mut self, message: WireMessage) -> Result<(), StopReason> {
        match message {
            WireMessage::Headers(headers) => {
                if self.header_in.is_some() {
                    let disposition = self
                        .header_in
                        .as_mut()
                        .expect("header protocol attached")
                        .handle_headers(&headers)?;
                    for header in disposition.organize {
                        let outcome = self.organize_header(header).await;
                        if outcome.code.is_fatal() {
                            return Err(StopReason::StoreIntegrity);
                        }
                    }
                    if let Some(request) = disposition.next_request {
                        if self.transport.send(request).await.is_err() {
                            return Err(StopReason::Disconnected);
                        }
                    }
                } else if let Some(legacy) = self.legacy.as_ref() {
                    if let Some(request) = legacy.handle_headers(&headers, self.archive.as_ref()) {
                        if self.transport.send(request).await.is_err() {
                            return Err(StopReason::Disconnected);
                        }
                    }
                }
            }
            WireMessage::Block(block) => {
                if self.header_in.is_some() {
                    let disposition = self.block_in.handle_block(&block, self.archive.as_ref())?;
                    self.publish_chase(ChaseEvent::Checked {
                        height: disposition.checked,
                    })
                    .await;
                    if disposition.refill {
                        debug!(id = %self.id(), "getting more block hashes");
                        if let Some(reason) = self.pull_work().await {
                            return Err(reason);
                        }
                    }
                } else {
                    let outcome = self.organize_block(*block).await;
                    match outcome.code {
                        OrganizeCode::Success => {}
                        // Redundant blocks are a common, harmless result.
                        OrganizeCode::Duplicate => {
                            debug!(id = %self.id(), "redundant block");
                        }
                        code if code.is_fatal() => return Err(StopReason::StoreIntegrity),
                        code => {
                            warn!(id = %self.id(), ?code, "block rejected");
                            return Err(StopReason::ProtocolViolation);
                        }
                    }
                }
            }
            WireMessage::Inv(items) => {
                if let Some(legacy) = self.legacy.as_ref() {
                    if let Some(request) = legacy.handle_inventory(&items, self.archive.as_ref()) {
                        if self.transport.send(request).await.is_err() {
                            return Err(StopReason::Disconnected);
                        }
                    }
                }
            }
            WireMessage::NotFound(items) => {
                if let Some(legacy) = self.legacy.as_ref() {
                    legacy.handle_not_found(&items);
                }
            }
            // The serving side lives elsewhere; ignore politely.
            other => debug!(id = %self.id(), ?other, "unhandled wire message"),
        }
        Ok(())
    }

    async fn handle_chase(&mut self, event: &ChaseEvent) -> Option<StopReason> {
        let id = self.id();
        match event {
            ChaseEvent::Download { .. } => {
                if self.config.header_first && self.block_in.is_idle() {
                    if let Some(reason) = self.pull_work().await {
                        return Some(reason);
                    }
                }
            }
            ChaseEvent::Purge { .. } => {
                // All in-flight work is void; drop without restore.
                let dropped = self.block_in.take_map();
                if !dropped.is_empty() {
                    info!(%id, count = dropped.len(), "work purged");
                }
            }
            ChaseEvent::Split { channel } if *channel == id => {
                let half = self.block_in.split();
                info!(%id, count = half.len(), "work split off");
                self.restore(half).await;
            }
            ChaseEvent::Starved { channel } if *channel == id => {
                let map = self.block_in.take_map();
                self.restore(map).await;
            }
            ChaseEvent::Stall { channel } if *channel == id => {
                return Some(StopReason::Stalled);
            }
            ChaseEvent::Stop => return Some(StopReason::ServiceStopped),
            _ => {}
        }
        None
    }

    /// Pull one chunk from the checker; empty means idle until the
    /// next download notify.
    async fn pull_work(&mut self) -> Option<StopReason> {
        let request = Arc::new(Message::GetHashes(()));
        let response = match self
            .context
            .message_bus
            .request(&self.config.get_hashes_topic, request)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                error!(id = %self.id(), "get hashes failed: {error}");
                return Some(StopReason::ServiceStopped);
            }
        };

        let map = match response.as_ref() {
            Message::Hashes(HashesMessage { map }) => map.clone(),
            other => {
                error!(id = %self.id(), "unexpected get hashes response: {other:?}");
                return Some(StopReason::ServiceStopped);
            }
        };

        match self.block_in.adopt(map) {
            Some(request) => {
                if self.transport.send(request).await.is_err() {
                    return Some(StopReason::Disconnected);
                }
            }
            None => {
                debug!(id = %self.id(), "exhausted block hashes");
                let _ = self
                    .events
                    .send(NetworkEvent::PeerUpdate {
                        peer: self.id(),
                        event: PeerEvent::Starved,
                    })
                    .await;
            }
        }
        None
    }

    /// Return an unfinished chunk to the back of the pool.
    async fn restore(&self, map: AssociationMap) {
        if map.is_empty() {
            return;
        }
        let request = Arc::new(Message::PutHashes(HashesMessage { map }));
        if let Err(error) = self
            .context
            .message_bus
            .request(&self.config.put_hashes_topic, request)
            .await
        {
            error!(id = %self.id(), "put hashes failed: {error}");
        }
    }

    async fn organize_header(&self, header: obelisk_common::chain::Header) -> OrganizeOutcome {
        let request = Arc::new(Message::OrganizeHeader(OrganizeHeaderMessage { header }));
        self.organize(&self.config.organize_header_topic, request).await
    }

    async fn organize_block(&self, block: obelisk_common::chain::Block) -> OrganizeOutcome {
        let request = Arc::new(Message::OrganizeBlock(OrganizeBlockMessage { block }));
        self.organize(&self.config.organize_block_topic, request).await
    }

    async fn organize(&self, topic: &str, request: Arc<Message>) -> OrganizeOutcome {
        match self.context.message_bus.request(topic, request).await {
            Ok(response) => match response.as_ref() {
                Message::OrganizeOutcome(outcome) => outcome.clone(),
                other => {
                    error!(id = %self.id(), "unexpected organize response: {other:?}");
                    OrganizeOutcome::new(OrganizeCode::Stopped, 0)
                }
            },
            Err(error) => {
                error!(id = %self.id(), "organize request failed: {error}");
                OrganizeOutcome::new(OrganizeCode::Stopped, 0)
            }
        }
    }

    async fn publish_chase(&self, event: ChaseEvent) {
        let message = Arc::new(Message::Chase(event));
        self.context
            .message_bus
            .publish(&self.config.chase_topic, message)
            .await
            .unwrap_or_else(|e| error!("Failed to publish: {e}"));
    }

    /// Stop: return outstanding work, tell the session, drop the
    /// transport.
    async fn stopping(mut self, reason: StopReason) {
        let id = self.id();
        warn!(%id, ?reason, "channel stopping");
        let map = self.block_in.take_map();
        self.restore(map).await;
        let _ = self
            .events
            .send(NetworkEvent::PeerUpdate {
                peer: id,
                event: PeerEvent::Disconnected,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_is_full_duplex() {
        let (mut near, mut far) = memory_pair();
        near.send(WireMessage::Verack).await.unwrap();
        assert_eq!(far.recv().await.unwrap(), WireMessage::Verack);

        far.send(WireMessage::SendHeaders).await.unwrap();
        assert_eq!(near.recv().await.unwrap(), WireMessage::SendHeaders);
    }

    #[tokio::test]
    async fn dropped_side_errors_cleanly() {
        let (mut near, far) = memory_pair();
        drop(far);
        assert!(near.send(WireMessage::Verack).await.is_err());
        assert!(near.recv().await.is_err());
    }
}
