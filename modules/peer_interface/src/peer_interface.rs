//! Obelisk peer interface module for Caryatid
//!
//! Hosts peer channels and the session policy over them. Each channel
//! runs its own task: a header-in protocol feeding the organizer and a
//! block-in protocol pulling download work from the checker (or, when
//! header-first sync is off, the legacy inventory-driven path).
//!
//! The wire transport is abstract. The embedding process registers a
//! [`Connector`] before startup; the module dials the configured peer
//! addresses through it and attaches one channel per connection. Tests
//! attach channels directly over [`memory_pair`] transports.

mod block_in;
mod block_in_legacy;
mod connection;
mod header_in;
mod network;
mod wire;

pub use block_in::BlockIn;
pub use block_in_legacy::BlockInLegacy;
pub use connection::{
    memory_pair, spawn_channel, ChannelConfig, MemoryTransport, PeerTransport, StopReason,
};
pub use header_in::HeaderIn;
pub use network::{NetworkEvent, NetworkManager, PeerEvent};
pub use wire::{
    locator_heights, InventoryItem, InventoryType, Locator, WireMessage, MAX_GET_BLOCKS,
    MAX_GET_HEADERS, MAX_INVENTORY, SEND_HEADERS_VERSION,
};

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use caryatid_sdk::{module, Context, Module};
use config::Config;
use obelisk_common::{messages::Message, settings::BitcoinSettings, ChannelId};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Dials peers for the module. Registered once by the embedding
/// process; the wire codec and socket live behind it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn PeerTransport>>;
}

static CONNECTOR: OnceLock<Box<dyn Connector>> = OnceLock::new();

/// Register the process-wide transport connector. Later registrations
/// are ignored.
pub fn register_connector(connector: Box<dyn Connector>) {
    let _ = CONNECTOR.set(connector);
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct InterfaceConfig {
    chase_topic: String,
    organize_header_topic: String,
    organize_block_topic: String,
    get_hashes_topic: String,
    put_hashes_topic: String,
    outbound_connections: usize,
    witness_node: bool,
    header_first: bool,
    peer_version: u32,
    performance_interval_secs: u64,
    idle_timeout_secs: u64,
    minimum_rate_bytes: u64,
    peer_addresses: Vec<String>,
    #[serde(default)]
    bitcoin: BitcoinSettings,
}

impl InterfaceConfig {
    fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        Ok(full_config.try_deserialize()?)
    }
}

/// Peer interface module
#[module(
    message_type(Message),
    name = "peer-interface",
    description = "Peer channels for header and block ingest"
)]
pub struct PeerInterface;

impl PeerInterface {
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let cfg = InterfaceConfig::try_load(&config)?;
        let archive = obelisk_archive::shared(&cfg.bitcoin);

        let (events_sender, events) = mpsc::channel(1024);
        let manager = NetworkManager::new(
            context.clone(),
            cfg.chase_topic.clone(),
            cfg.minimum_rate_bytes,
            events,
        );
        context.clone().run(async move {
            manager.run().await;
        });

        let template = ChannelConfig {
            id: ChannelId(0),
            witness: cfg.witness_node,
            header_first: cfg.header_first,
            peer_version: cfg.peer_version,
            performance_interval: Duration::from_secs(cfg.performance_interval_secs),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
            chase_topic: cfg.chase_topic,
            organize_header_topic: cfg.organize_header_topic,
            organize_block_topic: cfg.organize_block_topic,
            get_hashes_topic: cfg.get_hashes_topic,
            put_hashes_topic: cfg.put_hashes_topic,
            bitcoin: cfg.bitcoin,
        };

        let addresses: Vec<String> =
            cfg.peer_addresses.iter().take(cfg.outbound_connections).cloned().collect();
        context.clone().run(async move {
            let Some(connector) = CONNECTOR.get() else {
                if !addresses.is_empty() {
                    warn!("peer addresses configured but no transport connector registered");
                }
                return;
            };
            for (slot, address) in addresses.iter().enumerate() {
                match connector.connect(address).await {
                    Ok(transport) => {
                        let config = ChannelConfig {
                            id: ChannelId(slot as u64),
                            ..template.clone()
                        };
                        info!(channel = %config.id, %address, "peer connected");
                        spawn_channel(
                            context.clone(),
                            archive.clone(),
                            config,
                            transport,
                            events_sender.clone(),
                        );
                    }
                    Err(error) => {
                        warn!(%address, "could not connect peer: {error:#}");
                    }
                }
            }
        });

        Ok(())
    }
}
