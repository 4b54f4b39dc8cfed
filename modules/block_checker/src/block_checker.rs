//! Obelisk block checker module for Caryatid
//!
//! Owns the pool of unassociated header ranges. Channels pull chunks
//! over the get topic and restore what they did not finish over the
//! put topic; header organization extends the pool, disorganization
//! purges it.

mod map_queue;

pub use map_queue::MapQueue;

use std::sync::Arc;

use anyhow::Result;
use caryatid_sdk::{module, Context, Module};
use config::Config;
use tokio::sync::Mutex;
use tracing::{error, info};

use obelisk_common::{
    messages::{ChaseEvent, HashesMessage, Message},
    settings::{BitcoinSettings, NodeSettings},
};

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CheckerConfig {
    chase_topic: String,
    get_hashes_topic: String,
    put_hashes_topic: String,
    #[serde(default)]
    bitcoin: BitcoinSettings,
    #[serde(default)]
    node: NodeSettings,
}

impl CheckerConfig {
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

/// Block checker module
#[module(
    message_type(Message),
    name = "block-checker",
    description = "Unassociated block download pool"
)]
pub struct BlockChecker;

impl BlockChecker {
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let cfg = CheckerConfig::try_load(&config)?;
        let archive = obelisk_archive::shared(&cfg.bitcoin);

        let mut queue = MapQueue::new(archive.clone(), cfg.node.maximum_inventory);
        let fork_point = archive.get_fork();
        let added = queue.extend_from(fork_point);
        info!("Fork point ({fork_point}) unassociated ({added}).");
        let queue = Arc::new(Mutex::new(queue));

        // Hand out one chunk per request; empty means "no work".
        let get_queue = queue.clone();
        context.handle(&cfg.get_hashes_topic, move |_message: Arc<Message>| {
            let queue = get_queue.clone();
            async move {
                let map = queue.lock().await.pop();
                Arc::new(Message::Hashes(HashesMessage { map }))
            }
        });

        // Take back an unfinished chunk and re-advertise its size.
        let put_queue = queue.clone();
        let put_context = context.clone();
        let download_topic = cfg.chase_topic.clone();
        context.handle(&cfg.put_hashes_topic, move |message: Arc<Message>| {
            let queue = put_queue.clone();
            let context = put_context.clone();
            let topic = download_topic.clone();
            async move {
                if let Message::PutHashes(hashes) = message.as_ref() {
                    let count = queue.lock().await.restore(hashes.map.clone());
                    if count != 0 {
                        let event = Arc::new(Message::Chase(ChaseEvent::Download { count }));
                        context
                            .message_bus
                            .publish(&topic, event)
                            .await
                            .unwrap_or_else(|e| error!("Failed to publish: {e}"));
                    }
                } else {
                    error!("Unexpected message type on put topic: {message:?}");
                }
                Arc::new(Message::Ack(()))
            }
        });

        let mut subscription = context.subscribe(&cfg.chase_topic).await?;
        let chase_topic = cfg.chase_topic.clone();
        context.clone().run(async move {
            loop {
                let Ok((_, message)) = subscription.read().await else {
                    error!("Chase subscription read failed");
                    return;
                };
                let Message::Chase(event) = message.as_ref() else {
                    continue;
                };
                match event {
                    ChaseEvent::Header { branch_point } => {
                        let added = queue.lock().await.extend_from(*branch_point);
                        if added != 0 {
                            let event =
                                Arc::new(Message::Chase(ChaseEvent::Download { count: added }));
                            context
                                .message_bus
                                .publish(&chase_topic, event)
                                .await
                                .unwrap_or_else(|e| error!("Failed to publish: {e}"));
                        }
                    }
                    ChaseEvent::Disorganized { top_confirmed } => {
                        // Candidate chain has been reset from the fork
                        // point to the confirmed top, so every pooled
                        // hash is void. Channels see the purge before
                        // any subsequent download notify.
                        queue.lock().await.clear();
                        let event = Arc::new(Message::Chase(ChaseEvent::Purge {
                            top: *top_confirmed,
                        }));
                        context
                            .message_bus
                            .publish(&chase_topic, event)
                            .await
                            .unwrap_or_else(|e| error!("Failed to publish: {e}"));
                    }
                    ChaseEvent::Stop => {
                        queue.lock().await.clear();
                    }
                    _ => {}
                }
            }
        });

        Ok(())
    }
}
