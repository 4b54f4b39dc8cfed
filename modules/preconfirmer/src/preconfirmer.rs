//! Obelisk preconfirmer module for Caryatid
//!
//! Drives in-order block acceptance over the candidate chain from
//! out-of-order arrival events. Checked blocks arrive in any order;
//! the advance itself is strictly height-ordered.

mod advancer;

pub use advancer::Advancer;

use std::sync::Arc;

use anyhow::Result;
use caryatid_sdk::{module, Context, Module};
use config::Config;
use tracing::error;

use obelisk_common::{
    messages::{ChaseEvent, Message},
    settings::BitcoinSettings,
};

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PreconfirmerConfig {
    chase_topic: String,
    #[serde(default)]
    bitcoin: BitcoinSettings,
}

impl PreconfirmerConfig {
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

/// Preconfirmer module
#[module(
    message_type(Message),
    name = "preconfirmer",
    description = "In-order block accept/connect advance"
)]
pub struct Preconfirmer;

impl Preconfirmer {
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let cfg = PreconfirmerConfig::try_load(&config)?;
        let archive = obelisk_archive::shared(&cfg.bitcoin);

        let mut advancer = Advancer::new(archive, cfg.bitcoin);
        advancer.start();

        let mut subscription = context.subscribe(&cfg.chase_topic).await?;
        let chase_topic = cfg.chase_topic;
        context.clone().run(async move {
            loop {
                let Ok((_, message)) = subscription.read().await else {
                    error!("Chase subscription read failed");
                    return;
                };
                let Message::Chase(event) = message.as_ref() else {
                    continue;
                };

                // These come out of order; the advance is in order.
                let events = match event {
                    ChaseEvent::Checked { height } => advancer.handle_checked(*height),
                    ChaseEvent::Regressed { branch_point } => {
                        advancer.handle_regressed(*branch_point)
                    }
                    ChaseEvent::Disorganized { top_confirmed } => {
                        advancer.handle_disorganized(*top_confirmed)
                    }
                    ChaseEvent::Bump => advancer.bump(),
                    ChaseEvent::Stop => {
                        advancer.handle_stop();
                        continue;
                    }
                    _ => continue,
                };

                for event in events {
                    let message = Arc::new(Message::Chase(event));
                    context
                        .message_bus
                        .publish(&chase_topic, message)
                        .await
                        .unwrap_or_else(|e| error!("Failed to publish: {e}"));
                }
            }
        });

        Ok(())
    }
}
