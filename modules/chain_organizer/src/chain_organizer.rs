//! Obelisk chain organizer modules for Caryatid
//!
//! Two organizers over one algorithm: headers for the header-first
//! sync path, full blocks for the legacy path. Each runs on its own
//! module task and talks to the rest of the node only through the bus:
//! admission requests arrive on a request topic, chase events go out
//! on the chase topic.

mod delegate;
mod organizer;
mod tree;

pub use delegate::{BlockPolicy, HeaderPolicy, OrganizeDelegate};
pub use organizer::Organizer;
pub use tree::{Tree, TreeNode};

use std::sync::Arc;

use anyhow::Result;
use caryatid_sdk::{module, Context, Module};
use config::Config;
use tokio::sync::Mutex;
use tracing::{error, info};

use obelisk_common::{
    messages::{ChaseEvent, Message, OrganizeCode, OrganizeOutcome},
    settings::{BitcoinSettings, NodeSettings},
};

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OrganizerConfig {
    chase_topic: String,
    organize_header_topic: String,
    organize_block_topic: String,
    #[serde(default)]
    bitcoin: BitcoinSettings,
    #[serde(default)]
    node: NodeSettings,
}

impl OrganizerConfig {
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

/// Header organizer module
#[module(
    message_type(Message),
    name = "header-organizer",
    description = "Candidate chain organization from headers"
)]
pub struct HeaderOrganizer;

impl HeaderOrganizer {
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        run_organizer::<HeaderPolicy>(context, config, |message: &Message| match message {
            Message::OrganizeHeader(msg) => Some(Arc::new(msg.header.clone())),
            _ => None,
        })
        .await
    }
}

/// Block organizer module (pre-header-first path)
#[module(
    message_type(Message),
    name = "block-organizer",
    description = "Candidate chain organization from full blocks"
)]
pub struct BlockOrganizer;

impl BlockOrganizer {
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        run_organizer::<BlockPolicy>(context, config, |message: &Message| match message {
            Message::OrganizeBlock(msg) => Some(Arc::new(msg.block.clone())),
            _ => None,
        })
        .await
    }
}

/// Common wiring: an organize request handler plus the chase
/// subscription that drives disorganization and shutdown.
async fn run_organizer<D: OrganizeDelegate>(
    context: Arc<Context<Message>>,
    config: Arc<Config>,
    extract: fn(&Message) -> Option<Arc<D::Entry>>,
) -> Result<()> {
    let cfg = OrganizerConfig::try_load(&config)?;
    let organize_topic = if D::IS_BLOCK {
        cfg.organize_block_topic.clone()
    } else {
        cfg.organize_header_topic.clone()
    };
    info!("Organizing on '{organize_topic}', chasing on '{}'", cfg.chase_topic);

    let archive = obelisk_archive::shared(&cfg.bitcoin);
    let mut organizer = Organizer::<D>::new(archive, cfg.bitcoin, cfg.node);
    organizer.start()?;
    let organizer = Arc::new(Mutex::new(organizer));

    // Admission requests, answered with (code, height).
    let handler_organizer = organizer.clone();
    let handler_context = context.clone();
    let chase_topic = cfg.chase_topic.clone();
    context.handle(&organize_topic, move |message: Arc<Message>| {
        let organizer = handler_organizer.clone();
        let context = handler_context.clone();
        let chase_topic = chase_topic.clone();
        async move {
            let Some(entry) = extract(message.as_ref()) else {
                error!("Unexpected message type on organize topic: {message:?}");
                return Arc::new(Message::OrganizeOutcome(OrganizeOutcome::new(
                    OrganizeCode::Orphan,
                    0,
                )));
            };

            let (outcome, events) = organizer.lock().await.organize(entry);
            publish_chase(&context, &chase_topic, events).await;
            if outcome.code.is_fatal() {
                error!("Organizer fault: {:?}", outcome.code);
                publish_chase(&context, &chase_topic, vec![ChaseEvent::Stop]).await;
            }
            Arc::new(Message::OrganizeOutcome(outcome))
        }
    });

    // Chase events: invalidation triggers disorganization; stop clears
    // the tree.
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
                // Disorganization is the header organizer's job; the
                // block organizer shares the candidate chain and must
                // not race it.
                ChaseEvent::Unchecked { link }
                | ChaseEvent::Unpreconfirmable { link }
                | ChaseEvent::Unconfirmable { link }
                    if !D::IS_BLOCK =>
                {
                    let (code, events) = organizer.lock().await.disorganize(*link);
                    publish_chase(&context, &chase_topic, events).await;
                    if code.is_fatal() {
                        error!("Organizer fault on disorganize: {code:?}");
                        publish_chase(&context, &chase_topic, vec![ChaseEvent::Stop]).await;
                    }
                }
                ChaseEvent::Stop => {
                    organizer.lock().await.handle_stop();
                }
                _ => {}
            }
        }
    });

    Ok(())
}

async fn publish_chase(context: &Arc<Context<Message>>, topic: &str, events: Vec<ChaseEvent>) {
    for event in events {
        let message = Arc::new(Message::Chase(event));
        context
            .message_bus
            .publish(topic, message)
            .await
            .unwrap_or_else(|e| error!("Failed to publish chase event: {e}"));
    }
}
